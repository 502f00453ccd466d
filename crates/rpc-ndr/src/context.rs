//! Top-level marshaling context
//!
//! A [`Marshaller`] or [`Unmarshaller`] covers one message. Referent IDs are
//! unique within it and every top-level value (one RPC parameter) opens its
//! own deferral frame: referents of pointers embedded anywhere inside the
//! value, including nested structures and array elements, are written after
//! the value in the order their pointers were encountered.

use crate::config::NdrConfig;
use crate::error::{NdrError, Result};
use crate::pointers::{ReferentArena, ReferentState, ReferentTable};
use crate::schema::{NdrType, PointerKind, StructDef};
use crate::stream::{NdrReader, NdrWriter};
use crate::value::{NdrValue, StructValue};
use bytes::{Buf, Bytes};
use std::sync::Arc;
use tracing::debug;

/// Referent queued behind the current top-level value
#[derive(Debug)]
struct Deferred<'v> {
    ref_id: u32,
    ty: &'v NdrType,
    value: &'v NdrValue,
}

/// Message encoder
///
/// ```
/// use rpc_ndr::{Marshaller, NdrType, NdrValue};
///
/// let ty = NdrType::pointer(NdrType::uint32());
/// let value = NdrValue::pointer_to(5u32);
/// let bytes = Marshaller::new().push(&ty, &value).unwrap().finish();
/// assert_eq!(&bytes[..], &[0x00, 0x00, 0x02, 0x00, 0x05, 0x00, 0x00, 0x00]);
/// ```
#[derive(Debug)]
pub struct Marshaller<'v> {
    pub(crate) writer: NdrWriter,
    pub(crate) arena: ReferentArena,
    frames: Vec<Vec<Deferred<'v>>>,
}

impl Default for Marshaller<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'v> Marshaller<'v> {
    pub fn new() -> Self {
        Self::with_config(NdrConfig::default())
    }

    pub fn with_config(config: NdrConfig) -> Self {
        Self {
            writer: NdrWriter::new(),
            arena: ReferentArena::new(config.initial_ref_id),
            frames: Vec::new(),
        }
    }

    /// Marshaller that computes sizes without producing bytes
    pub fn measuring() -> Self {
        Self {
            writer: NdrWriter::measuring(),
            ..Self::new()
        }
    }

    /// Append one top-level value.
    ///
    /// A top-level `[ref]` pointer has no wire representation; its referent
    /// is written in its place.
    pub fn push(mut self, ty: &'v NdrType, value: &'v NdrValue) -> Result<Self> {
        if let (NdrType::Pointer(pt), NdrValue::Pointer(pv)) = (ty, value) {
            if pt.kind == PointerKind::Ref {
                let referent = pv.referent().ok_or(NdrError::NullRefPointer)?;
                return self.push(&pt.pointee, referent);
            }
        }
        debug!("marshalling top-level {} at offset {}", ty, self.writer.position());
        self.in_frame(|m| m.encode_value(ty, value, false))?;
        Ok(self)
    }

    /// Append one top-level structure
    pub fn push_struct(mut self, value: &'v StructValue) -> Result<Self> {
        debug!(
            "marshalling top-level struct {} at offset {}",
            value.def().name(),
            self.writer.position()
        );
        self.in_frame(|m| m.encode_struct(value, false, None).map(drop))?;
        Ok(self)
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.writer.position()
    }

    /// Lifecycle state of a referent allocated by this marshaller
    pub fn referent_state(&self, ref_id: u32) -> Option<ReferentState> {
        self.arena.state(ref_id)
    }

    pub fn finish(self) -> Bytes {
        self.writer.into_bytes()
    }

    pub(crate) fn defer(&mut self, ref_id: u32, ty: &'v NdrType, value: &'v NdrValue) {
        if let Some(frame) = self.frames.last_mut() {
            self.arena.mark_deferred(ref_id);
            frame.push(Deferred { ref_id, ty, value });
        }
    }

    /// Run `encode` with a fresh deferral frame, then write the referents it
    /// queued, each as a top-level value of its own.
    pub(crate) fn in_frame<F>(&mut self, encode: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.frames.push(Vec::new());
        let result = encode(self);
        let frame = self.frames.pop().unwrap_or_default();
        result?;

        if !frame.is_empty() {
            debug!(
                "writing {} deferred referents at offset {}",
                frame.len(),
                self.writer.position()
            );
        }
        for deferred in frame {
            self.write_body(deferred.ty, deferred.value)?;
            self.arena.mark_written(deferred.ref_id);
        }
        Ok(())
    }

    /// Referent body in a frame of its own. Kept non-generic so the frame
    /// recursion instantiates `in_frame` only once.
    fn write_body(&mut self, ty: &'v NdrType, value: &'v NdrValue) -> Result<()> {
        self.in_frame(|m| m.encode_value(ty, value, false))
    }
}

/// Decode-side referent waiting for its frame to drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    /// First occurrence: the body follows in the stream
    Body,
    /// Repeat of a referent whose body is queued earlier in the same frame
    CopyOf,
}

#[derive(Debug)]
struct Pending<'s> {
    ref_id: u32,
    ty: &'s NdrType,
    kind: PendingKind,
    /// Location of the pointer inside the frame's root value
    path: Vec<usize>,
}

#[derive(Debug)]
struct DecodeFrame<'s> {
    id: u64,
    pending: Vec<Pending<'s>>,
}

/// Message decoder
///
/// Decoding is driven by the schema: each [`pull`](Self::pull) reads one
/// top-level value followed by its deferred referents.
#[derive(Debug)]
pub struct Unmarshaller<'s, B> {
    pub(crate) reader: NdrReader<B>,
    pub(crate) config: NdrConfig,
    pub(crate) referents: ReferentTable,
    frames: Vec<DecodeFrame<'s>>,
    next_frame: u64,
    next_instance: u64,
    pub(crate) path: Vec<usize>,
}

impl<'s, B: Buf> Unmarshaller<'s, B> {
    pub fn new(buf: B) -> Self {
        Self::with_config(buf, NdrConfig::default())
    }

    pub fn with_config(buf: B, config: NdrConfig) -> Self {
        Self {
            reader: NdrReader::new(buf),
            config,
            referents: ReferentTable::default(),
            frames: Vec::new(),
            next_frame: 0,
            next_instance: 0,
            path: Vec::new(),
        }
    }

    /// Read one top-level value
    pub fn pull(&mut self, ty: &'s NdrType) -> Result<NdrValue> {
        debug!("unmarshalling top-level {} at offset {}", ty, self.reader.position());
        if let NdrType::Pointer(pt) = ty {
            if pt.kind == PointerKind::Ref {
                let referent = self.in_frame(|u| u.decode_value(&pt.pointee, None))?;
                return Ok(NdrValue::pointer_to(referent));
            }
        }
        self.in_frame(|u| u.decode_value(ty, None))
    }

    /// Read one top-level structure
    pub fn pull_struct(&mut self, def: &'s Arc<StructDef>) -> Result<StructValue> {
        debug!(
            "unmarshalling top-level struct {} at offset {}",
            def.name(),
            self.reader.position()
        );
        match self.in_frame(|u| u.decode_struct(def, None).map(NdrValue::Struct))? {
            NdrValue::Struct(value) => Ok(value),
            other => Err(NdrError::TypeMismatch {
                expected: format!("struct {}", def.name()),
                got: other.kind_name(),
            }),
        }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.reader.position()
    }

    pub fn remaining(&self) -> usize {
        self.reader.remaining()
    }

    pub fn into_inner(self) -> B {
        self.reader.into_inner()
    }

    pub(crate) fn current_frame(&self) -> u64 {
        self.frames.last().map_or(u64::MAX, |frame| frame.id)
    }

    /// Identifier for the next structure instance, used to recognise
    /// sibling aliases
    pub(crate) fn next_instance(&mut self) -> u64 {
        let instance = self.next_instance;
        self.next_instance += 1;
        instance
    }

    pub(crate) fn defer(&mut self, ref_id: u32, ty: &'s NdrType, kind: PendingKind) {
        let path = self.path.clone();
        if let Some(frame) = self.frames.last_mut() {
            frame.pending.push(Pending {
                ref_id,
                ty,
                kind,
                path,
            });
        }
    }

    /// Run `decode` with a fresh deferral frame, then read the referents it
    /// queued and place them into the decoded value.
    fn in_frame<F>(&mut self, decode: F) -> Result<NdrValue>
    where
        F: FnOnce(&mut Self) -> Result<NdrValue>,
    {
        let saved_path = std::mem::take(&mut self.path);
        let id = self.next_frame;
        self.next_frame += 1;
        self.frames.push(DecodeFrame {
            id,
            pending: Vec::new(),
        });

        let result = decode(self);
        let frame = self.frames.pop();
        let result = match (result, frame) {
            (Ok(mut root), Some(frame)) => self.drain(frame.pending, &mut root).map(|()| root),
            (result, _) => result,
        };
        self.path = saved_path;
        result
    }

    fn drain(&mut self, pending: Vec<Pending<'s>>, root: &mut NdrValue) -> Result<()> {
        if !pending.is_empty() {
            debug!(
                "reading {} deferred referents at offset {}",
                pending.len(),
                self.reader.position()
            );
        }
        for entry in pending {
            let value = match entry.kind {
                PendingKind::Body => {
                    let value = self.in_frame(|u| u.decode_value(entry.ty, None))?;
                    self.referents.store(entry.ref_id, value.clone());
                    value
                }
                PendingKind::CopyOf => self
                    .referents
                    .value(entry.ref_id)
                    .cloned()
                    .ok_or(NdrError::UnresolvedAlias(entry.ref_id))?,
            };
            let slot = root
                .slot_mut(&entry.path)
                .ok_or(NdrError::UnresolvedAlias(entry.ref_id))?;
            *slot = NdrValue::pointer_to(value);
        }
        Ok(())
    }
}

/// Encode a single top-level value
pub fn encode(ty: &NdrType, value: &NdrValue) -> Result<Bytes> {
    Ok(Marshaller::new().push(ty, value)?.finish())
}

/// Encode a single top-level structure
pub fn encode_struct(value: &StructValue) -> Result<Bytes> {
    Ok(Marshaller::new().push_struct(value)?.finish())
}

/// Encoded size of a top-level structure, deferred referents included,
/// computed without allocating the output
pub fn encoded_len(value: &StructValue) -> Result<usize> {
    Ok(Marshaller::measuring().push_struct(value)?.position())
}

/// Decode a single top-level value, returning it with the number of bytes
/// consumed
pub fn decode(ty: &NdrType, bytes: &[u8]) -> Result<(NdrValue, usize)> {
    let mut u = Unmarshaller::new(bytes);
    let value = u.pull(ty)?;
    Ok((value, u.position()))
}

/// Decode a single top-level structure
pub fn decode_struct(def: &Arc<StructDef>, bytes: &[u8]) -> Result<(StructValue, usize)> {
    let mut u = Unmarshaller::new(bytes);
    let value = u.pull_struct(def)?;
    Ok((value, u.position()))
}
