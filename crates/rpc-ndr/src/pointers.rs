//! NDR pointer and referent engine
//!
//! NDR supports three pointer semantics:
//!
//! - Reference (`[ref]`): never null; as a top-level value it has no wire
//!   representation, embedded it carries a referent ID like the others
//! - Unique (`[unique]`): nullable, 4-byte referent ID, no aliasing
//! - Full (`[ptr]`): nullable, 4-byte referent ID, aliasing allowed
//!
//! A non-null pointer writes its referent ID in place and queues its referent
//! on the current deferral frame; the referent body follows the enclosing
//! top-level value. Aliases repeat the target's referent ID and never carry a
//! body.

use crate::align::POINTER_ALIGN;
use crate::context::{Marshaller, PendingKind, Unmarshaller};
use crate::error::{NdrError, Result};
use crate::schema::{NdrType, PointerKind, PointerType};
use crate::value::{NdrValue, PointerValue};
use bytes::Buf;
use std::collections::HashMap;
use tracing::trace;

/// Lifecycle of a referent on the encode side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentState {
    /// ID assigned and written in place
    Referenced,
    /// Body queued behind the current top-level value
    Deferred,
    /// Body written
    Written,
}

/// Per-message referent ID allocator.
///
/// Slots are indexed by `ref_id - initial_ref_id`, so IDs are dense and
/// strictly increasing in allocation order.
#[derive(Debug)]
pub struct ReferentArena {
    initial: u32,
    states: Vec<ReferentState>,
}

impl ReferentArena {
    pub fn new(initial_ref_id: u32) -> Self {
        Self {
            initial: initial_ref_id,
            states: Vec::new(),
        }
    }

    /// Assign the next referent ID
    pub fn allocate(&mut self) -> Result<u32> {
        let offset = u32::try_from(self.states.len()).map_err(|_| NdrError::IntegerOverflow)?;
        let ref_id = self.initial.checked_add(offset).ok_or(NdrError::IntegerOverflow)?;
        self.states.push(ReferentState::Referenced);
        trace!("allocated referent 0x{:08x}", ref_id);
        Ok(ref_id)
    }

    /// ID the next allocation will return
    pub fn next_ref_id(&self) -> u32 {
        self.initial.wrapping_add(self.states.len() as u32)
    }

    pub fn state(&self, ref_id: u32) -> Option<ReferentState> {
        let index = ref_id.checked_sub(self.initial)? as usize;
        self.states.get(index).copied()
    }

    fn set_state(&mut self, ref_id: u32, state: ReferentState) {
        if let Some(index) = ref_id.checked_sub(self.initial) {
            if let Some(slot) = self.states.get_mut(index as usize) {
                *slot = state;
            }
        }
    }

    pub(crate) fn mark_deferred(&mut self, ref_id: u32) {
        self.set_state(ref_id, ReferentState::Deferred);
    }

    pub(crate) fn mark_written(&mut self, ref_id: u32) {
        self.set_state(ref_id, ReferentState::Written);
    }

    /// Number of referent IDs handed out
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Structure instance and field index that introduced a referent ID
pub(crate) type Owner = (u64, usize);

#[derive(Debug)]
struct ReferentSlot {
    owner: Option<Owner>,
    frame: u64,
    pointee: NdrType,
    value: Option<NdrValue>,
}

/// Decode-side table of referent IDs seen in one message
#[derive(Debug, Default)]
pub(crate) struct ReferentTable {
    slots: HashMap<u32, ReferentSlot>,
}

impl ReferentTable {
    fn reserve(&mut self, ref_id: u32, owner: Option<Owner>, frame: u64, pointee: &NdrType) {
        self.slots.insert(
            ref_id,
            ReferentSlot {
                owner,
                frame,
                pointee: pointee.clone(),
                value: None,
            },
        );
    }

    /// Cache a decoded referent body
    pub(crate) fn store(&mut self, ref_id: u32, value: NdrValue) {
        if let Some(slot) = self.slots.get_mut(&ref_id) {
            slot.value = Some(value);
        }
    }

    pub(crate) fn value(&self, ref_id: u32) -> Option<&NdrValue> {
        self.slots.get(&ref_id).and_then(|slot| slot.value.as_ref())
    }
}

impl<'v> Marshaller<'v> {
    /// Write a pointer in place and queue its referent.
    ///
    /// Returns the referent ID written, `None` for a null pointer. Alias
    /// values are resolved by the structure composer, which knows the
    /// sibling IDs.
    pub(crate) fn encode_pointer(&mut self, pt: &'v PointerType, pv: &'v PointerValue) -> Result<Option<u32>> {
        self.writer.align(POINTER_ALIGN);
        match pv {
            PointerValue::Unassigned | PointerValue::Null => {
                if pt.kind == PointerKind::Ref {
                    return Err(NdrError::NullRefPointer);
                }
                self.writer.put_u32(0);
                Ok(None)
            }
            PointerValue::Referent(value) => {
                let ref_id = self.arena.allocate()?;
                self.writer.put_u32(ref_id);
                self.defer(ref_id, &pt.pointee, value);
                Ok(Some(ref_id))
            }
            PointerValue::Alias(_) => Err(NdrError::AliasOutsideStruct),
        }
    }

    /// Write an alias: the target's referent ID, or null when the target is null
    pub(crate) fn encode_alias(&mut self, pt: &PointerType, target_ref_id: Option<u32>) -> Result<Option<u32>> {
        self.writer.align(POINTER_ALIGN);
        match target_ref_id {
            Some(ref_id) => {
                trace!("alias of referent 0x{:08x}", ref_id);
                self.writer.put_u32(ref_id);
                Ok(Some(ref_id))
            }
            None if pt.kind == PointerKind::Ref => Err(NdrError::NullRefPointer),
            None => {
                self.writer.put_u32(0);
                Ok(None)
            }
        }
    }
}

impl<'s, B: Buf> Unmarshaller<'s, B> {
    /// Read a pointer in place.
    ///
    /// A first-seen referent ID leaves a placeholder that is filled when the
    /// current deferral frame drains. A repeated ID resolves to
    /// [`PointerValue::Alias`] when it first appeared in a sibling full
    /// pointer of the same structure, and otherwise to a copy of the cached
    /// referent.
    pub(crate) fn decode_pointer(&mut self, pt: &'s PointerType, owner: Option<Owner>) -> Result<PointerValue> {
        self.reader.align(POINTER_ALIGN)?;
        let position = self.reader.position();
        let ref_id = self.reader.get_u32()?;
        if ref_id == 0 {
            if pt.kind == PointerKind::Ref {
                return Err(NdrError::NullRefPointer);
            }
            return Ok(PointerValue::Null);
        }

        let frame = self.current_frame();
        let Some(slot) = self.referents.slots.get(&ref_id) else {
            trace!("referent 0x{:08x} at offset {}", ref_id, position);
            self.referents.reserve(ref_id, owner, frame, &pt.pointee);
            self.defer(ref_id, &pt.pointee, PendingKind::Body);
            return Ok(PointerValue::Unassigned);
        };

        trace!("repeated referent 0x{:08x} at offset {}", ref_id, position);
        // One referent ID names one referent, of one type
        if slot.pointee != *pt.pointee {
            return Err(NdrError::TypeMismatch {
                expected: slot.pointee.to_string(),
                got: pt.pointee.to_string(),
            });
        }
        if let (Some((instance, _)), Some((first_instance, first_field))) = (owner, slot.owner) {
            if instance == first_instance && pt.kind == PointerKind::Full {
                return Ok(PointerValue::Alias(first_field));
            }
        }
        if let Some(value) = &slot.value {
            return Ok(PointerValue::Referent(Box::new(value.clone())));
        }
        if slot.frame == frame {
            self.defer(ref_id, &pt.pointee, PendingKind::CopyOf);
            return Ok(PointerValue::Unassigned);
        }
        Err(NdrError::UnresolvedAlias(ref_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INITIAL_REF_ID;

    #[test]
    fn test_arena_ids_are_dense() {
        let mut arena = ReferentArena::new(DEFAULT_INITIAL_REF_ID);
        assert!(arena.is_empty());
        assert_eq!(arena.allocate().unwrap(), 0x0002_0000);
        assert_eq!(arena.allocate().unwrap(), 0x0002_0001);
        assert_eq!(arena.next_ref_id(), 0x0002_0002);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_arena_state_transitions() {
        let mut arena = ReferentArena::new(0x100);
        let id = arena.allocate().unwrap();
        assert_eq!(arena.state(id), Some(ReferentState::Referenced));
        arena.mark_deferred(id);
        assert_eq!(arena.state(id), Some(ReferentState::Deferred));
        arena.mark_written(id);
        assert_eq!(arena.state(id), Some(ReferentState::Written));
        assert_eq!(arena.state(0xFF), None);
        assert_eq!(arena.state(0x101), None);
    }

    #[test]
    fn test_arena_overflow() {
        let mut arena = ReferentArena::new(u32::MAX);
        assert_eq!(arena.allocate().unwrap(), u32::MAX);
        assert!(matches!(arena.allocate(), Err(NdrError::IntegerOverflow)));
    }

    #[test]
    fn test_table_caches_bodies() {
        let mut table = ReferentTable::default();
        table.reserve(0x20000, Some((0, 1)), 0, &NdrType::uint32());
        assert!(table.value(0x20000).is_none());
        table.store(0x20000, NdrValue::from(5u32));
        assert_eq!(table.value(0x20000), Some(&NdrValue::from(5u32)));
    }
}
