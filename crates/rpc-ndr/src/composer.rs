//! Structure composer
//!
//! Structures are written field by field, each aligned to its own type. When
//! the last member is conformant (directly, or through nested structures
//! ending in one) its `max_count` is hoisted in front of the outermost
//! structure:
//!
//! ```text
//! [max_count]        <- hoisted, 4-byte aligned
//! [pad to struct alignment]
//! field 0 .. field n-1
//! [offset, actual_count]   (conformant-varying only)
//! element data
//! ```
//!
//! The hoisted count is collected from the value before anything is written,
//! then emitted; the trailing member is written without its own prefix.

use crate::align::{align_up, SIZE_FIELD_ALIGN};
use crate::context::{Marshaller, Unmarshaller};
use crate::decode::NdrDecode;
use crate::encode::NdrEncode;
use crate::error::{NdrError, Result};
use crate::handle::ContextHandle;
use crate::schema::{NdrType, PointerKind, StructDef};
use crate::value::{NdrValue, PointerValue, StructValue};
use bytes::Buf;
use std::sync::Arc;

/// Position and extent of one field, relative to the start of the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    /// Offset of the field's first byte after alignment padding
    pub offset: usize,
    /// In-place size; deferred referents are not included
    pub size: usize,
}

/// Wire layout of a top-level structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Offset of the hoisted `max_count`, for conformant structures
    pub conformance_offset: Option<usize>,
    pub fields: Vec<FieldLayout>,
    /// Where the deferred referents start
    pub deferred_offset: usize,
    /// Total encoded size, referents included
    pub total_size: usize,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Compute the wire layout `value` encodes to as a top-level structure
pub fn layout(value: &StructValue) -> Result<StructLayout> {
    let mut m = Marshaller::measuring();
    let mut fields = Vec::with_capacity(value.values().len());
    let mut conformance_offset = None;
    let mut deferred_offset = 0;
    m.in_frame(|m| {
        conformance_offset = m.encode_struct(value, false, Some(&mut fields))?;
        deferred_offset = m.writer.position();
        Ok(())
    })?;
    Ok(StructLayout {
        conformance_offset,
        fields,
        deferred_offset,
        total_size: m.position(),
    })
}

/// First pass of hoisting: the `max_count` of the trailing conformant member
fn trailing_max_count(value: &StructValue) -> Result<u32> {
    let def = value.def();
    let (Some(field), Some(last)) = (def.fields().last(), value.values().last()) else {
        return Ok(0);
    };
    let count = match (field.ty(), last) {
        (NdrType::Struct(_), NdrValue::Struct(inner)) => return trailing_max_count(inner),
        (NdrType::Array(_), NdrValue::Array(items)) => items.len(),
        (NdrType::String(st), NdrValue::String(s)) => st.wire_count(s),
        (ty, value) => {
            return Err(NdrError::TypeMismatch {
                expected: ty.to_string(),
                got: value.kind_name(),
            }
            .in_field(field.name()))
        }
    };
    u32::try_from(count).map_err(|_| NdrError::IntegerOverflow)
}

fn type_mismatch(ty: &NdrType, value: &NdrValue) -> NdrError {
    NdrError::TypeMismatch {
        expected: ty.to_string(),
        got: value.kind_name(),
    }
}

impl<'v> Marshaller<'v> {
    /// Encode `value` in place. `hoisted` is set for the trailing member of a
    /// structure whose `max_count` was already written.
    pub(crate) fn encode_value(&mut self, ty: &'v NdrType, value: &'v NdrValue, hoisted: bool) -> Result<()> {
        match (ty, value) {
            (NdrType::Scalar(kind), NdrValue::Scalar(scalar)) if scalar.kind() == *kind => {
                scalar.write(&mut self.writer)
            }
            (NdrType::ContextHandle, NdrValue::ContextHandle(handle)) => handle.ndr_encode(&mut self.writer),
            (NdrType::Array(at), NdrValue::Array(items)) => self.encode_array(at, items, hoisted),
            (NdrType::String(st), NdrValue::String(s)) => self.encode_string(st, s, hoisted),
            (NdrType::Pointer(pt), NdrValue::Pointer(pv)) => self.encode_pointer(pt, pv).map(drop),
            (NdrType::Struct(def), NdrValue::Struct(sv)) if sv.def() == def => {
                self.encode_struct(sv, hoisted, None).map(drop)
            }
            (ty, value) => Err(type_mismatch(ty, value)),
        }
    }

    /// Encode a structure, returning the offset of the hoisted `max_count`
    /// when this call wrote one. Field layouts are appended to `record`.
    pub(crate) fn encode_struct(
        &mut self,
        value: &'v StructValue,
        hoisted: bool,
        mut record: Option<&mut Vec<FieldLayout>>,
    ) -> Result<Option<usize>> {
        let def: &'v StructDef = value.def();
        let mut conformance_offset = None;
        if def.is_conformant() && !hoisted {
            let max_count = trailing_max_count(value)?;
            self.writer.align(SIZE_FIELD_ALIGN);
            conformance_offset = Some(self.writer.position());
            self.writer.put_u32(max_count);
        }
        self.writer.align(def.align());

        let count = def.fields().len();
        let mut ref_ids: Vec<Option<u32>> = Vec::with_capacity(count);
        for (index, (field, field_value)) in def.fields().iter().zip(value.values()).enumerate() {
            let start = self.writer.position();
            let trailing = index + 1 == count && def.is_conformant();
            let ref_id = self
                .encode_field(value, index, field_value, &ref_ids, trailing)
                .map_err(|e| e.in_field(field.name()))?;
            ref_ids.push(ref_id);

            if let Some(fields) = record.as_deref_mut() {
                let end = self.writer.position();
                let offset = align_up(start, field.ty().align()).min(end);
                fields.push(FieldLayout {
                    name: field.name().to_string(),
                    offset,
                    size: end - offset,
                });
            }
        }
        Ok(conformance_offset)
    }

    fn encode_field(
        &mut self,
        owner: &'v StructValue,
        index: usize,
        value: &'v NdrValue,
        ref_ids: &[Option<u32>],
        hoisted: bool,
    ) -> Result<Option<u32>> {
        let def = owner.def();
        let ty = def.fields()[index].ty();

        if let Some(derived) = owner.derived_scalar(index)? {
            derived.write(&mut self.writer)?;
            return Ok(None);
        }

        match (ty, value) {
            (NdrType::Pointer(pt), NdrValue::Pointer(PointerValue::Alias(target))) => {
                let alias_error = |target: usize| {
                    let field = def.fields()[index].name().to_string();
                    let target = def
                        .fields()
                        .get(target)
                        .map_or_else(|| format!("#{target}"), |f| f.name().to_string());
                    (field, target)
                };
                if pt.kind != PointerKind::Full {
                    return Err(NdrError::AliasNotAllowed(def.fields()[index].name().to_string()));
                }
                let Some(target_ref_id) = ref_ids.get(*target) else {
                    let (field, target) = alias_error(*target);
                    return Err(NdrError::AliasForwardReference { field, target });
                };
                if def.fields()[*target].ty() != ty {
                    let (field, target) = alias_error(*target);
                    return Err(NdrError::AliasTypeMismatch { field, target });
                }
                self.encode_alias(pt, *target_ref_id)
            }
            (NdrType::Pointer(pt), NdrValue::Pointer(pv)) => self.encode_pointer(pt, pv),
            (ty, value) => self.encode_value(ty, value, hoisted).map(|()| None),
        }
    }
}

impl<'s, B: Buf> Unmarshaller<'s, B> {
    /// Decode a value in place. `hoisted` carries a `max_count` already read
    /// from the front of the enclosing structure.
    pub(crate) fn decode_value(&mut self, ty: &'s NdrType, hoisted: Option<u32>) -> Result<NdrValue> {
        Ok(match ty {
            NdrType::Scalar(kind) => NdrValue::Scalar(kind.read(&mut self.reader)?),
            NdrType::ContextHandle => NdrValue::ContextHandle(ContextHandle::ndr_decode(&mut self.reader)?),
            NdrType::Array(at) => NdrValue::Array(self.decode_array(at, hoisted)?),
            NdrType::String(st) => NdrValue::String(self.decode_string(st, hoisted)?),
            NdrType::Pointer(pt) => NdrValue::Pointer(self.decode_pointer(pt, None)?),
            NdrType::Struct(def) => NdrValue::Struct(self.decode_struct(def, hoisted)?),
        })
    }

    pub(crate) fn decode_struct(&mut self, def: &'s Arc<StructDef>, hoisted: Option<u32>) -> Result<StructValue> {
        let hoisted = match hoisted {
            Some(max_count) => Some(max_count),
            None if def.is_conformant() => {
                self.reader.align(SIZE_FIELD_ALIGN)?;
                Some(self.reader.get_u32()?)
            }
            None => None,
        };
        self.reader.align(def.align())?;

        let instance = self.next_instance();
        let count = def.fields().len();
        let mut fields = Vec::with_capacity(count);
        for (index, field) in def.fields().iter().enumerate() {
            let trailing = if index + 1 == count { hoisted } else { None };
            self.path.push(index);
            let value = match field.ty() {
                NdrType::Pointer(pt) => self
                    .decode_pointer(pt, Some((instance, index)))
                    .map(NdrValue::Pointer),
                ty => self.decode_value(ty, trailing),
            };
            self.path.pop();
            fields.push(value.map_err(|e| e.in_field(field.name()))?);
        }
        Ok(StructValue::from_parts(def.clone(), fields))
    }
}
