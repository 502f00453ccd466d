//! Values of NDR types
//!
//! [`NdrValue`] is the in-memory form of anything an [`NdrType`] describes.
//! Structure values are bound to their schema: [`StructValue::set`] checks
//! and converts every assignment against the declared field type, so value
//! errors surface when a value is built rather than when it is sent.

use crate::error::{NdrError, Result};
use crate::handle::ContextHandle;
use crate::scalar::{FileTime, Scalar, ScalarKind};
use crate::schema::{ArrayKind, ArrayType, CharWidth, Derived, NdrType, PointerKind, StringType, StructDef};
use std::sync::Arc;

/// Pointer state as seen by the caller.
///
/// `Unassigned` and `Null` compare equal: both go on the wire as a zero
/// referent ID and decode as `Null`.
#[derive(Debug, Clone, Default)]
pub enum PointerValue {
    /// Freshly constructed; encodes like `Null`
    #[default]
    Unassigned,
    /// Explicit null pointer
    Null,
    /// Owns its referent
    Referent(Box<NdrValue>),
    /// Shares the referent of the sibling pointer field at this index
    Alias(usize),
}

impl PointerValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PointerValue::Unassigned | PointerValue::Null)
    }

    pub fn referent(&self) -> Option<&NdrValue> {
        match self {
            PointerValue::Referent(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for PointerValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PointerValue::Referent(a), PointerValue::Referent(b)) => a == b,
            (PointerValue::Alias(a), PointerValue::Alias(b)) => a == b,
            (a, b) => a.is_null() && b.is_null(),
        }
    }
}

/// A value of some [`NdrType`]
#[derive(Debug, Clone, PartialEq)]
pub enum NdrValue {
    Scalar(Scalar),
    Array(Vec<NdrValue>),
    /// String content without its null terminator
    String(String),
    Pointer(PointerValue),
    Struct(StructValue),
    ContextHandle(ContextHandle),
}

impl NdrValue {
    pub fn null() -> Self {
        NdrValue::Pointer(PointerValue::Null)
    }

    /// Non-null pointer owning `value`
    pub fn pointer_to(value: impl Into<NdrValue>) -> Self {
        NdrValue::Pointer(PointerValue::Referent(Box::new(value.into())))
    }

    /// Short description used in error messages
    pub fn kind_name(&self) -> String {
        match self {
            NdrValue::Scalar(s) => s.kind().to_string(),
            NdrValue::Array(items) => format!("array of {} elements", items.len()),
            NdrValue::String(_) => "string".to_string(),
            NdrValue::Pointer(PointerValue::Unassigned) => "unassigned pointer".to_string(),
            NdrValue::Pointer(PointerValue::Null) => "null pointer".to_string(),
            NdrValue::Pointer(PointerValue::Referent(v)) => format!("pointer to {}", v.kind_name()),
            NdrValue::Pointer(PointerValue::Alias(i)) => format!("alias of field #{i}"),
            NdrValue::Struct(sv) => format!("struct {}", sv.def.name()),
            NdrValue::ContextHandle(_) => "context handle".to_string(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            NdrValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value of an integer scalar
    pub fn as_u64(&self) -> Option<u64> {
        self.as_scalar()
            .and_then(Scalar::as_integer)
            .and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NdrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[NdrValue]> {
        match self {
            NdrValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            NdrValue::Struct(sv) => Some(sv),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&PointerValue> {
        match self {
            NdrValue::Pointer(pv) => Some(pv),
            _ => None,
        }
    }

    /// Referent of a non-null, non-alias pointer
    pub fn referent(&self) -> Option<&NdrValue> {
        self.as_pointer().and_then(PointerValue::referent)
    }

    /// Descend along child indices: struct fields, array elements, and
    /// index 0 for a pointer's referent.
    pub(crate) fn slot_mut(&mut self, path: &[usize]) -> Option<&mut NdrValue> {
        let Some((&first, rest)) = path.split_first() else {
            return Some(self);
        };
        let child = match self {
            NdrValue::Struct(sv) => sv.fields.get_mut(first)?,
            NdrValue::Array(items) => items.get_mut(first)?,
            NdrValue::Pointer(PointerValue::Referent(value)) if first == 0 => value.as_mut(),
            _ => return None,
        };
        child.slot_mut(rest)
    }
}

macro_rules! impl_from_scalar {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for NdrValue {
            fn from(value: $ty) -> Self {
                NdrValue::Scalar(Scalar::$variant(value))
            }
        }
    };
}

impl_from_scalar!(u8, Uint8);
impl_from_scalar!(u16, Uint16);
impl_from_scalar!(u32, Uint32);
impl_from_scalar!(u64, Uint64);
impl_from_scalar!(bool, Boolean);
impl_from_scalar!(i16, Enum16);
impl_from_scalar!(FileTime, FileTime);

impl From<Scalar> for NdrValue {
    fn from(value: Scalar) -> Self {
        NdrValue::Scalar(value)
    }
}

impl From<char> for NdrValue {
    fn from(value: char) -> Self {
        NdrValue::String(value.to_string())
    }
}

impl From<&str> for NdrValue {
    fn from(value: &str) -> Self {
        NdrValue::String(value.to_string())
    }
}

impl From<String> for NdrValue {
    fn from(value: String) -> Self {
        NdrValue::String(value)
    }
}

impl<T: Into<NdrValue>> From<Vec<T>> for NdrValue {
    fn from(items: Vec<T>) -> Self {
        NdrValue::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<PointerValue> for NdrValue {
    fn from(value: PointerValue) -> Self {
        NdrValue::Pointer(value)
    }
}

impl From<StructValue> for NdrValue {
    fn from(value: StructValue) -> Self {
        NdrValue::Struct(value)
    }
}

impl From<ContextHandle> for NdrValue {
    fn from(value: ContextHandle) -> Self {
        NdrValue::ContextHandle(value)
    }
}

fn mismatch(expected: &NdrType, got: &NdrValue) -> NdrError {
    NdrError::TypeMismatch {
        expected: expected.to_string(),
        got: got.kind_name(),
    }
}

/// Integer scalar of `kind` holding `value`, if it fits
pub(crate) fn integer_scalar(kind: ScalarKind, value: i128) -> Result<Scalar> {
    let out_of_range = || NdrError::ValueOutOfRange {
        kind: kind.to_string(),
        value,
    };
    Ok(match kind {
        ScalarKind::Uint8 => Scalar::Uint8(u8::try_from(value).map_err(|_| out_of_range())?),
        ScalarKind::Uint16 => Scalar::Uint16(u16::try_from(value).map_err(|_| out_of_range())?),
        ScalarKind::Uint32 => Scalar::Uint32(u32::try_from(value).map_err(|_| out_of_range())?),
        ScalarKind::Uint64 => Scalar::Uint64(u64::try_from(value).map_err(|_| out_of_range())?),
        ScalarKind::Enum16 => Scalar::Enum16(i16::try_from(value).map_err(|_| out_of_range())?),
        _ => return Err(out_of_range()),
    })
}

fn coerce_scalar(kind: ScalarKind, value: NdrValue) -> Result<Scalar> {
    match (kind, &value) {
        (_, NdrValue::Scalar(s)) if s.kind() == kind => Ok(*s),
        (ScalarKind::Char, NdrValue::String(s)) => Ok(Scalar::char_from_str(s)),
        (ScalarKind::WideChar, NdrValue::String(s)) => Ok(Scalar::wide_char_from_str(s)),
        (ScalarKind::WideChar, NdrValue::Scalar(Scalar::Char(c))) => Ok(Scalar::WideChar((*c).into())),
        (ScalarKind::Char | ScalarKind::WideChar, other) => Err(NdrError::NotACharacter(other.kind_name())),
        (ScalarKind::FileTime, NdrValue::Scalar(Scalar::Uint64(ticks))) => {
            Ok(Scalar::FileTime(FileTime(*ticks)))
        }
        (
            ScalarKind::Uint8 | ScalarKind::Uint16 | ScalarKind::Uint32 | ScalarKind::Uint64 | ScalarKind::Enum16,
            NdrValue::Scalar(s),
        ) => match s.as_integer() {
            Some(v) => integer_scalar(kind, v),
            None => Err(mismatch(&NdrType::Scalar(kind), &value)),
        },
        _ => Err(mismatch(&NdrType::Scalar(kind), &value)),
    }
}

impl StringType {
    /// Apply the terminator convention to a plain Rust string: a trailing
    /// NUL is implicit for null-terminated strings and is stripped.
    pub fn normalize(&self, mut s: String) -> String {
        if self.null_terminated && s.ends_with('\0') {
            s.pop();
        }
        s
    }

    /// Content length in code units
    pub fn content_units(&self, s: &str) -> usize {
        match self.width {
            CharWidth::Narrow => s.len(),
            CharWidth::Wide => s.encode_utf16().count(),
        }
    }

    /// Count written to the size fields (terminator included)
    pub fn wire_count(&self, s: &str) -> usize {
        match self.kind {
            ArrayKind::Fixed(n) => n,
            _ => self.content_units(s) + usize::from(self.null_terminated),
        }
    }

    pub(crate) fn check_fixed_len(&self, s: &str) -> Result<()> {
        if let ArrayKind::Fixed(limit) = self.kind {
            // Trailing NULs are indistinguishable from the zero padding
            if !self.null_terminated && s.ends_with('\0') {
                return Err(NdrError::InvalidString(
                    "trailing NUL in unterminated fixed-length string".to_string(),
                ));
            }
            let got = self.content_units(s) + usize::from(self.null_terminated);
            if got > limit {
                return Err(NdrError::FixedLengthExceeded { limit, got });
            }
        }
        Ok(())
    }
}

impl ArrayType {
    fn coerce_items(&self, items: Vec<NdrValue>) -> Result<Vec<NdrValue>> {
        let mut items = items
            .into_iter()
            .map(|item| self.element.coerce(item))
            .collect::<Result<Vec<_>>>()?;
        if let ArrayKind::Fixed(limit) = self.kind {
            if items.len() > limit {
                return Err(NdrError::FixedLengthExceeded {
                    limit,
                    got: items.len(),
                });
            }
            items.resize_with(limit, || self.element.default_value());
        }
        Ok(items)
    }
}

impl NdrType {
    /// Check `value` against this type and convert it where the conversion
    /// is lossless or explicitly defined (first code unit of a string for a
    /// character, integer widening).
    pub fn coerce(&self, value: NdrValue) -> Result<NdrValue> {
        match self {
            NdrType::Scalar(kind) => coerce_scalar(*kind, value).map(NdrValue::Scalar),
            NdrType::ContextHandle => match value {
                NdrValue::ContextHandle(_) => Ok(value),
                other => Err(mismatch(self, &other)),
            },
            NdrType::String(st) => match value {
                NdrValue::String(s) => {
                    let s = st.normalize(s);
                    st.check_fixed_len(&s)?;
                    Ok(NdrValue::String(s))
                }
                other => Err(mismatch(self, &other)),
            },
            NdrType::Array(at) => match value {
                NdrValue::Array(items) => at.coerce_items(items).map(NdrValue::Array),
                NdrValue::String(s) => {
                    let units: Vec<NdrValue> = match at.element.as_ref() {
                        NdrType::Scalar(ScalarKind::Char) => {
                            s.bytes().map(|b| NdrValue::Scalar(Scalar::Char(b))).collect()
                        }
                        NdrType::Scalar(ScalarKind::WideChar) => s
                            .encode_utf16()
                            .map(|u| NdrValue::Scalar(Scalar::WideChar(u)))
                            .collect(),
                        _ => return Err(mismatch(self, &NdrValue::String(s))),
                    };
                    at.coerce_items(units).map(NdrValue::Array)
                }
                other => Err(mismatch(self, &other)),
            },
            NdrType::Pointer(pt) => match value {
                NdrValue::Pointer(PointerValue::Referent(inner)) => Ok(NdrValue::pointer_to(pt.pointee.coerce(*inner)?)),
                NdrValue::Pointer(PointerValue::Null) if pt.kind == PointerKind::Ref => {
                    Err(NdrError::NullRefPointer)
                }
                NdrValue::Pointer(_) => Ok(value),
                other => Ok(NdrValue::pointer_to(pt.pointee.coerce(other)?)),
            },
            NdrType::Struct(def) => match value {
                NdrValue::Struct(sv) if Arc::ptr_eq(&sv.def, def) || *sv.def == **def => {
                    Ok(NdrValue::Struct(sv))
                }
                other => Err(mismatch(self, &other)),
            },
        }
    }
}

/// Structure value bound to its [`StructDef`]
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    def: Arc<StructDef>,
    fields: Vec<NdrValue>,
}

impl StructValue {
    /// Value holding every field's default, with derived fields computed
    pub fn new(def: Arc<StructDef>) -> Self {
        let fields = def.fields().iter().map(|f| f.initial_value()).collect();
        let mut value = Self { def, fields };
        value.sync_derived();
        value
    }

    pub(crate) fn from_parts(def: Arc<StructDef>, fields: Vec<NdrValue>) -> Self {
        Self { def, fields }
    }

    pub fn def(&self) -> &Arc<StructDef> {
        &self.def
    }

    pub fn values(&self) -> &[NdrValue] {
        &self.fields
    }

    /// Field names paired with their values, in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &NdrValue)> {
        self.def.fields().iter().map(|f| f.name()).zip(self.fields.iter())
    }

    fn index(&self, field: &str) -> Result<usize> {
        self.def.index_of(field).ok_or_else(|| self.def.unknown_field(field))
    }

    pub fn get(&self, field: &str) -> Result<&NdrValue> {
        let index = self.index(field)?;
        Ok(&self.fields[index])
    }

    /// Assign a field, converting the value to the declared type
    pub fn set(&mut self, field: &str, value: impl Into<NdrValue>) -> Result<()> {
        let index = self.index(field)?;
        let def = &self.def.fields()[index];
        if def.derived().is_some() {
            return Err(NdrError::DerivedFieldAssignment(field.to_string()));
        }
        let value = value.into();
        if matches!(value, NdrValue::Pointer(PointerValue::Alias(_))) {
            return Err(NdrError::TypeMismatch {
                expected: def.ty().to_string(),
                got: "alias (use set_alias)".to_string(),
            });
        }
        let value = def.ty().coerce(value).map_err(|e| e.in_field(field))?;
        self.fields[index] = value;
        self.sync_derived();
        Ok(())
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, field: &str, value: impl Into<NdrValue>) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    /// Make a pointer field null
    pub fn set_null(&mut self, field: &str) -> Result<()> {
        self.set(field, PointerValue::Null)
    }

    /// Make pointer field `field` share the referent of `target`.
    ///
    /// Both must be full pointers to the same type and `target` must be
    /// declared before `field`. The alias follows later assignments to
    /// `target`; a null target makes the alias encode as null.
    pub fn set_alias(&mut self, field: &str, target: &str) -> Result<()> {
        let index = self.index(field)?;
        let unknown_target = || NdrError::UnknownAliasTarget {
            field: field.to_string(),
            target: target.to_string(),
        };
        let target_index = self.def.index_of(target).ok_or_else(unknown_target)?;

        let fields = self.def.fields();
        let NdrType::Pointer(alias_ty) = fields[index].ty() else {
            return Err(NdrError::TypeMismatch {
                expected: "pointer".to_string(),
                got: fields[index].ty().to_string(),
            });
        };
        let NdrType::Pointer(target_ty) = fields[target_index].ty() else {
            return Err(unknown_target());
        };
        if target_index >= index {
            return Err(NdrError::AliasForwardReference {
                field: field.to_string(),
                target: target.to_string(),
            });
        }
        if alias_ty.kind != PointerKind::Full {
            return Err(NdrError::AliasNotAllowed(field.to_string()));
        }
        if target_ty.kind != PointerKind::Full {
            return Err(NdrError::AliasNotAllowed(target.to_string()));
        }
        if alias_ty.pointee != target_ty.pointee {
            return Err(NdrError::AliasTypeMismatch {
                field: field.to_string(),
                target: target.to_string(),
            });
        }

        let root = match &self.fields[target_index] {
            NdrValue::Pointer(PointerValue::Alias(root)) => *root,
            _ => target_index,
        };
        self.fields[index] = NdrValue::Pointer(PointerValue::Alias(root));
        self.sync_derived();
        Ok(())
    }

    /// Growable view of an array field (or of the array a pointer field
    /// points to, allocating an empty referent if needed)
    pub fn array_mut(&mut self, field: &str) -> Result<ArrayMut<'_>> {
        let index = self.index(field)?;
        let element = match self.def.fields()[index].ty() {
            NdrType::Array(at) => at.clone(),
            NdrType::Pointer(pt) => match pt.pointee.as_ref() {
                NdrType::Array(at) => {
                    if self.fields[index].referent().is_none() {
                        self.fields[index] = NdrValue::pointer_to(NdrValue::Array(Vec::new()));
                    }
                    at.clone()
                }
                other => return Err(array_expected(other)),
            },
            other => return Err(array_expected(other)),
        };
        Ok(ArrayMut {
            owner: self,
            index,
            ty: element,
        })
    }

    /// Mutable access to a nested structure field (or a pointed-to one,
    /// allocating a default referent if needed)
    pub fn struct_mut(&mut self, field: &str) -> Result<&mut StructValue> {
        let index = self.index(field)?;
        if let NdrType::Pointer(pt) = self.def.fields()[index].ty() {
            if let NdrType::Struct(_) = pt.pointee.as_ref() {
                if self.fields[index].referent().is_none() {
                    self.fields[index] = NdrValue::pointer_to(pt.pointee.default_value());
                }
            }
        }
        let expected = self.def.fields()[index].ty().to_string();
        let slot = match &mut self.fields[index] {
            NdrValue::Pointer(PointerValue::Referent(inner)) => inner.as_mut(),
            other => other,
        };
        match slot {
            NdrValue::Struct(sv) => Ok(sv),
            other => Err(NdrError::TypeMismatch {
                expected,
                got: other.kind_name(),
            }),
        }
    }

    /// Value of the derived field at `index`, computed from its source
    pub(crate) fn derived_scalar(&self, index: usize) -> Result<Option<Scalar>> {
        let field = &self.def.fields()[index];
        let (Some(rule), Some(source)) = (field.derived(), field.derived_source()) else {
            return Ok(None);
        };
        let NdrType::Scalar(kind) = field.ty() else {
            return Ok(None);
        };

        let (ty, value) = match (self.def.fields()[source].ty(), &self.fields[source]) {
            (NdrType::Pointer(pt), NdrValue::Pointer(pv)) => match pv {
                PointerValue::Referent(v) => (pt.pointee.as_ref(), v.as_ref()),
                PointerValue::Alias(target) => match self.fields.get(*target).and_then(NdrValue::referent) {
                    Some(v) => (pt.pointee.as_ref(), v),
                    None => return integer_scalar(*kind, 0).map(Some),
                },
                _ => return integer_scalar(*kind, 0).map(Some),
            },
            (ty, value) => (ty, value),
        };

        let (count, content, width) = match (ty, value) {
            (NdrType::String(st), NdrValue::String(s)) => {
                (st.wire_count(s), st.content_units(s), st.width.bytes())
            }
            (NdrType::Array(at), NdrValue::Array(items)) => {
                (items.len(), items.len(), at.element.fixed_width().unwrap_or(0))
            }
            (ty, value) => return Err(mismatch(ty, value)),
        };
        let result = match rule {
            Derived::CountOf(_) => count,
            Derived::ByteLengthOf(_) => content * width,
            Derived::ByteSizeOf(_) => count * width,
        };
        integer_scalar(*kind, result as i128).map(Some)
    }

    /// Recompute every derived field; values that do not fit are left as is
    fn sync_derived(&mut self) {
        for index in 0..self.fields.len() {
            if let Ok(Some(scalar)) = self.derived_scalar(index) {
                self.fields[index] = NdrValue::Scalar(scalar);
            }
        }
    }
}

fn array_expected(got: &NdrType) -> NdrError {
    NdrError::TypeMismatch {
        expected: "array".to_string(),
        got: got.to_string(),
    }
}

/// Growable view of an array field.
///
/// Reading or writing index `n` past the end extends the array to `n + 1`
/// elements, back-filling with the element type's default. Derived fields of
/// the owning structure are refreshed when the view is dropped.
pub struct ArrayMut<'a> {
    owner: &'a mut StructValue,
    index: usize,
    ty: ArrayType,
}

impl ArrayMut<'_> {
    fn items(&mut self) -> &mut Vec<NdrValue> {
        let slot = match &mut self.owner.fields[self.index] {
            NdrValue::Pointer(PointerValue::Referent(inner)) => inner.as_mut(),
            other => other,
        };
        if !matches!(slot, NdrValue::Array(_)) {
            *slot = NdrValue::Array(Vec::new());
        }
        match slot {
            NdrValue::Array(items) => items,
            _ => unreachable!("slot was just replaced with an array"),
        }
    }

    pub fn len(&mut self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.items().is_empty()
    }

    /// Extend to `len` elements with defaults; never shrinks
    pub fn grow(&mut self, len: usize) -> Result<()> {
        if let ArrayKind::Fixed(limit) = self.ty.kind {
            if len > limit {
                return Err(NdrError::FixedLengthExceeded { limit, got: len });
            }
        }
        let element = self.ty.element.clone();
        let items = self.items();
        if items.len() < len {
            items.resize_with(len, || element.default_value());
        }
        Ok(())
    }

    /// Element at `index`, growing the array if needed
    pub fn get_or_grow(&mut self, index: usize) -> Result<&mut NdrValue> {
        self.grow(index + 1)?;
        Ok(&mut self.items()[index])
    }

    /// Assign element `index`, growing the array if needed
    pub fn set(&mut self, index: usize, value: impl Into<NdrValue>) -> Result<()> {
        let value = self.ty.element.coerce(value.into())?;
        *self.get_or_grow(index)? = value;
        Ok(())
    }

    pub fn push(&mut self, value: impl Into<NdrValue>) -> Result<()> {
        let index = self.len();
        self.set(index, value)
    }

    pub fn as_slice(&mut self) -> &[NdrValue] {
        self.items().as_slice()
    }
}

impl Drop for ArrayMut<'_> {
    fn drop(&mut self) {
        self.owner.sync_derived();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StructBuilder;

    fn sample() -> Arc<StructDef> {
        StructBuilder::new("Sample")
            .field("flag", NdrType::boolean())
            .field("letter", NdrType::char())
            .field("wide", NdrType::wchar())
            .field("count", NdrType::uint16())
            .field("first", NdrType::pointer(NdrType::uint32()))
            .field("second", NdrType::pointer(NdrType::uint32()))
            .field("other", NdrType::pointer(NdrType::uint16()))
            .field("unique", NdrType::unique_pointer(NdrType::uint32()))
            .field("fixed", NdrType::fixed_array(NdrType::uint8(), 3))
            .field("items", NdrType::conformant_array(NdrType::uint32()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let value = sample().new_value();
        assert_eq!(value.get("flag").unwrap(), &NdrValue::from(false));
        assert_eq!(
            value.get("first").unwrap(),
            &NdrValue::Pointer(PointerValue::Unassigned)
        );
        assert_eq!(value.get("fixed").unwrap(), &NdrValue::from(vec![0u8, 0, 0]));
        assert_eq!(value.get("items").unwrap(), &NdrValue::Array(vec![]));
    }

    #[test]
    fn test_character_assignment_truncates() {
        let mut value = sample().new_value();
        value.set("letter", "TEST").unwrap();
        assert_eq!(value.get("letter").unwrap(), &NdrValue::Scalar(Scalar::Char(b'T')));
        value.set("wide", "Zz").unwrap();
        assert_eq!(value.get("wide").unwrap(), &NdrValue::Scalar(Scalar::WideChar(0x5A)));
    }

    #[test]
    fn test_character_rejects_non_characters() {
        let mut value = sample().new_value();
        let err = value.set("letter", 0x54u8).unwrap_err();
        assert!(matches!(err.root(), NdrError::NotACharacter(_)));
        let err = value.set("wide", true).unwrap_err();
        assert!(matches!(err.root(), NdrError::NotACharacter(_)));
    }

    #[test]
    fn test_integer_range_checked() {
        let mut value = sample().new_value();
        value.set("count", 300u32).unwrap();
        assert_eq!(value.get("count").unwrap(), &NdrValue::from(300u16));
        let err = value.set("count", 70_000u32).unwrap_err();
        assert!(matches!(err.root(), NdrError::ValueOutOfRange { .. }));
        let err = value.set("flag", 1u32).unwrap_err();
        assert!(matches!(err.root(), NdrError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unknown_field() {
        let mut value = sample().new_value();
        assert!(matches!(
            value.set("missing", 1u8).unwrap_err(),
            NdrError::UnknownField { .. }
        ));
    }

    #[test]
    fn test_pointer_assignment_wraps_value() {
        let mut value = sample().new_value();
        value.set("first", 5u32).unwrap();
        assert_eq!(value.get("first").unwrap().referent(), Some(&NdrValue::from(5u32)));
        value.set_null("first").unwrap();
        assert_eq!(value.get("first").unwrap(), &NdrValue::null());
    }

    #[test]
    fn test_alias_rules() {
        let mut value = sample().new_value();
        value.set("first", 7u32).unwrap();
        value.set_alias("second", "first").unwrap();
        assert_eq!(
            value.get("second").unwrap(),
            &NdrValue::Pointer(PointerValue::Alias(4))
        );

        let err = value.set_alias("first", "second").unwrap_err();
        assert!(matches!(err, NdrError::AliasForwardReference { .. }));

        let err = value.set_alias("second", "nope").unwrap_err();
        assert!(matches!(err, NdrError::UnknownAliasTarget { .. }));

        let err = value.set_alias("second", "flag").unwrap_err();
        assert!(matches!(err, NdrError::UnknownAliasTarget { .. }));

        let err = value.set_alias("other", "first").unwrap_err();
        assert!(matches!(err, NdrError::AliasTypeMismatch { .. }));

        let err = value.set_alias("unique", "first").unwrap_err();
        assert!(matches!(err, NdrError::AliasNotAllowed(_)));
    }

    #[test]
    fn test_alias_before_target_assignment() {
        let mut value = sample().new_value();
        value.set_alias("second", "first").unwrap();
        assert_eq!(
            value.get("second").unwrap(),
            &NdrValue::Pointer(PointerValue::Alias(4))
        );
        value.set("first", 7u32).unwrap();
        assert_eq!(
            value.get("second").unwrap(),
            &NdrValue::Pointer(PointerValue::Alias(4))
        );
    }

    #[test]
    fn test_unassigned_equals_null() {
        assert_eq!(PointerValue::Unassigned, PointerValue::Null);
        assert_ne!(PointerValue::Unassigned, PointerValue::Alias(0));
        assert_ne!(NdrValue::null(), NdrValue::pointer_to(0u32));
    }

    #[test]
    fn test_array_grows_with_defaults() {
        let mut value = sample().new_value();
        {
            let mut items = value.array_mut("items").unwrap();
            items.set(3, 9u32).unwrap();
            assert_eq!(items.len(), 4);
            assert_eq!(items.get_or_grow(5).unwrap(), &NdrValue::from(0u32));
            assert_eq!(items.len(), 6);
        }
        assert_eq!(
            value.get("items").unwrap(),
            &NdrValue::from(vec![0u32, 0, 0, 9, 0, 0])
        );
    }

    #[test]
    fn test_fixed_array_cannot_grow_past_length() {
        let mut value = sample().new_value();
        let mut fixed = value.array_mut("fixed").unwrap();
        fixed.set(2, 1u8).unwrap();
        let err = fixed.set(3, 1u8).unwrap_err();
        assert!(matches!(err, NdrError::FixedLengthExceeded { limit: 3, got: 4 }));
        drop(fixed);

        let err = value.set("fixed", vec![1u8, 2, 3, 4]).unwrap_err();
        assert!(matches!(err.root(), NdrError::FixedLengthExceeded { .. }));
        value.set("fixed", vec![1u8]).unwrap();
        assert_eq!(value.get("fixed").unwrap(), &NdrValue::from(vec![1u8, 0, 0]));
    }

    #[test]
    fn test_string_terminator_convention() {
        let def = StructBuilder::new("Names")
            .field("terminated", NdrType::pointer(NdrType::wstring()))
            .field(
                "raw",
                NdrType::pointer(NdrType::string(ArrayKind::ConformantVarying, CharWidth::Wide, false)),
            )
            .build()
            .unwrap();
        let mut value = def.new_value();
        value.set("terminated", "abc\0").unwrap();
        value.set("raw", "abc\0").unwrap();
        assert_eq!(value.get("terminated").unwrap().referent(), Some(&NdrValue::from("abc")));
        assert_eq!(value.get("raw").unwrap().referent(), Some(&NdrValue::from("abc\0")));
    }

    #[test]
    fn test_derived_fields_follow_source() {
        let def = StructBuilder::new("RPC_UNICODE_STRING")
            .derived("length", NdrType::uint16(), Derived::ByteLengthOf("buffer".into()))
            .derived("maximum_length", NdrType::uint16(), Derived::ByteSizeOf("buffer".into()))
            .field("buffer", NdrType::pointer(NdrType::wstring()))
            .build()
            .unwrap();
        let mut value = def.new_value();
        assert_eq!(value.get("length").unwrap(), &NdrValue::from(0u16));

        value.set("buffer", "Hello").unwrap();
        assert_eq!(value.get("length").unwrap(), &NdrValue::from(10u16));
        assert_eq!(value.get("maximum_length").unwrap(), &NdrValue::from(12u16));

        let err = value.set("length", 4u16).unwrap_err();
        assert!(matches!(err, NdrError::DerivedFieldAssignment(_)));
    }

    #[test]
    fn test_derived_count_tracks_array_growth() {
        let def = StructBuilder::new("Counted")
            .derived("count", NdrType::uint32(), Derived::CountOf("data".into()))
            .field("data", NdrType::pointer(NdrType::conformant_array(NdrType::uint16())))
            .build()
            .unwrap();
        let mut value = def.new_value();
        value.array_mut("data").unwrap().set(2, 1u16).unwrap();
        assert_eq!(value.get("count").unwrap(), &NdrValue::from(3u32));
        assert_eq!(value.get("count").unwrap().as_u64(), Some(3));
        assert_eq!(value.get("data").unwrap().as_u64(), None);
    }

    #[test]
    fn test_struct_mut_allocates_referent() {
        let inner = StructBuilder::new("Inner")
            .field("x", NdrType::uint32())
            .build()
            .unwrap();
        let outer = StructBuilder::new("Outer")
            .field("inner", NdrType::pointer(NdrType::Struct(inner)))
            .build()
            .unwrap();
        let mut value = outer.new_value();
        value.struct_mut("inner").unwrap().set("x", 3u32).unwrap();
        let inner = value.get("inner").unwrap().referent().unwrap().as_struct().unwrap();
        assert_eq!(inner.get("x").unwrap(), &NdrValue::from(3u32));
    }
}
