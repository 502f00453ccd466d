//! Type schemas
//!
//! RPC stubs describe their payloads with [`NdrType`] trees. Structures are
//! declared through [`StructBuilder`], which validates placement rules once,
//! at construction time, so that encoding and decoding never see a
//! malformed schema.

use crate::align::{POINTER_ALIGN, SIZE_FIELD_ALIGN};
use crate::error::{NdrError, Result};
use crate::scalar::ScalarKind;
use crate::value::{NdrValue, PointerValue, StructValue};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// How an array or string carries its size on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// Length fixed by the schema, no size prefix
    Fixed(usize),
    /// `max_count` prefix, hoisted to the front of the outermost structure
    /// when embedded
    Conformant,
    /// `offset` and `actual_count` prefix
    Varying,
    /// `max_count` (hoisted like conformant) followed by `offset` and `actual_count`
    ConformantVarying,
}

impl ArrayKind {
    pub const fn is_conformant(self) -> bool {
        matches!(self, ArrayKind::Conformant | ArrayKind::ConformantVarying)
    }

    pub const fn is_varying(self) -> bool {
        matches!(self, ArrayKind::Varying | ArrayKind::ConformantVarying)
    }

    pub const fn has_size_prefix(self) -> bool {
        !matches!(self, ArrayKind::Fixed(_))
    }

    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            ArrayKind::Fixed(n) => Some(n),
            _ => None,
        }
    }

    fn describe(self) -> String {
        match self {
            ArrayKind::Fixed(n) => format!("fixed[{n}]"),
            ArrayKind::Conformant => "conformant".to_string(),
            ArrayKind::Varying => "varying".to_string(),
            ArrayKind::ConformantVarying => "conformant-varying".to_string(),
        }
    }
}

/// Array of a single element type
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    pub kind: ArrayKind,
    pub element: Box<NdrType>,
}

impl ArrayType {
    /// Alignment of the element data
    pub fn element_align(&self) -> usize {
        if self.kind.has_size_prefix() {
            SIZE_FIELD_ALIGN.max(self.element.align())
        } else {
            self.element.align()
        }
    }
}

/// Width of one character code unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharWidth {
    /// 8-bit code units (UTF-8 bytes)
    Narrow,
    /// 16-bit UTF-16LE code units
    Wide,
}

impl CharWidth {
    pub const fn bytes(self) -> usize {
        match self {
            CharWidth::Narrow => 1,
            CharWidth::Wide => 2,
        }
    }

    pub const fn scalar(self) -> ScalarKind {
        match self {
            CharWidth::Narrow => ScalarKind::Char,
            CharWidth::Wide => ScalarKind::WideChar,
        }
    }
}

/// Character string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringType {
    pub kind: ArrayKind,
    pub width: CharWidth,
    /// Counts include a trailing zero code unit written with the data
    pub null_terminated: bool,
}

impl StringType {
    pub fn element_align(&self) -> usize {
        if self.kind.has_size_prefix() {
            SIZE_FIELD_ALIGN.max(self.width.bytes())
        } else {
            self.width.bytes()
        }
    }
}

/// Pointer attribute, as in MIDL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerKind {
    /// `[ref]`: never null
    Ref,
    /// `[unique]`: nullable, never aliased
    Unique,
    /// `[ptr]`: nullable, may alias another pointer's referent
    #[default]
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointerType {
    pub kind: PointerKind,
    pub pointee: Box<NdrType>,
}

/// An encodable NDR type
#[derive(Debug, Clone, PartialEq)]
pub enum NdrType {
    Scalar(ScalarKind),
    Array(ArrayType),
    String(StringType),
    Pointer(PointerType),
    Struct(Arc<StructDef>),
    /// 20-byte RPC context handle
    ContextHandle,
}

impl NdrType {
    pub const fn uint8() -> Self {
        NdrType::Scalar(ScalarKind::Uint8)
    }

    pub const fn uint16() -> Self {
        NdrType::Scalar(ScalarKind::Uint16)
    }

    pub const fn uint32() -> Self {
        NdrType::Scalar(ScalarKind::Uint32)
    }

    pub const fn uint64() -> Self {
        NdrType::Scalar(ScalarKind::Uint64)
    }

    pub const fn boolean() -> Self {
        NdrType::Scalar(ScalarKind::Boolean)
    }

    pub const fn char() -> Self {
        NdrType::Scalar(ScalarKind::Char)
    }

    pub const fn wchar() -> Self {
        NdrType::Scalar(ScalarKind::WideChar)
    }

    pub const fn enum16() -> Self {
        NdrType::Scalar(ScalarKind::Enum16)
    }

    pub const fn filetime() -> Self {
        NdrType::Scalar(ScalarKind::FileTime)
    }

    pub const fn context_handle() -> Self {
        NdrType::ContextHandle
    }

    pub fn array(kind: ArrayKind, element: NdrType) -> Self {
        NdrType::Array(ArrayType {
            kind,
            element: Box::new(element),
        })
    }

    pub fn fixed_array(element: NdrType, len: usize) -> Self {
        Self::array(ArrayKind::Fixed(len), element)
    }

    pub fn conformant_array(element: NdrType) -> Self {
        Self::array(ArrayKind::Conformant, element)
    }

    pub fn varying_array(element: NdrType) -> Self {
        Self::array(ArrayKind::Varying, element)
    }

    pub fn conformant_varying_array(element: NdrType) -> Self {
        Self::array(ArrayKind::ConformantVarying, element)
    }

    pub fn string(kind: ArrayKind, width: CharWidth, null_terminated: bool) -> Self {
        NdrType::String(StringType {
            kind,
            width,
            null_terminated,
        })
    }

    /// `[string] char*`: conformant-varying, null-terminated
    pub fn cstring() -> Self {
        Self::string(ArrayKind::ConformantVarying, CharWidth::Narrow, true)
    }

    /// `[string] wchar_t*`: conformant-varying, null-terminated
    pub fn wstring() -> Self {
        Self::string(ArrayKind::ConformantVarying, CharWidth::Wide, true)
    }

    pub fn pointer_with(kind: PointerKind, pointee: NdrType) -> Self {
        NdrType::Pointer(PointerType {
            kind,
            pointee: Box::new(pointee),
        })
    }

    /// Full pointer (`[ptr]`)
    pub fn pointer(pointee: NdrType) -> Self {
        Self::pointer_with(PointerKind::Full, pointee)
    }

    pub fn unique_pointer(pointee: NdrType) -> Self {
        Self::pointer_with(PointerKind::Unique, pointee)
    }

    pub fn ref_pointer(pointee: NdrType) -> Self {
        Self::pointer_with(PointerKind::Ref, pointee)
    }

    pub fn structure(def: Arc<StructDef>) -> Self {
        NdrType::Struct(def)
    }

    /// Wire alignment of this type
    pub fn align(&self) -> usize {
        match self {
            NdrType::Scalar(kind) => kind.align(),
            NdrType::Array(at) => at.element_align(),
            NdrType::String(st) => st.element_align(),
            NdrType::Pointer(_) => POINTER_ALIGN,
            NdrType::Struct(def) => def.align(),
            NdrType::ContextHandle => 4,
        }
    }

    /// Whether this type ends in a conformant array or string
    pub fn is_conformant(&self) -> bool {
        match self {
            NdrType::Array(at) => at.kind.is_conformant(),
            NdrType::String(st) => st.kind.is_conformant(),
            NdrType::Struct(def) => def.is_conformant(),
            _ => false,
        }
    }

    /// Smallest number of bytes one value of this type occupies in place,
    /// ignoring padding and deferred referents
    pub fn min_wire_size(&self) -> usize {
        match self {
            NdrType::Scalar(kind) => kind.width(),
            NdrType::Array(at) => match at.kind {
                ArrayKind::Fixed(n) => n.saturating_mul(at.element.min_wire_size()),
                ArrayKind::Varying => 8,
                ArrayKind::Conformant | ArrayKind::ConformantVarying => 0,
            },
            NdrType::String(st) => match st.kind {
                ArrayKind::Fixed(n) => n.saturating_mul(st.width.bytes()),
                ArrayKind::Varying => 8,
                ArrayKind::Conformant | ArrayKind::ConformantVarying => 0,
            },
            NdrType::Pointer(_) => 4,
            NdrType::Struct(def) => def.fields.iter().map(|f| f.ty.min_wire_size()).sum(),
            NdrType::ContextHandle => crate::ContextHandle::SIZE,
        }
    }

    /// Wire width of one value when it never varies (scalars and handles)
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            NdrType::Scalar(kind) => Some(kind.width()),
            NdrType::ContextHandle => Some(crate::ContextHandle::SIZE),
            _ => None,
        }
    }

    /// Value a freshly constructed field of this type holds
    pub fn default_value(&self) -> NdrValue {
        match self {
            NdrType::Scalar(kind) => NdrValue::Scalar(kind.default_value()),
            NdrType::Array(at) => match at.kind {
                ArrayKind::Fixed(n) => {
                    NdrValue::Array((0..n).map(|_| at.element.default_value()).collect())
                }
                _ => NdrValue::Array(Vec::new()),
            },
            NdrType::String(_) => NdrValue::String(String::new()),
            NdrType::Pointer(_) => NdrValue::Pointer(PointerValue::Unassigned),
            NdrType::Struct(def) => NdrValue::Struct(StructValue::new(def.clone())),
            NdrType::ContextHandle => NdrValue::ContextHandle(Default::default()),
        }
    }

    /// Check placement rules that cannot be expressed by the constructors
    pub fn validate(&self) -> Result<()> {
        match self {
            NdrType::Array(at) => {
                at.element.validate()?;
                if at.element.is_conformant() {
                    return Err(NdrError::ConformantElement(at.element.to_string()));
                }
                if at.element.min_wire_size() == 0 {
                    return Err(NdrError::ZeroSizedElement(at.element.to_string()));
                }
                Ok(())
            }
            NdrType::Pointer(pt) => pt.pointee.validate(),
            // Structures are validated by their builder.
            NdrType::Scalar(_) | NdrType::String(_) | NdrType::Struct(_) | NdrType::ContextHandle => {
                Ok(())
            }
        }
    }
}

impl From<ScalarKind> for NdrType {
    fn from(kind: ScalarKind) -> Self {
        NdrType::Scalar(kind)
    }
}

impl From<Arc<StructDef>> for NdrType {
    fn from(def: Arc<StructDef>) -> Self {
        NdrType::Struct(def)
    }
}

impl fmt::Display for NdrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NdrType::Scalar(kind) => write!(f, "{kind}"),
            NdrType::Array(at) => write!(f, "{} array of {}", at.kind.describe(), at.element),
            NdrType::String(st) => {
                let width = match st.width {
                    CharWidth::Narrow => "string",
                    CharWidth::Wide => "wstring",
                };
                let nul = if st.null_terminated { " (null-terminated)" } else { "" };
                write!(f, "{} {width}{nul}", st.kind.describe())
            }
            NdrType::Pointer(pt) => {
                let kind = match pt.kind {
                    PointerKind::Ref => "ref",
                    PointerKind::Unique => "unique",
                    PointerKind::Full => "full",
                };
                write!(f, "{kind} pointer to {}", pt.pointee)
            }
            NdrType::Struct(def) => write!(f, "struct {}", def.name),
            NdrType::ContextHandle => f.write_str("context handle"),
        }
    }
}

/// Value of a field computed from a sibling field when encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derived {
    /// Element count as written in the sibling's size fields (terminator included)
    CountOf(String),
    /// Content size in bytes, terminator excluded
    ByteLengthOf(String),
    /// `CountOf` times the element width, terminator included
    ByteSizeOf(String),
}

impl Derived {
    pub fn source(&self) -> &str {
        match self {
            Derived::CountOf(name) | Derived::ByteLengthOf(name) | Derived::ByteSizeOf(name) => name,
        }
    }
}

/// One structure member
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    name: String,
    ty: NdrType,
    default: Option<NdrValue>,
    derived: Option<Derived>,
    derived_source: Option<usize>,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &NdrType {
        &self.ty
    }

    pub fn default(&self) -> Option<&NdrValue> {
        self.default.as_ref()
    }

    pub fn derived(&self) -> Option<&Derived> {
        self.derived.as_ref()
    }

    pub(crate) fn derived_source(&self) -> Option<usize> {
        self.derived_source
    }

    /// Initial value of this field in a new structure value
    pub fn initial_value(&self) -> NdrValue {
        match &self.default {
            Some(value) => value.clone(),
            None => self.ty.default_value(),
        }
    }
}

/// Validated structure schema
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    name: String,
    fields: Vec<FieldDef>,
    align: usize,
    conformant: bool,
}

impl StructDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Maximum alignment of the direct members
    pub fn align(&self) -> usize {
        self.align
    }

    /// Whether the last member carries a hoisted `max_count`
    pub fn is_conformant(&self) -> bool {
        self.conformant
    }

    /// Fresh value holding every field's default
    pub fn new_value(self: &Arc<Self>) -> StructValue {
        StructValue::new(self.clone())
    }

    pub(crate) fn unknown_field(&self, field: &str) -> NdrError {
        NdrError::UnknownField {
            structure: self.name.clone(),
            field: field.to_string(),
        }
    }
}

/// Builder for [`StructDef`]
///
/// ```
/// use rpc_ndr::{Derived, NdrType, StructBuilder};
///
/// let unicode_string = StructBuilder::new("RPC_UNICODE_STRING")
///     .derived("length", NdrType::uint16(), Derived::ByteLengthOf("buffer".into()))
///     .derived("maximum_length", NdrType::uint16(), Derived::ByteSizeOf("buffer".into()))
///     .field("buffer", NdrType::pointer(NdrType::wstring()))
///     .build()
///     .unwrap();
/// assert_eq!(unicode_string.align(), 4);
/// ```
#[derive(Debug)]
pub struct StructBuilder {
    name: String,
    fields: Vec<FieldDef>,
}

impl StructBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: NdrType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            default: None,
            derived: None,
            derived_source: None,
        });
        self
    }

    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        ty: NdrType,
        default: impl Into<NdrValue>,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            default: Some(default.into()),
            derived: None,
            derived_source: None,
        });
        self
    }

    /// Field whose value is computed from `rule` at encode time
    pub fn derived(mut self, name: impl Into<String>, ty: NdrType, rule: Derived) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            default: None,
            derived: Some(rule),
            derived_source: None,
        });
        self
    }

    pub fn build(self) -> Result<Arc<StructDef>> {
        let StructBuilder { name, mut fields } = self;

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(NdrError::DuplicateField {
                    structure: name,
                    field: field.name.clone(),
                });
            }
        }

        let count = fields.len();
        for (i, field) in fields.iter().enumerate() {
            field.ty.validate().map_err(|e| e.in_field(&field.name))?;
            if field.ty.is_conformant() && i + 1 != count {
                return Err(NdrError::ConformantNotLast {
                    structure: name,
                    field: field.name.clone(),
                });
            }
        }

        let sources: Vec<Option<usize>> = fields
            .iter()
            .map(|field| match &field.derived {
                Some(rule) => resolve_derivation(&name, &fields, field, rule).map(Some),
                None => Ok(None),
            })
            .collect::<Result<_>>()?;

        for (field, source) in fields.iter_mut().zip(sources) {
            field.derived_source = source;
            if let Some(default) = field.default.take() {
                let coerced = field
                    .ty
                    .coerce(default)
                    .map_err(|e| e.in_field(&field.name))?;
                field.default = Some(coerced);
            }
        }

        let align = fields.iter().map(|f| f.ty.align()).max().unwrap_or(1);
        let conformant = fields.last().is_some_and(|f| f.ty.is_conformant());

        Ok(Arc::new(StructDef {
            name,
            fields,
            align,
            conformant,
        }))
    }
}

fn resolve_derivation(
    structure: &str,
    fields: &[FieldDef],
    field: &FieldDef,
    rule: &Derived,
) -> Result<usize> {
    let invalid = |reason: &str| NdrError::InvalidDerivation {
        structure: structure.to_string(),
        field: field.name.clone(),
        reason: reason.to_string(),
    };

    match field.ty {
        NdrType::Scalar(kind) if kind.is_unsigned_integer() => {}
        _ => return Err(invalid("derived fields must be unsigned integers")),
    }

    let source = fields
        .iter()
        .position(|f| f.name == rule.source())
        .ok_or_else(|| invalid(&format!("unknown source field `{}`", rule.source())))?;
    if fields[source].name == field.name {
        return Err(invalid("a field cannot be derived from itself"));
    }

    let target = match &fields[source].ty {
        NdrType::Pointer(pt) => pt.pointee.as_ref(),
        other => other,
    };
    match (target, rule) {
        (NdrType::String(_), _) => Ok(source),
        (NdrType::Array(_), Derived::CountOf(_)) => Ok(source),
        (NdrType::Array(at), _) if at.element.fixed_width().is_some() => Ok(source),
        (NdrType::Array(_), _) => Err(invalid("byte lengths need fixed-width elements")),
        _ => Err(invalid("source must be an array, a string or a pointer to one")),
    }
}
