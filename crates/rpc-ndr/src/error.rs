//! NDR error types

use thiserror::Error;

/// NDR encoding/decoding errors
#[derive(Debug, Error)]
pub enum NdrError {
    /// Buffer underflow - not enough data
    #[error("buffer underflow at offset {position}: needed {needed} bytes, have {have}")]
    BufferUnderflow {
        position: usize,
        needed: usize,
        have: usize,
    },

    /// Error raised while processing a named structure field
    #[error("field `{field}`: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<NdrError>,
    },

    /// Conformant array or string that is not the last member of a structure
    #[error("structure `{structure}`: conformant field `{field}` must be the last member")]
    ConformantNotLast { structure: String, field: String },

    /// Array whose element type carries its own conformance
    #[error("array element type `{0}` is conformant")]
    ConformantElement(String),

    /// Array element type with no wire representation
    #[error("array element type `{0}` has zero wire size")]
    ZeroSizedElement(String),

    /// Two fields with the same name in one structure
    #[error("structure `{structure}`: duplicate field `{field}`")]
    DuplicateField { structure: String, field: String },

    /// Field name not declared by the structure
    #[error("structure `{structure}` has no field `{field}`")]
    UnknownField { structure: String, field: String },

    /// Derived field declared against an unusable source
    #[error("structure `{structure}`: derived field `{field}`: {reason}")]
    InvalidDerivation {
        structure: String,
        field: String,
        reason: String,
    },

    /// Derived fields are computed at encode time and cannot be assigned
    #[error("field `{0}` is derived and cannot be assigned")]
    DerivedFieldAssignment(String),

    /// Alias target does not exist or is not a pointer field
    #[error("alias `{field}` refers to unknown pointer field `{target}`")]
    UnknownAliasTarget { field: String, target: String },

    /// Alias target is declared after (or is) the alias itself
    #[error("alias `{field}` refers to `{target}`, which is not declared before it")]
    AliasForwardReference { field: String, target: String },

    /// Alias and target pointee types differ
    #[error("alias `{field}` and target `{target}` point to different types")]
    AliasTypeMismatch { field: String, target: String },

    /// Aliasing requested on a pointer kind that does not allow it
    #[error("pointer field `{0}` does not allow aliasing")]
    AliasNotAllowed(String),

    /// Alias pointer encountered outside of a structure
    #[error("alias pointers are only valid as structure fields")]
    AliasOutsideStruct,

    /// Value does not match the declared type
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Non-character value assigned to a character element
    #[error("expected a character value, got {0}")]
    NotACharacter(String),

    /// Integer does not fit the declared scalar kind
    #[error("value {value} out of range for {kind}")]
    ValueOutOfRange { kind: String, value: i128 },

    /// Fixed array or string assigned more elements than declared
    #[error("fixed length exceeded: limit {limit}, got {got}")]
    FixedLengthExceeded { limit: usize, got: usize },

    /// Reference pointer without a referent
    #[error("reference pointer cannot be null")]
    NullRefPointer,

    /// Non-zero offset in a varying array header
    #[error("non-zero varying offset {offset} at offset {position}")]
    NonZeroOffset { offset: u32, position: usize },

    /// Conformance mismatch
    #[error("conformance mismatch: max_count={max_count}, actual_count={actual_count}")]
    ConformanceMismatch { max_count: u32, actual_count: u32 },

    /// Declared element count exceeds the configured limit
    #[error("allocation limit exceeded: requested {requested} elements, limit {limit}")]
    AllocationLimitExceeded { requested: usize, limit: usize },

    /// Arithmetic overflow while computing sizes
    #[error("integer overflow")]
    IntegerOverflow,

    /// Referent id that points at a referent this decoder cannot reach
    #[error("unresolved alias: referent ID 0x{0:08x}")]
    UnresolvedAlias(u32),

    /// Invalid string - not null terminated or invalid encoding
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// UTF-16 decoding error
    #[error("UTF-16 error: {0}")]
    Utf16Error(#[from] std::char::DecodeUtf16Error),
}

impl NdrError {
    /// Wrap this error with the name of the field being processed.
    pub fn in_field(self, field: impl Into<String>) -> Self {
        NdrError::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping field wrappers.
    pub fn root(&self) -> &NdrError {
        match self {
            NdrError::Field { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for NDR operations
pub type Result<T> = std::result::Result<T, NdrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_display() {
        let err = NdrError::BufferUnderflow {
            position: 12,
            needed: 4,
            have: 1,
        }
        .in_field("buffer")
        .in_field("name");

        assert_eq!(
            err.to_string(),
            "field `name`: field `buffer`: buffer underflow at offset 12: needed 4 bytes, have 1"
        );
        assert!(matches!(err.root(), NdrError::BufferUnderflow { position: 12, .. }));
    }
}
