use thiserror::Error;

/// Malformed bencode input. `position` is the offset of the offending byte.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ParseError {
    #[error("unexpected byte 0x{byte:02x} at position {position}")]
    UnexpectedByte { byte: u8, position: usize },

    #[error("leading zero at position {position}")]
    LeadingZero { position: usize },

    #[error("negative zero at position {position}")]
    NegativeZero { position: usize },

    #[error("empty integer at position {position}")]
    EmptyInteger { position: usize },

    #[error("integer overflow at position {position}")]
    IntegerOverflow { position: usize },

    #[error("dictionary keys must be strings (position {position})")]
    NonStringKey { position: usize },

    #[error("duplicate dictionary key {key:?}")]
    DuplicateKey { key: String },

    #[error("nothing to close at position {position}")]
    NothingToClose { position: usize },

    #[error("trailing data at position {position}")]
    TrailingData { position: usize },

    #[error("unexpected end of input")]
    UnexpectedEof,
}

/// A decoded value doesn't fit the shape a typed field expects.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SchemaError {
    #[error("missing field {0:?}")]
    MissingField(String),

    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("integer {0} out of range")]
    OutOfRange(i64),

    #[error("string is not valid utf8")]
    InvalidUtf8,

    #[error("field {field:?}: {source}")]
    InvalidField {
        field: String,
        source: Box<SchemaError>,
    },
}

impl SchemaError {
    pub fn field(field: &str, source: SchemaError) -> Self {
        match source {
            // Keep the innermost key for missing nested fields, it is the useful one
            missing @ SchemaError::MissingField(_) => missing,
            source => Self::InvalidField {
                field: field.to_string(),
                source: Box::new(source),
            },
        }
    }
}
