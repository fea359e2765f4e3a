use thiserror::Error;

/// Typed failures surfaced by every parser in this crate.
///
/// `SignatureMismatch` and `RangeViolation` are fatal for the object being
/// parsed. `MalformedField` taints only the attribute or entity it was
/// found in; callers that see it from a sub-parser are expected to drop
/// that one item and keep going. `UnsupportedFeature` is informational:
/// the caller still gets the raw on-disk bytes.
#[derive(Debug, Error)]
pub enum RelicError {
    #[error("signature mismatch at offset {offset}: expected {expected}, found {found}")]
    SignatureMismatch {
        offset: u64,
        expected: String,
        found: String,
    },

    #[error("range violation: {0}")]
    RangeViolation(String),

    #[error("malformed field `{field}` in {context}: {detail}")]
    MalformedField {
        context: String,
        field: String,
        detail: String,
    },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("inode {inode} out of range (mft holds {available} records)")]
    InodeOutOfRange { inode: u64, available: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RelicError>;
