//! Error taxonomy for the ribbon ledger engine.
//!
//! Every variant carries a stable machine-readable `kind()` code so
//! callers can branch without parsing display strings. Duplicate
//! submissions are deliberately NOT in this taxonomy: they are a defined
//! no-op outcome (`Ignored`), not an error.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the ledger engine and the snapshot store.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Tier id outside the closed tier table. Rejected at the boundary,
    /// before any state is touched.
    #[error("unknown tier: {tier_id}")]
    UnknownTier { tier_id: String },

    /// Malformed input rejected before any mutation.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The backing file exists but is not a well-formed ledger array.
    /// Fatal on load: the engine refuses to silently truncate or repair.
    #[error("corrupt ledger at {}: {message}", path.display())]
    CorruptLedger { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BoardError {
    /// Machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTier { .. } => "unknown_tier",
            Self::Validation { .. } => "validation",
            Self::CorruptLedger { .. } => "corrupt_ledger",
            Self::Io(_) => "io",
            Self::Serialize(_) => "serialize",
        }
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
