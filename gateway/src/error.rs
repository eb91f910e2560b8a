//! Gateway error taxonomy.
//!
//! `UpstreamUnavailable` marks retryable collaborator failures; they are
//! surfaced to the caller and never written to the ledger.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed submission rejected before any collaborator is called.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("unsupported payment provider: {provider}")]
    UnsupportedProvider { provider: String },

    /// Purchase attempted against a tier with no price.
    #[error("tier is not payable: {tier_id}")]
    TierNotPayable { tier_id: String },

    /// Payment or dispatch collaborator unreachable or misconfigured.
    /// Retryable by the caller; never retried here.
    #[error("upstream unavailable: {reason} (status {status_code})")]
    UpstreamUnavailable { reason: String, status_code: u16 },

    #[error(transparent)]
    Board(#[from] loom_board_core::BoardError),
}

impl GatewayError {
    /// Machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::UnsupportedProvider { .. } => "unsupported_provider",
            Self::TierNotPayable { .. } => "tier_not_payable",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Board(err) => err.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
