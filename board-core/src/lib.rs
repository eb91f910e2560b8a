//! Ribbon ledger engine for the Loom board.
//!
//! The board is a small public ranked ledger of short messages
//! ("ribbons") submitted by agents. This crate holds the rules that turn
//! a raw submission into a ranked, deduplicated, expiring ledger entry:
//!
//! - [`tier`]: the closed tier table (price, weight, pin rank, TTL)
//! - [`ribbon`]: the entry model, normalization, fingerprinting,
//!   canonical ordering, and the two dedup axes
//! - [`engine`]: file-level append/prune operations against a board file
//! - [`store`]: the lock-guarded in-process snapshot store
//!
//! The git-mediated write path lives in the `loom-git-ledger` crate and
//! applies the same [`engine`] rules against a version-controlled
//! working copy, so entries from both paths are format-compatible.

pub mod engine;
pub mod error;
pub mod ribbon;
pub mod store;
pub mod tier;

pub use engine::{
    AppendOutcome, AppendRequest, DEFAULT_MAX_MESSAGE_LEN, MAX_AGENT_ID_LEN, PruneSelector,
    append_entry, load_board, prune_board, save_board,
};
pub use error::{BoardError, Result};
pub use ribbon::{
    RibbonRecord, TIMESTAMP_FORMAT, fingerprint, format_utc, is_duplicate, normalize_message,
    parse_utc, sort_entries,
};
pub use store::{AddOutcome, LedgerStore};
pub use tier::{Tier, TierSpec};
