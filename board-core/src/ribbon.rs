//! The ledger entry data model: normalization, fingerprinting, canonical
//! ordering, and the two dedup axes.
//!
//! A `RibbonRecord` is created exactly once by the ingestion logic and is
//! never mutated afterward. Absent optional fields are omitted from the
//! persisted form, never stored as null.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tier::Tier;

/// Fixed timestamp layout shared by `timestamp` and `expires_at`.
///
/// All timestamps use this format in UTC at second precision, so
/// lexicographic comparison of the strings matches chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Render an instant in the fixed ledger format.
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a ledger timestamp. `None` for strings outside the fixed format.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RibbonRecord {
    pub agent_id: String,
    /// Short display fingerprint. Never a dedup key.
    pub hash: String,
    pub message: String,
    pub tier: Tier,
    pub timestamp: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub pin_rank: u32,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

fn default_weight() -> u32 {
    1
}

fn default_source() -> String {
    "api".to_string()
}

impl RibbonRecord {
    /// Canonical sort key: pin rank dominates weight, weight dominates
    /// recency. Entries sort descending on this key.
    fn sort_key(&self) -> (u32, u32, &str) {
        (self.pin_rank, self.weight, self.timestamp.as_str())
    }

    /// Whether this entry's tier-derived expiry has passed. Entries
    /// without `expires_at` never expire by this rule.
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at.as_deref().and_then(parse_utc) {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

/// Sort entries into the canonical board order:
/// `(pin_rank, weight, timestamp)` descending. Stable under ties.
pub fn sort_entries(entries: &mut [RibbonRecord]) {
    entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

/// Check a submission against both dedup axes.
///
/// A submission carrying a `trace_id` is a duplicate when any entry
/// already holds that `trace_id`. Independently, a submission carrying
/// both `provider` and `purchase_id` is a duplicate when any entry
/// matches that exact pair. The display hash never participates.
pub fn is_duplicate(
    entries: &[RibbonRecord],
    trace_id: Option<&str>,
    provider: Option<&str>,
    purchase_id: Option<&str>,
) -> bool {
    if let Some(trace) = trace_id
        && entries
            .iter()
            .any(|entry| entry.trace_id.as_deref() == Some(trace))
    {
        return true;
    }

    if let (Some(provider), Some(purchase)) = (provider, purchase_id)
        && entries.iter().any(|entry| {
            entry.provider.as_deref() == Some(provider)
                && entry.purchase_id.as_deref() == Some(purchase)
        })
    {
        return true;
    }

    false
}

/// Collapse whitespace runs to single spaces, trim the ends, and cap the
/// length. Never fails: over-long input degrades by truncation. An empty
/// result signals a submission to ignore.
pub fn normalize_message(raw: &str, max_len: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_len).collect()
}

/// Deterministic 8-character uppercase-hex display fingerprint of
/// `agent_id|message`. Collisions are acceptable; it is not a dedup key.
pub fn fingerprint(agent_id: &str, message: &str) -> String {
    let digest = Sha256::digest(format!("{agent_id}|{message}").as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        hex.push_str(&format!("{byte:02X}"));
    }
    hex
}
