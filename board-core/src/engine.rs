//! File-level board operations shared by the CLI and the git-mediated
//! ingest path.
//!
//! The board file is a UTF-8 JSON array of entries in canonical sort
//! order, pretty-printed, newline-terminated. Every write is a full
//! rewrite of the file via a `.tmp` sibling; there is no incremental
//! format.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};

use crate::error::{BoardError, Result};
use crate::ribbon::{
    RibbonRecord, fingerprint, format_utc, is_duplicate, normalize_message, parse_utc,
    sort_entries,
};
use crate::tier::Tier;

/// Default cap applied to normalized messages.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 280;

/// Upper bound on `agent_id` length (characters).
pub const MAX_AGENT_ID_LEN: usize = 128;

/// One append request against a board file.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub agent_id: String,
    pub message: String,
    pub tier: Tier,
    pub source: String,
    pub amount_usd: Option<f64>,
    /// Explicit weight override; bypasses tier policy when present.
    pub weight: Option<i64>,
    pub trace_id: Option<String>,
    pub max_message_len: usize,
    pub provider: Option<String>,
    pub purchase_id: Option<String>,
}

/// Outcome of one append. The file is mutated only on `Added`;
/// duplicates and empty messages are a defined no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Added,
    Ignored,
}

impl AppendRequest {
    fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(BoardError::Validation {
                field: "agent_id",
                message: "must not be empty".to_string(),
            });
        }
        if self.agent_id.chars().count() > MAX_AGENT_ID_LEN {
            return Err(BoardError::Validation {
                field: "agent_id",
                message: format!("longer than {MAX_AGENT_ID_LEN} characters"),
            });
        }
        Ok(())
    }

    /// Assemble the ledger entry for this request at instant `now`.
    ///
    /// Returns `None` when the message normalizes to empty. All
    /// tier-derived fields (`weight`, `pin_rank`, `expires_at`) are
    /// copied here, exactly once; absent optional fields are dropped so
    /// the persisted form omits them.
    pub fn build_record(&self, now: DateTime<Utc>) -> Option<RibbonRecord> {
        let message = normalize_message(&self.message, self.max_message_len);
        if message.is_empty() {
            return None;
        }

        Some(RibbonRecord {
            hash: fingerprint(&self.agent_id, &message),
            agent_id: self.agent_id.clone(),
            message,
            tier: self.tier,
            timestamp: format_utc(now),
            weight: self.tier.effective_weight(self.amount_usd, self.weight),
            pin_rank: self.tier.spec().pin_rank,
            source: self.source.clone(),
            provider: self.provider.clone().filter(|p| !p.is_empty()),
            amount_usd: self.amount_usd.map(round_cents),
            purchase_id: self.purchase_id.clone().filter(|p| !p.is_empty()),
            expires_at: self.tier.expiry_for(now).map(format_utc),
            trace_id: self.trace_id.clone().filter(|t| !t.is_empty()),
        })
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Selector for `prune_board`, from the CLI-equivalent contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneSelector {
    /// Every tier with a TTL.
    Expiring,
    /// Every tier.
    All,
    /// One specific tier.
    Tier(Tier),
}

impl PruneSelector {
    pub fn from_arg(raw: &str) -> Result<Self> {
        match raw {
            "expiring" => Ok(Self::Expiring),
            "all" => Ok(Self::All),
            other => Tier::from_id(other).map(Self::Tier),
        }
    }

    fn tracks(&self, tier: Tier) -> bool {
        match self {
            Self::Expiring => tier.spec().ttl_hours.is_some(),
            Self::All => true,
            Self::Tier(selected) => *selected == tier,
        }
    }
}

/// Read a board file. A missing file is an empty ledger; a file that is
/// not a well-formed entry array is a fatal `CorruptLedger`.
pub fn load_board(path: &Path) -> Result<Vec<RibbonRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str::<Vec<RibbonRecord>>(&raw).map_err(|err| BoardError::CorruptLedger {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Rewrite the board file: canonical order, pretty JSON, trailing
/// newline, atomically via a `.tmp` sibling.
pub fn save_board(path: &Path, entries: &mut Vec<RibbonRecord>) -> Result<()> {
    sort_entries(entries);
    let mut payload = serde_json::to_string_pretty(entries)?;
    payload.push('\n');

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, payload)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Append one entry to the board file.
///
/// Validation failures (unknown tier is rejected earlier, at
/// `Tier::from_id`; malformed agent ids here) happen before any
/// mutation. An empty normalized message or a hit on either dedup axis
/// returns `Ignored` without touching the file.
pub fn append_entry(path: &Path, request: &AppendRequest) -> Result<AppendOutcome> {
    request.validate()?;

    let mut entries = load_board(path)?;
    if is_duplicate(
        &entries,
        request.trace_id.as_deref(),
        request.provider.as_deref(),
        request.purchase_id.as_deref(),
    ) {
        return Ok(AppendOutcome::Ignored);
    }

    let Some(record) = request.build_record(Utc::now()) else {
        return Ok(AppendOutcome::Ignored);
    };

    tracing::debug!(
        agent_id = %record.agent_id,
        hash = %record.hash,
        tier = %record.tier,
        weight = record.weight,
        "appending ribbon"
    );

    entries.push(record);
    save_board(path, &mut entries)?;
    Ok(AppendOutcome::Added)
}

/// Drop expired entries of the selected tiers. Returns the count
/// removed; the file is rewritten only when something was removed.
///
/// Entries carrying `expires_at` are dropped once it has passed.
/// Entries of a TTL tier that lack `expires_at` fall back to
/// `timestamp + ttl_hours`. Unparseable `expires_at` values are kept
/// rather than guessed at.
pub fn prune_board(path: &Path, selector: PruneSelector) -> Result<usize> {
    let mut entries = load_board(path)?;
    let before = entries.len();
    let now = Utc::now();

    entries.retain(|entry| {
        if !selector.tracks(entry.tier) {
            return true;
        }

        if let Some(expires_at) = entry.expires_at.as_deref() {
            return match parse_utc(expires_at) {
                Some(expiry) => expiry > now,
                None => true,
            };
        }

        let Some(ttl_hours) = entry.tier.spec().ttl_hours else {
            return true;
        };
        parse_utc(&entry.timestamp)
            .is_some_and(|created| created + Duration::hours(ttl_hours) > now)
    });

    let removed = before - entries.len();
    if removed > 0 {
        save_board(path, &mut entries)?;
        tracing::info!(path = %path.display(), removed, "pruned expired ribbons");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn board_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("board.json")
    }

    fn request(agent_id: &str, message: &str, tier: Tier) -> AppendRequest {
        AppendRequest {
            agent_id: agent_id.to_string(),
            message: message.to_string(),
            tier,
            source: "test".to_string(),
            amount_usd: None,
            weight: None,
            trace_id: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            provider: None,
            purchase_id: None,
        }
    }

    #[test]
    fn missing_board_file_is_empty_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(load_board(&board_path(&dir)).unwrap(), Vec::new());
    }

    #[test]
    fn corrupt_board_file_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        std::fs::write(&path, "{\"not\": \"an array\"}\n").unwrap();
        let err = load_board(&path).unwrap_err();
        assert_eq!(err.kind(), "corrupt_ledger");

        // the engine refuses to repair: the file is untouched
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "{\"not\": \"an array\"}\n");
    }

    #[test]
    fn trace_scenario_normalizes_and_dedups() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        let mut req = request("bot-1", "hello   world", Tier::Ephemeral);
        req.trace_id = Some("t1".to_string());

        assert_eq!(append_entry(&path, &req).unwrap(), AppendOutcome::Added);

        let entries = load_board(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "hello world");
        assert_eq!(entries[0].weight, 1);
        assert_eq!(entries[0].pin_rank, 0);
        assert!(entries[0].expires_at.is_some(), "ephemeral TTL applied");

        // identical trace_id is a no-op, not an error
        assert_eq!(append_entry(&path, &req).unwrap(), AppendOutcome::Ignored);
        assert_eq!(load_board(&path).unwrap(), entries);
    }

    #[test]
    fn paid_scenario_applies_overpayment_bonus() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        let mut req = request("payer", "thanks for the loom", Tier::Permanent);
        req.amount_usd = Some(3.00);
        req.provider = Some("stripe".to_string());
        req.purchase_id = Some("pur_42".to_string());

        assert_eq!(append_entry(&path, &req).unwrap(), AppendOutcome::Added);
        let entries = load_board(&path).unwrap();
        assert_eq!(entries[0].weight, 7, "base 5 + min(3-1, 4)");
        assert_eq!(entries[0].pin_rank, 1);
        assert_eq!(entries[0].expires_at, None);
        assert_eq!(entries[0].amount_usd, Some(3.00));

        // same (provider, purchase_id) pair is the second dedup axis
        assert_eq!(append_entry(&path, &req).unwrap(), AppendOutcome::Ignored);
        assert_eq!(load_board(&path).unwrap().len(), 1);
    }

    #[test]
    fn empty_message_after_normalization_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        let req = request("bot-1", "   \t  ", Tier::Ephemeral);
        assert_eq!(append_entry(&path, &req).unwrap(), AppendOutcome::Ignored);
        assert!(!path.exists(), "ignored submissions never touch the file");
    }

    #[test]
    fn malformed_agent_id_is_rejected_before_mutation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        let req = request("", "hello", Tier::Ephemeral);
        let err = append_entry(&path, &req).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let long = "x".repeat(MAX_AGENT_ID_LEN + 1);
        let err = append_entry(&path, &request(&long, "hello", Tier::Ephemeral)).unwrap_err();
        assert_eq!(err.kind(), "validation");

        assert!(!path.exists());
    }

    #[test]
    fn board_file_is_pretty_sorted_and_newline_terminated() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        append_entry(&path, &request("a", "plain ribbon", Tier::Ephemeral)).unwrap();
        append_entry(&path, &request("b", "featured ribbon", Tier::Featured)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("]\n"));
        assert!(raw.contains("\n  {"), "entries are indentation-formatted");
        assert!(!raw.contains("null"), "absent fields are omitted, not null");

        let entries = load_board(&path).unwrap();
        assert_eq!(entries[0].agent_id, "b", "featured pin rank sorts first");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        let mut req = request("bot-1", "first", Tier::ThreeDay);
        req.trace_id = Some("t1".to_string());
        append_entry(&path, &req).unwrap();
        append_entry(&path, &request("bot-2", "second", Tier::Permanent)).unwrap();

        let entries = load_board(&path).unwrap();
        let mut copy = entries.clone();
        save_board(&path, &mut copy).unwrap();
        assert_eq!(load_board(&path).unwrap(), entries);
    }

    #[test]
    fn prune_drops_only_expired_entries_of_tracked_tiers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        append_entry(&path, &request("keeper", "permanent ribbon", Tier::Permanent)).unwrap();
        append_entry(&path, &request("fresh", "fresh ribbon", Tier::Day)).unwrap();

        // hand-write an already-expired ephemeral entry
        let mut entries = load_board(&path).unwrap();
        let stale = AppendRequest {
            trace_id: Some("stale".to_string()),
            ..request("stale", "stale ribbon", Tier::Ephemeral)
        }
        .build_record(Utc::now() - Duration::hours(2))
        .unwrap();
        entries.push(stale);
        save_board(&path, &mut entries).unwrap();

        assert_eq!(prune_board(&path, PruneSelector::Expiring).unwrap(), 1);
        let kept = load_board(&path).unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|entry| entry.agent_id != "stale"));

        // idempotent: nothing new to remove
        assert_eq!(prune_board(&path, PruneSelector::Expiring).unwrap(), 0);
    }

    #[test]
    fn prune_single_tier_selector_ignores_other_tiers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        let old = Utc::now() - Duration::hours(100);
        let mut entries = vec![
            request("a", "old ephemeral", Tier::Ephemeral)
                .build_record(old)
                .unwrap(),
            request("b", "old day", Tier::Day).build_record(old).unwrap(),
        ];
        save_board(&path, &mut entries).unwrap();

        assert_eq!(
            prune_board(&path, PruneSelector::Tier(Tier::Day)).unwrap(),
            1
        );
        let kept = load_board(&path).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].agent_id, "a");
    }

    #[test]
    fn prune_falls_back_to_timestamp_plus_ttl() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        // an entry missing expires_at but in a TTL tier
        let mut record = request("legacy", "no expiry field", Tier::Ephemeral)
            .build_record(Utc::now() - Duration::hours(2))
            .unwrap();
        record.expires_at = None;
        save_board(&path, &mut vec![record]).unwrap();

        assert_eq!(prune_board(&path, PruneSelector::Expiring).unwrap(), 1);
        assert_eq!(load_board(&path).unwrap(), Vec::new());
    }

    #[test]
    fn prune_keeps_entries_with_unparseable_expiry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = board_path(&dir);

        // old enough that the timestamp + ttl fallback would drop it,
        // but the malformed expires_at takes precedence and is kept
        let mut record = request("odd", "mangled expiry", Tier::Ephemeral)
            .build_record(Utc::now() - Duration::hours(48))
            .unwrap();
        record.expires_at = Some("not-a-timestamp".to_string());
        save_board(&path, &mut vec![record]).unwrap();

        assert_eq!(prune_board(&path, PruneSelector::Expiring).unwrap(), 0);
        assert_eq!(load_board(&path).unwrap().len(), 1);
    }

    #[test]
    fn prune_selector_parsing() {
        assert_eq!(
            PruneSelector::from_arg("expiring").unwrap(),
            PruneSelector::Expiring
        );
        assert_eq!(PruneSelector::from_arg("all").unwrap(), PruneSelector::All);
        assert_eq!(
            PruneSelector::from_arg("3day").unwrap(),
            PruneSelector::Tier(Tier::ThreeDay)
        );
        assert_eq!(
            PruneSelector::from_arg("gold").unwrap_err().kind(),
            "unknown_tier"
        );
    }
}
