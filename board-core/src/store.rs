//! In-process, lock-guarded ledger store backed by a snapshot file.
//!
//! Serves the server-resident write path (webhook captures and direct
//! API submissions). The lock is held only for the duration of a single
//! `add`/`list`/`prune` call, never across network calls.
//!
//! This store and the git-tracked ledger file are deliberately NOT kept
//! mutually consistent; reconciliation is an out-of-band operational
//! step (e.g. redeploying from the git-tracked snapshot).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::engine::{load_board, save_board};
use crate::error::Result;
use crate::ribbon::{RibbonRecord, is_duplicate};

/// Outcome of a store append. `Ignored` covers both dedup axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Ignored,
}

/// The in-memory ordered ledger plus its snapshot file.
#[derive(Debug)]
pub struct LedgerStore {
    snapshot_path: PathBuf,
    ribbons: Mutex<Vec<RibbonRecord>>,
}

impl LedgerStore {
    /// Open a store backed by `snapshot_path`. A missing snapshot is an
    /// empty ledger; a malformed one is fatal (`CorruptLedger`).
    pub fn open(snapshot_path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let ribbons = load_board(&snapshot_path)?;
        tracing::debug!(
            path = %snapshot_path.display(),
            entries = ribbons.len(),
            "ledger snapshot loaded"
        );
        Ok(Self {
            snapshot_path,
            ribbons: Mutex::new(ribbons),
        })
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Append one record under exclusive access.
    ///
    /// Both dedup axes are re-checked against the current in-memory set,
    /// which defends against races between concurrent server-resident
    /// writers. Duplicates are a no-op; on `Added` the full snapshot is
    /// rewritten in canonical order. The in-memory ledger is replaced
    /// only after the snapshot write succeeded, so a failed write never
    /// leaves an entry visible that was not durably stored.
    pub fn add(&self, ribbon: RibbonRecord) -> Result<AddOutcome> {
        let mut ribbons = self.lock();
        if is_duplicate(
            &ribbons,
            ribbon.trace_id.as_deref(),
            ribbon.provider.as_deref(),
            ribbon.purchase_id.as_deref(),
        ) {
            return Ok(AddOutcome::Ignored);
        }

        tracing::debug!(agent_id = %ribbon.agent_id, hash = %ribbon.hash, "ribbon added");
        let mut updated = ribbons.clone();
        updated.push(ribbon);
        save_board(&self.snapshot_path, &mut updated)?;
        *ribbons = updated;
        Ok(AddOutcome::Added)
    }

    /// Run an expiry sweep, persist if anything was removed, and return
    /// an owned ordered copy of the ledger.
    pub fn list(&self) -> Result<Vec<RibbonRecord>> {
        let mut ribbons = self.lock();
        if Self::sweep(&mut ribbons) > 0 {
            save_board(&self.snapshot_path, &mut ribbons)?;
        }
        Ok(ribbons.clone())
    }

    /// Explicit expiry sweep for scheduled maintenance. Idempotent.
    pub fn prune(&self) -> Result<usize> {
        let mut ribbons = self.lock();
        let removed = Self::sweep(&mut ribbons);
        if removed > 0 {
            save_board(&self.snapshot_path, &mut ribbons)?;
            tracing::info!(removed, "pruned expired ribbons from snapshot store");
        }
        Ok(removed)
    }

    /// Drop entries whose `expires_at` has passed. Entries without
    /// `expires_at` are never dropped by this path.
    fn sweep(ribbons: &mut Vec<RibbonRecord>) -> usize {
        let now = Utc::now();
        let before = ribbons.len();
        ribbons.retain(|ribbon| !ribbon.expired_at(now));
        before - ribbons.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RibbonRecord>> {
        self.ribbons.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AppendRequest, DEFAULT_MAX_MESSAGE_LEN};
    use crate::ribbon::format_utc;
    use crate::tier::Tier;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn ribbon(agent_id: &str, message: &str, tier: Tier) -> RibbonRecord {
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
        .build_record(Utc::now())
        .unwrap()
    }

    #[test]
    fn missing_snapshot_is_empty_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path().join("board.json")).unwrap();
        assert_eq!(store.list().unwrap(), Vec::new());
    }

    #[test]
    fn malformed_snapshot_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("board.json");
        std::fs::write(&path, "not json").unwrap();

        let err = LedgerStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), "corrupt_ledger");
    }

    #[test]
    fn add_persists_in_canonical_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("board.json");
        let store = LedgerStore::open(&path).unwrap();

        store.add(ribbon("low", "plain", Tier::Ephemeral)).unwrap();
        store.add(ribbon("high", "pinned", Tier::Featured)).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed[0].agent_id, "high");

        // a fresh store sees the same ordered snapshot
        let reopened = LedgerStore::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap(), listed);
    }

    #[test]
    fn add_rechecks_both_dedup_axes() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path().join("board.json")).unwrap();

        let mut paid = ribbon("payer", "paid ribbon", Tier::Permanent);
        paid.provider = Some("stripe".to_string());
        paid.purchase_id = Some("pur_1".to_string());
        assert_eq!(store.add(paid.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(store.add(paid).unwrap(), AddOutcome::Ignored);

        let mut traced = ribbon("bot", "traced ribbon", Tier::Ephemeral);
        traced.trace_id = Some("t1".to_string());
        assert_eq!(store.add(traced.clone()).unwrap(), AddOutcome::Added);
        assert_eq!(store.add(traced).unwrap(), AddOutcome::Ignored);

        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn failed_snapshot_write_leaves_memory_unchanged() {
        let dir = tempfile::TempDir::new().unwrap();
        // the snapshot's parent directory does not exist, so every
        // write fails while open() still sees an empty ledger
        let path = dir.path().join("missing").join("board.json");
        let store = LedgerStore::open(&path).unwrap();

        let mut traced = ribbon("bot", "first try", Tier::Ephemeral);
        traced.trace_id = Some("t1".to_string());
        assert!(store.add(traced.clone()).is_err());

        // the entry that never hit disk is not served
        assert_eq!(store.list().unwrap(), Vec::new());

        // and a retry is a fresh add, not a duplicate
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        assert_eq!(store.add(traced).unwrap(), AddOutcome::Added);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn list_sweeps_expired_entries_and_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("board.json");
        let store = LedgerStore::open(&path).unwrap();

        let mut stale = ribbon("stale", "old ribbon", Tier::Ephemeral);
        stale.expires_at = Some(format_utc(Utc::now() - Duration::hours(1)));
        store.add(stale).unwrap();
        store.add(ribbon("keeper", "permanent", Tier::Permanent)).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].agent_id, "keeper");

        // the sweep was persisted, not just in-memory
        let reopened = LedgerStore::open(&path).unwrap();
        assert_eq!(reopened.list().unwrap().len(), 1);
    }

    #[test]
    fn prune_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path().join("board.json")).unwrap();

        let mut stale = ribbon("stale", "old ribbon", Tier::Ephemeral);
        stale.expires_at = Some(format_utc(Utc::now() - Duration::hours(1)));
        store.add(stale).unwrap();

        assert_eq!(store.prune().unwrap(), 1);
        assert_eq!(store.prune().unwrap(), 0);
    }

    #[test]
    fn entries_without_expiry_are_never_swept() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path().join("board.json")).unwrap();

        store.add(ribbon("keeper", "permanent", Tier::Permanent)).unwrap();
        assert_eq!(store.prune().unwrap(), 0);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
