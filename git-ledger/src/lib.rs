//! Git-mediated ledger transactions.
//!
//! Performs one ledger mutation as a best-effort distributed transaction
//! against a board file tracked in version control. The remote
//! repository, not any in-process state, is ground truth; the commit
//! is the transaction:
//!
//! 1. checkout the designated branch, fast-forward from the remote
//! 2. apply the shared append/dedup rules to the working-copy board file
//! 3. duplicate or empty message → stop (`duplicate_or_empty`)
//! 4. stage the file; nothing staged against HEAD → stop (`no_change`)
//! 5. commit as the fixed bot identity, push
//!
//! The whole sequence runs under a process-wide exclusive lock and is
//! never retried automatically: a push rejected by a concurrent writer
//! is surfaced for the caller to retry. An aborted sequence leaves the
//! working copy exactly as the last completed step left it.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use loom_board_core::{AppendOutcome, AppendRequest, DEFAULT_MAX_MESSAGE_LEN, Tier, append_entry};

/// Committer identity for ledger commits.
const BOT_NAME: &str = "loom-bridge[bot]";
const BOT_EMAIL: &str = "loom-bridge[bot]@users.noreply.github.com";

/// Ledger file tracked inside the repository, relative to its root.
const DEFAULT_LEDGER_FILE: &str = "board.json";

/// One trace-originated submission.
#[derive(Debug, Clone)]
pub struct TraceIngest {
    pub agent_id: String,
    pub message: String,
    pub trace_id: String,
    pub source: String,
}

/// Structured outcome of one ledger transaction. Expected failure modes
/// are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub accepted: bool,
    pub changed: bool,
    pub reason: IngestReason,
}

impl IngestOutcome {
    fn rejected(reason: IngestReason) -> Self {
        Self {
            accepted: false,
            changed: false,
            reason,
        }
    }

    fn unchanged(reason: IngestReason) -> Self {
        Self {
            accepted: true,
            changed: false,
            reason,
        }
    }

    fn committed() -> Self {
        Self {
            accepted: true,
            changed: true,
            reason: IngestReason::Committed,
        }
    }
}

/// Machine-readable reason codes for [`IngestOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestReason {
    /// The entry was committed and pushed.
    Committed,
    /// The apply step reported a duplicate trace or an empty message.
    DuplicateOrEmpty,
    /// The tracked file did not differ from its committed content.
    NoChange,
    /// The ledger working copy is absent; checked before any step runs.
    RepoPathMissing,
    /// A sequence step failed; nothing was partially committed.
    GitFailed(GitFailure),
}

/// What went wrong inside the git sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFailure {
    /// A git subprocess exited non-zero (network, conflict, rejection).
    Exit(i32),
    /// The git binary could not be started at all.
    Spawn,
    /// The ledger mutation itself failed (I/O or corrupt board file).
    Apply,
}

impl IngestReason {
    /// Stable reason code for callers and logs.
    pub fn code(&self) -> String {
        match self {
            Self::Committed => "committed".to_string(),
            Self::DuplicateOrEmpty => "duplicate_or_empty".to_string(),
            Self::NoChange => "no_change".to_string(),
            Self::RepoPathMissing => "repo_path_missing".to_string(),
            Self::GitFailed(GitFailure::Exit(code)) => format!("git_ingest_failed:{code}"),
            Self::GitFailed(GitFailure::Spawn) => "git_ingest_failed:spawn".to_string(),
            Self::GitFailed(GitFailure::Apply) => "git_ingest_failed:apply".to_string(),
        }
    }
}

/// Cross-process-safe ledger writer for trace-originated submissions.
///
/// Callers must treat this as a coarse, potentially slow, serialized
/// resource: the lock is held across subprocess invocations including a
/// network pull and push.
pub struct GitLedgerTransaction {
    repo_path: PathBuf,
    branch: String,
    ledger_file: String,
    lock: Mutex<()>,
}

impl GitLedgerTransaction {
    /// Transaction against `repo_path` on branch `main`.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self::with_branch(repo_path, "main")
    }

    pub fn with_branch(repo_path: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch: branch.into(),
            ledger_file: DEFAULT_LEDGER_FILE.to_string(),
            lock: Mutex::new(()),
        }
    }

    /// Override the tracked ledger file (relative to the repo root).
    pub fn with_ledger_file(mut self, ledger_file: impl Into<String>) -> Self {
        self.ledger_file = ledger_file.into();
        self
    }

    /// Run the full pull → mutate → diff-check → commit → push sequence
    /// for one trace. Holds the process-wide lock for the whole sequence
    /// and releases it on every exit path.
    pub fn ingest_trace(&self, trace: &TraceIngest) -> IngestOutcome {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.repo_path.exists() {
            return IngestOutcome::rejected(IngestReason::RepoPathMissing);
        }

        // step 1: switch to the branch and fast-forward from the remote
        if let Err(failure) = self.run_git(&["checkout", &self.branch]) {
            return IngestOutcome::rejected(IngestReason::GitFailed(failure));
        }
        if let Err(failure) = self.run_git(&["pull", "--rebase", "origin", &self.branch]) {
            return IngestOutcome::rejected(IngestReason::GitFailed(failure));
        }

        // step 2: apply the shared append/dedup rules to the working copy
        let request = AppendRequest {
            agent_id: trace.agent_id.clone(),
            message: trace.message.clone(),
            tier: Tier::Ephemeral,
            source: trace.source.clone(),
            amount_usd: None,
            weight: None,
            trace_id: Some(trace.trace_id.clone()),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            provider: None,
            purchase_id: None,
        };
        let outcome = match append_entry(&self.repo_path.join(&self.ledger_file), &request) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, kind = err.kind(), "ledger apply failed");
                return IngestOutcome::rejected(IngestReason::GitFailed(GitFailure::Apply));
            }
        };

        // step 3: duplicate or empty message ends the transaction early
        if outcome == AppendOutcome::Ignored {
            return IngestOutcome::unchanged(IngestReason::DuplicateOrEmpty);
        }

        // step 4: stage the file, then compare the index against HEAD.
        // Staging first makes the creation of a previously untracked
        // ledger file count as a change; an unstaged `git diff` reports
        // nothing for a file with no committed ancestor.
        if let Err(failure) = self.run_git(&["add", &self.ledger_file]) {
            return IngestOutcome::rejected(IngestReason::GitFailed(failure));
        }
        let diff = match self.run_git(&[
            "diff",
            "--cached",
            "--name-only",
            "--",
            &self.ledger_file,
        ]) {
            Ok(stdout) => stdout,
            Err(failure) => return IngestOutcome::rejected(IngestReason::GitFailed(failure)),
        };
        if diff.trim().is_empty() {
            return IngestOutcome::unchanged(IngestReason::NoChange);
        }

        // step 5: commit as the bot identity, push
        let user_name = format!("user.name={BOT_NAME}");
        let user_email = format!("user.email={BOT_EMAIL}");
        let commit_message = format!("board: ingest trace for {}", trace.agent_id);
        let steps: [&[&str]; 2] = [
            &[
                "-c",
                &user_name,
                "-c",
                &user_email,
                "commit",
                "-m",
                &commit_message,
            ],
            &["push", "origin", &self.branch],
        ];
        for args in steps {
            if let Err(failure) = self.run_git(args) {
                return IngestOutcome::rejected(IngestReason::GitFailed(failure));
            }
        }

        tracing::info!(
            agent_id = %trace.agent_id,
            trace_id = %trace.trace_id,
            branch = %self.branch,
            "ledger transaction committed"
        );
        IngestOutcome::committed()
    }

    /// Run one git step rooted at the repo, capturing stdout.
    fn run_git(&self, args: &[&str]) -> Result<String, GitFailure> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .map_err(|err| {
                tracing::warn!(error = %err, "failed to spawn git");
                GitFailure::Spawn
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                args = ?args,
                code = output.status.code(),
                stderr = %stderr.trim(),
                "git step failed"
            );
            return Err(GitFailure::Exit(output.status.code().unwrap_or(-1)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
