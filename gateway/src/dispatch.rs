//! GitHub repository-dispatch relay for trace-originated submissions.
//!
//! Trace submissions are not written by the API server itself: they are
//! relayed as a `repository_dispatch` event so that the automation
//! pipeline owning the git working copy performs the ledger transaction.
//! A non-accepted result is surfaced to the submitter, never retried
//! here.

use std::time::Duration;

use serde_json::json;

use crate::router::TraceSubmission;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_EVENT_TYPE: &str = "agent_trace";
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Environment-driven dispatch configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// `owner/name` of the repository receiving the event.
    pub repo: String,
    pub token: String,
    pub event_type: String,
    /// Overridable for tests.
    pub api_base: String,
}

impl DispatchConfig {
    /// Read `LOOM_GITHUB_REPO`, `LOOM_GITHUB_TOKEN`, and
    /// `LOOM_GITHUB_EVENT_TYPE` from the environment.
    pub fn from_env() -> Self {
        let event_type = std::env::var("LOOM_GITHUB_EVENT_TYPE")
            .unwrap_or_default()
            .trim()
            .to_string();
        Self {
            repo: trimmed_env("LOOM_GITHUB_REPO"),
            token: trimmed_env("LOOM_GITHUB_TOKEN"),
            event_type: if event_type.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                event_type
            },
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

fn trimmed_env(key: &str) -> String {
    std::env::var(key).unwrap_or_default().trim().to_string()
}

/// Structured dispatch outcome; `status_code` maps onto the provider's
/// HTTP semantics so callers can surface it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub accepted: bool,
    pub reason: String,
    pub status_code: u16,
}

impl DispatchResult {
    fn rejected(reason: impl Into<String>, status_code: u16) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            status_code,
        }
    }
}

pub struct GitHubDispatchClient {
    config: DispatchConfig,
    http: reqwest::Client,
}

impl GitHubDispatchClient {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::from_env())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Whether both repo and token are present.
    pub fn configured(&self) -> bool {
        !self.config.repo.is_empty() && !self.config.token.is_empty()
    }

    /// Relay one trace as a repository-dispatch event.
    pub async fn dispatch_trace(&self, trace: &TraceSubmission) -> DispatchResult {
        if self.config.repo.is_empty() {
            return DispatchResult::rejected("missing_repo", 503);
        }
        let Some((owner, name)) = self.config.repo.split_once('/') else {
            return DispatchResult::rejected("misconfigured_repo", 503);
        };
        if self.config.token.is_empty() {
            return DispatchResult::rejected("missing_token", 503);
        }

        let url = format!(
            "{}/repos/{}/{}/dispatches",
            self.config.api_base,
            urlencoding::encode(owner),
            urlencoding::encode(name)
        );

        let payload = json!({
            "event_type": self.config.event_type,
            "client_payload": {
                "agent_id": trace.agent_id,
                "message": trace.message,
                "trace_id": trace.trace_id,
                "source": trace.source,
                "page_url": trace.page_url.clone().unwrap_or_default(),
                "user_agent": trace.user_agent.clone().unwrap_or_default(),
            },
        });

        let response = self
            .http
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "loom-engine-dispatch/1.0")
            .json(&payload)
            .timeout(DISPATCH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => DispatchResult {
                accepted: true,
                reason: "accepted".to_string(),
                status_code: 204,
            },
            Ok(resp) => {
                let code = resp.status().as_u16();
                tracing::warn!(status = code, trace_id = %trace.trace_id, "dispatch rejected");
                DispatchResult::rejected(format!("http_{code}"), code)
            }
            Err(err) => {
                tracing::warn!(error = %err, trace_id = %trace.trace_id, "dispatch unreachable");
                DispatchResult::rejected("dispatch_unreachable", 502)
            }
        }
    }
}

impl Default for GitHubDispatchClient {
    fn default() -> Self {
        Self::new()
    }
}
