//! Ingestion routing boundary.
//!
//! Validated submissions arrive here and fan out by origin: paid
//! captures are written to the in-process [`LedgerStore`], trace
//! submissions are relayed through the GitHub dispatch collaborator so
//! the git-owning pipeline performs the ledger transaction. The two
//! targets are independent ledgers and are not reconciled here.

use std::sync::Arc;

use chrono::Utc;
use loom_board_core::{
    AddOutcome, AppendRequest, DEFAULT_MAX_MESSAGE_LEN, LedgerStore, MAX_AGENT_ID_LEN, Tier,
};

use crate::dispatch::{DispatchResult, GitHubDispatchClient};
use crate::error::{GatewayError, Result};
use crate::payments::{
    CreateIntent, IntentStatus, PayPalCard, PaymentGateway, PaymentIntent, PaymentProvider,
};

const MAX_TRACE_ID_LEN: usize = 128;
const MAX_SOURCE_LEN: usize = 64;
const MAX_URL_LEN: usize = 512;

fn require_len(
    field: &'static str,
    value: &str,
    max: usize,
) -> std::result::Result<(), GatewayError> {
    if value.is_empty() {
        return Err(GatewayError::Validation {
            field,
            message: "must not be empty".to_string(),
        });
    }
    if value.chars().count() > max {
        return Err(GatewayError::Validation {
            field,
            message: format!("longer than {max} characters"),
        });
    }
    Ok(())
}

fn require_opt_len(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> std::result::Result<(), GatewayError> {
    if let Some(value) = value
        && value.chars().count() > max
    {
        return Err(GatewayError::Validation {
            field,
            message: format!("longer than {max} characters"),
        });
    }
    Ok(())
}

/// A trace submission bound for the git-tracked ledger.
#[derive(Debug, Clone)]
pub struct TraceSubmission {
    pub agent_id: String,
    pub message: String,
    pub trace_id: String,
    pub source: String,
    pub page_url: Option<String>,
    pub user_agent: Option<String>,
}

impl TraceSubmission {
    pub fn validate(&self) -> Result<()> {
        require_len("agent_id", &self.agent_id, MAX_AGENT_ID_LEN)?;
        require_len("message", &self.message, DEFAULT_MAX_MESSAGE_LEN)?;
        require_len("trace_id", &self.trace_id, MAX_TRACE_ID_LEN)?;
        require_len("source", &self.source, MAX_SOURCE_LEN)?;
        require_opt_len("page_url", self.page_url.as_deref(), MAX_URL_LEN)?;
        require_opt_len("user_agent", self.user_agent.as_deref(), MAX_URL_LEN)?;
        Ok(())
    }
}

/// A purchase request for one paid ribbon.
#[derive(Debug, Clone)]
pub struct PurchaseSubmission {
    pub agent_id: String,
    pub message: String,
    pub tier_id: String,
    pub provider_id: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub paypal_card: Option<PayPalCard>,
    pub inline_capture_preferred: bool,
}

impl PurchaseSubmission {
    /// Validate fields and resolve the tier and provider. Unknown tiers
    /// and providers are rejected here, before any collaborator call.
    pub fn resolve(&self) -> Result<(Tier, PaymentProvider)> {
        require_len("agent_id", &self.agent_id, MAX_AGENT_ID_LEN)?;
        require_len("message", &self.message, DEFAULT_MAX_MESSAGE_LEN)?;
        require_opt_len("success_url", self.success_url.as_deref(), MAX_URL_LEN)?;
        require_opt_len("cancel_url", self.cancel_url.as_deref(), MAX_URL_LEN)?;

        let tier = Tier::from_id(&self.tier_id)?;
        if tier.spec().price_usd <= 0.0 {
            return Err(GatewayError::TierNotPayable {
                tier_id: tier.id().to_string(),
            });
        }
        let provider = PaymentProvider::from_id(&self.provider_id)?;
        Ok((tier, provider))
    }
}

/// A settled payment to be written to the snapshot ledger.
#[derive(Debug, Clone)]
pub struct PaidCapture {
    pub agent_id: String,
    pub message: String,
    pub tier: Tier,
    pub provider: PaymentProvider,
    pub amount_usd: f64,
    pub purchase_id: String,
    /// `capture-<provider>` or `webhook-<provider>` depending on origin.
    pub source: String,
}

/// What the caller gets back from `begin_purchase`.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub intent: PaymentIntent,
    /// True when the payment settled inline and the ribbon is already
    /// on the board.
    pub activated: bool,
}

pub struct IngestionRouter {
    store: Arc<LedgerStore>,
    payments: PaymentGateway,
    dispatch: GitHubDispatchClient,
}

impl IngestionRouter {
    /// Router with environment-configured collaborators.
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self::with_collaborators(store, PaymentGateway::new(), GitHubDispatchClient::new())
    }

    pub fn with_collaborators(
        store: Arc<LedgerStore>,
        payments: PaymentGateway,
        dispatch: GitHubDispatchClient,
    ) -> Self {
        Self {
            store,
            payments,
            dispatch,
        }
    }

    /// Write one settled payment to the snapshot ledger.
    ///
    /// The record goes through the same assembly as every other write
    /// path, so tier policy (weight bonus, pin rank, expiry) and the
    /// dedup axes apply identically. An empty normalized message or a
    /// duplicate `(provider, purchase_id)` pair is `Ignored`.
    pub fn ingest_capture(&self, capture: &PaidCapture) -> Result<AddOutcome> {
        let request = AppendRequest {
            agent_id: capture.agent_id.clone(),
            message: capture.message.clone(),
            tier: capture.tier,
            source: capture.source.clone(),
            amount_usd: Some(capture.amount_usd),
            weight: None,
            trace_id: None,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            provider: Some(capture.provider.id().to_string()),
            purchase_id: Some(capture.purchase_id.clone()),
        };
        let Some(record) = request.build_record(Utc::now()) else {
            return Ok(AddOutcome::Ignored);
        };

        let outcome = self.store.add(record)?;
        tracing::info!(
            agent_id = %capture.agent_id,
            provider = %capture.provider,
            purchase_id = %capture.purchase_id,
            outcome = ?outcome,
            "capture ingested"
        );
        Ok(outcome)
    }

    /// Relay one trace submission to the dispatch collaborator.
    ///
    /// A non-accepted dispatch surfaces as `UpstreamUnavailable`; the
    /// submission is never queued or retried here.
    pub async fn ingest_trace(&self, trace: &TraceSubmission) -> Result<DispatchResult> {
        trace.validate()?;

        let result = self.dispatch.dispatch_trace(trace).await;
        if !result.accepted {
            return Err(GatewayError::UpstreamUnavailable {
                reason: result.reason,
                status_code: result.status_code,
            });
        }
        Ok(result)
    }

    /// Start a purchase: create the payment intent and, when the
    /// provider settled it inline, write the ribbon immediately.
    pub async fn begin_purchase(&self, submission: &PurchaseSubmission) -> Result<PurchaseReceipt> {
        let (tier, provider) = submission.resolve()?;
        let amount_usd = tier.spec().price_usd;

        let intent = self
            .payments
            .create_one_time_intent(&CreateIntent {
                provider,
                amount_usd,
                agent_id: submission.agent_id.clone(),
                tier,
                message: submission.message.clone(),
                success_url: submission.success_url.clone(),
                cancel_url: submission.cancel_url.clone(),
                paypal_card: submission.paypal_card.clone(),
                inline_capture_preferred: submission.inline_capture_preferred,
            })
            .await?;

        let mut activated = false;
        if intent.status == IntentStatus::Completed {
            let purchase_id = intent
                .provider_txn_id
                .clone()
                .unwrap_or_else(|| intent.purchase_id.clone());
            let outcome = self.ingest_capture(&PaidCapture {
                agent_id: submission.agent_id.clone(),
                message: submission.message.clone(),
                tier,
                provider,
                amount_usd,
                purchase_id,
                source: format!("capture-{provider}"),
            })?;
            activated = outcome == AddOutcome::Added;
        }

        Ok(PurchaseReceipt { intent, activated })
    }
}
