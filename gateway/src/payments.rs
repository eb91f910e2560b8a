//! Payment collaborator: one-time purchase intents for Stripe and PayPal.
//!
//! The core only depends on the narrow contract here: create an intent,
//! observe `pending` or `completed`. A `completed` intent triggers an
//! immediate snapshot-store append in the router; a `pending` one is
//! finalized later by a webhook capture.
//!
//! PayPal inline capture is best-effort: any upstream failure degrades
//! to the pending checkout-URL flow rather than erroring, so a payment
//! is never blocked on the capture fast path.

use std::time::Duration;

use base64::Engine as _;
use loom_board_core::Tier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use crate::error::GatewayError;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);

/// Supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
}

impl PaymentProvider {
    pub fn from_id(id: &str) -> Result<Self, GatewayError> {
        match id {
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::Paypal),
            other => Err(GatewayError::UnsupportedProvider {
                provider: other.to_string(),
            }),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Completed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// Card details for the PayPal inline-capture fast path.
#[derive(Debug, Clone)]
pub struct PayPalCard {
    pub number: String,
    /// `MM/YYYY`
    pub expiry: String,
    pub security_code: String,
    pub name: Option<String>,
}

/// One intent-creation request.
#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub provider: PaymentProvider,
    pub amount_usd: f64,
    pub agent_id: String,
    pub tier: Tier,
    pub message: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub paypal_card: Option<PayPalCard>,
    pub inline_capture_preferred: bool,
}

/// What the collaborator returned.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub provider: PaymentProvider,
    pub purchase_id: String,
    pub payment_url: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub provider_txn_id: Option<String>,
}

/// Environment-driven payment configuration.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub stripe_checkout_url: String,
    pub paypal_checkout_url: String,
    pub paypal_api_base: String,
    pub paypal_client_id: Option<String>,
    pub paypal_client_secret: Option<String>,
}

impl PaymentConfig {
    /// Read `STRIPE_CHECKOUT_URL`, `PAYPAL_CHECKOUT_URL`, `PAYPAL_MODE`,
    /// and the PayPal client credentials from the environment.
    pub fn from_env() -> Self {
        let mode = std::env::var("PAYPAL_MODE")
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let paypal_api_base = if mode == "live" {
            "https://api-m.paypal.com".to_string()
        } else {
            "https://api-m.sandbox.paypal.com".to_string()
        };

        Self {
            stripe_checkout_url: env_or(
                "STRIPE_CHECKOUT_URL",
                "https://checkout.stripe.com/pay/mock",
            ),
            paypal_checkout_url: env_or(
                "PAYPAL_CHECKOUT_URL",
                "https://www.paypal.com/checkoutnow",
            ),
            paypal_api_base,
            paypal_client_id: non_empty_env("PAYPAL_CLIENT_ID"),
            paypal_client_secret: non_empty_env("PAYPAL_CLIENT_SECRET"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct PaymentGateway {
    config: PaymentConfig,
    http: reqwest::Client,
}

impl PaymentGateway {
    pub fn new() -> Self {
        Self::with_config(PaymentConfig::from_env())
    }

    pub fn with_config(config: PaymentConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Create a one-time payment intent.
    ///
    /// Stripe always returns `pending` with a checkout URL; the ledger
    /// entry is written later by the webhook capture. PayPal attempts an
    /// inline capture when preferred and a card is present, returning
    /// `completed` with the provider transaction id on success.
    pub async fn create_one_time_intent(
        &self,
        intent: &CreateIntent,
    ) -> Result<PaymentIntent, GatewayError> {
        let purchase_id = new_purchase_id();

        match intent.provider {
            PaymentProvider::Stripe => Ok(PaymentIntent {
                provider: PaymentProvider::Stripe,
                payment_url: format!(
                    "{}?purchase_id={purchase_id}&tier={}",
                    self.config.stripe_checkout_url,
                    intent.tier.id()
                ),
                client_secret: Some(format!("cs_mock_{purchase_id}")),
                status: IntentStatus::Pending,
                provider_txn_id: None,
                purchase_id,
            }),
            PaymentProvider::Paypal => {
                if intent.inline_capture_preferred
                    && let Some(card) = &intent.paypal_card
                {
                    let memo = capture_memo(&intent.agent_id, intent.tier, &intent.message);
                    if let Some(txn_id) = self
                        .try_paypal_inline_capture(&purchase_id, intent.amount_usd, &memo, card)
                        .await
                    {
                        return Ok(PaymentIntent {
                            provider: PaymentProvider::Paypal,
                            purchase_id,
                            payment_url: String::new(),
                            client_secret: None,
                            status: IntentStatus::Completed,
                            provider_txn_id: Some(txn_id),
                        });
                    }
                }

                Ok(PaymentIntent {
                    provider: PaymentProvider::Paypal,
                    payment_url: format!(
                        "{}?token={purchase_id}&tier={}",
                        self.config.paypal_checkout_url,
                        intent.tier.id()
                    ),
                    client_secret: None,
                    status: IntentStatus::Pending,
                    provider_txn_id: None,
                    purchase_id,
                })
            }
        }
    }

    /// OAuth client-credentials token; `None` when credentials are
    /// absent or the upstream call fails.
    async fn paypal_token(&self) -> Option<String> {
        let (Some(client_id), Some(client_secret)) = (
            self.config.paypal_client_id.as_deref(),
            self.config.paypal_client_secret.as_deref(),
        ) else {
            return None;
        };

        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{client_id}:{client_secret}"));

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.config.paypal_api_base))
            .header("Authorization", format!("Basic {basic}"))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .timeout(UPSTREAM_TIMEOUT)
            .send()
            .await
            .ok()?;

        let payload: Value = response.json().await.ok()?;
        payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }

    /// Create-and-capture a PayPal order. Returns the capture id on a
    /// COMPLETED order; `None` on any upstream failure or non-terminal
    /// status, which callers treat as "fall back to pending checkout".
    async fn try_paypal_inline_capture(
        &self,
        purchase_id: &str,
        amount_usd: f64,
        memo: &str,
        card: &PayPalCard,
    ) -> Option<String> {
        let token = self.paypal_token().await?;

        let payload = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": purchase_id,
                "custom_id": memo,
                "amount": {"currency_code": "USD", "value": format!("{amount_usd:.2}")},
            }],
            "payment_source": {
                "card": {
                    "number": card.number,
                    "expiry": card.expiry,
                    "security_code": card.security_code,
                    "name": card.name.clone().unwrap_or_default(),
                }
            },
        });

        let result: Value = self
            .http
            .post(format!("{}/v2/checkout/orders", self.config.paypal_api_base))
            .header("Authorization", format!("Bearer {token}"))
            .header("PayPal-Request-Id", purchase_id)
            .json(&payload)
            .timeout(CAPTURE_TIMEOUT)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();
        let order_id = result
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if status == "COMPLETED" {
            return extract_capture_id(&result)
                .or(Some(order_id).filter(|id| !id.is_empty()))
                .or(Some(purchase_id.to_string()));
        }

        if !matches!(status.as_str(), "CREATED" | "APPROVED") || order_id.is_empty() {
            return None;
        }

        // order created but not captured: issue the capture follow-up
        let capture_result: Value = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{order_id}/capture",
                self.config.paypal_api_base
            ))
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .header("PayPal-Request-Id", format!("{purchase_id}-capture"))
            .body("{}")
            .timeout(CAPTURE_TIMEOUT)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let captured = capture_result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .eq_ignore_ascii_case("COMPLETED");
        if captured {
            extract_capture_id(&capture_result).or(Some(order_id))
        } else {
            None
        }
    }
}

impl Default for PaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Random `pur_<18 hex>` purchase id.
fn new_purchase_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("pur_{}", &hex[..18])
}

/// PayPal memo carried as `custom_id`: `agent|tier|message`, with `|`
/// sanitized out of the parts, capped at PayPal's 127-char limit.
fn capture_memo(agent_id: &str, tier: Tier, message: &str) -> String {
    let safe_agent: String = agent_id.replace('|', "/").chars().take(32).collect();
    let safe_message: String = message.replace('|', "/").chars().take(64).collect();
    let memo = format!("{safe_agent}|{}|{safe_message}", tier.id());
    memo.chars().take(127).collect()
}

/// Walk `purchase_units[].payments.captures[].id`.
fn extract_capture_id(payload: &Value) -> Option<String> {
    payload
        .get("purchase_units")?
        .as_array()?
        .iter()
        .filter_map(|unit| unit.get("payments")?.get("captures")?.as_array())
        .flatten()
        .find_map(|capture| {
            capture
                .get("id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
}
