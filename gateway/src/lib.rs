//! External collaborators for the Loom board.
//!
//! Three boundaries live here, each independent of the others:
//!
//! - [`payments`]: one-time purchase intents against Stripe and PayPal
//! - [`dispatch`]: the GitHub repository-dispatch relay for traces
//! - [`router`]: the validated ingestion boundary that routes paid
//!   captures to the snapshot store and traces to the dispatch relay
//!
//! Nothing here retries: collaborator failures surface to the caller as
//! structured outcomes or `UpstreamUnavailable` errors.

pub mod dispatch;
pub mod error;
pub mod payments;
pub mod router;

pub use dispatch::{DispatchConfig, DispatchResult, GitHubDispatchClient};
pub use error::{GatewayError, Result};
pub use payments::{
    CreateIntent, IntentStatus, PayPalCard, PaymentConfig, PaymentGateway, PaymentIntent,
    PaymentProvider,
};
pub use router::{
    IngestionRouter, PaidCapture, PurchaseReceipt, PurchaseSubmission, TraceSubmission,
};
