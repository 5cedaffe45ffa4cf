//! Webhook dispatch
//!
//! A webhook fires exactly once, when its release reaches a terminal
//! outcome. The store arbitrates: only the caller that records the outcome
//! delivers the notification.

pub mod http;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::models::WebhookOutcome;

pub use self::http::HttpWebhookDispatcher;

#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// Record the outcome and notify every channel. Triggering an already
    /// fired webhook is a no-op.
    async fn trigger(&self, webhook_id: &str, outcome: WebhookOutcome)
        -> Result<(), ControllerError>;
}
