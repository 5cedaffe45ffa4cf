//! Webhook models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome a webhook reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    Success,
    Failed,
}

/// A notification endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookChannel {
    /// Channel kind, only "http" is delivered by this process
    pub kind: String,
    pub url: String,
}

/// Fan-out record linking a release to its consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub release_id: String,

    /// Identities (users, teams) to notify
    #[serde(default)]
    pub consumers: Vec<String>,

    #[serde(default)]
    pub channels: Vec<WebhookChannel>,

    /// Set once, when the webhook fires
    #[serde(default)]
    pub outcome: Option<WebhookOutcome>,

    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
}
