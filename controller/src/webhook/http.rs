//! HTTP webhook delivery

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::ControllerError;
use crate::models::{Release, Webhook, WebhookOutcome};
use crate::store::MetadataStore;
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::webhook::WebhookDispatcher;

/// Body POSTed to every channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub webhook_id: String,
    pub release_id: String,
    pub outcome: WebhookOutcome,
    pub consumers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl WebhookPayload {
    pub fn new(webhook: &Webhook, outcome: WebhookOutcome, release: Option<&Release>) -> Self {
        Self {
            webhook_id: webhook.id.clone(),
            release_id: webhook.release_id.clone(),
            outcome,
            consumers: webhook.consumers.clone(),
            app: release.map(|r| r.app_slug.clone()),
            env: release.map(|r| r.env.clone()),
            app_version: release.map(|r| r.app_version.clone()),
            endpoint: release.and_then(|r| r.endpoint.clone()),
        }
    }
}

/// Delivers webhooks to their HTTP channels with exponential backoff
pub struct HttpWebhookDispatcher {
    store: Arc<dyn MetadataStore>,
    client: Client,
    max_attempts: u32,
    cooldown: CooldownOptions,
}

impl HttpWebhookDispatcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            store,
            client,
            max_attempts: max_attempts.max(1),
            cooldown: CooldownOptions {
                base_delay,
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        })
    }

    async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<(), ControllerError> {
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(calc_exp_backoff(&self.cooldown, attempt - 1)).await;
            }

            match self.client.post(url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Webhook delivered to {}", url);
                    return Ok(());
                }
                Ok(response) => last_error = format!("HTTP {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }
            warn!(
                "Webhook delivery to {} failed (attempt {}/{}): {}",
                url,
                attempt + 1,
                self.max_attempts,
                last_error
            );
        }
        Err(ControllerError::WebhookError(format!("{}: {}", url, last_error)))
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn trigger(
        &self,
        webhook_id: &str,
        outcome: WebhookOutcome,
    ) -> Result<(), ControllerError> {
        if !self.store.mark_webhook_triggered(webhook_id, outcome).await? {
            debug!("Webhook {} already triggered", webhook_id);
            return Ok(());
        }

        let webhook = self
            .store
            .get_webhook(webhook_id)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("webhook {}", webhook_id)))?;
        let release = self.store.get_release(&webhook.release_id).await?;
        let payload = WebhookPayload::new(&webhook, outcome, release.as_ref());

        let mut failures = Vec::new();
        for channel in &webhook.channels {
            if channel.kind != "http" {
                debug!("Skipping {} channel of webhook {}", channel.kind, webhook_id);
                continue;
            }
            if let Err(e) = self.deliver(&channel.url, &payload).await {
                failures.push(e.to_string());
            }
        }

        info!(
            "Webhook {} triggered ({:?}), {} channel(s) failed",
            webhook_id,
            outcome,
            failures.len()
        );
        if !failures.is_empty() {
            return Err(ControllerError::WebhookError(failures.join("; ")));
        }
        Ok(())
    }
}
