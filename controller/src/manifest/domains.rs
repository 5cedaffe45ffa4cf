//! Platform subdomain allocation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::ControllerError;

/// Hands out platform subdomains for environments without a domain
#[async_trait]
pub trait SubdomainAllocator: Send + Sync {
    /// Allocate a fully qualified domain for `label`, e.g. "demo-web-dev"
    async fn allocate(&self, label: &str) -> Result<String, ControllerError>;
}

/// Appends the label to a fixed base domain
pub struct StaticSubdomainAllocator {
    base_domain: String,
}

impl StaticSubdomainAllocator {
    pub fn new(base_domain: &str) -> Self {
        Self {
            base_domain: base_domain.trim_matches('.').to_string(),
        }
    }
}

#[async_trait]
impl SubdomainAllocator for StaticSubdomainAllocator {
    async fn allocate(&self, label: &str) -> Result<String, ControllerError> {
        if self.base_domain.is_empty() {
            return Err(ControllerError::DomainError(
                "no base domain configured".to_string(),
            ));
        }
        Ok(format!("{}.{}", label, self.base_domain))
    }
}

#[derive(Debug, Serialize)]
struct AllocateRequest<'a> {
    label: &'a str,
}

#[derive(Debug, Deserialize)]
struct AllocateResponse {
    domain: String,
}

/// Asks the platform DNS service for a subdomain
pub struct HttpSubdomainAllocator {
    client: Client,
    url: String,
}

impl HttpSubdomainAllocator {
    pub fn new(url: &str) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SubdomainAllocator for HttpSubdomainAllocator {
    async fn allocate(&self, label: &str) -> Result<String, ControllerError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AllocateRequest { label })
            .send()
            .await
            .map_err(|e| ControllerError::DomainError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Subdomain allocation failed: {} - {}", status, body);
            return Err(ControllerError::DomainError(format!("{}: {}", status, body)));
        }

        let allocated: AllocateResponse = response
            .json()
            .await
            .map_err(|e| ControllerError::DomainError(e.to_string()))?;
        info!("Allocated subdomain {}", allocated.domain);
        Ok(allocated.domain)
    }
}
