//! HTTP client for the metadata API

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};
use url::Url;

use crate::errors::ControllerError;
use crate::models::{
    AppConfig, Build, BuildStatus, Cluster, ContainerRegistry, DeployEnvironmentConfig,
    DeployStatus, Release, ReleaseStatus, Webhook, WebhookOutcome,
};
use crate::store::MetadataStore;

/// Metadata API client
pub struct HttpStore {
    client: Client,
    base_url: Url,
    token: Option<SecretString>,
}

impl HttpStore {
    /// Create a new client. `base_url` is the API root, e.g. `https://api.example.com/v1`.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| ControllerError::ConfigError(format!("invalid store URL: {}", e)))?;
        // Url::join drops the last segment without a trailing slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token: token.map(SecretString::from),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ControllerError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ControllerError::ConfigError(e.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    /// GET returning `None` on 404
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ControllerError> {
        let url = self.url(path, query)?;
        debug!("GET {}", url);

        let response = self.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(ControllerError::StoreError(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(Some(body))
    }

    /// GET failing with `NotFound` on 404
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControllerError> {
        self.get_optional(path, &[])
            .await?
            .ok_or_else(|| ControllerError::NotFound(path.to_string()))
    }

    /// Send a JSON body, returning the JSON response
    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ControllerError> {
        let url = self.url(path, &[])?;
        debug!("{} {}", method, url);

        let response = self.request(method.clone(), url).json(body).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ControllerError::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} failed: {} - {}", method, status, body);
            return Err(ControllerError::StoreError(format!("{}: {}", status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ControllerError> {
        let _: serde_json::Value = self.send(Method::POST, path, body).await?;
        Ok(())
    }

    async fn patch<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ControllerError> {
        let _: serde_json::Value = self.send(Method::PATCH, path, body).await?;
        Ok(())
    }
}

/// List envelope returned by collection endpoints
#[derive(Debug, Clone, Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct TriggerResponse {
    triggered: bool,
}

#[async_trait]
impl MetadataStore for HttpStore {
    async fn get_app(&self, slug: &str) -> Result<AppConfig, ControllerError> {
        self.get(&format!("/apps/{}", slug)).await
    }

    async fn save_environment(
        &self,
        app_slug: &str,
        env: &str,
        config: &DeployEnvironmentConfig,
    ) -> Result<(), ControllerError> {
        self.patch(&format!("/apps/{}/environments/{}", app_slug, env), config)
            .await
    }

    async fn get_cluster(&self, slug: &str) -> Result<Option<Cluster>, ControllerError> {
        self.get_optional(&format!("/clusters/{}", slug), &[]).await
    }

    async fn get_registry(
        &self,
        slug: &str,
    ) -> Result<Option<ContainerRegistry>, ControllerError> {
        self.get_optional(&format!("/registries/{}", slug), &[])
            .await
    }

    async fn create_build(&self, build: &Build) -> Result<(), ControllerError> {
        self.post("/builds", build).await
    }

    async fn get_build(&self, id: &str) -> Result<Option<Build>, ControllerError> {
        self.get_optional(&format!("/builds/{}", id), &[]).await
    }

    async fn latest_successful_build(
        &self,
        app_slug: &str,
        env: &str,
    ) -> Result<Option<Build>, ControllerError> {
        let response: Option<ListResponse<Build>> = self
            .get_optional(
                "/builds",
                &[
                    ("app", app_slug),
                    ("env", env),
                    ("status", "success"),
                    ("sort", "-createdAt"),
                    ("limit", "1"),
                ],
            )
            .await?;
        Ok(response.and_then(|r| r.items.into_iter().next()))
    }

    async fn update_build_status(
        &self,
        id: &str,
        status: BuildStatus,
        image: Option<&str>,
    ) -> Result<(), ControllerError> {
        let body = match image {
            Some(image) => json!({ "status": status, "image": image }),
            None => json!({ "status": status }),
        };
        self.patch(&format!("/builds/{}", id), &body).await
    }

    async fn update_build_deploy_status(
        &self,
        id: &str,
        status: DeployStatus,
    ) -> Result<(), ControllerError> {
        self.patch(&format!("/builds/{}", id), &json!({ "deployStatus": status }))
            .await
    }

    async fn create_release(&self, release: &Release) -> Result<(), ControllerError> {
        self.post("/releases", release).await
    }

    async fn get_release(&self, id: &str) -> Result<Option<Release>, ControllerError> {
        self.get_optional(&format!("/releases/{}", id), &[]).await
    }

    async fn list_releases(&self, app_slug: &str) -> Result<Vec<Release>, ControllerError> {
        let response: Option<ListResponse<Release>> = self
            .get_optional("/releases", &[("app", app_slug)])
            .await?;
        Ok(response.map(|r| r.items).unwrap_or_default())
    }

    async fn update_release_status(
        &self,
        id: &str,
        status: ReleaseStatus,
    ) -> Result<(), ControllerError> {
        self.patch(&format!("/releases/{}", id), &json!({ "status": status }))
            .await
    }

    async fn set_release_active(&self, id: &str, active: bool) -> Result<(), ControllerError> {
        self.patch(&format!("/releases/{}", id), &json!({ "active": active }))
            .await
    }

    async fn create_webhook(&self, webhook: &Webhook) -> Result<(), ControllerError> {
        self.post("/webhooks", webhook).await
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, ControllerError> {
        self.get_optional(&format!("/webhooks/{}", id), &[]).await
    }

    async fn mark_webhook_triggered(
        &self,
        id: &str,
        outcome: WebhookOutcome,
    ) -> Result<bool, ControllerError> {
        let response: TriggerResponse = self
            .send(
                Method::POST,
                &format!("/webhooks/{}/trigger", id),
                &json!({ "outcome": outcome }),
            )
            .await?;
        Ok(response.triggered)
    }
}
