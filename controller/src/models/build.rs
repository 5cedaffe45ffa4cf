//! Build models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::generate_id;

/// Build lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Start,
    Building,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }
}

/// Deploy status flag carried by a build once it is being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    InProgress,
    Success,
    Failed,
}

/// One compiled artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: String,

    /// `<app>-<tag>`, the key used to track and stop the build process
    pub slug: String,

    pub app_slug: String,
    pub project_slug: String,
    pub env: String,
    pub branch: String,

    /// Build tag, also the build number in the app-version label
    pub tag: String,

    /// Resulting image reference, set once the build succeeded
    #[serde(default)]
    pub image: Option<String>,

    pub status: BuildStatus,

    #[serde(default)]
    pub deploy_status: Option<DeployStatus>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    /// A new build in the `start` state
    pub fn new(app_slug: &str, project_slug: &str, env: &str, branch: &str, tag: &str) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            slug: format!("{}-{}", app_slug, tag),
            app_slug: app_slug.to_string(),
            project_slug: project_slug.to_string(),
            env: env.to_string(),
            branch: branch.to_string(),
            tag: tag.to_string(),
            image: None,
            status: BuildStatus::Start,
            deploy_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A build record for an image that was built elsewhere
    pub fn prebuilt(app_slug: &str, project_slug: &str, env: &str, image: &str, tag: &str) -> Self {
        let mut build = Self::new(app_slug, project_slug, env, "", tag);
        build.image = Some(image.to_string());
        build.status = BuildStatus::Success;
        build
    }
}
