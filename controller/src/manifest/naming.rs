//! Object naming and labels

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ControllerError;
use crate::manifest::objects::Labels;

/// Kubernetes label values and DNS-1123 labels are capped at 63 characters
pub const MAX_NAME_LEN: usize = 63;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("constant pattern"));

/// Lowercase, collapse every run of non-alphanumerics into a single dash,
/// and trim dashes from both ends
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    INVALID_CHARS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

fn check_length(name: String) -> Result<String, ControllerError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ControllerError::NameTooLong {
            len: name.len(),
            name,
            limit: MAX_NAME_LEN,
        });
    }
    Ok(name)
}

/// Stable name of an application's workload: `slugify(<project>-<app>)`
pub fn deployment_name(project_slug: &str, app_slug: &str) -> Result<String, ControllerError> {
    check_length(slugify(&format!("{}-{}", project_slug, app_slug)))
}

/// Version label of one build: `<deployment-name>-<build-tag>`
pub fn app_version(deployment_name: &str, build_tag: &str) -> Result<String, ControllerError> {
    check_length(format!("{}-{}", deployment_name, slugify(build_tag)))
}

/// Default namespace of an environment
pub fn default_namespace(project_slug: &str, env: &str) -> String {
    slugify(&format!("{}-{}", project_slug, env))
}

/// Labels carried by every generated object
pub fn object_labels(version: &str, deployment_name: &str, project: &str, env: &str) -> Labels {
    Labels::from([
        ("app".to_string(), version.to_string()),
        ("main-app".to_string(), deployment_name.to_string()),
        ("project".to_string(), project.to_string()),
        ("env".to_string(), env.to_string()),
    ])
}

/// Selector matching only the pods of one version
pub fn version_selector(version: &str) -> String {
    format!("app={}", version)
}

/// Selector matching every superseded object of a deployment
pub fn stale_selector(deployment_name: &str, version: &str) -> String {
    format!("main-app={},app!={}", deployment_name, version)
}

/// Append `:<tag>` unless the reference already pins a tag or digest
pub fn tagged_image(image: &str, tag: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') || last_segment.contains('@') {
        image.to_string()
    } else {
        format!("{}:{}", image, tag)
    }
}
