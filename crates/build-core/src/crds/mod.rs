use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::BuildState;

// -----------------------------------------------------------------------------
// ImageBuild Resource
// -----------------------------------------------------------------------------
#[derive(CustomResource, Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[kube(
    group = "foundry.dev",
    version = "v1alpha1",
    kind = "ImageBuild",
    plural = "imagebuilds",
    shortname = "ib",
    namespaced,
    status = "ImageBuildStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildSpec {
    /// Remote tar or tar.gz archive holding the build context.
    pub context_url: String,
    pub image_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub registries: Vec<RegistryReference>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub cache: bool,
    pub max_size_bytes: Option<u64>,
    pub timeout_seconds: Option<u64>,
    /// Passed verbatim to every preparer plugin.
    #[serde(default)]
    pub plugin_data: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildStatus {
    pub state: Option<BuildState>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub error_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
}

// -----------------------------------------------------------------------------
// Registry references
// -----------------------------------------------------------------------------

/// A push/pull target. Exactly one credential source must be set:
/// `username` + `password`, `secretRef`, or `dynamic`.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryReference {
    pub host: String,
    #[serde(default)]
    pub insecure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub secret_ref: Option<SecretReference>,
    #[serde(default)]
    pub dynamic: bool,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: Option<String>,
    pub namespace: Option<String>,
}
