use std::{collections::BTreeMap, path::Path};

use build_core::crds::{ImageBuild, ImageBuildStatus};
use build_core::schemas::StatusUpdate;
use k8s_openapi::api::core::v1::Secret;

use crate::error::AppError;
use crate::services::context_fetcher::{FetchError, FetchedContext};
use crate::services::credential_resolver::CredentialError;
use crate::services::plugin_host::PluginError;
use crate::services::process_builder::{BuildError, BuildOptions};
use crate::services::status_publisher::PublishError;

/// Read and status-update access to ImageBuild objects.
pub trait BuildStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<ImageBuild, AppError>;

    /// Replaces the status subresource in a single request.
    async fn update_status(
        &self,
        build: &ImageBuild,
        status: &ImageBuildStatus,
    ) -> Result<(), AppError>;
}

pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the secret does not exist.
    async fn get_secret(&self, namespace: &str, name: &str)
    -> Result<Option<Secret>, CredentialError>;
}

pub trait StatusSink: Send {
    async fn push(&mut self, update: &StatusUpdate) -> Result<(), PublishError>;

    async fn close(&mut self) {}
}

/// The image build engine.
pub trait Builder: Send + Sync {
    async fn build_and_push(&self, options: &BuildOptions) -> Result<Vec<String>, BuildError>;
}

pub trait ContextSource: Send + Sync {
    async fn fetch_context(
        &self,
        url: &str,
        max_size_bytes: Option<u64>,
    ) -> Result<FetchedContext, FetchError>;
}

/// Mutates an extracted context before the builder sees it.
pub trait ContextPreparer: Send {
    async fn prepare(
        &mut self,
        context_dir: &Path,
        plugin_data: &BTreeMap<String, String>,
    ) -> Result<(), PluginError>;
}
