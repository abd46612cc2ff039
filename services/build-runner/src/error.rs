use build_core::models::BuildState;
use factory::factories::kubernetes::error::KubernetesError;
use thiserror::Error;

use crate::services::{
    context_fetcher::FetchError, credential_resolver::CredentialError,
    plugin_host::PluginError, process_builder::BuildError, status_publisher::PublishError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Kube error, {0}")]
    KubeError(#[from] kube::Error),

    #[error("Kubernetes client error, {0}")]
    KubernetesError(#[from] KubernetesError),

    #[error(transparent)]
    CredentialError(#[from] CredentialError),

    #[error(transparent)]
    FetchError(#[from] FetchError),

    #[error(transparent)]
    PluginError(#[from] PluginError),

    #[error(transparent)]
    PublishError(#[from] PublishError),

    #[error(transparent)]
    BuildError(#[from] BuildError),

    #[error("build {name} was already processed, state is {state}")]
    AlreadyProcessed { name: String, state: BuildState },

    #[error("build timed out after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    NotFoundError(String),

    #[error("Interrupted by shutdown signal")]
    Interrupted,
}
