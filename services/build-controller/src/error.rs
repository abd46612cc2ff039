use factory::factories::kubernetes::error::KubernetesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Kube error, {0}")]
    KubeError(#[from] kube::Error),

    #[error("Kubernetes client error, {0}")]
    KubernetesError(#[from] KubernetesError),

    #[error("Watcher error, {0}")]
    WatcherError(#[from] kube::runtime::watcher::Error),

    #[error("IO error, {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serde yaml error, {0}")]
    SerdeyamlError(#[from] serde_yaml::Error),

    #[error("{kind} {name} already exists and belongs to another owner")]
    OwnershipConflict { kind: String, name: String },

    #[error("imagebuild is missing {0}")]
    MissingField(&'static str),
}
