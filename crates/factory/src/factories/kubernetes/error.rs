use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubernetesError {
    #[error("Kube error, {0}")]
    KubeError(#[from] kube::Error),
    #[error("in-cluster config unavailable, {0}")]
    InCluster(#[from] kube_client::config::InClusterError),
    #[error("failed to load kubeconfig, {0}")]
    Kubeconfig(#[from] kube_client::config::KubeconfigError),
    #[error("failed to infer cluster config, {0}")]
    Infer(#[from] kube_client::config::InferConfigError),
}
