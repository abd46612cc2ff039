pub mod error;
pub mod implementation;

use kube::Client;
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct KubernetesConfig {
    /// Use the pod's service account instead of a kubeconfig.
    #[serde(default)]
    pub in_cluster: bool,
    pub kubeconfig: Option<String>,
    /// Kubeconfig context; the file's current context when unset.
    pub context: Option<String>,
}

#[derive(Clone)]
pub struct Kubernetes {
    pub client: Client,
}
