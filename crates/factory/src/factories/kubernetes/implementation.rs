use kube::{
    Client, Config,
    config::{KubeConfigOptions, Kubeconfig},
};
use tracing::info;

use crate::factories::kubernetes::{Kubernetes, KubernetesConfig, error::KubernetesError};

impl Kubernetes {
    pub async fn new(cfg: &KubernetesConfig) -> Result<Self, KubernetesError> {
        let config = Self::load_config(cfg).await?;
        info!(
            cluster_url = %config.cluster_url,
            default_namespace = %config.default_namespace,
            in_cluster = cfg.in_cluster,
            "✅ Kubernetes client configured"
        );

        Ok(Self {
            client: Client::try_from(config)?,
        })
    }

    async fn load_config(cfg: &KubernetesConfig) -> Result<Config, KubernetesError> {
        if cfg.in_cluster {
            return Ok(Config::incluster()?);
        }

        let options = KubeConfigOptions {
            context: cfg.context.clone(),
            ..Default::default()
        };

        match &cfg.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Ok(Config::from_custom_kubeconfig(kubeconfig, &options).await?)
            }
            None if cfg.context.is_some() => Ok(Config::from_kubeconfig(&options).await?),
            None => Ok(Config::infer().await?),
        }
    }
}
