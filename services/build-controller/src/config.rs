use std::{net::SocketAddr, path::PathBuf};

use config::{ConfigBuilder, ConfigError, Environment, File, builder::AsyncState};
use factory::factories::{kubernetes::KubernetesConfig, observability::ObservabilityConfig};
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "server_address_default")]
    pub server_address: SocketAddr,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    /// Watch a single namespace; all namespaces when unset.
    pub namespace: Option<String>,
    pub runner: RunnerConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RunnerConfig {
    pub image: String,
    pub image_pull_policy: Option<String>,
    /// Secret injected into every runner with `envFrom`.
    pub env_from_secret: Option<String>,
    #[serde(default = "default_deadline_secs_default")]
    pub default_deadline_secs: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GcConfig {
    #[serde(default = "interval_secs_default")]
    pub interval_secs: u64,
    /// Terminal builds kept per state. 0 turns collection off.
    #[serde(default = "retention_default")]
    pub retention: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_secs: interval_secs_default(),
            retention: retention_default(),
        }
    }
}

fn server_address_default() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_deadline_secs_default() -> u64 {
    3600
}

fn interval_secs_default() -> u64 {
    300
}

fn retention_default() -> usize {
    20
}

impl Config {
    pub async fn init(path: PathBuf) -> Result<Self, ConfigError> {
        let cfg = ConfigBuilder::<AsyncState>::default()
            .add_source(File::from(path).required(false))
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()
            .await?;

        cfg.try_deserialize()
    }
}
