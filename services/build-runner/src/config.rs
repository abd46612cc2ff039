use std::path::PathBuf;

use config::{ConfigBuilder, ConfigError, Environment, File, builder::AsyncState};
use factory::factories::{
    amqp::AmqpConfig, kubernetes::KubernetesConfig, observability::ObservabilityConfig,
};
use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Name of the ImageBuild this job processes.
    pub resource: String,
    pub resource_namespace: String,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    pub amqp: AmqpConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub builder: BuilderConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct FetchConfig {
    /// Overall deadline for downloading and extracting the context.
    pub timeout_secs: Option<u64>,
    #[serde(default = "max_attempts_default")]
    pub max_attempts: u32,
    #[serde(default = "connect_timeout_secs_default")]
    pub connect_timeout_secs: u64,
    /// Per-attempt limit covering the response body.
    #[serde(default = "request_timeout_secs_default")]
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_attempts: max_attempts_default(),
            connect_timeout_secs: connect_timeout_secs_default(),
            request_timeout_secs: request_timeout_secs_default(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct PluginsConfig {
    pub directory: Option<PathBuf>,
    #[serde(default = "cookie_default")]
    pub cookie: String,
    #[serde(default = "handshake_timeout_secs_default")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "call_timeout_secs_default")]
    pub call_timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            cookie: cookie_default(),
            handshake_timeout_secs: handshake_timeout_secs_default(),
            call_timeout_secs: call_timeout_secs_default(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct CredentialsConfig {
    #[serde(default = "dynamic_path_default")]
    pub dynamic_path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dynamic_path: dynamic_path_default(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct BuilderConfig {
    /// Build engine executable; receives the build options as JSON on stdin.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn max_attempts_default() -> u32 {
    10
}

fn connect_timeout_secs_default() -> u64 {
    10
}

fn request_timeout_secs_default() -> u64 {
    300
}

fn cookie_default() -> String {
    String::from("d3c0a8f1-preparer")
}

fn handshake_timeout_secs_default() -> u64 {
    10
}

fn call_timeout_secs_default() -> u64 {
    600
}

fn dynamic_path_default() -> PathBuf {
    PathBuf::from("/var/run/foundry/credentials/config.json")
}

impl Config {
    pub async fn init(path: PathBuf) -> Result<Self, ConfigError> {
        let cfg = ConfigBuilder::<AsyncState>::default()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("builder.args")
                    .try_parsing(true),
            )
            .build()
            .await?;

        cfg.try_deserialize()
    }
}
