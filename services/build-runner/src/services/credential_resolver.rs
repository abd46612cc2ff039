use std::{
    collections::{BTreeMap, HashMap},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use base64::{Engine, engine::general_purpose::STANDARD};
use build_core::{
    crds::RegistryReference,
    error::ValidationError,
    models::{CredentialSource, ResolvedRegistry},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::services::cloud_auth::{CloudAuthError, CloudAuthRegistry};
use crate::services::traits::SecretStore;

pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("secret {namespace}/{name} has type {found}, expected kubernetes.io/dockerconfigjson")]
    WrongSecretType {
        namespace: String,
        name: String,
        found: String,
    },

    #[error("secret {namespace}/{name} has no .dockerconfigjson key")]
    MissingSecretKey { namespace: String, name: String },

    #[error("registry {host} not found in {source_name}, available hosts: [{available}]")]
    HostNotFound {
        host: String,
        source_name: String,
        available: String,
    },

    #[error("malformed docker config in {source_name}: {reason}")]
    MalformedJson { source_name: String, reason: String },

    #[error("invalid credentials for {host} in {source_name}: {reason}")]
    InvalidAuthField {
        host: String,
        source_name: String,
        reason: String,
    },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Kube error, {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Cloud(#[from] CloudAuthError),
}

impl CredentialError {
    fn is_missing_file(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == ErrorKind::NotFound)
    }
}

#[derive(Deserialize, Debug, Default)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuth>,
}

#[derive(Deserialize, Debug, Default)]
struct DockerAuth {
    username: Option<String>,
    password: Option<String>,
    auth: Option<String>,
}

impl DockerConfig {
    fn parse(bytes: &[u8], source_name: &str) -> Result<Self, CredentialError> {
        serde_json::from_slice(bytes).map_err(|e| CredentialError::MalformedJson {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Looks up `host`, matching keys written as URLs (`https://host/v1/`) too.
    fn credentials_for(
        &self,
        host: &str,
        source_name: &str,
    ) -> Result<(String, String), CredentialError> {
        let wanted = normalize_host(host);
        let entry = self
            .auths
            .iter()
            .find(|(key, _)| normalize_host(key) == wanted)
            .map(|(_, auth)| auth)
            .ok_or_else(|| {
                let mut available: Vec<&str> = self.auths.keys().map(String::as_str).collect();
                available.sort_unstable();
                CredentialError::HostNotFound {
                    host: host.to_string(),
                    source_name: source_name.to_string(),
                    available: available.join(", "),
                }
            })?;

        let invalid = |reason: &str| CredentialError::InvalidAuthField {
            host: host.to_string(),
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        };

        if let (Some(username), Some(password)) = (&entry.username, &entry.password)
            && !username.is_empty()
        {
            return Ok((username.clone(), password.clone()));
        }

        let auth = entry
            .auth
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| invalid("neither username/password nor auth is set"))?;
        let decoded = STANDARD
            .decode(auth)
            .map_err(|_| invalid("auth is not valid base64"))?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid("auth is not utf-8"))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| invalid("auth is not username:password"))?;

        Ok((username.to_string(), password.to_string()))
    }
}

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_ALIASES: [&str; 2] = ["index.docker.io", "registry-1.docker.io"];

/// `https://Registry.example.com:5000/v2/` → `registry.example.com:5000`.
/// Docker Hub endpoints collapse to `docker.io`.
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DOCKER_HUB.to_string()
    } else {
        host
    }
}

pub struct CredentialResolver<K> {
    secrets: K,
    dynamic_path: PathBuf,
    cloud: CloudAuthRegistry,
}

impl<K: SecretStore> CredentialResolver<K> {
    pub fn new(secrets: K, dynamic_path: PathBuf, cloud: CloudAuthRegistry) -> Self {
        Self {
            secrets,
            dynamic_path,
            cloud,
        }
    }

    /// Structural checks on every reference. Performs no I/O.
    pub fn validate(registries: &[RegistryReference]) -> Result<(), CredentialError> {
        for registry in registries {
            registry.credential_source()?;
        }
        Ok(())
    }

    /// Resolves every reference to concrete credentials.
    ///
    /// A host declared more than once resolves to its last declaration; the
    /// output follows the order in which hosts first appear.
    #[tracing::instrument(name = "credential_resolver.resolve", skip_all, err)]
    pub async fn resolve(
        &self,
        registries: &[RegistryReference],
    ) -> Result<Vec<ResolvedRegistry>, CredentialError> {
        Self::validate(registries)?;

        let mut order: Vec<String> = Vec::new();
        let mut winners: HashMap<String, &RegistryReference> = HashMap::new();
        for registry in registries {
            let key = normalize_host(&registry.host);
            if winners.insert(key.clone(), registry).is_none() {
                order.push(key);
            } else {
                debug!(host = %registry.host, "Later registry declaration overrides earlier one");
            }
        }

        let mut resolved = Vec::with_capacity(order.len());
        for key in &order {
            let Some(registry) = winners.get(key) else {
                continue;
            };
            resolved.push(self.resolve_one(registry).await?);
        }

        info!(count = resolved.len(), "🔐 Registry credentials resolved");
        Ok(resolved)
    }

    async fn resolve_one(
        &self,
        registry: &RegistryReference,
    ) -> Result<ResolvedRegistry, CredentialError> {
        let (username, password) = match registry.credential_source()? {
            CredentialSource::Inline { username, password } => {
                (username.to_string(), password.to_string())
            }
            CredentialSource::Secret { name, namespace } => {
                self.from_secret(&registry.host, namespace, name).await?
            }
            CredentialSource::Dynamic => self.from_dynamic(&registry.host).await?,
        };

        Ok(ResolvedRegistry {
            host: registry.host.clone(),
            username,
            password,
            insecure: registry.insecure,
        })
    }

    async fn from_secret(
        &self,
        host: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(String, String), CredentialError> {
        let secret = self
            .secrets
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| CredentialError::SecretNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let found = secret.type_.clone().unwrap_or_default();
        if found != DOCKER_CONFIG_SECRET_TYPE {
            return Err(CredentialError::WrongSecretType {
                namespace: namespace.to_string(),
                name: name.to_string(),
                found,
            });
        }

        let bytes = secret
            .data
            .as_ref()
            .and_then(|d| d.get(DOCKER_CONFIG_KEY))
            .map(|b| b.0.clone())
            .ok_or_else(|| CredentialError::MissingSecretKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let source_name = format!("secret {}/{}", namespace, name);
        DockerConfig::parse(&bytes, &source_name)?.credentials_for(host, &source_name)
    }

    /// Well-known file first; the cloud registry only when the file or the
    /// host entry is absent.
    async fn from_dynamic(&self, host: &str) -> Result<(String, String), CredentialError> {
        let file_error = match read_docker_config(&self.dynamic_path).await {
            Ok(config) => {
                let source_name = self.dynamic_path.display().to_string();
                match config.credentials_for(host, &source_name) {
                    Ok(credentials) => return Ok(credentials),
                    Err(e @ CredentialError::HostNotFound { .. }) => e,
                    Err(e) => return Err(e),
                }
            }
            Err(e @ CredentialError::Io { .. }) if e.is_missing_file() => e,
            Err(e) => return Err(e),
        };

        match self.cloud.resolve(&normalize_host(host)).await {
            Ok(credentials) => Ok((credentials.username, credentials.password)),
            Err(e) if e.is_no_provider() => Err(file_error),
            Err(e) => {
                warn!(host, error = %e, "❌ Cloud credential provider failed");
                Err(e.into())
            }
        }
    }
}

async fn read_docker_config(path: &Path) -> Result<DockerConfig, CredentialError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CredentialError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    DockerConfig::parse(&bytes, &path.display().to_string())
}
