pub mod acr;
pub mod challenge;
pub mod ecr;
pub mod gcr;

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CloudAuthError {
    #[error("no cloud credential provider registered for {0}")]
    NoProvider(String),
    #[error("invalid registry url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("registry {host} did not return a bearer challenge: {reason}")]
    Challenge { host: String, reason: String },
    #[error("failed to obtain ambient identity token: {0}")]
    Identity(String),
    #[error("token exchange with {endpoint} failed with status {status}: {body}")]
    Exchange {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("{provider} provider error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl CloudAuthError {
    /// Callers may fall back to anonymous access on this error.
    pub fn is_no_provider(&self) -> bool {
        matches!(self, Self::NoProvider(_))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, host: &str) -> Result<RegistryCredentials, CloudAuthError>;
}

struct Provider {
    name: &'static str,
    pattern: Regex,
    authenticator: Arc<dyn Authenticator>,
}

/// Host pattern → token provider table, filled once at startup.
#[derive(Default)]
pub struct CloudAuthRegistry {
    providers: Vec<Provider>,
}

impl CloudAuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider whose ambient credentials are present, in a
    /// fixed order: ECR, ACR, GCR.
    pub async fn with_ambient_providers(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        ecr::register(&mut registry).await;
        acr::register(&mut registry, http.clone());
        gcr::register(&mut registry, http).await;

        info!(providers = ?registry.provider_names(), "☁️ Cloud registry auth providers ready");
        registry
    }

    pub fn register(
        &mut self,
        name: &'static str,
        pattern: Regex,
        authenticator: Arc<dyn Authenticator>,
    ) {
        self.providers.push(Provider {
            name,
            pattern,
            authenticator,
        });
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name).collect()
    }

    /// Runs the first provider whose pattern matches `host` (port ignored).
    #[tracing::instrument(name = "cloud_auth.resolve", skip(self))]
    pub async fn resolve(&self, host: &str) -> Result<RegistryCredentials, CloudAuthError> {
        let hostname = host.split(':').next().unwrap_or(host);

        let provider = self
            .providers
            .iter()
            .find(|p| p.pattern.is_match(hostname))
            .ok_or_else(|| CloudAuthError::NoProvider(host.to_string()))?;

        debug!(provider = provider.name, "🔑 Resolving cloud registry credentials");
        provider.authenticator.authenticate(host).await
    }
}
