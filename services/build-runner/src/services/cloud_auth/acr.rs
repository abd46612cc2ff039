use std::{env, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::services::cloud_auth::{
    Authenticator, CloudAuthError, CloudAuthRegistry, RegistryCredentials, challenge,
};

pub const PATTERN: &str = r"\.azurecr\.(io|cn|us)$";

/// ACR accepts any username alongside a refresh token; this is the conventional one.
pub const REFRESH_TOKEN_USERNAME: &str = "00000000-0000-0000-0000-000000000000";

const PROVIDER: &str = "acr";
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const JWT_BEARER: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug, Clone)]
pub struct WorkloadIdentity {
    pub client_id: String,
    pub tenant_id: String,
    pub token_file: PathBuf,
    pub authority_host: String,
}

impl WorkloadIdentity {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            client_id: env::var("AZURE_CLIENT_ID").ok()?,
            tenant_id: env::var("AZURE_TENANT_ID").ok()?,
            token_file: env::var("AZURE_FEDERATED_TOKEN_FILE").ok()?.into(),
            authority_host: env::var("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|_| DEFAULT_AUTHORITY_HOST.to_string()),
        })
    }
}

pub fn register(registry: &mut CloudAuthRegistry, http: Client) {
    let Some(identity) = WorkloadIdentity::from_env() else {
        debug!("No Azure workload identity, skipping ACR provider");
        return;
    };

    let pattern = match Regex::new(PATTERN) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "⚠️ Invalid ACR host pattern");
            return;
        }
    };

    registry.register(
        PROVIDER,
        pattern,
        Arc::new(AcrAuthenticator::new(http, identity, "https")),
    );
    info!("✅ ACR provider registered");
}

#[derive(Deserialize)]
struct AadTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    refresh_token: String,
}

pub struct AcrAuthenticator {
    http: Client,
    identity: WorkloadIdentity,
    registry_scheme: &'static str,
}

impl AcrAuthenticator {
    pub fn new(http: Client, identity: WorkloadIdentity, registry_scheme: &'static str) -> Self {
        Self {
            http,
            identity,
            registry_scheme,
        }
    }

    /// Reads the projected token file on every call; kubelet rotates it.
    async fn aad_token(&self) -> Result<String, CloudAuthError> {
        let assertion = tokio::fs::read_to_string(&self.identity.token_file)
            .await
            .map_err(|e| {
                CloudAuthError::Identity(format!(
                    "reading {}: {}",
                    self.identity.token_file.display(),
                    e
                ))
            })?;

        let endpoint = format!(
            "{}/{}/oauth2/v2.0/token",
            self.identity.authority_host.trim_end_matches('/'),
            self.identity.tenant_id
        );

        let response = self
            .http
            .post(&endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.identity.client_id.as_str()),
                ("scope", ARM_SCOPE),
                ("client_assertion_type", JWT_BEARER),
                ("client_assertion", assertion.trim()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CloudAuthError::Identity(format!(
                "{} returned {}: {}",
                endpoint, status, body
            )));
        }

        Ok(response.json::<AadTokenResponse>().await?.access_token)
    }

    async fn exchange(
        &self,
        endpoint: &Url,
        service: &str,
        aad_token: &str,
    ) -> Result<String, CloudAuthError> {
        let response = self
            .http
            .post(endpoint.clone())
            .form(&[
                ("grant_type", "access_token"),
                ("service", service),
                ("tenant", self.identity.tenant_id.as_str()),
                ("access_token", aad_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudAuthError::Exchange {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<ExchangeResponse>().await?.refresh_token)
    }
}

fn exchange_endpoint(realm: &str) -> Result<Url, CloudAuthError> {
    let invalid = |reason: String| CloudAuthError::InvalidUrl {
        url: realm.to_string(),
        reason,
    };

    let realm_url = Url::parse(realm).map_err(|e| invalid(e.to_string()))?;
    if !matches!(realm_url.scheme(), "http" | "https") || realm_url.host_str().is_none() {
        return Err(invalid("realm must be an absolute http(s) URL".to_string()));
    }

    realm_url
        .join("/oauth2/exchange")
        .map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl Authenticator for AcrAuthenticator {
    #[tracing::instrument(name = "acr.authenticate", skip(self), err)]
    async fn authenticate(&self, host: &str) -> Result<RegistryCredentials, CloudAuthError> {
        let directive = challenge::discover(&self.http, self.registry_scheme, host).await?;
        let endpoint = exchange_endpoint(&directive.realm)?;

        let mut refreshed = false;
        loop {
            let aad_token = self.aad_token().await?;
            match self.exchange(&endpoint, &directive.service, &aad_token).await {
                Ok(refresh_token) => {
                    return Ok(RegistryCredentials {
                        username: REFRESH_TOKEN_USERNAME.to_string(),
                        password: refresh_token,
                    });
                }
                Err(CloudAuthError::Exchange { status, .. })
                    if status == StatusCode::UNAUTHORIZED.as_u16() && !refreshed =>
                {
                    warn!(host, "⚠️ ACR rejected identity token, refreshing once");
                    refreshed = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
