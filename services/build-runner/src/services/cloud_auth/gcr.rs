use std::{env, sync::Arc, time::Duration as StdDuration};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::services::cloud_auth::{
    Authenticator, CloudAuthError, CloudAuthRegistry, RegistryCredentials,
};

pub const PATTERN: &str = r"(^|\.)gcr\.io$|-docker\.pkg\.dev$";

pub const USERNAME: &str = "oauth2accesstoken";

const PROVIDER: &str = "gcr";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(1);

fn refresh_margin() -> Duration {
    Duration::seconds(60)
}

/// Registers when the metadata server answers with the Google flavor header.
pub async fn register(registry: &mut CloudAuthRegistry, http: Client) {
    let host = env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.to_string());
    let base_url = format!("http://{}", host);

    if !metadata_available(&http, &base_url).await {
        debug!(%base_url, "No GCE metadata server, skipping GCR provider");
        return;
    }

    let pattern = match Regex::new(PATTERN) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "⚠️ Invalid GCR host pattern");
            return;
        }
    };

    registry.register(PROVIDER, pattern, Arc::new(GcrAuthenticator::new(http, base_url)));
    info!("✅ GCR provider registered");
}

async fn metadata_available(http: &Client, base_url: &str) -> bool {
    let response = http
        .get(format!("{}/computeMetadata/v1/", base_url))
        .header("Metadata-Flavor", "Google")
        .timeout(PROBE_TIMEOUT)
        .send()
        .await;

    match response {
        Ok(r) => r
            .headers()
            .get("Metadata-Flavor")
            .is_some_and(|v| v.as_bytes() == b"Google"),
        Err(_) => false,
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct GcrAuthenticator {
    http: Client,
    base_url: String,
    cache: Mutex<Option<CachedToken>>,
}

impl GcrAuthenticator {
    pub fn new(http: Client, base_url: String) -> Self {
        Self {
            http,
            base_url,
            cache: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, CloudAuthError> {
        let endpoint = format!("{}{}", self.base_url, TOKEN_PATH);
        let response = self
            .http
            .get(&endpoint)
            .header("Metadata-Flavor", "Google")
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

        let token: MetadataToken = response.json().await?;
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl Authenticator for GcrAuthenticator {
    #[tracing::instrument(name = "gcr.authenticate", skip(self), err)]
    async fn authenticate(&self, _host: &str) -> Result<RegistryCredentials, CloudAuthError> {
        let mut cache = self.cache.lock().await;

        let fresh = match cache.as_ref() {
            Some(cached) if Utc::now() + refresh_margin() < cached.expires_at => None,
            _ => Some(self.fetch().await?),
        };
        if let Some(token) = fresh {
            *cache = Some(token);
        }

        let access_token = cache
            .as_ref()
            .map(|c| c.access_token.clone())
            .unwrap_or_default();

        Ok(RegistryCredentials {
            username: USERNAME.to_string(),
            password: access_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = GcrAuthenticator::new(Client::new(), server.uri());
        let first = auth.authenticate("gcr.io").await.unwrap();
        let second = auth.authenticate("europe-west1-docker.pkg.dev").await.unwrap();

        assert_eq!(first.username, USERNAME);
        assert_eq!(first.password, "ya29.token");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_nearly_expired_token_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "short-lived",
                "expires_in": 30
            })))
            .expect(2)
            .mount(&server)
            .await;

        let auth = GcrAuthenticator::new(Client::new(), server.uri());
        auth.authenticate("gcr.io").await.unwrap();
        auth.authenticate("gcr.io").await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/"))
            .respond_with(ResponseTemplate::new(200).insert_header("Metadata-Flavor", "Google"))
            .mount(&server)
            .await;

        assert!(metadata_available(&Client::new(), &server.uri()).await);
        assert!(!metadata_available(&Client::new(), "http://127.0.0.1:9").await);
    }

    #[tokio::test]
    async fn test_metadata_error_is_identity_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let auth = GcrAuthenticator::new(Client::new(), server.uri());
        let err = auth.authenticate("gcr.io").await.unwrap_err();
        assert!(matches!(err, CloudAuthError::Identity(_)));
    }
}
