use std::{collections::HashMap, env, sync::Arc};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecr::error::DisplayErrorContext;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::services::cloud_auth::{
    Authenticator, CloudAuthError, CloudAuthRegistry, RegistryCredentials,
};

pub const PATTERN: &str = r"^\d{12}\.dkr\.ecr(-fips)?\.[a-z0-9-]+\.amazonaws\.com(\.cn)?$";

const PROVIDER: &str = "ecr";
const AMBIENT_ENV: [&str; 6] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_WEB_IDENTITY_TOKEN_FILE",
    "AWS_CONTAINER_CREDENTIALS_FULL_URI",
    "AWS_CONTAINER_CREDENTIALS_RELATIVE_URI",
    "AWS_PROFILE",
    "AWS_ROLE_ARN",
];

fn refresh_margin() -> Duration {
    Duration::minutes(5)
}

pub async fn register(registry: &mut CloudAuthRegistry) {
    if !AMBIENT_ENV.iter().any(|key| env::var_os(key).is_some()) {
        debug!("No ambient AWS credentials, skipping ECR provider");
        return;
    }

    let pattern = match Regex::new(PATTERN) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "⚠️ Invalid ECR host pattern");
            return;
        }
    };

    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    registry.register(PROVIDER, pattern, Arc::new(EcrAuthenticator::new(sdk_config)));
    info!("✅ ECR provider registered");
}

struct CachedToken {
    credentials: RegistryCredentials,
    expires_at: DateTime<Utc>,
}

pub struct EcrAuthenticator {
    sdk_config: SdkConfig,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl EcrAuthenticator {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self, region: &str) -> Result<CachedToken, CloudAuthError> {
        let conf = aws_sdk_ecr::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        let client = aws_sdk_ecr::Client::from_conf(conf);

        let output = client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| provider_error(DisplayErrorContext(&e).to_string()))?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| provider_error("no authorization data returned".to_string()))?;

        let token = data
            .authorization_token()
            .ok_or_else(|| provider_error("authorization token missing".to_string()))?;

        let expires_at = data
            .expires_at()
            .and_then(|t| DateTime::from_timestamp(t.secs(), 0))
            .unwrap_or_else(Utc::now);

        Ok(CachedToken {
            credentials: decode_token(token)?,
            expires_at,
        })
    }
}

#[async_trait]
impl Authenticator for EcrAuthenticator {
    #[tracing::instrument(name = "ecr.authenticate", skip(self), err)]
    async fn authenticate(&self, host: &str) -> Result<RegistryCredentials, CloudAuthError> {
        let region = region_from_host(host)?;
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(host)
            && !needs_refresh(cached.expires_at, Utc::now())
        {
            return Ok(cached.credentials.clone());
        }

        let fresh = self.fetch(&region).await?;
        let credentials = fresh.credentials.clone();
        cache.insert(host.to_string(), fresh);

        Ok(credentials)
    }
}

fn provider_error(message: String) -> CloudAuthError {
    CloudAuthError::Provider {
        provider: PROVIDER,
        message,
    }
}

/// `<account>.dkr.ecr[-fips].<region>.amazonaws.com[.cn]` → `<region>`.
fn region_from_host(host: &str) -> Result<String, CloudAuthError> {
    let hostname = host.split(':').next().unwrap_or(host);
    hostname
        .split('.')
        .nth(3)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CloudAuthError::InvalidUrl {
            url: host.to_string(),
            reason: "cannot derive AWS region".to_string(),
        })
}

fn decode_token(token: &str) -> Result<RegistryCredentials, CloudAuthError> {
    let decoded = STANDARD
        .decode(token)
        .map_err(|e| provider_error(format!("invalid authorization token: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| provider_error(format!("invalid authorization token: {}", e)))?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| provider_error("authorization token is not user:password".to_string()))?;

    Ok(RegistryCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now + refresh_margin() >= expires_at
}
