use reqwest::{Client, StatusCode, header::WWW_AUTHENTICATE};

use crate::services::cloud_auth::CloudAuthError;

/// Realm and service from a registry's bearer challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDirective {
    pub realm: String,
    pub service: String,
}

impl AuthDirective {
    /// Parses `Bearer realm="…",service="…"[,scope="…"]`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        for (key, value) in parse_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service: service?,
        })
    }
}

fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let key: String = chars
            .by_ref()
            .take_while(|c| *c != '=')
            .collect::<String>()
            .trim()
            .to_string();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.push((key, value));
    }

    params
}

/// Requests `{scheme}://{host}/v2/` and reads the bearer challenge.
pub async fn discover(
    http: &Client,
    scheme: &str,
    host: &str,
) -> Result<AuthDirective, CloudAuthError> {
    let url = format!("{}://{}/v2/", scheme, host);
    let response = http.get(&url).send().await?;

    if response.status() != StatusCode::UNAUTHORIZED {
        return Err(CloudAuthError::Challenge {
            host: host.to_string(),
            reason: format!("expected 401, got {}", response.status().as_u16()),
        });
    }

    let header = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CloudAuthError::Challenge {
            host: host.to_string(),
            reason: "missing WWW-Authenticate header".to_string(),
        })?;

    AuthDirective::parse(header).ok_or_else(|| CloudAuthError::Challenge {
        host: host.to_string(),
        reason: format!("unsupported challenge: {}", header),
    })
}
