//! Newline-delimited JSON spoken over a plugin's stdin/stdout.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the handshake cookie.
pub const COOKIE_KEY: &str = "FOUNDRY_PLUGIN_COOKIE";

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Prepare,
    Cleanup,
    #[serde(other)]
    Unknown,
}

/// First line a plugin writes after it starts.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: u32,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Prepare,
    Cleanup,
}

impl Method {
    pub fn capability(self) -> Capability {
        match self {
            Self::Prepare => Capability::Prepare,
            Self::Cleanup => Capability::Cleanup,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Cleanup => "cleanup",
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrepareParams<'a> {
    pub context_path: &'a Path,
    pub plugin_data: &'a BTreeMap<String, String>,
}

#[derive(Serialize, Debug)]
pub struct Request<'a> {
    pub id: u64,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<PrepareParams<'a>>,
}

/// An empty `error` means success.
#[derive(Deserialize, Debug, Default)]
pub struct Response {
    pub id: Option<u64>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}
