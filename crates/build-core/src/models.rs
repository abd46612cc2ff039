use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------
// ENUMS
// ---------------------------------------------

/// Persisted build state. `Initialized` is never stored: it is the absence
/// of a state on the resource.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    Building,
    Completed,
    Failed,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Name used on the wire for an optional state.
    pub fn label(state: Option<Self>) -> &'static str {
        match state {
            None => "Initialized",
            Some(Self::Building) => "Building",
            Some(Self::Completed) => "Completed",
            Some(Self::Failed) => "Failed",
        }
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(Self::label(Some(*self)))
    }
}

/// Validated view of a `RegistryReference`'s credential discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    Inline {
        username: &'a str,
        password: &'a str,
    },
    Secret {
        name: &'a str,
        namespace: &'a str,
    },
    Dynamic,
}

// ---------------------------------------------
// MODELS
// ---------------------------------------------

/// Registry with concrete credentials, the only form handed to a builder.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRegistry {
    pub host: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
}

impl std::fmt::Debug for ResolvedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedRegistry")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .finish()
    }
}
