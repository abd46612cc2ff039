use thiserror::Error;

/// Structural problems in a registry reference, detected before any I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("registry reference has an empty host")]
    EmptyHost,
    #[error(
        "registry {host}: no credential source configured, set username/password, secretRef or dynamic"
    )]
    MissingSource { host: String },
    #[error("registry {host}: conflicting credential sources ({sources}), configure exactly one")]
    ConflictingSources { host: String, sources: String },
    #[error("registry {host}: incomplete inline credentials, both username and password are required")]
    IncompleteInline { host: String },
    #[error("registry {host}: incomplete secretRef, both name and namespace are required")]
    IncompleteSecret { host: String },
}
