use crate::crds::{ImageBuild, RegistryReference};
use crate::error::ValidationError;
use crate::models::{BuildState, CredentialSource};

impl RegistryReference {
    /// Returns the single configured credential source.
    ///
    /// Two or more populated sources are `ConflictingSources`; a lone inline or
    /// secret source with missing halves is `IncompleteInline` / `IncompleteSecret`.
    pub fn credential_source(&self) -> Result<CredentialSource<'_>, ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }

        let inline = self.username.is_some() || self.password.is_some();
        let secret = self.secret_ref.is_some();

        let mut populated = Vec::new();
        if inline {
            populated.push("inline");
        }
        if secret {
            populated.push("secretRef");
        }
        if self.dynamic {
            populated.push("dynamic");
        }

        if populated.len() > 1 {
            return Err(ValidationError::ConflictingSources {
                host: self.host.clone(),
                sources: populated.join(", "),
            });
        }

        if inline {
            return match (self.username.as_deref(), self.password.as_deref()) {
                (Some(username), Some(password)) if !username.is_empty() => {
                    Ok(CredentialSource::Inline { username, password })
                }
                _ => Err(ValidationError::IncompleteInline {
                    host: self.host.clone(),
                }),
            };
        }

        if let Some(secret_ref) = &self.secret_ref {
            return match (secret_ref.name.as_deref(), secret_ref.namespace.as_deref()) {
                (Some(name), Some(namespace)) if !name.is_empty() && !namespace.is_empty() => {
                    Ok(CredentialSource::Secret { name, namespace })
                }
                _ => Err(ValidationError::IncompleteSecret {
                    host: self.host.clone(),
                }),
            };
        }

        if self.dynamic {
            return Ok(CredentialSource::Dynamic);
        }

        Err(ValidationError::MissingSource {
            host: self.host.clone(),
        })
    }
}

impl ImageBuild {
    pub fn state(&self) -> Option<BuildState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}
