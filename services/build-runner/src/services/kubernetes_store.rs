use build_core::crds::{ImageBuild, ImageBuildStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client,
    api::{Patch, PatchParams},
};
use serde_json::json;
use tracing::debug;

use crate::error::AppError;
use crate::services::credential_resolver::CredentialError;
use crate::services::traits::{BuildStore, SecretStore};

#[derive(Clone)]
pub struct KubernetesStore {
    pub client: Client,
}

impl KubernetesStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl BuildStore for KubernetesStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<ImageBuild, AppError> {
        let api: Api<ImageBuild> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(build) => Ok(build),
            None => Err(AppError::NotFoundError(format!(
                "imagebuild {}/{} not found",
                namespace, name
            ))),
        }
    }

    #[tracing::instrument(name = "kubernetes_store.update_status", skip_all, err)]
    async fn update_status(
        &self,
        build: &ImageBuild,
        status: &ImageBuildStatus,
    ) -> Result<(), AppError> {
        let namespace = build.metadata.namespace.as_deref().unwrap_or("default");
        let name = build.metadata.name.as_deref().unwrap_or_default();
        let api: Api<ImageBuild> = Api::namespaced(self.client.clone(), namespace);

        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": status })),
        )
        .await?;

        debug!(namespace, name, state = ?status.state, "📝 Status persisted");
        Ok(())
    }
}

impl SecretStore for KubernetesStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, CredentialError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
