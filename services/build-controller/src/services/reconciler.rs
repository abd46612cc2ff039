use std::collections::HashSet;

use build_core::{crds::ImageBuild, formatters::format_access_name};
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::ServiceAccount,
    rbac::v1::{Role, RoleBinding},
};
use kube::{Api, Client, Resource};
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::AppError;
use crate::services::{access, job};

/// Only creations qualify: no state yet and a UID this process has not handled.
pub fn is_fresh(build: &ImageBuild, handled: &HashSet<String>) -> bool {
    let uid = build.metadata.uid.as_deref().unwrap_or_default();
    build.state().is_none() && !uid.is_empty() && !handled.contains(uid)
}

/// Drops a deleted build's UID. Returns whether it was tracked.
pub fn forget(build: &ImageBuild, handled: &mut HashSet<String>) -> bool {
    build
        .metadata
        .uid
        .as_deref()
        .is_some_and(|uid| handled.remove(uid))
}

/// Turns newly created builds into runner Jobs.
pub struct Reconciler {
    client: Client,
    runner: RunnerConfig,
    handled: HashSet<String>,
}

impl Reconciler {
    pub fn new(client: Client, runner: RunnerConfig) -> Self {
        Self {
            client,
            runner,
            handled: HashSet::new(),
        }
    }

    pub fn should_handle(&self, build: &ImageBuild) -> bool {
        is_fresh(build, &self.handled)
    }

    pub fn forget(&mut self, build: &ImageBuild) {
        if forget(build, &mut self.handled) {
            debug!(name = ?build.metadata.name, "Forgot deleted build");
        }
    }

    #[tracing::instrument(
        name = "reconciler.reconcile",
        skip_all,
        fields(namespace = ?build.metadata.namespace, name = ?build.metadata.name),
        err
    )]
    pub async fn reconcile(&mut self, build: &ImageBuild) -> Result<(), AppError> {
        let build_name = build
            .metadata
            .name
            .as_deref()
            .ok_or(AppError::MissingField("metadata.name"))?;
        let namespace = build
            .metadata
            .namespace
            .as_deref()
            .ok_or(AppError::MissingField("metadata.namespace"))?;
        let uid = build
            .metadata
            .uid
            .clone()
            .ok_or(AppError::MissingField("metadata.uid"))?;
        let owner = build
            .controller_owner_ref(&())
            .ok_or(AppError::MissingField("metadata.uid"))?;

        let name = format_access_name(build_name);

        let service_accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        access::create_if_absent(
            &service_accounts,
            &access::service_account(&name, namespace, build_name, &owner),
        )
        .await?;

        let roles: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        let secrets = access::referenced_secrets(build, namespace);
        access::create_if_absent(
            &roles,
            &access::role(&name, namespace, build_name, secrets, &owner),
        )
        .await?;

        let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        access::create_if_absent(
            &bindings,
            &access::role_binding(&name, namespace, build_name, &owner),
        )
        .await?;

        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        access::create_if_absent(
            &jobs,
            &job::runner_job(build, &name, namespace, build_name, &owner, &self.runner),
        )
        .await?;

        self.handled.insert(uid);
        info!(namespace, build_name, job = %name, "🚀 Build dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use build_core::{
        crds::{ImageBuildSpec, ImageBuildStatus},
        models::BuildState,
    };

    fn build(uid: Option<&str>, state: Option<BuildState>) -> ImageBuild {
        let mut build = ImageBuild::new("web", ImageBuildSpec::default());
        build.metadata.uid = uid.map(String::from);
        build.status = state.map(|state| ImageBuildStatus {
            state: Some(state),
            ..Default::default()
        });
        build
    }

    #[test]
    fn test_new_build_is_fresh() {
        assert!(is_fresh(&build(Some("uid-1"), None), &HashSet::new()));
    }

    #[test]
    fn test_handled_uid_is_skipped() {
        let handled = HashSet::from(["uid-1".to_string()]);
        assert!(!is_fresh(&build(Some("uid-1"), None), &handled));
        assert!(is_fresh(&build(Some("uid-2"), None), &handled));
    }

    #[test]
    fn test_deleted_build_is_forgotten() {
        let mut handled = HashSet::from(["uid-1".to_string(), "uid-2".to_string()]);

        assert!(forget(&build(Some("uid-1"), None), &mut handled));
        assert_eq!(handled, HashSet::from(["uid-2".to_string()]));

        assert!(!forget(&build(Some("uid-1"), None), &mut handled));
        assert!(!forget(&build(None, None), &mut handled));
        assert_eq!(handled.len(), 1);
    }

    #[test]
    fn test_builds_with_state_are_skipped() {
        for state in [BuildState::Building, BuildState::Completed, BuildState::Failed] {
            assert!(!is_fresh(&build(Some("uid-1"), Some(state)), &HashSet::new()));
        }
        assert!(!is_fresh(&build(None, None), &HashSet::new()));
    }
}
