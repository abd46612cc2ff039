use std::collections::{BTreeMap, BTreeSet};

use build_core::crds::ImageBuild;
use k8s_openapi::{
    api::{
        core::v1::ServiceAccount,
        rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    Api, Resource,
    api::{ObjectMeta, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::error::AppError;

pub const MANAGED_BY: &str = "build-controller";
const API_GROUP: &str = "foundry.dev";

pub fn labels(build_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
        ("foundry.dev/build".to_string(), build_name.to_string()),
    ])
}

pub fn object_meta(
    name: &str,
    namespace: &str,
    build_name: &str,
    owner: &OwnerReference,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(build_name)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// Secrets the runner must read: secretRefs that live in the build's namespace.
pub fn referenced_secrets(build: &ImageBuild, namespace: &str) -> Vec<String> {
    build
        .spec
        .registries
        .iter()
        .filter_map(|r| r.secret_ref.as_ref())
        .filter(|s| s.namespace.as_deref() == Some(namespace))
        .filter_map(|s| s.name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn service_account(
    name: &str,
    namespace: &str,
    build_name: &str,
    owner: &OwnerReference,
) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(name, namespace, build_name, owner),
        automount_service_account_token: Some(true),
        ..Default::default()
    }
}

/// Read and status access to this one build, plus `get` on the secrets it references.
pub fn role(
    name: &str,
    namespace: &str,
    build_name: &str,
    secrets: Vec<String>,
    owner: &OwnerReference,
) -> Role {
    let verbs = || vec!["get".to_string(), "update".to_string(), "patch".to_string()];

    let mut rules = vec![
        PolicyRule {
            api_groups: Some(vec![API_GROUP.to_string()]),
            resources: Some(vec!["imagebuilds".to_string()]),
            resource_names: Some(vec![build_name.to_string()]),
            verbs: verbs(),
            ..Default::default()
        },
        PolicyRule {
            api_groups: Some(vec![API_GROUP.to_string()]),
            resources: Some(vec!["imagebuilds/status".to_string()]),
            resource_names: Some(vec![build_name.to_string()]),
            verbs: verbs(),
            ..Default::default()
        },
    ];

    if !secrets.is_empty() {
        rules.push(PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["secrets".to_string()]),
            resource_names: Some(secrets),
            verbs: vec!["get".to_string()],
            ..Default::default()
        });
    }

    Role {
        metadata: object_meta(name, namespace, build_name, owner),
        rules: Some(rules),
    }
}

pub fn role_binding(
    name: &str,
    namespace: &str,
    build_name: &str,
    owner: &OwnerReference,
) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(name, namespace, build_name, owner),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// True when `existing` is owned by one of the owners `desired` declares.
pub fn shares_owner(existing: &ObjectMeta, desired: &ObjectMeta) -> bool {
    let uids = |meta: &ObjectMeta| {
        meta.owner_references
            .iter()
            .flatten()
            .map(|owner| owner.uid.clone())
            .collect::<BTreeSet<_>>()
    };

    let wanted = uids(desired);
    wanted.is_empty() || !uids(existing).is_disjoint(&wanted)
}

/// Creates `object`. An existing object with the same name counts as success
/// only when it belongs to the same owner.
pub async fn create_if_absent<K>(api: &Api<K>, object: &K) -> Result<(), AppError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let name = object.meta().name.clone().unwrap_or_default();

    match api.create(&PostParams::default(), object).await {
        Ok(_) => {
            info!(%kind, %name, "✅ Created");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let existing = api.get(&name).await?;
            if !shares_owner(existing.meta(), object.meta()) {
                return Err(AppError::OwnershipConflict { kind, name });
            }
            debug!(%kind, %name, "Already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
