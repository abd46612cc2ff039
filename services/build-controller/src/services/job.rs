use build_core::crds::ImageBuild;
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{Container, EnvFromSource, EnvVar, PodSpec, PodTemplateSpec, SecretEnvSource},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::api::ObjectMeta;

use crate::config::RunnerConfig;
use crate::services::access::{labels, object_meta};

pub const CONTAINER_NAME: &str = "build-runner";

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Single-attempt runner Job for `build`, running as service account `name`.
pub fn runner_job(
    build: &ImageBuild,
    name: &str,
    namespace: &str,
    build_name: &str,
    owner: &OwnerReference,
    runner: &RunnerConfig,
) -> Job {
    let deadline = build
        .spec
        .timeout_seconds
        .filter(|s| *s > 0)
        .unwrap_or(runner.default_deadline_secs);

    let env_from = runner.env_from_secret.as_ref().map(|secret| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret.clone(),
                optional: Some(false),
            }),
            ..Default::default()
        }]
    });

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(runner.image.clone()),
        image_pull_policy: runner.image_pull_policy.clone(),
        env: Some(vec![
            env("RESOURCE", build_name),
            env("RESOURCE_NAMESPACE", namespace),
        ]),
        env_from,
        ..Default::default()
    };

    Job {
        metadata: object_meta(name, namespace, build_name, owner),
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(i64::try_from(deadline).unwrap_or(i64::MAX)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(build_name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name.to_string()),
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use build_core::crds::ImageBuildSpec;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "foundry.dev/v1alpha1".to_string(),
            kind: "ImageBuild".to_string(),
            name: "web".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn runner(env_from_secret: Option<&str>) -> RunnerConfig {
        RunnerConfig {
            image: "registry.local/build-runner:1.0".to_string(),
            image_pull_policy: None,
            env_from_secret: env_from_secret.map(String::from),
            default_deadline_secs: 3600,
        }
    }

    fn build(timeout_seconds: Option<u64>) -> ImageBuild {
        ImageBuild::new(
            "web",
            ImageBuildSpec {
                timeout_seconds,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_job_runs_once_with_build_env() {
        let job = runner_job(&build(Some(900)), "build-web", "builds", "web", &owner(), &runner(None));
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.active_deadline_seconds, Some(900));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("build-web"));

        let env = pod.containers[0].env.clone().unwrap();
        let pairs: Vec<(String, Option<String>)> =
            env.into_iter().map(|e| (e.name, e.value)).collect();
        assert_eq!(
            pairs,
            vec![
                ("RESOURCE".to_string(), Some("web".to_string())),
                ("RESOURCE_NAMESPACE".to_string(), Some("builds".to_string())),
            ]
        );
        assert!(pod.containers[0].env_from.is_none());
        assert_eq!(job.metadata.owner_references.unwrap()[0].name, "web");
    }

    #[test]
    fn test_default_deadline_and_env_from() {
        let job = runner_job(
            &build(None),
            "build-web",
            "builds",
            "web",
            &owner(),
            &runner(Some("runner-config")),
        );
        let spec = job.spec.unwrap();
        assert_eq!(spec.active_deadline_seconds, Some(3600));

        let env_from = spec.template.spec.unwrap().containers[0]
            .env_from
            .clone()
            .unwrap();
        assert_eq!(env_from[0].secret_ref.as_ref().unwrap().name, "runner-config");
    }
}
