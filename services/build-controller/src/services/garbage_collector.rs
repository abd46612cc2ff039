use std::time::Duration;

use build_core::{crds::ImageBuild, determiners::determine_expired_builds};
use kube::{
    Api, Client,
    api::{DeleteParams, ListParams},
};
use tracing::{error, info, warn};

use crate::config::GcConfig;
use crate::error::AppError;

/// Periodically deletes terminal builds beyond the retention count.
pub async fn start_garbage_collector(
    client: Client,
    namespace: Option<String>,
    cfg: GcConfig,
) -> Result<(), AppError> {
    if cfg.retention == 0 {
        info!("🧹 Garbage collection disabled");
        std::future::pending::<()>().await;
        return Ok(());
    }

    let api: Api<ImageBuild> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    loop {
        interval.tick().await;
        if let Err(e) = collect(&api, cfg.retention).await {
            error!(error = %e, "❌ Garbage collection pass failed");
        }
    }
}

#[tracing::instrument(name = "garbage_collector.collect", skip(api), err)]
async fn collect(api: &Api<ImageBuild>, retention: usize) -> Result<usize, AppError> {
    let builds = api.list(&ListParams::default()).await?.items;
    let expired = determine_expired_builds(&builds, retention);

    let mut deleted = 0;
    for build in expired {
        let (Some(name), Some(namespace)) = (
            build.metadata.name.as_deref(),
            build.metadata.namespace.as_deref(),
        ) else {
            continue;
        };

        let namespaced: Api<ImageBuild> = Api::namespaced(api.clone().into_client(), namespace);
        match namespaced.delete(name, &DeleteParams::background()).await {
            Ok(_) => deleted += 1,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => warn!(namespace, name, error = %e, "⚠️ Failed to delete build"),
        }
    }

    if deleted > 0 {
        info!(deleted, "🧹 Expired builds removed");
    }
    Ok(deleted)
}
