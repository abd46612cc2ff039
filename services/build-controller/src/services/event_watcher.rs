use build_core::crds::ImageBuild;
use futures::StreamExt;
use kube::{
    Api, Client,
    runtime::watcher::{self, Event},
};
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::services::reconciler::Reconciler;

/// Watches ImageBuilds and hands new ones to the reconciler, one at a time.
pub async fn start_event_watcher(
    client: Client,
    namespace: Option<String>,
    mut reconciler: Reconciler,
) -> Result<(), AppError> {
    let api: Api<ImageBuild> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();

    info!(namespace = ?namespace, "🔍 Starting ImageBuild watcher");
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(build)) | Ok(Event::InitApply(build)) => {
                if !reconciler.should_handle(&build) {
                    continue;
                }
                if let Err(e) = reconciler.reconcile(&build).await {
                    error!(error = %e, "❌ Failed to dispatch build");
                }
            }
            Ok(Event::Delete(build)) => reconciler.forget(&build),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "⚠️ ImageBuild watcher error"),
        }
    }

    warn!("❌ ImageBuild watcher stream ended unexpectedly");
    Ok(())
}
