use std::time::Duration;

use build_core::{
    crds::{ImageBuild, ImageBuildStatus},
    formatters::format_object_link,
    models::BuildState,
    schemas::StatusUpdate,
};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::services::credential_resolver::CredentialResolver;
use crate::services::process_builder::BuildOptions;
use crate::services::traits::{
    BuildStore, Builder, ContextPreparer, ContextSource, SecretStore, StatusSink,
};

/// Drives one ImageBuild from Initialized to Completed or Failed.
pub struct BuildStateMachine<S, K, F, B, P> {
    store: S,
    resolver: CredentialResolver<K>,
    fetcher: F,
    builder: B,
    sink: P,
}

impl<S, K, F, B, P> BuildStateMachine<S, K, F, B, P>
where
    S: BuildStore,
    K: SecretStore,
    F: ContextSource,
    B: Builder,
    P: StatusSink,
{
    pub fn new(store: S, resolver: CredentialResolver<K>, fetcher: F, builder: B, sink: P) -> Self {
        Self {
            store,
            resolver,
            fetcher,
            builder,
            sink,
        }
    }

    pub fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }

    /// Processes the build once. Returns the terminal state reached, or
    /// `AlreadyProcessed` when another run got there first.
    #[tracing::instrument(name = "state_machine.run", skip(self, preparer), err)]
    pub async fn run<C: ContextPreparer>(
        &mut self,
        preparer: &mut C,
        namespace: &str,
        name: &str,
    ) -> Result<BuildState, AppError> {
        let build = self.store.get(namespace, name).await?;

        if let Some(state) = build.state() {
            return Err(AppError::AlreadyProcessed {
                name: name.to_string(),
                state,
            });
        }

        // Credential problems fail the build before it is marked Building.
        let registries = match self.resolver.resolve(&build.spec.registries).await {
            Ok(registries) => registries,
            Err(e) => {
                error!(error = %e, "❌ Registry credential resolution failed");
                let status = failed_status(None, e.to_string());
                self.transition(&build, None, &status).await?;
                return Ok(BuildState::Failed);
            }
        };

        let building = ImageBuildStatus {
            state: Some(BuildState::Building),
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        self.transition(&build, None, &building).await?;
        info!(image = %build.spec.image_name, "🚀 Build started");

        let outcome = self.execute(preparer, &build, registries).await;

        let finished = match outcome {
            Ok(image_urls) => ImageBuildStatus {
                state: Some(BuildState::Completed),
                image_urls,
                error_message: None,
                start_time: building.start_time,
                completion_time: Some(Utc::now()),
            },
            Err(e) => {
                error!(error = %e, "❌ Build failed");
                failed_status(building.start_time, e.to_string())
            }
        };

        self.transition(&build, Some(BuildState::Building), &finished)
            .await?;

        let state = finished.state.unwrap_or(BuildState::Failed);
        info!(%state, images = ?finished.image_urls, "🏁 Build finished");
        Ok(state)
    }

    /// Moves a build straight to Failed without doing any work.
    #[tracing::instrument(name = "state_machine.abort", skip(self), err)]
    pub async fn abort(
        &mut self,
        namespace: &str,
        name: &str,
        message: &str,
    ) -> Result<BuildState, AppError> {
        let build = self.store.get(namespace, name).await?;
        if let Some(state) = build.state() {
            return Err(AppError::AlreadyProcessed {
                name: name.to_string(),
                state,
            });
        }

        let status = failed_status(None, message.to_string());
        self.transition(&build, None, &status).await?;
        Ok(BuildState::Failed)
    }

    async fn execute<C: ContextPreparer>(
        &mut self,
        preparer: &mut C,
        build: &ImageBuild,
        registries: Vec<build_core::models::ResolvedRegistry>,
    ) -> Result<Vec<String>, AppError> {
        let spec = &build.spec;

        let context = self
            .fetcher
            .fetch_context(&spec.context_url, spec.max_size_bytes)
            .await?;

        preparer.prepare(context.path(), &spec.plugin_data).await?;

        let options = BuildOptions {
            context_url: spec.context_url.clone(),
            context_dir: context.path().to_path_buf(),
            image_name: spec.image_name.clone(),
            tags: spec.tags.clone(),
            registries,
            build_args: spec.build_args.clone(),
            labels: spec.labels.clone(),
            cache: spec.cache,
            size_limit: spec.max_size_bytes,
            timeout_seconds: spec.timeout_seconds,
        };

        let build_future = self.builder.build_and_push(&options);
        let image_urls = match spec.timeout_seconds.filter(|s| *s > 0) {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), build_future)
                .await
                .map_err(|_| AppError::Timeout(secs))??,
            None => build_future.await?,
        };

        drop(context);
        Ok(image_urls)
    }

    /// Persists `status`, then publishes it. A failed publish is only an
    /// error for terminal states.
    async fn transition(
        &mut self,
        build: &ImageBuild,
        previous: Option<BuildState>,
        status: &ImageBuildStatus,
    ) -> Result<(), AppError> {
        self.store.update_status(build, status).await?;

        let update = status_update(build, previous, status);
        match self.sink.push(&update).await {
            Ok(()) => Ok(()),
            Err(e) if status.state.is_some_and(|s| s.is_terminal()) => {
                error!(error = %e, state = %update.current_state, "❌ Failed to publish terminal status");
                Err(e.into())
            }
            Err(e) => {
                warn!(error = %e, state = %update.current_state, "⚠️ Failed to publish status update");
                Ok(())
            }
        }
    }
}

fn failed_status(
    start_time: Option<chrono::DateTime<Utc>>,
    message: String,
) -> ImageBuildStatus {
    ImageBuildStatus {
        state: Some(BuildState::Failed),
        image_urls: Vec::new(),
        error_message: Some(message),
        start_time,
        completion_time: Some(Utc::now()),
    }
}

fn status_update(
    build: &ImageBuild,
    previous: Option<BuildState>,
    status: &ImageBuildStatus,
) -> StatusUpdate {
    let namespace = build.metadata.namespace.as_deref().unwrap_or("default");
    let name = build.metadata.name.clone().unwrap_or_default();

    StatusUpdate {
        object_link: format_object_link(namespace, &name),
        name,
        annotations: build.metadata.annotations.clone().unwrap_or_default(),
        previous_state: BuildState::label(previous).to_string(),
        current_state: BuildState::label(status.state).to_string(),
        error_message: status.error_message.clone().unwrap_or_default(),
        image_urls: status.image_urls.clone(),
    }
}
