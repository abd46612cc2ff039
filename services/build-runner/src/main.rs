pub mod config;
pub mod error;
pub mod implementations;
pub mod services;

use std::{env, path::PathBuf, time::Duration};

use build_core::models::BuildState;
use factory::factories::{kubernetes::Kubernetes, observability::Observability};
use tracing::{error, info, warn};
use utility::shutdown_signal::shutdown_signal;

use crate::{
    config::Config,
    error::AppError,
    implementations::AmqpConnector,
    services::{
        cloud_auth::CloudAuthRegistry,
        context_fetcher::{ContextFetcher, FetchPolicy},
        credential_resolver::CredentialResolver,
        kubernetes_store::KubernetesStore,
        plugin_host::PluginHost,
        process_builder::ProcessBuilder,
        state_machine::BuildStateMachine,
        status_publisher::StatusPublisher,
        traits::StatusSink,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cargo_manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let cargo_crate_name = env!("CARGO_CRATE_NAME");
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    let env_path = cargo_manifest_dir.join(".env");

    // Load service-specific .env
    dotenvy::from_path(&env_path).ok();
    // Load workspace root .env as fallback
    dotenvy::dotenv().ok();

    let path = env::var("CONFIG").unwrap_or("config.json".to_string());
    let full_path = cargo_manifest_dir.join(path);
    let cfg = Config::init(full_path).await?;

    let _guard =
        Observability::init(cargo_crate_name, cargo_pkg_version, &cfg.observability).await?;

    let namespace = cfg.resource_namespace.as_str();
    let name = cfg.resource.as_str();
    info!(namespace, name, "🚀 Starting build-runner");

    let kubernetes = Kubernetes::new(&cfg.kubernetes).await?;
    let store = KubernetesStore::new(kubernetes.client.clone());

    let http_client = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(cfg.fetch.connect_timeout_secs))
        .build()?;

    let cloud = CloudAuthRegistry::with_ambient_providers(http_client.clone()).await;
    let resolver =
        CredentialResolver::new(store.clone(), cfg.credentials.dynamic_path.clone(), cloud);

    let fetcher = ContextFetcher::new(
        http_client,
        FetchPolicy {
            max_attempts: cfg.fetch.max_attempts,
            request_timeout: Some(Duration::from_secs(cfg.fetch.request_timeout_secs.max(1))),
            deadline: cfg.fetch.timeout_secs.map(Duration::from_secs),
            ..Default::default()
        },
    );

    let publisher = StatusPublisher::connect(
        AmqpConnector {
            cfg: cfg.amqp.clone(),
        },
        cfg.amqp.queue.clone(),
        cfg.amqp.max_payload_bytes,
    )
    .await?;

    let builder = ProcessBuilder::new(&cfg.builder);
    let mut machine = BuildStateMachine::new(store, resolver, fetcher, builder, publisher);

    let outcome = match PluginHost::load(&cfg.plugins).await {
        Ok(mut plugins) => {
            let result = tokio::select! {
                result = machine.run(&mut plugins, namespace, name) => result,
                _ = shutdown_signal() => {
                    info!("🛑 Shutdown signal received");
                    Err(AppError::Interrupted)
                }
            };

            plugins.cleanup_all().await;
            plugins.shutdown().await;
            result
        }
        Err(e) => {
            error!(error = %e, "❌ Failed to load preparer plugins");
            machine.abort(namespace, name, &e.to_string()).await
        }
    };

    machine.sink_mut().close().await;

    match outcome {
        Ok(BuildState::Completed) => {
            info!(namespace, name, "✅ Build completed");
            Ok(())
        }
        Ok(state) => {
            println!("👋 Build finished as {}", state);
            anyhow::bail!("build {}/{} finished as {}", namespace, name, state)
        }
        Err(e @ AppError::AlreadyProcessed { .. }) => {
            warn!(error = %e, "⚠️ Nothing to do");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "❌ Build runner failed");
            Err(e.into())
        }
    }
}
