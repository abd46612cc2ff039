pub mod app;
pub mod config;
pub mod error;
pub mod services;

use std::{env, net::SocketAddr, path::PathBuf};

use build_core::crds::ImageBuild;
use factory::factories::{kubernetes::Kubernetes, observability::Observability};
use kube::CustomResourceExt;
use tokio::task::JoinSet;
use tracing::{error, info};
use utility::shutdown_signal::shutdown_signal;

use crate::{
    config::Config,
    error::AppError,
    services::{
        event_watcher::start_event_watcher, garbage_collector::start_garbage_collector,
        reconciler::Reconciler,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `build-controller crd` prints the CustomResourceDefinition and exits
    if env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", serde_yaml::to_string(&ImageBuild::crd())?);
        return Ok(());
    }

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // These are baked at COMPILE time
    let cargo_manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let cargo_crate_name = env!("CARGO_CRATE_NAME");
    let cargo_pkg_name = env!("CARGO_PKG_NAME");
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

    let kubernetes = Kubernetes::new(&cfg.kubernetes).await?;
    let reconciler = Reconciler::new(kubernetes.client.clone(), cfg.runner.clone());

    let mut set = JoinSet::new();

    set.spawn(start_event_watcher(
        kubernetes.client.clone(),
        cfg.namespace.clone(),
        reconciler,
    ));
    set.spawn(start_garbage_collector(
        kubernetes.client.clone(),
        cfg.namespace.clone(),
        cfg.gc.clone(),
    ));
    set.spawn(start_health_server(
        cargo_pkg_name,
        cargo_pkg_version,
        cfg.server_address,
    ));

    info!("✅ All background tasks started");

    // Unified shutdown logic
    tokio::select! {
        _ = shutdown_signal() => {
            info!("🛑 Shutdown signal received");
            set.shutdown().await;
        }
        Some(result) = set.join_next() => {
            match result {
                Ok(Ok(())) => error!("A background task exited unexpectedly!"),
                Ok(Err(e)) => error!("Task failed: {}", e),
                Err(e) => error!("Task panic: {}", e),
            }
            set.shutdown().await;
        }
    }

    println!("👋 Shutting down gracefully...");

    Ok(())
}

async fn start_health_server(
    cargo_pkg_name: &'static str,
    cargo_pkg_version: &'static str,
    addr: SocketAddr,
) -> Result<(), AppError> {
    let app = app::app(cargo_pkg_name, cargo_pkg_version);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("🚀 {} service running at {:#?}", cargo_pkg_name, addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
