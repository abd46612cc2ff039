pub mod cloud_auth;
pub mod context_fetcher;
pub mod credential_resolver;
pub mod kubernetes_store;
pub mod plugin_host;
pub mod process_builder;
pub mod state_machine;
pub mod status_publisher;
pub mod traits;
