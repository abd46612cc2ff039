use serde::Deserialize;

/// PEM material for mutually authenticated broker connections.
#[derive(Deserialize, Clone, Debug)]
pub struct TlsConfig {
    pub ca: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}
