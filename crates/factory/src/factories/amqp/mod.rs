pub mod error;
pub mod implementation;

use lapin::{Channel, Connection};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::factories::tls::TlsConfig;

#[derive(Deserialize, Clone, Debug)]
pub struct AmqpConfig {
    pub uri: String,
    #[serde(default = "queue_default")]
    pub queue: String,
    #[serde(default = "connect_attempts_default")]
    pub connect_attempts: u32,
    #[serde(default = "connect_delay_secs_default")]
    pub connect_delay_secs: u64,
    #[serde(default = "max_payload_bytes_default")]
    pub max_payload_bytes: usize,
    pub tls_config: Option<TlsConfig>,
}

fn queue_default() -> String {
    String::from("build.status")
}

fn connect_attempts_default() -> u32 {
    5
}

fn connect_delay_secs_default() -> u64 {
    2
}

fn max_payload_bytes_default() -> usize {
    64 * 1024
}

/// A single broker connection with one publishing channel.
///
/// `closed` is fed from lapin's error callback, so a dead connection is
/// observable without issuing a request first.
pub struct Amqp {
    connection: Connection,
    channel: Channel,
    closed: UnboundedReceiver<lapin::Error>,
}
