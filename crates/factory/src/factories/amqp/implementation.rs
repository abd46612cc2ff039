use std::time::Duration;

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::tcp::{OwnedIdentity, OwnedTLSConfig};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::factories::amqp::error::AmqpError;
use crate::factories::amqp::{Amqp, AmqpConfig};

impl Amqp {
    /// Connects with a fixed delay between attempts. Running out of attempts
    /// is fatal for the caller.
    pub async fn connect(cfg: &AmqpConfig) -> Result<Self, AmqpError> {
        let attempts = cfg.connect_attempts.max(1);
        let delay = Duration::from_secs(cfg.connect_delay_secs);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match Self::connect_once(cfg).await {
                Ok(amqp) => {
                    info!(attempt, "✅ RabbitMQ connection created");
                    return Ok(amqp);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "⚠️ RabbitMQ connection attempt failed");
                    last = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(AmqpError::ConnectExhausted { attempts, last })
    }

    async fn connect_once(cfg: &AmqpConfig) -> Result<Self, AmqpError> {
        let mut tls = OwnedTLSConfig::default();

        if let Some(tls_config) = &cfg.tls_config {
            if let (Some(ca), Some(client_cert), Some(client_key)) = (
                tls_config.ca.clone(),
                tls_config.client_cert.clone(),
                tls_config.client_key.clone(),
            ) {
                info!("🔐 AMQP SSL/TLS enabled");
                tls.cert_chain = Some(ca);
                tls.identity = Some(OwnedIdentity::PKCS8 {
                    pem: client_cert.into_bytes(),
                    key: client_key.into_bytes(),
                });
            }
        }

        let connection =
            Connection::connect_with_config(&cfg.uri, ConnectionProperties::default(), tls)
                .await?;

        let (tx, closed) = mpsc::unbounded_channel();
        connection.on_error(move |err| {
            // Receiver may already be gone during shutdown.
            let _ = tx.send(err);
        });

        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        Ok(Self {
            connection,
            channel,
            closed,
        })
    }

    /// True once the connection reported an error or stopped being connected.
    pub fn is_closed(&mut self) -> bool {
        let signalled = self.closed.try_recv().is_ok();
        signalled || !self.connection.status().connected()
    }

    /// Declares `queue` and publishes a persistent JSON message to it.
    ///
    /// The declaration is repeated on every call; it is idempotent on the
    /// broker and covers queues lost together with a previous connection.
    pub async fn publish_json(&self, queue: &str, payload: &[u8]) -> Result<(), AmqpError> {
        let mut args = FieldTable::default();
        args.insert("x-single-active-consumer".into(), AMQPValue::Boolean(true));

        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                    passive: false,
                },
                args,
            )
            .await?;

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        match confirmation {
            Confirmation::Nack(_) => Err(AmqpError::Nacked(queue.to_string())),
            _ => Ok(()),
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.connection.close(200, "bye").await {
            warn!(error = %e, "⚠️ Failed to close RabbitMQ connection");
        }
    }
}
