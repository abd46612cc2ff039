use factory::factories::amqp::{Amqp, AmqpConfig, error::AmqpError};

use crate::services::status_publisher::{BrokerConnection, BrokerConnector, PublishError};

impl From<AmqpError> for PublishError {
    fn from(value: AmqpError) -> Self {
        match value {
            AmqpError::ConnectExhausted { .. } => PublishError::Connect(value.to_string()),
            AmqpError::LapinError(e) => PublishError::Publish {
                queue: String::new(),
                reason: e.to_string(),
            },
            AmqpError::Nacked(queue) => PublishError::Publish {
                queue,
                reason: "message was nacked".to_string(),
            },
        }
    }
}

/// Opens factory `Amqp` connections for the status publisher.
#[derive(Clone)]
pub struct AmqpConnector {
    pub cfg: AmqpConfig,
}

impl BrokerConnector for AmqpConnector {
    type Connection = Amqp;

    async fn connect(&self) -> Result<Amqp, PublishError> {
        Ok(Amqp::connect(&self.cfg).await?)
    }
}

impl BrokerConnection for Amqp {
    fn is_closed(&mut self) -> bool {
        Amqp::is_closed(self)
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.publish_json(queue, payload)
            .await
            .map_err(|e| match PublishError::from(e) {
                PublishError::Publish { reason, .. } => PublishError::Publish {
                    queue: queue.to_string(),
                    reason,
                },
                other => other,
            })
    }

    async fn close(&self) {
        Amqp::close(self).await
    }
}
