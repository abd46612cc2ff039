use build_core::schemas::StatusUpdate;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::traits::StatusSink;

const TRUNCATION_MARKER: &str = "... (truncated)";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to encode status update: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error("status update is {size} bytes, above the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("publishing to {queue} failed: {reason}")]
    Publish { queue: String, reason: String },
}

pub trait BrokerConnector: Send + Sync {
    type Connection: BrokerConnection;

    async fn connect(&self) -> Result<Self::Connection, PublishError>;
}

pub trait BrokerConnection: Send {
    /// True once the broker signalled that the connection is gone.
    fn is_closed(&mut self) -> bool;

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), PublishError>;

    async fn close(&self);
}

/// Publishes status updates, reconnecting at most once per update.
pub struct StatusPublisher<C: BrokerConnector> {
    connector: C,
    connection: Option<C::Connection>,
    queue: String,
    max_payload_bytes: usize,
}

impl<C: BrokerConnector> StatusPublisher<C> {
    /// Opens the first connection; failing here is fatal for the job.
    pub async fn connect(
        connector: C,
        queue: impl Into<String>,
        max_payload_bytes: usize,
    ) -> Result<Self, PublishError> {
        let connection = connector.connect().await?;
        Ok(Self {
            connector,
            connection: Some(connection),
            queue: queue.into(),
            max_payload_bytes,
        })
    }

    /// JSON body of `update`, with the error message shortened until the
    /// payload fits.
    pub fn encode(&self, update: &StatusUpdate) -> Result<Vec<u8>, PublishError> {
        let payload = serde_json::to_vec(update)?;
        if payload.len() <= self.max_payload_bytes {
            return Ok(payload);
        }

        let mut trimmed = update.clone();
        let mut size = payload.len();
        while size > self.max_payload_bytes && !trimmed.error_message.is_empty() {
            let overflow = size - self.max_payload_bytes;
            let keep = trimmed
                .error_message
                .len()
                .saturating_sub(overflow + TRUNCATION_MARKER.len());
            let mut cut = keep;
            while !trimmed.error_message.is_char_boundary(cut) {
                cut -= 1;
            }

            let mut message = trimmed.error_message[..cut]
                .trim_end_matches(TRUNCATION_MARKER)
                .to_string();
            if !message.is_empty() {
                message.push_str(TRUNCATION_MARKER);
            }
            trimmed.error_message = message;

            let payload = serde_json::to_vec(&trimmed)?;
            size = payload.len();
            if size <= self.max_payload_bytes {
                warn!(
                    original = update.error_message.len(),
                    kept = trimmed.error_message.len(),
                    "⚠️ Status error message truncated"
                );
                return Ok(payload);
            }
        }

        Err(PublishError::PayloadTooLarge {
            size,
            max: self.max_payload_bytes,
        })
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        if let Some(old) = self.connection.take() {
            old.close().await;
        }
        warn!(queue = %self.queue, "🔄 Reconnecting to broker");
        self.connection = Some(self.connector.connect().await?);
        Ok(())
    }

    async fn publish_once(&self, payload: &[u8]) -> Result<(), PublishError> {
        match &self.connection {
            Some(connection) => connection.publish(&self.queue, payload).await,
            None => Err(PublishError::Connect("no broker connection".to_string())),
        }
    }

    #[tracing::instrument(name = "status_publisher.publish", skip_all, fields(state = %update.current_state), err)]
    pub async fn publish(&mut self, update: &StatusUpdate) -> Result<(), PublishError> {
        let payload = self.encode(update)?;

        let mut reconnected = false;
        let closed = self.connection.as_mut().is_none_or(|c| c.is_closed());
        if closed {
            self.reconnect().await?;
            reconnected = true;
        }

        match self.publish_once(&payload).await {
            Ok(()) => {}
            Err(e) if !reconnected => {
                warn!(error = %e, "⚠️ Publish failed, retrying on a fresh connection");
                self.reconnect().await?;
                self.publish_once(&payload).await?;
            }
            Err(e) => return Err(e),
        }

        info!(
            name = %update.name,
            from = %update.previous_state,
            to = %update.current_state,
            "📤 Status update published"
        );
        Ok(())
    }
}

impl<C: BrokerConnector> StatusSink for StatusPublisher<C> {
    async fn push(&mut self, update: &StatusUpdate) -> Result<(), PublishError> {
        self.publish(update).await
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct BrokerState {
        connects: usize,
        refuse_connects_after: Option<usize>,
        failing_publishes: usize,
        close_signalled: bool,
        published: Vec<Vec<u8>>,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        state: Arc<Mutex<BrokerState>>,
    }

    struct FakeConnection {
        state: Arc<Mutex<BrokerState>>,
    }

    impl BrokerConnector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self) -> Result<FakeConnection, PublishError> {
            let mut state = self.state.lock().unwrap();
            if state
                .refuse_connects_after
                .is_some_and(|limit| state.connects >= limit)
            {
                return Err(PublishError::Connect("connection refused".to_string()));
            }
            state.connects += 1;
            state.close_signalled = false;
            Ok(FakeConnection {
                state: self.state.clone(),
            })
        }
    }

    impl BrokerConnection for FakeConnection {
        fn is_closed(&mut self) -> bool {
            self.state.lock().unwrap().close_signalled
        }

        async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), PublishError> {
            let mut state = self.state.lock().unwrap();
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(PublishError::Publish {
                    queue: queue.to_string(),
                    reason: "channel closed".to_string(),
                });
            }
            state.published.push(payload.to_vec());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn update(error_message: &str) -> StatusUpdate {
        StatusUpdate {
            name: "web".to_string(),
            annotations: BTreeMap::new(),
            object_link: "/apis/foundry.dev/v1alpha1/namespaces/builds/imagebuilds/web".to_string(),
            previous_state: "Building".to_string(),
            current_state: "Failed".to_string(),
            error_message: error_message.to_string(),
            image_urls: Vec::new(),
        }
    }

    async fn publisher(connector: &FakeConnector, max: usize) -> StatusPublisher<FakeConnector> {
        StatusPublisher::connect(connector.clone(), "build.status", max)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_on_healthy_connection() {
        let connector = FakeConnector::default();
        let mut publisher = publisher(&connector, 64 * 1024).await;

        publisher.push(&update("")).await.unwrap();

        let state = connector.state.lock().unwrap();
        assert_eq!(state.connects, 1);
        let body: StatusUpdate = serde_json::from_slice(&state.published[0]).unwrap();
        assert_eq!(body, update(""));
    }

    #[tokio::test]
    async fn test_closed_connection_reconnects_before_publish() {
        let connector = FakeConnector::default();
        let mut publisher = publisher(&connector, 64 * 1024).await;
        connector.state.lock().unwrap().close_signalled = true;

        publisher.push(&update("")).await.unwrap();

        let state = connector.state.lock().unwrap();
        assert_eq!(state.connects, 2);
        assert_eq!(state.published.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_reconnects_once_and_resubmits() {
        let connector = FakeConnector::default();
        let mut publisher = publisher(&connector, 64 * 1024).await;
        connector.state.lock().unwrap().failing_publishes = 1;

        publisher.push(&update("")).await.unwrap();

        let state = connector.state.lock().unwrap();
        assert_eq!(state.connects, 2);
        assert_eq!(state.published.len(), 1);
    }

    #[tokio::test]
    async fn test_no_second_reconnect_in_one_call() {
        let connector = FakeConnector::default();
        let mut publisher = publisher(&connector, 64 * 1024).await;
        connector.state.lock().unwrap().failing_publishes = 2;

        let err = publisher.push(&update("")).await.unwrap_err();
        assert!(matches!(err, PublishError::Publish { .. }));
        assert_eq!(connector.state.lock().unwrap().connects, 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_surfaces_error() {
        let connector = FakeConnector::default();
        let mut publisher = publisher(&connector, 64 * 1024).await;
        {
            let mut state = connector.state.lock().unwrap();
            state.failing_publishes = 1;
            state.refuse_connects_after = Some(1);
        }

        let err = publisher.push(&update("")).await.unwrap_err();
        assert!(matches!(err, PublishError::Connect(_)));
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_fatal() {
        let connector = FakeConnector::default();
        connector.state.lock().unwrap().refuse_connects_after = Some(0);

        let result = StatusPublisher::connect(connector, "build.status", 1024).await;
        assert!(matches!(result, Err(PublishError::Connect(_))));
    }

    #[tokio::test]
    async fn test_long_error_message_is_truncated() {
        let connector = FakeConnector::default();
        let publisher = publisher(&connector, 1024).await;

        let payload = publisher.encode(&update(&"é".repeat(4000))).unwrap();
        assert!(payload.len() <= 1024);

        let body: StatusUpdate = serde_json::from_slice(&payload).unwrap();
        assert!(body.error_message.ends_with(TRUNCATION_MARKER));
        assert_eq!(body.current_state, "Failed");
    }

    #[tokio::test]
    async fn test_payload_too_large_without_message() {
        let connector = FakeConnector::default();
        let publisher = publisher(&connector, 32).await;

        let err = publisher.encode(&update("")).unwrap_err();
        assert!(matches!(err, PublishError::PayloadTooLarge { max: 32, .. }));
    }
}
