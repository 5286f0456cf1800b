//! Notification publisher trait and implementations.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised while publishing a notification.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker rejected the message or could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sends outcome events to the message broker.
///
/// Delivery is at-least-once and fire-and-forget. Implementations must not
/// retry internally; the caller decides what a failure means.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    /// Publishes `payload` to `topic` under `key`.
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// A message captured by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Decodes the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    messages: Vec<PublishedMessage>,
    attempts: usize,
    fail_on_send: bool,
}

/// In-memory publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every send.
    pub async fn set_fail_on_send(&self, fail: bool) {
        self.state.write().await.fail_on_send = fail;
    }

    /// Returns the messages delivered so far.
    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.state.read().await.messages.clone()
    }

    /// Returns the number of send attempts, failed ones included.
    pub async fn attempts(&self) -> usize {
        self.state.read().await.attempts
    }
}

#[async_trait]
impl NotificationPublisher for InMemoryPublisher {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let mut state = self.state.write().await;
        state.attempts += 1;

        if state.fail_on_send {
            return Err(PublishError::Unavailable("broker unreachable".to_string()));
        }

        state.messages.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Publisher that writes each message to the log instead of a broker.
///
/// Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl NotificationPublisher for LoggingPublisher {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        tracing::info!(topic, key, bytes = payload.len(), "notification published");
        Ok(())
    }
}
