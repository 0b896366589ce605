//! Report job queue.
//!
//! [`MessageQueue`] is the broker contract. [`BroadcastQueue`] uses
//! tokio::sync::broadcast to fan published jobs out to in-process workers.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Broker contract consumed by the report use-case.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish `message` to `exchange` with `routing_key`.
    async fn publish_default(&self, exchange: &str, routing_key: &str, message: &[u8])
    -> AppResult<()>;
}

/// A message as delivered to in-process subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Default capacity for the broadcast channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// In-process queue that delivers every published job to all subscribers.
///
/// Publishing with no subscriber fails, like a broker with no bound queue.
#[derive(Clone)]
pub struct BroadcastQueue {
    sender: broadcast::Sender<PublishedMessage>,
}

impl BroadcastQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to jobs published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for BroadcastQueue {
    async fn publish_default(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &[u8],
    ) -> AppResult<()> {
        let delivered = self
            .sender
            .send(PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: message.to_vec(),
            })
            .map_err(|_| {
                AppError::Queue(format!(
                    "No consumer bound for {}/{}",
                    exchange, routing_key
                ))
            })?;

        debug!(
            "Published job to {}/{} ({} subscribers)",
            exchange, routing_key, delivered
        );

        Ok(())
    }
}
