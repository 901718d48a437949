//! Transports carry encoded bus messages between publishers and subscribers
//!
//! All transports are at-most-once: nothing is persisted, acknowledged or
//! retried at this layer.

mod frame;
mod memory;
mod tcp;

pub use frame::*;
pub use memory::*;
pub use tcp::*;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::BusResult;

/// An encoded message on a concrete topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of messages matching one topic pattern
pub struct Subscription {
    pattern: String,
    receiver: broadcast::Receiver<Message>,
}

impl Subscription {
    pub(crate) fn new(pattern: impl Into<String>, receiver: broadcast::Receiver<Message>) -> Self {
        Self {
            pattern: pattern.into(),
            receiver,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next message, or `None` once the transport is gone.
    ///
    /// Messages dropped because this subscriber fell behind are logged and
    /// skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(pattern = %self.pattern, missed, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(pattern = %self.pattern, missed, "Subscriber lagged, messages dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Topic-based publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Hand a message to the transport. Returning `Ok` says nothing about
    /// whether anyone received it.
    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;

    /// Start receiving messages whose topic matches `pattern`
    async fn subscribe(&self, pattern: &str) -> BusResult<Subscription>;
}
