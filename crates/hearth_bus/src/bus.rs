use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::BusResult;
use crate::topic::EventType;
use crate::transport::{MemoryTransport, Transport};

/// An event and its payload, before encoding
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub event_type: EventType,
    pub payload: T,
}

impl<T> Event<T> {
    pub fn new(event_type: EventType, payload: T) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}

/// Typed front end over a [`Transport`]
///
/// Cloning is cheap; all clones share the transport.
#[derive(Clone)]
pub struct EventBus {
    transport: Arc<dyn Transport>,
}

impl EventBus {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Bus over a fresh, private in-process router
    pub fn in_memory() -> Self {
        Self::new(MemoryTransport::new())
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Encode `payload` as JSON and publish it on the event's topic.
    pub async fn publish<T>(&self, event_type: &EventType, payload: &T) -> BusResult<()>
    where
        T: Serialize + ?Sized,
    {
        let topic = event_type.topic();
        let payload = Bytes::from(serde_json::to_vec(payload)?);
        trace!(topic = %topic, bytes = payload.len(), "Publishing");
        self.transport.publish(&topic, payload).await
    }

    pub async fn publish_event<T: Serialize>(&self, event: &Event<T>) -> BusResult<()> {
        self.publish(&event.event_type, &event.payload).await
    }

    /// Register `handler` for every message on the event's topic.
    ///
    /// Each message that decodes into `T` runs the handler on its own task,
    /// so handlers execute concurrently with each other and with themselves.
    /// Messages that fail to decode are logged and dropped.
    pub async fn subscribe<T, F, Fut>(
        &self,
        event_type: &EventType,
        handler: F,
    ) -> BusResult<SubscriptionHandle>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let topic = event_type.topic();
        let mut subscription = self.transport.subscribe(&topic).await?;
        let handler = Arc::new(handler);

        let dispatch_topic = topic.clone();
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                match serde_json::from_slice::<T>(&message.payload) {
                    Ok(payload) => {
                        tokio::spawn(handler(payload));
                    }
                    Err(e) => {
                        warn!(
                            topic = %message.topic,
                            error = %e,
                            "Dropping message that failed to decode"
                        );
                    }
                }
            }
            debug!(topic = %dispatch_topic, "Subscription ended");
        });

        Ok(SubscriptionHandle { topic, task })
    }
}

/// Handle to a running subscription dispatcher
pub struct SubscriptionHandle {
    topic: String,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop dispatching new messages. Handlers already spawned run to completion.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}
