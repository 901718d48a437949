use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Message, Subscription, Transport};
use crate::error::BusResult;
use crate::router::TopicRouter;

/// In-process transport. Clones share the same router, so several buses
/// built from clones talk to each other as if they were separate processes
/// on one broker.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    router: Arc<TopicRouter>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(router: Arc<TopicRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        self.router.publish(Message::new(topic, payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<Subscription> {
        Ok(self.router.subscribe(pattern))
    }
}
