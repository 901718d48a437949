// TCP broker and client transport
//
// The hub hosts a TcpBroker around its own TopicRouter. Plugin processes
// connect with TcpTransport, which keeps a local router for fan-out to its
// own subscribers and forwards subscriptions upstream. Per connection, frames
// are handled in arrival order, so a client's subscription is in place before
// anything it publishes afterwards is routed. A client holding overlapping
// patterns receives a matching message once per pattern.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{Frame, FrameReader, FrameWriter};
use super::{MemoryTransport, Message, Subscription, Transport};
use crate::error::{BusError, BusResult};
use crate::router::TopicRouter;

/// Frames queued per client before forwarders start to lag
const OUTBOUND_QUEUE: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Broker
// ─────────────────────────────────────────────────────────────────────────────

pub struct TcpBroker {
    listener: TcpListener,
    router: Arc<TopicRouter>,
}

impl TcpBroker {
    pub async fn bind(addr: impl ToSocketAddrs, router: Arc<TopicRouter>) -> BusResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> Arc<TopicRouter> {
        Arc::clone(&self.router)
    }

    /// In-process transport sharing this broker's router
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::with_router(self.router())
    }

    /// Accept clients until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "Client connected");
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&self.router),
                            shutdown.child_token(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Each connection watches a child token and closes its socket itself
        while connections.join_next().await.is_some() {}
        let stats = self.router.stats();
        info!(
            messages = stats.total_messages,
            topics = stats.topics_count,
            "Broker stopped"
        );
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<TopicRouter>,
    shutdown: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (outbound, mut queued) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        let mut writer = FrameWriter::new(write_half);
        while let Some(frame) = queued.recv().await {
            match writer.send(&frame).await {
                Ok(()) => {}
                Err(BusError::Frame(reason)) => {
                    warn!(%peer, reason = %reason, "Skipping frame the client cannot accept");
                }
                Err(e) => {
                    debug!(%peer, error = %e, "Write to client failed");
                    break;
                }
            }
        }
    });

    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut reader = FrameReader::new(read_half);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = reader.recv() => frame,
        };

        match frame {
            Ok(Some(Frame::Subscribe(pattern))) => {
                if forwarders.contains_key(&pattern) {
                    continue;
                }
                debug!(%peer, pattern = %pattern, "Client subscribed");
                let mut subscription = router.subscribe(&pattern);
                let outbound = outbound.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(message) = subscription.recv().await {
                        let frame = Frame::Publish {
                            topic: message.topic,
                            payload: message.payload,
                        };
                        if outbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                forwarders.insert(pattern, forwarder);
            }
            Ok(Some(Frame::Publish { topic, payload })) => {
                router.publish(Message::new(topic, payload));
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "Dropping client after bad frame");
                break;
            }
        }
    }

    for forwarder in forwarders.into_values() {
        forwarder.abort();
    }
    writer.abort();
    info!(%peer, "Client disconnected");
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport for plugin processes connecting to a hub's broker
pub struct TcpTransport {
    writer: Mutex<FrameWriter<OwnedWriteHalf>>,
    router: Arc<TopicRouter>,
    reader: JoinHandle<()>,
}

impl TcpTransport {
    pub async fn connect(addr: impl ToSocketAddrs) -> BusResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let broker = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let router = TopicRouter::shared();
        let inbound = Arc::clone(&router);
        let reader = tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half);
            loop {
                match reader.recv().await {
                    Ok(Some(Frame::Publish { topic, payload })) => {
                        inbound.publish(Message::new(topic, payload));
                    }
                    Ok(Some(Frame::Subscribe(pattern))) => {
                        debug!(pattern = %pattern, "Ignoring subscribe frame from broker");
                    }
                    Ok(None) => {
                        info!(%broker, "Broker closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(%broker, error = %e, "Broker connection failed");
                        break;
                    }
                }
            }
            inbound.close();
        });

        info!(%broker, "Connected to broker");
        Ok(Self {
            writer: Mutex::new(FrameWriter::new(write_half)),
            router,
            reader,
        })
    }

    async fn send(&self, frame: Frame) -> BusResult<()> {
        if self.reader.is_finished() {
            return Err(BusError::Closed);
        }
        self.writer
            .lock()
            .await
            .send(&frame)
            .await
            .map_err(|e| match e {
                BusError::Io(e) => BusError::Transport(e.to_string()),
                other => other,
            })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    /// Returns once the frame is flushed to the socket
    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        self.send(Frame::Publish {
            topic: topic.to_string(),
            payload,
        })
        .await
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<Subscription> {
        let subscription = self.router.subscribe(pattern);
        self.send(Frame::Subscribe(pattern.to_string())).await?;
        Ok(subscription)
    }
}
