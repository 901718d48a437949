// Plugin runtime client
//
// Runs inside a plugin process. The hub never calls plugin code directly:
// it publishes start/stop commands on the plugin's own topics and waits for
// an ack or nack carrying the plugin's descriptor.

use std::sync::Arc;

use async_trait::async_trait;
use hearth_bus::{EventBus, EventType, SubscriptionHandle, TcpTransport};
use hearth_types::{Plugin, PluginState};
use parking_lot::RwLock;
use serde::de::IgnoredAny;
use tokio::net::ToSocketAddrs;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::error::PluginResult;

/// Start/stop logic of a plugin
#[async_trait]
pub trait PluginHooks: Send + Sync + 'static {
    async fn on_start(&self) -> PluginResult<()>;

    async fn on_stop(&self) -> PluginResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

#[derive(Clone)]
pub struct PluginClient {
    descriptor: Arc<RwLock<Plugin>>,
    bus: EventBus,
}

impl PluginClient {
    pub fn new(descriptor: Plugin, bus: EventBus) -> Self {
        Self {
            descriptor: Arc::new(RwLock::new(descriptor)),
            bus,
        }
    }

    /// Connect to a hub's broker over TCP
    pub async fn connect(addr: impl ToSocketAddrs, descriptor: Plugin) -> PluginResult<Self> {
        let transport = TcpTransport::connect(addr).await?;
        Ok(Self::new(descriptor, EventBus::new(transport)))
    }

    pub fn descriptor(&self) -> Plugin {
        self.descriptor.read().clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Handle the plugin uses to report its own state transitions
    pub fn state_reporter(&self) -> StateReporter {
        StateReporter {
            descriptor: Arc::clone(&self.descriptor),
            bus: self.bus.clone(),
        }
    }

    /// Serve commands until `shutdown` is cancelled.
    ///
    /// Whatever happens before that, the last thing this does is publish the
    /// disconnect announcement.
    pub async fn run<H: PluginHooks>(&self, hooks: H, shutdown: CancellationToken) -> PluginResult<()> {
        let hooks: Arc<dyn PluginHooks> = Arc::new(hooks);
        let commands = TaskTracker::new();
        let mut subscriptions = Vec::new();

        let result = self
            .serve(hooks, &commands, &shutdown, &mut subscriptions)
            .await;

        for subscription in &subscriptions {
            subscription.cancel();
        }

        // Hooks already running still get to send their ack or nack
        commands.close();
        commands.wait().await;

        let descriptor = self.descriptor();
        match self
            .bus
            .publish(&EventType::PluginDisconnected, &descriptor)
            .await
        {
            Ok(()) => info!(plugin_id = %descriptor.id, "Plugin disconnected"),
            Err(e) => warn!(plugin_id = %descriptor.id, error = %e, "Failed to announce disconnect"),
        }

        result
    }

    async fn serve(
        &self,
        hooks: Arc<dyn PluginHooks>,
        commands: &TaskTracker,
        shutdown: &CancellationToken,
        subscriptions: &mut Vec<SubscriptionHandle>,
    ) -> PluginResult<()> {
        let id = self.descriptor.read().id.clone();

        // Command topics must be live before the hub learns we exist
        subscriptions.push(
            self.on_command(
                EventType::PluginStart(id.clone()),
                Command::Start,
                Arc::clone(&hooks),
                commands.clone(),
            )
            .await?,
        );
        subscriptions.push(
            self.on_command(EventType::PluginStop(id.clone()), Command::Stop, hooks, commands.clone())
                .await?,
        );

        let descriptor = self.descriptor();
        self.bus
            .publish(&EventType::PluginConnected, &descriptor)
            .await?;
        info!(
            plugin_id = %descriptor.id,
            plugin_type = %descriptor.plugin_type,
            transport = self.bus.transport_name(),
            "Plugin connected"
        );

        shutdown.cancelled().await;
        Ok(())
    }

    async fn on_command(
        &self,
        event_type: EventType,
        command: Command,
        hooks: Arc<dyn PluginHooks>,
        commands: TaskTracker,
    ) -> PluginResult<SubscriptionHandle> {
        let client = self.clone();
        let handle = self
            .bus
            .subscribe(&event_type, move |_: IgnoredAny| {
                let client = client.clone();
                let hooks = Arc::clone(&hooks);
                let in_flight = commands.token();
                async move {
                    client.handle_command(command, hooks.as_ref()).await;
                    drop(in_flight);
                }
            })
            .await?;
        Ok(handle)
    }

    async fn handle_command(&self, command: Command, hooks: &dyn PluginHooks) {
        let result = match command {
            Command::Start => hooks.on_start().await,
            Command::Stop => hooks.on_stop().await,
        };

        let reply = match &result {
            Ok(()) => EventType::PluginAck,
            Err(e) => {
                warn!(command = ?command, error = %e, "Plugin hook failed");
                EventType::PluginNegativeAck
            }
        };

        let descriptor = self.descriptor();
        if let Err(e) = self.bus.publish(&reply, &descriptor).await {
            warn!(plugin_id = %descriptor.id, error = %e, "Failed to publish command reply");
        }
    }
}

/// Publishes state transitions on behalf of a plugin
#[derive(Clone)]
pub struct StateReporter {
    descriptor: Arc<RwLock<Plugin>>,
    bus: EventBus,
}

impl StateReporter {
    pub fn state(&self) -> PluginState {
        self.descriptor.read().state
    }

    /// Record the new state and tell the hub
    pub async fn publish_state(&self, state: PluginState) -> PluginResult<()> {
        let descriptor = {
            let mut descriptor = self.descriptor.write();
            descriptor.state = state;
            descriptor.clone()
        };
        self.bus
            .publish(&EventType::PluginStateChanged, &descriptor)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use hearth_bus::MemoryTransport;
    use hearth_types::PluginType;
    use tokio::sync::mpsc;

    use super::*;
    use crate::PluginError;

    struct Scanner {
        reporter: StateReporter,
        fail_stop: bool,
    }

    #[async_trait]
    impl PluginHooks for Scanner {
        async fn on_start(&self) -> PluginResult<()> {
            self.reporter.publish_state(PluginState::Running).await
        }

        async fn on_stop(&self) -> PluginResult<()> {
            if self.fail_stop {
                return Err(PluginError::hook("radio busy"));
            }
            self.reporter.publish_state(PluginState::Stopped).await
        }
    }

    /// Collects (event, plugin) pairs from the hub side of the bus
    async fn watch(bus: &EventBus, events: &[EventType]) -> mpsc::UnboundedReceiver<(EventType, Plugin)> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let tx = tx.clone();
            let tag = event.clone();
            bus.subscribe(event, move |plugin: Plugin| {
                let tx = tx.clone();
                let tag = tag.clone();
                async move {
                    let _ = tx.send((tag, plugin));
                }
            })
            .await
            .unwrap();
        }
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<(EventType, Plugin)>) -> (EventType, Plugin) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn setup(fail_stop: bool) -> (EventBus, PluginClient, Scanner) {
        let transport = MemoryTransport::new();
        let hub = EventBus::new(transport.clone());
        let client = PluginClient::new(Plugin::scanner("ble", "BLE Scanner"), EventBus::new(transport));
        let scanner = Scanner {
            reporter: client.state_reporter(),
            fail_stop,
        };
        (hub, client, scanner)
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_announcements() {
        let (hub, client, scanner) = setup(false);
        let mut events = watch(
            &hub,
            &[EventType::PluginConnected, EventType::PluginDisconnected],
        )
        .await;

        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let client = client.clone();
            let shutdown = shutdown.clone();
            async move { client.run(scanner, shutdown).await }
        });

        let (event, plugin) = next(&mut events).await;
        assert_eq!(event, EventType::PluginConnected);
        assert_eq!(plugin.id, "ble");
        assert_eq!(plugin.plugin_type, PluginType::Scanner);

        shutdown.cancel();
        tokio_test::assert_ok!(run.await.unwrap());

        let (event, _) = next(&mut events).await;
        assert_eq!(event, EventType::PluginDisconnected);
    }

    #[tokio::test]
    async fn test_start_acks_with_updated_state() {
        let (hub, client, scanner) = setup(false);
        let mut events = watch(
            &hub,
            &[
                EventType::PluginConnected,
                EventType::PluginStateChanged,
                EventType::PluginAck,
            ],
        )
        .await;

        let shutdown = CancellationToken::new();
        tokio::spawn({
            let client = client.clone();
            let shutdown = shutdown.clone();
            async move { client.run(scanner, shutdown).await }
        });
        assert_eq!(next(&mut events).await.0, EventType::PluginConnected);

        hub.publish(&EventType::PluginStart("ble".into()), &()).await.unwrap();

        // Separate topics, so arrival order between the two is not fixed
        let replies = [next(&mut events).await, next(&mut events).await];
        for expected in [EventType::PluginStateChanged, EventType::PluginAck] {
            let (_, plugin) = replies
                .iter()
                .find(|(event, _)| *event == expected)
                .unwrap();
            assert_eq!(plugin.state, PluginState::Running);
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_failed_hook_sends_negative_ack() {
        let (hub, client, scanner) = setup(true);
        let mut events = watch(
            &hub,
            &[
                EventType::PluginConnected,
                EventType::PluginAck,
                EventType::PluginNegativeAck,
            ],
        )
        .await;

        let shutdown = CancellationToken::new();
        tokio::spawn({
            let client = client.clone();
            let shutdown = shutdown.clone();
            async move { client.run(scanner, shutdown).await }
        });
        assert_eq!(next(&mut events).await.0, EventType::PluginConnected);

        hub.publish(&EventType::PluginStop("ble".into()), &()).await.unwrap();

        let (event, plugin) = next(&mut events).await;
        assert_eq!(event, EventType::PluginNegativeAck);
        assert_eq!(plugin.id, "ble");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_commands_for_other_plugins_are_ignored() {
        let (hub, client, scanner) = setup(false);
        let mut events = watch(&hub, &[EventType::PluginConnected, EventType::PluginAck]).await;

        let shutdown = CancellationToken::new();
        tokio::spawn({
            let client = client.clone();
            let shutdown = shutdown.clone();
            async move { client.run(scanner, shutdown).await }
        });
        assert_eq!(next(&mut events).await.0, EventType::PluginConnected);

        hub.publish(&EventType::PluginStart("other".into()), &()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());

        shutdown.cancel();
    }

    /// Stop hook that takes a while and says when it began
    struct SlowStop {
        entered: Arc<tokio::sync::Notify>,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PluginHooks for SlowStop {
        async fn on_start(&self) -> PluginResult<()> {
            Ok(())
        }

        async fn on_stop(&self) -> PluginResult<()> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_hook() {
        let (hub, client, _) = setup(false);
        let mut events = watch(&hub, &[EventType::PluginConnected, EventType::PluginAck]).await;
        let hooks = SlowStop {
            entered: Arc::new(tokio::sync::Notify::new()),
            finished: Arc::new(AtomicBool::new(false)),
        };
        let entered = Arc::clone(&hooks.entered);
        let finished = Arc::clone(&hooks.finished);

        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let client = client.clone();
            let shutdown = shutdown.clone();
            async move { client.run(hooks, shutdown).await }
        });
        assert_eq!(next(&mut events).await.0, EventType::PluginConnected);

        hub.publish(&EventType::PluginStop("ble".into()), &())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), entered.notified())
            .await
            .unwrap();

        shutdown.cancel();
        tokio_test::assert_ok!(run.await.unwrap());

        // The disconnect went out only after the hook answered
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(next(&mut events).await.0, EventType::PluginAck);
    }

    #[tokio::test]
    async fn test_state_reporter_updates_descriptor() {
        let (_hub, client, _scanner) = setup(false);
        let reporter = client.state_reporter();

        tokio_test::assert_ok!(reporter.publish_state(PluginState::Restarting).await);
        assert_eq!(reporter.state(), PluginState::Restarting);
        assert_eq!(client.descriptor().state, PluginState::Restarting);
    }
}
