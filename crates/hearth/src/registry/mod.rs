//! Plugin Registry & Lifecycle Controller
//!
//! Tracks which plugins are connected, applies their self-reported state, and
//! turns a start/stop request into a bus command followed by a bounded wait
//! for the plugin's ack or nack.
//!
//! # Command slots
//!
//! Every connected plugin has at most one pending command. The slot is a
//! one-shot channel installed *before* the command is published, so a fast
//! acknowledgement can never arrive ahead of the slot. The wait ends with
//! the first of:
//! - ack on `hearth/plugin/ack` -> success
//! - nack on `hearth/plugin/negative-ack` -> [`LifecycleError::Rejected`]
//! - the command timeout -> [`LifecycleError::Timeout`]
//! - the plugin disconnecting (slot dropped) -> [`LifecycleError::Disconnected`]

mod error;

pub use error::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use hearth_bus::{BusResult, EventBus, EventType, SubscriptionHandle};
use hearth_types::{Plugin, PluginKey, PluginType};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::kernel::AdapterDirectory;

/// How long a command waits for an answer unless configured otherwise
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Registry State
// ─────────────────────────────────────────────────────────────────────────────

enum CommandReply {
    Ack(Plugin),
    Nack(Plugin),
}

struct PendingCommand {
    seq: u64,
    command: LifecycleCommand,
    reply: oneshot::Sender<CommandReply>,
}

struct PluginEntry {
    plugin: Plugin,
    pending: Option<PendingCommand>,
}

#[derive(Default)]
struct RegistryInner {
    plugins: HashMap<PluginType, HashMap<String, PluginEntry>>,
}

impl RegistryInner {
    fn entry(&self, key: &PluginKey) -> Option<&PluginEntry> {
        self.plugins.get(&key.plugin_type)?.get(&key.id)
    }

    fn entry_mut(&mut self, key: &PluginKey) -> Option<&mut PluginEntry> {
        self.plugins.get_mut(&key.plugin_type)?.get_mut(&key.id)
    }

    fn sorted(&self, plugin_type: Option<PluginType>) -> Vec<Plugin> {
        let mut plugins: Vec<Plugin> = self
            .plugins
            .iter()
            .filter(|(t, _)| plugin_type.is_none_or(|wanted| **t == wanted))
            .flat_map(|(_, entries)| entries.values().map(|e| e.plugin.clone()))
            .collect();
        plugins.sort_by(|a, b| {
            a.plugin_type
                .cmp(&b.plugin_type)
                .then_with(|| a.id.cmp(&b.id))
        });
        plugins
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

pub struct PluginRegistry {
    bus: EventBus,
    command_timeout: Duration,
    /// Connection table and command slots, guarded together
    inner: Mutex<RegistryInner>,
    next_seq: AtomicU64,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

impl PluginRegistry {
    pub fn new(bus: EventBus, command_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            bus,
            command_timeout,
            inner: Mutex::new(RegistryInner::default()),
            next_seq: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Start listening to plugin announcements and acknowledgements
    pub async fn attach(self: &Arc<Self>) -> BusResult<()> {
        let handles = vec![
            self.route(EventType::PluginConnected, Self::handle_connected)
                .await?,
            self.route(EventType::PluginDisconnected, Self::handle_disconnected)
                .await?,
            self.route(EventType::PluginStateChanged, Self::handle_state_changed)
                .await?,
            self.route(EventType::PluginAck, |registry, plugin| {
                registry.complete(plugin, true)
            })
            .await?,
            self.route(EventType::PluginNegativeAck, |registry, plugin| {
                registry.complete(plugin, false)
            })
            .await?,
        ];
        self.subscriptions.lock().extend(handles);
        info!("Plugin registry attached");
        Ok(())
    }

    /// Stop listening to the bus
    pub fn detach(&self) {
        for handle in self.subscriptions.lock().drain(..) {
            handle.cancel();
        }
    }

    async fn route(
        self: &Arc<Self>,
        event_type: EventType,
        apply: fn(&PluginRegistry, Plugin),
    ) -> BusResult<SubscriptionHandle> {
        let registry: Weak<Self> = Arc::downgrade(self);
        self.bus
            .subscribe(&event_type, move |plugin: Plugin| {
                let registry = registry.clone();
                async move {
                    if let Some(registry) = registry.upgrade() {
                        apply(&registry, plugin);
                    }
                }
            })
            .await
    }

    // ─── Announcement Handlers ───

    fn handle_connected(&self, plugin: Plugin) {
        let key = plugin.key();
        let mut inner = self.inner.lock();
        let entries = inner.plugins.entry(key.plugin_type).or_default();

        if entries.contains_key(&key.id) {
            warn!(plugin = %key, "Plugin already connected, ignoring duplicate announcement");
            return;
        }

        info!(plugin = %key, name = %plugin.name, state = %plugin.state, "Plugin connected");
        entries.insert(
            key.id,
            PluginEntry {
                plugin,
                pending: None,
            },
        );
    }

    fn handle_disconnected(&self, plugin: Plugin) {
        let key = plugin.key();
        let removed = self
            .inner
            .lock()
            .plugins
            .get_mut(&key.plugin_type)
            .and_then(|entries| entries.remove(&key.id));

        match removed {
            // Dropping the entry drops any pending slot, waking its waiter
            Some(_) => info!(plugin = %key, "Plugin disconnected"),
            None => debug!(plugin = %key, "Disconnect from unknown plugin"),
        }
    }

    fn handle_state_changed(&self, plugin: Plugin) {
        let key = plugin.key();
        let mut inner = self.inner.lock();
        match inner.entry_mut(&key) {
            Some(entry) => {
                info!(plugin = %key, state = %plugin.state, "Plugin state changed");
                entry.plugin = plugin;
            }
            None => warn!(plugin = %key, "State change from unknown plugin"),
        }
    }

    fn complete(&self, plugin: Plugin, acked: bool) {
        let key = plugin.key();
        let pending = self
            .inner
            .lock()
            .entry_mut(&key)
            .and_then(|entry| entry.pending.take());

        let Some(pending) = pending else {
            debug!(plugin = %key, acked, "Acknowledgement with no pending command, dropped");
            return;
        };

        let reply = if acked {
            CommandReply::Ack(plugin)
        } else {
            CommandReply::Nack(plugin)
        };
        if pending.reply.send(reply).is_err() {
            debug!(plugin = %key, command = %pending.command, "Command caller already gone");
        }
    }

    // ─── Commands ───

    /// Ask a plugin to start and wait for its answer
    pub async fn start_plugin(
        &self,
        plugin_type: PluginType,
        id: &str,
    ) -> LifecycleResult<Plugin> {
        self.send_command(PluginKey::new(plugin_type, id), LifecycleCommand::Start)
            .await
    }

    /// Ask a plugin to stop and wait for its answer
    pub async fn stop_plugin(&self, plugin_type: PluginType, id: &str) -> LifecycleResult<Plugin> {
        self.send_command(PluginKey::new(plugin_type, id), LifecycleCommand::Stop)
            .await
    }

    /// Stop, then start
    pub async fn restart_plugin(
        &self,
        plugin_type: PluginType,
        id: &str,
    ) -> LifecycleResult<Plugin> {
        self.stop_plugin(plugin_type, id).await?;
        self.start_plugin(plugin_type, id).await
    }

    async fn send_command(
        &self,
        key: PluginKey,
        command: LifecycleCommand,
    ) -> LifecycleResult<Plugin> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply, answer) = oneshot::channel();

        {
            let mut inner = self.inner.lock();
            let entry = inner
                .entry_mut(&key)
                .ok_or_else(|| LifecycleError::NotConnected(key.clone()))?;
            if entry.pending.is_some() {
                return Err(LifecycleError::CommandInFlight(key));
            }
            entry.pending = Some(PendingCommand {
                seq,
                command,
                reply,
            });
        }

        if let Err(e) = self.bus.publish(&command.event_type(&key.id), &()).await {
            self.clear_pending(&key, seq);
            return Err(e.into());
        }
        debug!(plugin = %key, %command, "Command sent");

        match tokio::time::timeout(self.command_timeout, answer).await {
            Ok(Ok(CommandReply::Ack(plugin))) => {
                info!(plugin = %key, %command, "Command acknowledged");
                Ok(plugin)
            }
            Ok(Ok(CommandReply::Nack(_))) => {
                warn!(plugin = %key, %command, "Command rejected");
                Err(LifecycleError::Rejected { key, command })
            }
            Ok(Err(_)) => {
                warn!(plugin = %key, %command, "Plugin disconnected during command");
                Err(LifecycleError::Disconnected(key))
            }
            Err(_) => {
                self.clear_pending(&key, seq);
                warn!(plugin = %key, %command, timeout = ?self.command_timeout, "Command timed out");
                Err(LifecycleError::Timeout {
                    key,
                    command,
                    timeout: self.command_timeout,
                })
            }
        }
    }

    /// Drop the slot for command `seq`, leaving any newer command alone
    fn clear_pending(&self, key: &PluginKey, seq: u64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entry_mut(key) {
            if entry.pending.as_ref().is_some_and(|p| p.seq == seq) {
                entry.pending = None;
            }
        }
    }

    // ─── Queries ───

    /// Every connected plugin, ordered by type then id
    pub fn plugins(&self) -> Vec<Plugin> {
        self.inner.lock().sorted(None)
    }

    pub fn plugins_by_type(&self, plugin_type: PluginType) -> Vec<Plugin> {
        self.inner.lock().sorted(Some(plugin_type))
    }

    pub fn plugin(&self, plugin_type: PluginType, id: &str) -> Option<Plugin> {
        self.inner
            .lock()
            .entry(&PluginKey::new(plugin_type, id))
            .map(|entry| entry.plugin.clone())
    }

    pub fn is_registered(&self, plugin_type: PluginType, id: &str) -> bool {
        self.inner
            .lock()
            .entry(&PluginKey::new(plugin_type, id))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().plugins.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AdapterDirectory for PluginRegistry {
    fn adapter_exists(&self, id: &str) -> bool {
        self.is_registered(PluginType::Adapter, id)
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.detach();
    }
}
