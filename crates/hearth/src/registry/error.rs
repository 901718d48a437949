use std::fmt;
use std::time::Duration;

use hearth_bus::{BusError, EventType};
use hearth_types::PluginKey;

/// Lifecycle command sent to a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    Start,
    Stop,
}

impl LifecycleCommand {
    /// Per-plugin topic the command is published on
    pub fn event_type(self, plugin_id: &str) -> EventType {
        match self {
            LifecycleCommand::Start => EventType::PluginStart(plugin_id.to_string()),
            LifecycleCommand::Stop => EventType::PluginStop(plugin_id.to_string()),
        }
    }
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleCommand::Start => write!(f, "start"),
            LifecycleCommand::Stop => write!(f, "stop"),
        }
    }
}

/// Failures of a lifecycle command, as seen by the caller
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Plugin not connected: {0}")]
    NotConnected(PluginKey),

    #[error("A command is already in flight for plugin {0}")]
    CommandInFlight(PluginKey),

    #[error("Plugin {key} rejected the {command} command")]
    Rejected {
        key: PluginKey,
        command: LifecycleCommand,
    },

    #[error("Plugin {key} did not acknowledge the {command} command within {timeout:?}")]
    Timeout {
        key: PluginKey,
        command: LifecycleCommand,
        timeout: Duration,
    },

    #[error("Plugin {0} disconnected before acknowledging")]
    Disconnected(PluginKey),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
