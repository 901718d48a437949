// Topic naming
//
// Every logical event maps to exactly one topic string. Events aimed at a
// single plugin or adapter carry that entity's id as the last topic level.

use std::fmt;

/// Root level shared by every hub topic
pub const TOPIC_ROOT: &str = "hearth";

/// Logical kind of a bus event, parameterized by entity id where needed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Raw reading emitted by a scanner
    RawReading,
    PluginConnected,
    PluginDisconnected,
    PluginStateChanged,
    PluginAck,
    PluginNegativeAck,
    /// Start command for one plugin id
    PluginStart(String),
    /// Stop command for one plugin id
    PluginStop(String),
    /// A device was linked to this adapter
    DeviceRegister(String),
    /// A device was unlinked from this adapter
    DeviceUnregister(String),
    /// Capability update for a device linked to this adapter
    DeviceStateUpdate(String),
}

impl EventType {
    /// Canonical topic for this event
    pub fn topic(&self) -> String {
        match self {
            EventType::RawReading => format!("{TOPIC_ROOT}/raw_data"),
            EventType::PluginConnected => format!("{TOPIC_ROOT}/plugin/connected"),
            EventType::PluginDisconnected => format!("{TOPIC_ROOT}/plugin/disconnected"),
            EventType::PluginStateChanged => format!("{TOPIC_ROOT}/plugin/newstate"),
            EventType::PluginAck => format!("{TOPIC_ROOT}/plugin/ack"),
            EventType::PluginNegativeAck => format!("{TOPIC_ROOT}/plugin/negative-ack"),
            EventType::PluginStart(id) => format!("{TOPIC_ROOT}/plugin/start/{id}"),
            EventType::PluginStop(id) => format!("{TOPIC_ROOT}/plugin/stop/{id}"),
            EventType::DeviceRegister(id) => format!("{TOPIC_ROOT}/device/register/{id}"),
            EventType::DeviceUnregister(id) => format!("{TOPIC_ROOT}/device/unregister/{id}"),
            EventType::DeviceStateUpdate(id) => format!("{TOPIC_ROOT}/device/updated/{id}"),
        }
    }

    /// Parse a topic back into its event type
    pub fn from_topic(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        let event = match parts.as_slice() {
            ["raw_data"] => EventType::RawReading,
            ["plugin", "connected"] => EventType::PluginConnected,
            ["plugin", "disconnected"] => EventType::PluginDisconnected,
            ["plugin", "newstate"] => EventType::PluginStateChanged,
            ["plugin", "ack"] => EventType::PluginAck,
            ["plugin", "negative-ack"] => EventType::PluginNegativeAck,
            ["plugin", "start", id] if !id.is_empty() => EventType::PluginStart(id.to_string()),
            ["plugin", "stop", id] if !id.is_empty() => EventType::PluginStop(id.to_string()),
            ["device", "register", id] if !id.is_empty() => {
                EventType::DeviceRegister(id.to_string())
            }
            ["device", "unregister", id] if !id.is_empty() => {
                EventType::DeviceUnregister(id.to_string())
            }
            ["device", "updated", id] if !id.is_empty() => {
                EventType::DeviceStateUpdate(id.to_string())
            }
            _ => return None,
        };
        Some(event)
    }

    /// Entity id embedded in the topic, if any
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            EventType::PluginStart(id)
            | EventType::PluginStop(id)
            | EventType::DeviceRegister(id)
            | EventType::DeviceUnregister(id)
            | EventType::DeviceStateUpdate(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}
