// Plugin descriptors
//
// A plugin announces itself with one of these when it connects and re-sends
// it on every state transition. The hub stores whatever the plugin reports.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Kind & State
// ─────────────────────────────────────────────────────────────────────────────

/// Role a plugin plays in the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Observes an external signal source and emits raw readings
    Scanner,
    /// Consumes per-device state updates
    Adapter,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginType::Scanner => write!(f, "scanner"),
            PluginType::Adapter => write!(f, "adapter"),
        }
    }
}

/// Self-reported run state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    #[default]
    Stopped,
    Running,
    Restarting,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Stopped => write!(f, "stopped"),
            PluginState::Running => write!(f, "running"),
            PluginState::Restarting => write!(f, "restarting"),
        }
    }
}

/// Identity of a plugin inside the registry: ids are only unique per type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginKey {
    pub plugin_type: PluginType,
    pub id: String,
}

impl PluginKey {
    pub fn new(plugin_type: PluginType, id: impl Into<String>) -> Self {
        Self {
            plugin_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_type, self.id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Widgets
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetType {
    LineChart,
    KeyValueList,
}

/// Where a UI should place a widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetMountPoint {
    #[serde(rename = "root_widget")]
    Dashboard,
    #[serde(rename = "device_widget")]
    Device,
    #[serde(rename = "capability_widget")]
    Capability,
}

/// UI widget a plugin contributes. The hub never interprets `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    pub mount_point: WidgetMountPoint,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Descriptor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub state: PluginState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub widgets: BTreeMap<String, Widget>,
}

impl Plugin {
    pub fn new(id: impl Into<String>, name: impl Into<String>, plugin_type: PluginType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plugin_type,
            state: PluginState::Stopped,
            widgets: BTreeMap::new(),
        }
    }

    pub fn scanner(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PluginType::Scanner)
    }

    pub fn adapter(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PluginType::Adapter)
    }

    /// Builder: attach a widget, keyed by its id
    pub fn with_widget(mut self, widget: Widget) -> Self {
        self.widgets.insert(widget.id.clone(), widget);
        self
    }

    pub fn key(&self) -> PluginKey {
        PluginKey::new(self.plugin_type, self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_wire_format() {
        let plugin = Plugin::adapter("homekit", "HomeKit Bridge");
        let json = serde_json::to_value(&plugin).unwrap();

        assert_eq!(json["id"], "homekit");
        assert_eq!(json["type"], "adapter");
        assert_eq!(json["state"], "stopped");
        assert!(json.get("widgets").is_none());
    }

    #[test]
    fn test_plugin_with_widgets() {
        let raw = r#"{
            "id": "ble",
            "name": "Bluetooth Scanner",
            "type": "scanner",
            "state": "running",
            "widgets": {
                "rssi": {
                    "id": "rssi",
                    "type": "line-chart",
                    "name": "Signal",
                    "config": {"max": 0},
                    "mount_point": "device_widget"
                }
            }
        }"#;

        let plugin: Plugin = serde_json::from_str(raw).unwrap();
        assert_eq!(plugin.state, PluginState::Running);
        let widget = &plugin.widgets["rssi"];
        assert_eq!(widget.widget_type, WidgetType::LineChart);
        assert_eq!(widget.mount_point, WidgetMountPoint::Device);
        assert_eq!(plugin.key(), PluginKey::new(PluginType::Scanner, "ble"));
    }
}
