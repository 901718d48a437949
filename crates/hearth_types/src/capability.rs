//! Device capabilities: one named, typed property of a device

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Capability Type
// ─────────────────────────────────────────────────────────────────────────────

/// Name of a capability. Open-ended; the constants cover what the bundled
/// decoders produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityType(String);

impl CapabilityType {
    pub const TEMPERATURE: &'static str = "temperature";
    pub const HUMIDITY: &'static str = "humidity";
    pub const BATTERY_LEVEL: &'static str = "battery_level";
    pub const BUTTON_EVENT: &'static str = "button_event";
    pub const VOLTAGE: &'static str = "voltage";
    pub const ILLUMINANCE: &'static str = "illuminance";
    pub const PRESSURE: &'static str = "pressure";
    pub const POWER: &'static str = "power";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CapabilityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CapabilityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for CapabilityType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// Discriminant carried next to a value on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Int,
    Bool,
    String,
    Bytes,
}

/// Current value of a capability
///
/// Serialized without a tag; the sibling `type` field on [`Capability`]
/// names the variant for consumers that need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl CapabilityValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            CapabilityValue::Bool(_) => ValueType::Bool,
            CapabilityValue::Int(_) => ValueType::Int,
            CapabilityValue::Float(_) => ValueType::Float,
            CapabilityValue::String(_) => ValueType::String,
            CapabilityValue::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Numeric view; ints widen to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapabilityValue::Float(f) => Some(*f),
            CapabilityValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CapabilityValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CapabilityValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CapabilityValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for CapabilityValue {
    fn from(v: f64) -> Self {
        CapabilityValue::Float(v)
    }
}

impl From<i64> for CapabilityValue {
    fn from(v: i64) -> Self {
        CapabilityValue::Int(v)
    }
}

impl From<bool> for CapabilityValue {
    fn from(v: bool) -> Self {
        CapabilityValue::Bool(v)
    }
}

impl From<String> for CapabilityValue {
    fn from(v: String) -> Self {
        CapabilityValue::String(v)
    }
}

impl From<&str> for CapabilityValue {
    fn from(v: &str) -> Self {
        CapabilityValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for CapabilityValue {
    fn from(v: Vec<u8>) -> Self {
        CapabilityValue::Bytes(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Celsius,
    Percent,
    Volt,
    Lux,
    Hectopascal,
    Watt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: CapabilityType,
    pub value: CapabilityValue,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
}

impl Capability {
    /// Build a capability; the value type follows the value
    pub fn new(name: impl Into<CapabilityType>, value: impl Into<CapabilityValue>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            value_type: value.value_type(),
            value,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn temperature(celsius: f64) -> Self {
        Self::new(CapabilityType::TEMPERATURE, celsius).with_unit(Unit::Celsius)
    }

    pub fn humidity(percent: f64) -> Self {
        Self::new(CapabilityType::HUMIDITY, percent).with_unit(Unit::Percent)
    }

    pub fn battery_level(percent: i64) -> Self {
        Self::new(CapabilityType::BATTERY_LEVEL, percent).with_unit(Unit::Percent)
    }
}
