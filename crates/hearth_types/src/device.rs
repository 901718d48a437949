// Devices and the readings/updates that flow through the state pipeline

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Capability, CapabilityType, CapabilityValue};

/// How a device address should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Bluetooth LE MAC address
    Ble,
    /// Free-form address (hostnames, serial numbers, ...)
    Basic,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressType::Ble => write!(f, "ble"),
            AddressType::Basic => write!(f, "basic"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub address: String,
    pub address_type: AddressType,
    pub name: String,
    /// Id of the protocol decoder used for this device's readings
    pub protocol: String,
    #[serde(default)]
    pub adapter_ids: BTreeSet<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<CapabilityType, Capability>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Device {
    pub fn new(
        address: impl Into<String>,
        address_type: AddressType,
        name: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            address: address.into(),
            address_type,
            name: name.into(),
            protocol: protocol.into(),
            adapter_ids: BTreeSet::new(),
            capabilities: BTreeMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Builder: request a link to an adapter at registration time
    pub fn with_adapter(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapter_ids.insert(adapter_id.into());
        self
    }

    /// Overwrite capabilities by name and bump `last_updated`.
    pub fn merge_capabilities<'a>(
        &mut self,
        capabilities: impl IntoIterator<Item = &'a Capability>,
        at: DateTime<Utc>,
    ) {
        for capability in capabilities {
            self.capabilities
                .insert(capability.name.clone(), capability.clone());
        }
        self.last_updated = at;
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn is_linked_to(&self, adapter_id: &str) -> bool {
        self.adapter_ids.contains(adapter_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// One physical transmission observed by a scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub address: String,
    pub address_type: AddressType,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl RawReading {
    pub fn new(address: impl Into<String>, address_type: AddressType, data: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            address_type,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Change of one capability, delivered to each linked adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    pub device_id: String,
    /// Device name at the time of the update
    pub name: String,
    pub capability_type: CapabilityType,
    pub timestamp: DateTime<Utc>,
    pub value: CapabilityValue,
}

impl DeviceStateUpdate {
    pub fn new(device: &Device, capability: &Capability, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device.id.clone(),
            name: device.name.clone(),
            capability_type: capability.name.clone(),
            timestamp,
            value: capability.value.clone(),
        }
    }
}
