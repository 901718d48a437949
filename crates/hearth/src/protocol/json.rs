use hearth_types::{AddressType, Capability, CapabilityType, CapabilityValue, Unit, ValueType};
use serde::Deserialize;

use super::{Decoded, Protocol, ProtocolResult};

/// Capabilities posted as a JSON array, e.g. by HTTP-pushing sensors
pub struct JsonProtocol;

/// Looser shape than [`Capability`]: `type` may be omitted
#[derive(Deserialize)]
struct JsonCapability {
    name: CapabilityType,
    value: CapabilityValue,
    #[serde(rename = "type", default)]
    value_type: Option<ValueType>,
    #[serde(default)]
    unit: Option<Unit>,
}

impl From<JsonCapability> for Capability {
    fn from(raw: JsonCapability) -> Self {
        // "21" arrives as an int even when the sender declared a float
        let value = match (raw.value_type, raw.value) {
            (Some(ValueType::Float), CapabilityValue::Int(i)) => CapabilityValue::Float(i as f64),
            (_, value) => value,
        };
        let mut capability = Capability::new(raw.name, value);
        capability.unit = raw.unit;
        capability
    }
}

impl Protocol for JsonProtocol {
    fn id(&self) -> &str {
        "http"
    }

    fn name(&self) -> &str {
        "Http"
    }

    fn address_type(&self) -> AddressType {
        AddressType::Basic
    }

    fn parse(&self, _address: &str, data: &[u8]) -> ProtocolResult<Decoded> {
        let raw: Vec<JsonCapability> = serde_json::from_slice(data)?;
        Ok(Decoded::Capabilities(raw.into_iter().map(Capability::from).collect()))
    }
}
