// BTHome v2 service data decoder (unencrypted subset)
//
// Layout: one device-info byte (bit 0 = encrypted, bits 5..7 = version),
// then a sequence of [object id][little-endian value] records. Objects must
// appear in ascending id order, but that is not enforced here.

use std::collections::HashMap;

use hearth_types::{AddressType, Capability, CapabilityType, Unit};
use parking_lot::Mutex;

use super::{Decoded, Protocol, ProtocolError, ProtocolResult};

const ENCRYPTION_FLAG: u8 = 0x01;
const VERSION_SHIFT: u8 = 5;
const SUPPORTED_VERSION: u8 = 2;

const PACKET_ID: u8 = 0x00;

/// How an object's raw integer maps to a capability
#[derive(Clone, Copy)]
enum Scale {
    /// Signed or unsigned integer times a factor, as a float
    Number {
        factor: f64,
        signed: bool,
        unit: Option<Unit>,
    },
    /// Unsigned whole number, kept as an integer
    Count { unit: Option<Unit> },
    /// 0 / 1
    Binary,
    /// Button event code
    Button,
}

struct ObjectSpec {
    name: &'static str,
    len: usize,
    scale: Scale,
}

fn object_spec(object_id: u8) -> Option<ObjectSpec> {
    let number = |name, len, factor, signed, unit| ObjectSpec {
        name,
        len,
        scale: Scale::Number {
            factor,
            signed,
            unit,
        },
    };

    let spec = match object_id {
        0x01 => ObjectSpec {
            name: CapabilityType::BATTERY_LEVEL,
            len: 1,
            scale: Scale::Count {
                unit: Some(Unit::Percent),
            },
        },
        0x02 => number(CapabilityType::TEMPERATURE, 2, 0.01, true, Some(Unit::Celsius)),
        0x03 => number(CapabilityType::HUMIDITY, 2, 0.01, false, Some(Unit::Percent)),
        0x04 => number(CapabilityType::PRESSURE, 3, 0.01, false, Some(Unit::Hectopascal)),
        0x05 => number(CapabilityType::ILLUMINANCE, 3, 0.01, false, Some(Unit::Lux)),
        0x0C => number(CapabilityType::VOLTAGE, 2, 0.001, false, Some(Unit::Volt)),
        0x10 => ObjectSpec {
            name: CapabilityType::POWER,
            len: 1,
            scale: Scale::Binary,
        },
        0x2E => number(CapabilityType::HUMIDITY, 1, 1.0, false, Some(Unit::Percent)),
        0x3A => ObjectSpec {
            name: CapabilityType::BUTTON_EVENT,
            len: 1,
            scale: Scale::Button,
        },
        0x45 => number(CapabilityType::TEMPERATURE, 2, 0.1, true, Some(Unit::Celsius)),
        _ => return None,
    };
    Some(spec)
}

fn button_event(code: u8) -> &'static str {
    match code {
        0x00 => "none",
        0x01 => "press",
        0x02 => "double_press",
        0x03 => "triple_press",
        0x04 => "long_press",
        0x05 => "long_double_press",
        0x06 => "long_triple_press",
        0x80 => "hold_press",
        _ => "unknown",
    }
}

fn read_le(bytes: &[u8], signed: bool) -> i64 {
    let mut raw: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        raw |= (*byte as u64) << (8 * i);
    }
    if signed {
        let shift = 64 - 8 * bytes.len() as u32;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    }
}

/// Round away float noise from the fixed-point factors
fn round_to(value: f64, factor: f64) -> f64 {
    let decimals = (-factor.log10()).round().max(0.0) as i32;
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[derive(Default)]
pub struct BthomeProtocol {
    /// Last packet id seen per address
    last_packet: Mutex<HashMap<String, u8>>,
}

impl BthomeProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(data: &[u8]) -> ProtocolResult<(Option<u8>, Vec<Capability>)> {
        let (&info, mut rest) = data
            .split_first()
            .ok_or_else(|| ProtocolError::Malformed("empty payload".into()))?;

        if info & ENCRYPTION_FLAG != 0 {
            return Err(ProtocolError::Unsupported("encrypted payload".into()));
        }
        let version = info >> VERSION_SHIFT;
        if version != SUPPORTED_VERSION {
            return Err(ProtocolError::Unsupported(format!("BTHome version {version}")));
        }

        let mut packet_id = None;
        let mut capabilities = Vec::new();

        while let Some((&object_id, tail)) = rest.split_first() {
            if object_id == PACKET_ID {
                let (&id, tail) = tail
                    .split_first()
                    .ok_or_else(|| ProtocolError::Malformed("truncated packet id".into()))?;
                packet_id = Some(id);
                rest = tail;
                continue;
            }

            let spec = object_spec(object_id).ok_or_else(|| {
                ProtocolError::Unsupported(format!("object id 0x{object_id:02X}"))
            })?;
            if tail.len() < spec.len {
                return Err(ProtocolError::Malformed(format!(
                    "object 0x{object_id:02X} needs {} bytes, {} left",
                    spec.len,
                    tail.len()
                )));
            }
            let (raw, tail) = tail.split_at(spec.len);

            let capability = match spec.scale {
                Scale::Number {
                    factor,
                    signed,
                    unit,
                } => {
                    let value = round_to(read_le(raw, signed) as f64 * factor, factor);
                    let capability = Capability::new(spec.name, value);
                    match unit {
                        Some(unit) => capability.with_unit(unit),
                        None => capability,
                    }
                }
                Scale::Count { unit } => {
                    let capability = Capability::new(spec.name, read_le(raw, false));
                    match unit {
                        Some(unit) => capability.with_unit(unit),
                        None => capability,
                    }
                }
                Scale::Binary => Capability::new(spec.name, raw[0] != 0),
                Scale::Button => Capability::new(spec.name, button_event(raw[0])),
            };
            capabilities.push(capability);
            rest = tail;
        }

        Ok((packet_id, capabilities))
    }
}

impl Protocol for BthomeProtocol {
    fn id(&self) -> &str {
        "bthome"
    }

    fn name(&self) -> &str {
        "BTHome v2"
    }

    fn address_type(&self) -> AddressType {
        AddressType::Ble
    }

    fn parse(&self, address: &str, data: &[u8]) -> ProtocolResult<Decoded> {
        let (packet_id, capabilities) = Self::decode(data)?;

        if let Some(packet_id) = packet_id {
            let mut last_packet = self.last_packet.lock();
            if last_packet.insert(address.to_string(), packet_id) == Some(packet_id) {
                return Ok(Decoded::Duplicate);
            }
        }

        Ok(Decoded::Capabilities(capabilities))
    }
}
