// SwitchBot advertisement decoder
//
// Byte 0 carries the encryption flag (bit 7) and the model character.
// Only the temperature/humidity meters are understood. SwitchBot payloads
// have no packet counter, so an unchanged payload counts as a repeat.

use std::collections::HashMap;

use hearth_types::{AddressType, Capability};
use parking_lot::Mutex;

use super::{Decoded, Protocol, ProtocolError, ProtocolResult};

const ENCRYPTED: u8 = 0x80;

const MODEL_METER: u8 = b'T';
const MODEL_METER_PLUS: u8 = b'i';

#[derive(Default)]
pub struct SwitchbotProtocol {
    last_payload: Mutex<HashMap<String, Vec<u8>>>,
}

impl SwitchbotProtocol {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_meter(data: &[u8]) -> ProtocolResult<Vec<Capability>> {
    if data.len() < 6 {
        return Err(ProtocolError::Malformed(format!(
            "meter payload needs 6 bytes, got {}",
            data.len()
        )));
    }

    let battery = (data[2] & 0x7F) as i64;

    let mut temperature = (data[4] & 0x7F) as f64 + (data[3] & 0x0F) as f64 / 10.0;
    // bit 7 set means above zero
    if data[4] & 0x80 == 0 {
        temperature = -temperature;
    }

    let humidity = (data[5] & 0x7F) as f64;

    Ok(vec![
        Capability::battery_level(battery),
        Capability::temperature(temperature),
        Capability::humidity(humidity),
    ])
}

impl Protocol for SwitchbotProtocol {
    fn id(&self) -> &str {
        "switchbot"
    }

    fn name(&self) -> &str {
        "SwitchBot"
    }

    fn address_type(&self) -> AddressType {
        AddressType::Ble
    }

    fn parse(&self, address: &str, data: &[u8]) -> ProtocolResult<Decoded> {
        let header = *data
            .first()
            .ok_or_else(|| ProtocolError::Malformed("empty payload".into()))?;
        if header & ENCRYPTED != 0 {
            return Err(ProtocolError::Unsupported("encrypted payload".into()));
        }

        let model = header & 0x7F;
        let capabilities = match model {
            MODEL_METER | MODEL_METER_PLUS => parse_meter(data)?,
            other => {
                return Err(ProtocolError::Unsupported(format!(
                    "SwitchBot model '{}'",
                    other as char
                )));
            }
        };

        let mut last_payload = self.last_payload.lock();
        if last_payload.get(address).is_some_and(|last| last.as_slice() == data) {
            return Ok(Decoded::Duplicate);
        }
        last_payload.insert(address.to_string(), data.to_vec());

        Ok(Decoded::Capabilities(capabilities))
    }
}
