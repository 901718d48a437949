//! Protocol decoders turn the raw bytes of a reading into capabilities
//!
//! Decoders may keep per-address state (e.g. the last packet id seen) and
//! report a retransmission as [`Decoded::Duplicate`] so the kernel skips it.

mod bthome;
mod json;
mod switchbot;

pub use bthome::BthomeProtocol;
pub use json::JsonProtocol;
pub use switchbot::SwitchbotProtocol;

use hearth_types::{AddressType, Capability};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Unsupported payload: {0}")]
    Unsupported(String),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Outcome of decoding one reading
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Capabilities(Vec<Capability>),
    /// Retransmission of a reading that was already decoded
    Duplicate,
}

pub trait Protocol: Send + Sync + 'static {
    /// Identifier devices refer to in their `protocol` field
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Kind of address this protocol's devices use
    fn address_type(&self) -> AddressType;

    fn parse(&self, address: &str, data: &[u8]) -> ProtocolResult<Decoded>;
}

/// Listing entry for a registered protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolInfo {
    pub id: String,
    pub name: String,
    pub address_type: AddressType,
}

impl ProtocolInfo {
    pub fn of(protocol: &dyn Protocol) -> Self {
        Self {
            id: protocol.id().to_string(),
            name: protocol.name().to_string(),
            address_type: protocol.address_type(),
        }
    }
}
