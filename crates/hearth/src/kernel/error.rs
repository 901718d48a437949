use hearth_bus::BusError;
use hearth_types::AddressType;

use crate::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Adapter not connected: {0}")]
    AdapterNotFound(String),

    #[error("Protocol not registered: {0}")]
    ProtocolNotFound(String),

    #[error("Protocol {protocol} expects {expected} addresses, device uses {actual}")]
    AddressTypeMismatch {
        protocol: String,
        expected: AddressType,
        actual: AddressType,
    },

    #[error("Address {address} ({address_type}) already belongs to device {device_id}")]
    AddressInUse {
        address: String,
        address_type: AddressType,
        device_id: String,
    },

    #[error("Device {device_id} is not linked to adapter {adapter_id}")]
    NotLinked {
        device_id: String,
        adapter_id: String,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

pub type KernelResult<T> = Result<T, KernelError>;
