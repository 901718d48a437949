//! Device persistence
//!
//! The kernel only talks to [`DeviceRepository`]; each implementation is
//! responsible for its own internal synchronization.

mod memory;
mod redb_store;

pub use memory::MemoryDeviceRepository;
pub use redb_store::RedbDeviceRepository;

use async_trait::async_trait;
use hearth_types::{AddressType, Device};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait DeviceRepository: Send + Sync + 'static {
    /// Insert or replace a device record
    async fn save(&self, device: &Device) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Device>>;

    /// All devices, oldest first
    async fn find_all(&self) -> RepositoryResult<Vec<Device>>;

    async fn find_by_address(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> RepositoryResult<Option<Device>>;

    /// Add an adapter id to the device's set and return the updated record
    async fn link_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device>;

    /// Remove an adapter id from the device's set and return the updated record
    async fn unlink_adapter(&self, device_id: &str, adapter_id: &str)
    -> RepositoryResult<Device>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> RepositoryResult<bool>;
}

pub(crate) fn sort_devices(devices: &mut [Device]) {
    devices.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
