use std::collections::HashMap;

use async_trait::async_trait;
use hearth_types::{AddressType, Device};
use parking_lot::RwLock;

use super::{DeviceRepository, RepositoryError, RepositoryResult, sort_devices};

/// Device store kept in process memory
#[derive(Default)]
pub struct MemoryDeviceRepository {
    devices: RwLock<HashMap<String, Device>>,
}

impl MemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, device_id: &str, apply: F) -> RepositoryResult<Device>
    where
        F: FnOnce(&mut Device),
    {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| RepositoryError::NotFound(device_id.to_string()))?;
        apply(device);
        Ok(device.clone())
    }
}

#[async_trait]
impl DeviceRepository for MemoryDeviceRepository {
    async fn save(&self, device: &Device) -> RepositoryResult<()> {
        self.devices
            .write()
            .insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Device>> {
        Ok(self.devices.read().get(id).cloned())
    }

    async fn find_all(&self) -> RepositoryResult<Vec<Device>> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        sort_devices(&mut devices);
        Ok(devices)
    }

    async fn find_by_address(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> RepositoryResult<Option<Device>> {
        Ok(self
            .devices
            .read()
            .values()
            .find(|d| d.address == address && d.address_type == address_type)
            .cloned())
    }

    async fn link_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device> {
        self.update(device_id, |device| {
            device.adapter_ids.insert(adapter_id.to_string());
        })
    }

    async fn unlink_adapter(
        &self,
        device_id: &str,
        adapter_id: &str,
    ) -> RepositoryResult<Device> {
        self.update(device_id, |device| {
            device.adapter_ids.remove(adapter_id);
        })
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        Ok(self.devices.write().remove(id).is_some())
    }
}
