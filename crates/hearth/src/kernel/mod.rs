//! Device State Pipeline
//!
//! For each raw reading the kernel resolves the device by address, decodes
//! the payload with the device's protocol, merges the capabilities into the
//! stored record under that device's lock, and fans the changes out to every
//! linked adapter on its own update topic.
//!
//! Adapters run out of process, so linking and unlinking are announced on the
//! adapter's register/unregister topics instead of calling adapter code.

mod error;
mod locks;

pub use error::*;
pub use locks::*;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hearth_bus::{BusResult, EventBus, EventType, SubscriptionHandle};
use hearth_types::{Capability, Device, DeviceStateUpdate, RawReading};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{Decoded, Protocol, ProtocolInfo};
use crate::repository::DeviceRepository;

/// Live view of which adapters are connected
pub trait AdapterDirectory: Send + Sync + 'static {
    fn adapter_exists(&self, adapter_id: &str) -> bool;
}

/// What happened to one reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingOutcome {
    /// Merged and fanned out to `adapters` adapters
    Applied {
        device_id: String,
        capabilities: usize,
        adapters: usize,
    },
    UnknownDevice,
    ProtocolMissing,
    DecodeFailed,
    Duplicate,
    /// Deleted between lookup and merge
    DeviceRemoved,
    LookupFailed,
}

pub struct Kernel {
    bus: EventBus,
    repository: Arc<dyn DeviceRepository>,
    adapters: Arc<dyn AdapterDirectory>,
    protocols: RwLock<HashMap<String, Arc<dyn Protocol>>>,
    locks: DeviceLocks,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

impl Kernel {
    pub fn new(
        bus: EventBus,
        repository: Arc<dyn DeviceRepository>,
        adapters: Arc<dyn AdapterDirectory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            repository,
            adapters,
            protocols: RwLock::new(HashMap::new()),
            locks: DeviceLocks::new(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Start consuming raw readings from the bus
    pub async fn attach(self: &Arc<Self>) -> BusResult<()> {
        let kernel: Weak<Self> = Arc::downgrade(self);
        let handle = self
            .bus
            .subscribe(&EventType::RawReading, move |reading: RawReading| {
                let kernel = kernel.clone();
                async move {
                    if let Some(kernel) = kernel.upgrade() {
                        kernel.process_reading(reading).await;
                    }
                }
            })
            .await?;
        self.subscriptions.lock().push(handle);
        info!("Kernel attached");
        Ok(())
    }

    pub fn detach(&self) {
        for handle in self.subscriptions.lock().drain(..) {
            handle.cancel();
        }
    }

    pub fn locks(&self) -> &DeviceLocks {
        &self.locks
    }

    // ─── Protocols ───

    /// Register a decoder, replacing any previous one with the same id
    pub fn register_protocol(&self, protocol: Arc<dyn Protocol>) {
        let id = protocol.id().to_string();
        if self.protocols.write().insert(id.clone(), protocol).is_some() {
            warn!(protocol = %id, "Replaced existing protocol");
        } else {
            info!(protocol = %id, "Protocol registered");
        }
    }

    pub fn protocol(&self, id: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols.read().get(id).cloned()
    }

    /// Registered protocols, ordered by id
    pub fn protocols(&self) -> Vec<ProtocolInfo> {
        let mut infos: Vec<ProtocolInfo> = self
            .protocols
            .read()
            .values()
            .map(|p| ProtocolInfo::of(p.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    // ─── Pipeline ───

    /// Run one reading through the pipeline. Never fails: problems are logged
    /// and reported in the outcome.
    pub async fn process_reading(&self, reading: RawReading) -> ReadingOutcome {
        let device = match self
            .repository
            .find_by_address(&reading.address, reading.address_type)
            .await
        {
            Ok(Some(device)) => device,
            Ok(None) => {
                trace!(address = %reading.address, "Reading for unregistered device");
                return ReadingOutcome::UnknownDevice;
            }
            Err(e) => {
                warn!(address = %reading.address, error = %e, "Device lookup failed");
                return ReadingOutcome::LookupFailed;
            }
        };

        let Some(protocol) = self.protocol(&device.protocol) else {
            error!(
                device_id = %device.id,
                protocol = %device.protocol,
                "Device uses an unregistered protocol"
            );
            return ReadingOutcome::ProtocolMissing;
        };

        let capabilities = match protocol.parse(&reading.address, &reading.data) {
            Ok(Decoded::Capabilities(capabilities)) => capabilities,
            Ok(Decoded::Duplicate) => {
                debug!(device_id = %device.id, "Duplicate reading skipped");
                return ReadingOutcome::Duplicate;
            }
            Err(e) => {
                warn!(device_id = %device.id, protocol = %device.protocol, error = %e, "Failed to decode reading");
                return ReadingOutcome::DecodeFailed;
            }
        };

        let lock = self.locks.lock_for(&device.id);
        let guard = lock.lock().await;

        // Re-read under the lock so concurrent merges build on each other
        let mut merged = match self.repository.find_by_id(&device.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                drop(guard);
                self.locks.release(&device.id, lock);
                debug!(device_id = %device.id, "Device removed before merge");
                return ReadingOutcome::DeviceRemoved;
            }
            Err(e) => {
                drop(guard);
                self.locks.release(&device.id, lock);
                warn!(device_id = %device.id, error = %e, "Device reload failed");
                return ReadingOutcome::LookupFailed;
            }
        };

        merged.merge_capabilities(&capabilities, reading.timestamp);
        if let Err(e) = self.repository.save(&merged).await {
            error!(device_id = %merged.id, error = %e, "Failed to persist device state");
        }
        drop(guard);

        let adapters = self.fan_out(&merged, &capabilities, reading.timestamp);
        ReadingOutcome::Applied {
            device_id: merged.id,
            capabilities: capabilities.len(),
            adapters,
        }
    }

    /// One task per linked adapter, each publishing every update in turn
    fn fan_out(&self, device: &Device, capabilities: &[Capability], timestamp: DateTime<Utc>) -> usize {
        if capabilities.is_empty() {
            return 0;
        }

        let updates: Arc<[DeviceStateUpdate]> = capabilities
            .iter()
            .map(|capability| DeviceStateUpdate::new(device, capability, timestamp))
            .collect();

        for adapter_id in &device.adapter_ids {
            let bus = self.bus.clone();
            let updates = Arc::clone(&updates);
            let event = EventType::DeviceStateUpdate(adapter_id.clone());
            tokio::spawn(async move {
                for update in updates.iter() {
                    if let Err(e) = bus.publish(&event, update).await {
                        warn!(topic = %event, device_id = %update.device_id, error = %e, "State update not delivered");
                    }
                }
            });
        }

        device.adapter_ids.len()
    }

    // ─── Devices ───

    /// Store a new device, then link the adapters listed on it.
    ///
    /// Adapter links that fail are logged and left out; they do not fail the
    /// registration.
    pub async fn register_device(&self, mut device: Device) -> KernelResult<Device> {
        let protocol = self
            .protocol(&device.protocol)
            .ok_or_else(|| KernelError::ProtocolNotFound(device.protocol.clone()))?;
        if protocol.address_type() != device.address_type {
            return Err(KernelError::AddressTypeMismatch {
                protocol: device.protocol.clone(),
                expected: protocol.address_type(),
                actual: device.address_type,
            });
        }

        if let Some(existing) = self
            .repository
            .find_by_address(&device.address, device.address_type)
            .await?
        {
            return Err(KernelError::AddressInUse {
                address: device.address,
                address_type: device.address_type,
                device_id: existing.id,
            });
        }

        let requested = std::mem::take(&mut device.adapter_ids);
        self.repository.save(&device).await?;
        info!(device_id = %device.id, address = %device.address, name = %device.name, "Device registered");

        for adapter_id in &requested {
            if let Err(e) = self.link_adapter(&device.id, adapter_id).await {
                warn!(device_id = %device.id, adapter_id = %adapter_id, error = %e, "Failed to link adapter during registration");
            }
        }

        Ok(self.repository.find_by_id(&device.id).await?.unwrap_or(device))
    }

    /// Unlink every adapter (announcing each), then delete the device
    pub async fn unregister_device(&self, device_id: &str) -> KernelResult<()> {
        let (guard, device) = self.lock_existing(device_id).await?;

        for adapter_id in &device.adapter_ids {
            if let Err(e) = self.detach_adapter(device_id, adapter_id).await {
                warn!(device_id = %device_id, adapter_id = %adapter_id, error = %e, "Failed to unlink adapter during unregistration");
            }
        }

        self.repository.delete(device_id).await?;
        drop(guard);

        self.locks.remove(device_id);
        info!(device_id = %device_id, "Device unregistered");
        Ok(())
    }

    pub async fn link_adapter(&self, device_id: &str, adapter_id: &str) -> KernelResult<Device> {
        let (_guard, _) = self.lock_existing(device_id).await?;
        if !self.adapters.adapter_exists(adapter_id) {
            return Err(KernelError::AdapterNotFound(adapter_id.to_string()));
        }

        let device = self.repository.link_adapter(device_id, adapter_id).await?;
        self.bus
            .publish(&EventType::DeviceRegister(adapter_id.to_string()), &device)
            .await?;
        info!(device_id = %device_id, adapter_id = %adapter_id, "Adapter linked");
        Ok(device)
    }

    pub async fn unlink_adapter(&self, device_id: &str, adapter_id: &str) -> KernelResult<Device> {
        let (_guard, device) = self.lock_existing(device_id).await?;
        if !self.adapters.adapter_exists(adapter_id) {
            return Err(KernelError::AdapterNotFound(adapter_id.to_string()));
        }
        if !device.is_linked_to(adapter_id) {
            return Err(KernelError::NotLinked {
                device_id: device_id.to_string(),
                adapter_id: adapter_id.to_string(),
            });
        }

        self.detach_adapter(device_id, adapter_id).await
    }

    /// Take the lock of a stored device and return its current record.
    ///
    /// Unknown ids fail before a lock is created; a device deleted while we
    /// waited leaves no lock behind.
    async fn lock_existing(&self, device_id: &str) -> KernelResult<(OwnedMutexGuard<()>, Device)> {
        self.require_device(device_id).await?;

        let lock = self.locks.lock_for(device_id);
        let guard = Arc::clone(&lock).lock_owned().await;
        match self.repository.find_by_id(device_id).await {
            Ok(Some(device)) => Ok((guard, device)),
            result => {
                drop(guard);
                self.locks.release(device_id, lock);
                match result {
                    Err(e) => Err(e.into()),
                    _ => Err(KernelError::DeviceNotFound(device_id.to_string())),
                }
            }
        }
    }

    /// Remove the link and announce it. Caller holds the device lock.
    async fn detach_adapter(&self, device_id: &str, adapter_id: &str) -> KernelResult<Device> {
        let device = self.repository.unlink_adapter(device_id, adapter_id).await?;
        self.bus
            .publish(&EventType::DeviceUnregister(adapter_id.to_string()), &device)
            .await?;
        info!(device_id = %device_id, adapter_id = %adapter_id, "Adapter unlinked");
        Ok(device)
    }

    async fn require_device(&self, device_id: &str) -> KernelResult<Device> {
        self.repository
            .find_by_id(device_id)
            .await?
            .ok_or_else(|| KernelError::DeviceNotFound(device_id.to_string()))
    }

    pub async fn device(&self, device_id: &str) -> KernelResult<Option<Device>> {
        Ok(self.repository.find_by_id(device_id).await?)
    }

    pub async fn devices(&self) -> KernelResult<Vec<Device>> {
        Ok(self.repository.find_all().await?)
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests;
