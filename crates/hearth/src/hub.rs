//! Hub assembly
//!
//! Wires the registry and the kernel onto one bus with the built-in
//! protocols registered.

use std::sync::Arc;
use std::time::Duration;

use hearth_bus::{BusResult, EventBus};
use tracing::info;

use crate::config::HubConfig;
use crate::kernel::Kernel;
use crate::protocol::{BthomeProtocol, JsonProtocol, SwitchbotProtocol};
use crate::registry::PluginRegistry;
use crate::repository::{
    DeviceRepository, MemoryDeviceRepository, RedbDeviceRepository, RepositoryResult,
};

pub struct Hub {
    bus: EventBus,
    registry: Arc<PluginRegistry>,
    kernel: Arc<Kernel>,
}

impl Hub {
    /// Build the registry and kernel and subscribe both to the bus
    pub async fn start(
        bus: EventBus,
        repository: Arc<dyn DeviceRepository>,
        command_timeout: Duration,
    ) -> BusResult<Self> {
        let registry = PluginRegistry::new(bus.clone(), command_timeout);
        let kernel = Kernel::new(bus.clone(), repository, registry.clone());
        kernel.register_protocol(Arc::new(JsonProtocol));
        kernel.register_protocol(Arc::new(BthomeProtocol::new()));
        kernel.register_protocol(Arc::new(SwitchbotProtocol::new()));

        registry.attach().await?;
        kernel.attach().await?;

        info!(
            transport = bus.transport_name(),
            protocols = kernel.protocols().len(),
            "Hub started"
        );
        Ok(Self {
            bus,
            registry,
            kernel,
        })
    }

    /// Open the device store selected by `database_path`
    pub fn open_repository(config: &HubConfig) -> RepositoryResult<Arc<dyn DeviceRepository>> {
        if config.uses_memory_store() {
            info!("Using in-memory device store");
            return Ok(Arc::new(MemoryDeviceRepository::new()));
        }
        info!(path = %config.database_path, "Opening device store");
        Ok(Arc::new(RedbDeviceRepository::open(&config.database_path)?))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Stop handling bus traffic
    pub fn shutdown(&self) {
        self.kernel.detach();
        self.registry.detach();
        info!("Hub stopped");
    }
}
