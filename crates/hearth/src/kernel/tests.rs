use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use hearth_types::{AddressType, CapabilityType, CapabilityValue};
use tokio::sync::mpsc;

use super::*;
use crate::protocol::{BthomeProtocol, JsonProtocol};
use crate::repository::{MemoryDeviceRepository, RepositoryError, RepositoryResult};

/// Fixed set of adapters standing in for the live registry
#[derive(Default)]
struct StaticAdapters(RwLock<HashSet<String>>);

impl StaticAdapters {
    fn with(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self(RwLock::new(ids.iter().map(|s| s.to_string()).collect())))
    }
}

impl AdapterDirectory for StaticAdapters {
    fn adapter_exists(&self, adapter_id: &str) -> bool {
        self.0.read().contains(adapter_id)
    }
}

struct Setup {
    bus: EventBus,
    repository: Arc<MemoryDeviceRepository>,
    kernel: Arc<Kernel>,
}

fn setup(adapters: &[&str]) -> Setup {
    let bus = EventBus::in_memory();
    let repository = Arc::new(MemoryDeviceRepository::new());
    let kernel = Kernel::new(bus.clone(), repository.clone(), StaticAdapters::with(adapters));
    kernel.register_protocol(Arc::new(BthomeProtocol::new()));
    kernel.register_protocol(Arc::new(JsonProtocol));
    Setup {
        bus,
        repository,
        kernel,
    }
}

/// Forward every payload on `event` into a channel
async fn collect<T>(bus: &EventBus, event: EventType) -> mpsc::UnboundedReceiver<T>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(&event, move |payload: T| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
        }
    })
    .await
    .unwrap();
    rx
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

async fn assert_silent<T>(rx: &mut mpsc::UnboundedReceiver<T>) {
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err(), "unexpected event");
}

fn json_reading(address: &str, body: &str) -> RawReading {
    RawReading::new(address, AddressType::Basic, body.as_bytes().to_vec())
}

// BTHome v2, unencrypted, packet id `pid`, temperature 21.50 °C
fn bthome_reading(address: &str, pid: u8) -> RawReading {
    RawReading::new(address, AddressType::Ble, vec![0x40, 0x00, pid, 0x02, 0x66, 0x08])
}

// ─── Protocols ───

#[test]
fn test_protocol_listing() {
    let s = setup(&[]);
    let ids: Vec<String> = s.kernel.protocols().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["bthome", "http"]);
    assert!(s.kernel.protocol("bthome").is_some());
    assert!(s.kernel.protocol("zigbee").is_none());
}

// ─── Registration ───

#[tokio::test]
async fn test_register_links_requested_adapters() {
    let s = setup(&["homekit"]);
    let mut registered = collect::<Device>(&s.bus, EventType::DeviceRegister("homekit".into())).await;

    let device = Device::new("AA:BB", AddressType::Ble, "Kitchen", "bthome")
        .with_adapter("homekit")
        .with_adapter("ghost");
    let stored = s.kernel.register_device(device).await.unwrap();

    // "ghost" is not connected, so only homekit is linked
    assert_eq!(stored.adapter_ids.len(), 1);
    assert!(stored.is_linked_to("homekit"));

    let announced = next(&mut registered).await;
    assert_eq!(announced.id, stored.id);
}

#[tokio::test]
async fn test_register_validates_protocol() {
    let s = setup(&[]);

    let err = s
        .kernel
        .register_device(Device::new("AA:BB", AddressType::Ble, "X", "zigbee"))
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::ProtocolNotFound(_)));

    let err = s
        .kernel
        .register_device(Device::new("AA:BB", AddressType::Basic, "X", "bthome"))
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::AddressTypeMismatch { .. }));
}

#[tokio::test]
async fn test_register_rejects_taken_address() {
    let s = setup(&[]);
    s.kernel
        .register_device(Device::new("AA:BB", AddressType::Ble, "One", "bthome"))
        .await
        .unwrap();

    let err = s
        .kernel
        .register_device(Device::new("AA:BB", AddressType::Ble, "Two", "bthome"))
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::AddressInUse { .. }));
    assert_eq!(s.kernel.devices().await.unwrap().len(), 1);
}

// ─── Link / Unlink ───

#[tokio::test]
async fn test_link_to_missing_adapter_leaves_device_untouched() {
    let s = setup(&["homekit"]);
    let device = s
        .kernel
        .register_device(Device::new("AA:BB", AddressType::Ble, "Kitchen", "bthome"))
        .await
        .unwrap();

    let err = s.kernel.link_adapter(&device.id, "nope").await.unwrap_err();
    assert!(matches!(err, KernelError::AdapterNotFound(_)));

    let stored = s.kernel.device(&device.id).await.unwrap().unwrap();
    assert!(stored.adapter_ids.is_empty());

    let err = s.kernel.link_adapter("missing", "homekit").await.unwrap_err();
    assert!(matches!(err, KernelError::DeviceNotFound(_)));
}

#[tokio::test]
async fn test_unlink_then_unregister_announces_once_per_adapter() {
    let s = setup(&["homekit", "mqtt", "idle"]);
    let mut homekit = collect::<Device>(&s.bus, EventType::DeviceUnregister("homekit".into())).await;
    let mut mqtt = collect::<Device>(&s.bus, EventType::DeviceUnregister("mqtt".into())).await;
    let mut idle = collect::<Device>(&s.bus, EventType::DeviceUnregister("idle".into())).await;

    let device = s
        .kernel
        .register_device(
            Device::new("AA:BB", AddressType::Ble, "Kitchen", "bthome")
                .with_adapter("homekit")
                .with_adapter("mqtt"),
        )
        .await
        .unwrap();

    let after = s.kernel.unlink_adapter(&device.id, "homekit").await.unwrap();
    assert!(!after.is_linked_to("homekit"));

    let err = s.kernel.unlink_adapter(&device.id, "idle").await.unwrap_err();
    assert!(matches!(err, KernelError::NotLinked { .. }));

    s.kernel.unregister_device(&device.id).await.unwrap();

    next(&mut homekit).await;
    next(&mut mqtt).await;
    assert_silent(&mut homekit).await;
    assert_silent(&mut mqtt).await;
    assert_silent(&mut idle).await;

    assert!(s.kernel.device(&device.id).await.unwrap().is_none());
    assert!(s.kernel.locks().is_empty());
}

#[tokio::test]
async fn test_unregister_unknown_device() {
    let s = setup(&[]);
    let err = s.kernel.unregister_device("missing").await.unwrap_err();
    assert!(matches!(err, KernelError::DeviceNotFound(_)));
    assert!(s.kernel.locks().is_empty());
}

#[tokio::test]
async fn test_operations_on_unknown_devices_leave_no_locks() {
    let s = setup(&["homekit"]);

    for i in 0..50 {
        let unregister = s.kernel.unregister_device(&format!("gone-{i}")).await;
        assert!(matches!(unregister, Err(KernelError::DeviceNotFound(_))));

        let link = s.kernel.link_adapter(&format!("link-{i}"), "homekit").await;
        assert!(matches!(link, Err(KernelError::DeviceNotFound(_))));

        let unlink = s.kernel.unlink_adapter(&format!("unlink-{i}"), "homekit").await;
        assert!(matches!(unlink, Err(KernelError::DeviceNotFound(_))));
    }

    assert!(s.kernel.locks().is_empty());
}

// ─── Pipeline ───

#[tokio::test]
async fn test_reading_updates_device_and_linked_adapter() {
    let s = setup(&["homekit"]);
    let mut updates =
        collect::<DeviceStateUpdate>(&s.bus, EventType::DeviceStateUpdate("homekit".into())).await;

    let device = s
        .kernel
        .register_device(
            Device::new("AA:BB", AddressType::Ble, "Kitchen", "bthome").with_adapter("homekit"),
        )
        .await
        .unwrap();

    let reading = bthome_reading("AA:BB", 1);
    let timestamp = reading.timestamp;
    let outcome = s.kernel.process_reading(reading).await;
    assert_eq!(
        outcome,
        ReadingOutcome::Applied {
            device_id: device.id.clone(),
            capabilities: 1,
            adapters: 1,
        }
    );

    let update = next(&mut updates).await;
    assert_eq!(update.device_id, device.id);
    assert_eq!(update.name, "Kitchen");
    assert_eq!(update.capability_type.as_str(), CapabilityType::TEMPERATURE);
    assert_eq!(update.value, CapabilityValue::Float(21.5));

    let stored = s.kernel.device(&device.id).await.unwrap().unwrap();
    assert_eq!(
        stored.capability(CapabilityType::TEMPERATURE).unwrap().value,
        CapabilityValue::Float(21.5)
    );
    assert_eq!(stored.last_updated, timestamp);
}

#[tokio::test]
async fn test_duplicate_packet_publishes_nothing() {
    let s = setup(&["homekit"]);
    let mut updates =
        collect::<DeviceStateUpdate>(&s.bus, EventType::DeviceStateUpdate("homekit".into())).await;
    s.kernel
        .register_device(
            Device::new("AA:BB", AddressType::Ble, "Kitchen", "bthome").with_adapter("homekit"),
        )
        .await
        .unwrap();

    assert!(matches!(
        s.kernel.process_reading(bthome_reading("AA:BB", 9)).await,
        ReadingOutcome::Applied { .. }
    ));
    assert_eq!(
        s.kernel.process_reading(bthome_reading("AA:BB", 9)).await,
        ReadingOutcome::Duplicate
    );

    next(&mut updates).await;
    assert_silent(&mut updates).await;
}

#[tokio::test]
async fn test_readings_merge_instead_of_replace() {
    let s = setup(&[]);
    let device = s
        .kernel
        .register_device(Device::new("porch", AddressType::Basic, "Porch", "http"))
        .await
        .unwrap();

    s.kernel
        .process_reading(json_reading("porch", r#"[{"name":"temperature","value":19.5}]"#))
        .await;
    s.kernel
        .process_reading(json_reading("porch", r#"[{"name":"humidity","value":61.0}]"#))
        .await;

    let stored = s.kernel.device(&device.id).await.unwrap().unwrap();
    assert_eq!(stored.capabilities.len(), 2);
    assert!(stored.capability(CapabilityType::TEMPERATURE).is_some());
    assert!(stored.capability(CapabilityType::HUMIDITY).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_merges_lose_nothing() {
    let s = setup(&[]);
    let device = s
        .kernel
        .register_device(Device::new("porch", AddressType::Basic, "Porch", "http"))
        .await
        .unwrap();

    let readings = (0..32).map(|i| {
        let kernel = Arc::clone(&s.kernel);
        let body = format!(r#"[{{"name":"sensor_{i}","value":{i}}}]"#);
        tokio::spawn(async move { kernel.process_reading(json_reading("porch", &body)).await })
    });
    for outcome in futures::future::join_all(readings).await {
        assert!(matches!(outcome.unwrap(), ReadingOutcome::Applied { .. }));
    }

    let stored = s.kernel.device(&device.id).await.unwrap().unwrap();
    assert_eq!(stored.capabilities.len(), 32);
    assert_eq!(s.kernel.locks().len(), 1);
}

#[tokio::test]
async fn test_unusable_readings_are_dropped() {
    let s = setup(&[]);
    s.kernel
        .register_device(Device::new("porch", AddressType::Basic, "Porch", "http"))
        .await
        .unwrap();

    assert_eq!(
        s.kernel.process_reading(json_reading("garage", "[]")).await,
        ReadingOutcome::UnknownDevice
    );
    // Same address, different address type
    assert_eq!(
        s.kernel
            .process_reading(RawReading::new("porch", AddressType::Ble, b"[]".to_vec()))
            .await,
        ReadingOutcome::UnknownDevice
    );
    assert_eq!(
        s.kernel.process_reading(json_reading("porch", "not json")).await,
        ReadingOutcome::DecodeFailed
    );
}

#[tokio::test]
async fn test_device_with_unregistered_protocol_never_updates() {
    let s = setup(&[]);
    // Written straight to the repository, bypassing protocol validation
    let device = Device::new("AA:BB", AddressType::Ble, "Orphan", "zigbee");
    s.repository.save(&device).await.unwrap();

    assert_eq!(
        s.kernel.process_reading(bthome_reading("AA:BB", 1)).await,
        ReadingOutcome::ProtocolMissing
    );
    let stored = s.kernel.device(&device.id).await.unwrap().unwrap();
    assert!(stored.capabilities.is_empty());
}

#[tokio::test]
async fn test_readings_arrive_over_the_bus() {
    let s = setup(&[]);
    s.kernel.attach().await.unwrap();
    let device = s
        .kernel
        .register_device(Device::new("porch", AddressType::Basic, "Porch", "http"))
        .await
        .unwrap();

    s.bus
        .publish(
            &EventType::RawReading,
            &json_reading("porch", r#"[{"name":"battery_level","value":77}]"#),
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let stored = s.kernel.device(&device.id).await.unwrap().unwrap();
            if stored.capability(CapabilityType::BATTERY_LEVEL).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

// ─── Stale Lookups ───

/// Address index that still answers for a device whose record is gone
struct StaleAddressIndex {
    ghost: Device,
    inner: MemoryDeviceRepository,
}

#[async_trait]
impl DeviceRepository for StaleAddressIndex {
    async fn save(&self, device: &Device) -> RepositoryResult<()> {
        self.inner.save(device).await
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Device>> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self) -> RepositoryResult<Vec<Device>> {
        self.inner.find_all().await
    }

    async fn find_by_address(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> RepositoryResult<Option<Device>> {
        if address == self.ghost.address && address_type == self.ghost.address_type {
            return Ok(Some(self.ghost.clone()));
        }
        self.inner.find_by_address(address, address_type).await
    }

    async fn link_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device> {
        self.inner.link_adapter(device_id, adapter_id).await
    }

    async fn unlink_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device> {
        self.inner.unlink_adapter(device_id, adapter_id).await
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_reading_for_deleted_device_leaves_no_lock() {
    let repository = Arc::new(StaleAddressIndex {
        ghost: Device::new("porch", AddressType::Basic, "Porch", "http"),
        inner: MemoryDeviceRepository::new(),
    });
    let kernel = Kernel::new(EventBus::in_memory(), repository, StaticAdapters::with(&[]));
    kernel.register_protocol(Arc::new(JsonProtocol));

    let outcome = kernel
        .process_reading(json_reading("porch", r#"[{"name":"temperature","value":20.0}]"#))
        .await;
    assert_eq!(outcome, ReadingOutcome::DeviceRemoved);
    assert!(kernel.locks().is_empty());
}

// ─── Persistence Failures ───

/// Repository whose saves fail once devices exist
struct FailingSaves {
    inner: MemoryDeviceRepository,
    fail: RwLock<bool>,
}

#[async_trait]
impl DeviceRepository for FailingSaves {
    async fn save(&self, device: &Device) -> RepositoryResult<()> {
        if *self.fail.read() {
            return Err(RepositoryError::Database("disk full".into()));
        }
        self.inner.save(device).await
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Device>> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(&self) -> RepositoryResult<Vec<Device>> {
        self.inner.find_all().await
    }

    async fn find_by_address(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> RepositoryResult<Option<Device>> {
        self.inner.find_by_address(address, address_type).await
    }

    async fn link_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device> {
        self.inner.link_adapter(device_id, adapter_id).await
    }

    async fn unlink_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device> {
        self.inner.unlink_adapter(device_id, adapter_id).await
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_save_failure_still_fans_out() {
    let bus = EventBus::in_memory();
    let repository = Arc::new(FailingSaves {
        inner: MemoryDeviceRepository::new(),
        fail: RwLock::new(false),
    });
    let kernel = Kernel::new(bus.clone(), repository.clone(), StaticAdapters::with(&["homekit"]));
    kernel.register_protocol(Arc::new(JsonProtocol));
    let mut updates =
        collect::<DeviceStateUpdate>(&bus, EventType::DeviceStateUpdate("homekit".into())).await;

    kernel
        .register_device(
            Device::new("porch", AddressType::Basic, "Porch", "http").with_adapter("homekit"),
        )
        .await
        .unwrap();
    *repository.fail.write() = true;

    let outcome = kernel
        .process_reading(json_reading("porch", r#"[{"name":"temperature","value":20.0}]"#))
        .await;
    assert!(matches!(outcome, ReadingOutcome::Applied { adapters: 1, .. }));
    assert_eq!(next(&mut updates).await.value, CapabilityValue::Float(20.0));
}

#[test]
fn test_registry_is_an_adapter_directory() {
    fn assert_directory<T: AdapterDirectory>() {}
    assert_directory::<crate::registry::PluginRegistry>();
}
