// Device store backed by a redb file
//
// Records are JSON-encoded under their device id. Address lookups scan the
// table, which stays small (one row per registered device).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_types::{AddressType, Device};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::info;

use super::{DeviceRepository, RepositoryError, RepositoryResult, sort_devices};

// Table definition: key is the device id, value is the JSON record
const DEVICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

fn db_error(e: impl Into<redb::Error>) -> RepositoryError {
    RepositoryError::Database(e.into().to_string())
}

pub struct RedbDeviceRepository {
    db: Arc<Database>,
}

impl RedbDeviceRepository {
    /// Open (or create) the database file and make sure the table exists
    pub fn open(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path).map_err(db_error)?;

        let write_txn = db.begin_write().map_err(db_error)?;
        write_txn.open_table(DEVICES_TABLE).map_err(db_error)?;
        write_txn.commit().map_err(db_error)?;

        info!(path = %path.display(), "Device database opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Run a database closure off the async runtime
    async fn blocking<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> RepositoryResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| RepositoryError::Database(format!("blocking task failed: {e}")))?
    }

    async fn update<F>(&self, device_id: &str, apply: F) -> RepositoryResult<Device>
    where
        F: FnOnce(&mut Device) + Send + 'static,
    {
        let device_id = device_id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(db_error)?;
            let device = {
                let mut table = write_txn.open_table(DEVICES_TABLE).map_err(db_error)?;
                let existing = table
                    .get(device_id.as_str())
                    .map_err(db_error)?
                    .map(|guard| guard.value().to_vec())
                    .ok_or_else(|| RepositoryError::NotFound(device_id.clone()))?;

                let mut device: Device = serde_json::from_slice(&existing)?;
                apply(&mut device);
                let bytes = serde_json::to_vec(&device)?;
                table
                    .insert(device_id.as_str(), bytes.as_slice())
                    .map_err(db_error)?;
                device
            };
            write_txn.commit().map_err(db_error)?;
            Ok(device)
        })
        .await
    }
}

fn read_all(db: &Database) -> RepositoryResult<Vec<Device>> {
    let read_txn = db.begin_read().map_err(db_error)?;
    let table = read_txn.open_table(DEVICES_TABLE).map_err(db_error)?;

    let mut devices = Vec::new();
    for entry in table.iter().map_err(db_error)? {
        let (_, value) = entry.map_err(db_error)?;
        devices.push(serde_json::from_slice(value.value())?);
    }
    Ok(devices)
}

#[async_trait]
impl DeviceRepository for RedbDeviceRepository {
    async fn save(&self, device: &Device) -> RepositoryResult<()> {
        let id = device.id.clone();
        let bytes = serde_json::to_vec(device)?;
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(db_error)?;
            {
                let mut table = write_txn.open_table(DEVICES_TABLE).map_err(db_error)?;
                table
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(db_error)?;
            }
            write_txn.commit().map_err(db_error)?;
            Ok(())
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Option<Device>> {
        let id = id.to_string();
        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(db_error)?;
            let table = read_txn.open_table(DEVICES_TABLE).map_err(db_error)?;
            match table.get(id.as_str()).map_err(db_error)? {
                Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_all(&self) -> RepositoryResult<Vec<Device>> {
        let mut devices = self.blocking(read_all).await?;
        sort_devices(&mut devices);
        Ok(devices)
    }

    async fn find_by_address(
        &self,
        address: &str,
        address_type: AddressType,
    ) -> RepositoryResult<Option<Device>> {
        let address = address.to_string();
        self.blocking(move |db| {
            Ok(read_all(db)?
                .into_iter()
                .find(|d| d.address == address && d.address_type == address_type))
        })
        .await
    }

    async fn link_adapter(&self, device_id: &str, adapter_id: &str) -> RepositoryResult<Device> {
        let adapter_id = adapter_id.to_string();
        self.update(device_id, move |device| {
            device.adapter_ids.insert(adapter_id);
        })
        .await
    }

    async fn unlink_adapter(
        &self,
        device_id: &str,
        adapter_id: &str,
    ) -> RepositoryResult<Device> {
        let adapter_id = adapter_id.to_string();
        self.update(device_id, move |device| {
            device.adapter_ids.remove(&adapter_id);
        })
        .await
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        let id = id.to_string();
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(db_error)?;
            let removed = {
                let mut table = write_txn.open_table(DEVICES_TABLE).map_err(db_error)?;
                table.remove(id.as_str()).map_err(db_error)?.is_some()
            };
            write_txn.commit().map_err(db_error)?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redb_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RedbDeviceRepository::open(dir.path().join("devices.redb")).unwrap();
        crate::repository::tests::exercise(&repo).await;
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("devices.redb");
        let device = Device::new("AA:BB", AddressType::Ble, "Kitchen", "bthome");

        {
            let repo = RedbDeviceRepository::open(&path).unwrap();
            repo.save(&device).await.unwrap();
            repo.link_adapter(&device.id, "homekit").await.unwrap();
        }

        let repo = RedbDeviceRepository::open(&path).unwrap();
        let stored = repo.find_by_id(&device.id).await.unwrap().unwrap();
        assert!(stored.is_linked_to("homekit"));
    }
}
