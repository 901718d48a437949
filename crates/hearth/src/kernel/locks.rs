use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Lazily created per-device async locks
///
/// The map lock is only held to fetch or create a device's lock, never
/// while that lock is awaited.
#[derive(Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, device_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(device_id.to_string()).or_default())
    }

    pub fn remove(&self, device_id: &str) -> bool {
        self.locks.lock().remove(device_id).is_some()
    }

    /// Drop the map entry for `lock` unless another task still holds a clone.
    ///
    /// The caller must have released its guard. Returns whether the entry
    /// was removed.
    pub fn release(&self, device_id: &str, lock: Arc<tokio::sync::Mutex<()>>) -> bool {
        let mut locks = self.locks.lock();
        // One reference in the map, one passed in
        let idle = locks
            .get(device_id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(device_id);
        }
        idle
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
