use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-room async locks, created on first use and pruned once nobody holds
/// or waits on them.
///
/// Serializes read-modify-write sequences against the store for one room
/// code within this process. Other processes sharing the store are not
/// coordinated; across processes the store stays last-write-wins.
#[derive(Default)]
pub struct RoomLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub struct RoomLockGuard<'a> {
    registry: &'a RoomLocks,
    room_code: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RoomLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> StdMutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn lock(&self, room_code: &str) -> RoomLockGuard<'_> {
        let lock = {
            let mut table = self.table();
            Arc::clone(table.entry(room_code.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        RoomLockGuard {
            registry: self,
            room_code: room_code.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of rooms with a live lock entry.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RoomLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.registry.table();
        if let Some(lock) = table.get(&self.room_code)
            && Arc::strong_count(lock) == 1
        {
            table.remove(&self.room_code);
        }
    }
}
