//! Per-instance mutual exclusion.
//!
//! Mutating operations on one instance id run one at a time; different ids
//! proceed in parallel. Slots are created on demand and dropped once nobody
//! holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct InstanceLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Held for the duration of one operation on an instance.
pub struct InstanceGuard<'a> {
    locks: &'a InstanceLocks,
    instance_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, instance_id: &str) -> InstanceGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(instance_id.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        InstanceGuard {
            locks: self,
            instance_id: instance_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of instance ids with a live slot.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: no holder, no waiters.
        if slots
            .get(&self.instance_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.instance_id);
        }
    }
}
