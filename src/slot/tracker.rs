//! Slot tracker
//!
//! Owns the live slots of a node. Each slot sits behind its own mutex so the
//! check-then-append in `add_state` cannot interleave with another mutation of
//! the same slot, while different slots stay independent.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::error::{Result, SlotError};
use super::state::SlotState;
use super::Slot;

/// Identity of a slot: `(storage queue, start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub storage_queue_name: String,
    pub start_message_id: u64,
    pub end_message_id: u64,
}

impl SlotKey {
    pub fn new(storage_queue_name: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            storage_queue_name: storage_queue_name.into(),
            start_message_id: start,
            end_message_id: end,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}-{}",
            self.storage_queue_name, self.start_message_id, self.end_message_id
        )
    }
}

/// Registry of live slots keyed by identity
#[derive(Default)]
pub struct SlotTracker {
    slots: DashMap<SlotKey, Arc<Mutex<Slot>>>,
}

impl SlotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `slot`. The slot must have a storage queue name.
    pub fn insert(&self, slot: Slot) -> Result<SlotKey> {
        let key = slot.key().ok_or_else(|| SlotError::MissingStorageQueue(slot.id()))?;

        match self.slots.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SlotError::Duplicate(key.to_string())),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!("Tracking slot {}", key);
                entry.insert(Arc::new(Mutex::new(slot)));
                Ok(key)
            }
        }
    }

    /// Snapshot of a tracked slot
    pub fn get(&self, key: &SlotKey) -> Option<Slot> {
        self.handle(key).map(|slot| slot.lock().clone())
    }

    pub fn contains(&self, key: &SlotKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a state under the slot's lock
    pub fn add_state(&self, key: &SlotKey, state: SlotState) -> Result<()> {
        self.update(key, |slot| slot.add_state(state))
    }

    pub fn mark_overlapping(&self, key: &SlotKey) -> Result<()> {
        self.update(key, Slot::mark_overlapping)
    }

    pub fn deactivate(&self, key: &SlotKey) -> Result<()> {
        self.update(key, |slot| {
            slot.set_inactive();
            Ok(())
        })
    }

    /// Run `f` with exclusive access to the slot.
    ///
    /// Changing the slot's identity from inside `f` is not supported; the
    /// slot stays under the key it was inserted with.
    pub fn update<T>(&self, key: &SlotKey, f: impl FnOnce(&mut Slot) -> Result<T>) -> Result<T> {
        let slot = self
            .handle(key)
            .ok_or_else(|| SlotError::NotFound(key.to_string()))?;
        let mut guard = slot.lock();
        f(&mut *guard)
    }

    pub fn remove(&self, key: &SlotKey) -> Option<Slot> {
        self.slots
            .remove(key)
            .map(|(_, slot)| slot.lock().clone())
    }

    /// Remove every slot marked inactive and return them
    pub fn collect_inactive(&self) -> Vec<Slot> {
        let inactive: Vec<SlotKey> = self
            .slots
            .iter()
            .filter(|entry| !entry.value().lock().is_active())
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<Slot> = inactive.iter().filter_map(|key| self.remove(key)).collect();
        if !removed.is_empty() {
            info!("Removed {} inactive slots", removed.len());
        }
        removed
    }

    /// Slots of one storage queue, ordered by start message ID
    pub fn slots_for_queue(&self, storage_queue_name: &str) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self
            .slots
            .iter()
            .filter(|entry| entry.key().storage_queue_name == storage_queue_name)
            .map(|entry| entry.value().lock().clone())
            .collect();
        slots.sort_by(Slot::compare_by_start);
        slots
    }

    fn handle(&self, key: &SlotKey) -> Option<Arc<Mutex<Slot>>> {
        // Clone the Arc so the shard lock is released before the slot lock is taken
        self.slots.get(key).map(|entry| entry.value().clone())
    }
}
