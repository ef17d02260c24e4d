use log::{debug, warn};
use slab::Slab;

use crate::chart::{ChartEvent, ChartRecord};

/// Generation-checked reference to a record held in a [`RecordArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHandle {
    index: usize,
    generation: u64,
}

/// Result of dropping one reference.
#[derive(Debug, PartialEq, Eq)]
pub enum Release {
    Retained { remaining: usize },
    TornDown,
    Stale,
}

struct Slot {
    record: ChartRecord,
    generation: u64,
    refs: usize,
    destroy_requested: bool,
}

/// Owns every live chart record. Holders (tabs, views) keep handles and a
/// reference count; a record is evicted only when its last reference is
/// released, whether or not a destroy was requested first.
pub struct RecordArena {
    slots: Slab<Slot>,
    next_generation: u64,
    teardowns: u64,
}

impl RecordArena {
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_generation: 1,
            teardowns: 0,
        }
    }

    /// Stores `record` with one reference owned by the caller.
    pub fn insert(&mut self, record: ChartRecord) -> RecordHandle {
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.slots.insert(Slot {
            record,
            generation,
            refs: 1,
            destroy_requested: false,
        });
        RecordHandle { index, generation }
    }

    pub fn get(&self, handle: RecordHandle) -> Option<&ChartRecord> {
        self.slot(handle).map(|slot| &slot.record)
    }

    pub fn get_mut(&mut self, handle: RecordHandle) -> Option<&mut ChartRecord> {
        self.slot_mut(handle).map(|slot| &mut slot.record)
    }

    pub fn contains(&self, handle: RecordHandle) -> bool {
        self.slot(handle).is_some()
    }

    pub fn ref_count(&self, handle: RecordHandle) -> usize {
        self.slot(handle).map_or(0, |slot| slot.refs)
    }

    pub fn is_destroy_requested(&self, handle: RecordHandle) -> bool {
        self.slot(handle).is_some_and(|slot| slot.destroy_requested)
    }

    pub fn retain(&mut self, handle: RecordHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, handle: RecordHandle) -> Release {
        let Some(slot) = self.slot_mut(handle) else {
            warn!("release of stale record handle {:?}", handle);
            return Release::Stale;
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return Release::Retained {
                remaining: slot.refs,
            };
        }

        let mut slot = self.slots.remove(handle.index);
        self.teardowns += 1;
        debug!("record '{}' torn down", slot.record.name());
        slot.record.emit(ChartEvent::TornDown);
        Release::TornDown
    }

    /// Signals every observer that the record should go away. Memory is
    /// only reclaimed once all holders have released their reference.
    pub fn request_destroy(&mut self, handle: RecordHandle) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                if !slot.destroy_requested {
                    slot.destroy_requested = true;
                    slot.record.emit(ChartEvent::DestroyRequested);
                }
                true
            }
            None => false,
        }
    }

    /// Total number of records evicted over the arena's lifetime.
    pub fn teardowns(&self) -> u64 {
        self.teardowns
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, handle: RecordHandle) -> Option<&Slot> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: RecordHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
    }
}
