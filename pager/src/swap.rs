use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use disk::Disk;
use log::{debug, warn};

use crate::{error::PagerError, page_table::PageKey};

pub type SlotId = u32;

/// Which swap slot holds each page that has ever been flushed.
///
/// A page keeps its slot until its process is torn down. Slots given back go
/// to a free list; new ids are minted from a counter bounded by `limit`.
#[derive(Debug)]
pub struct SwapSlots {
    slots: HashMap<PageKey, SlotId>,
    free: VecDeque<SlotId>,
    next_slot: SlotId,
    limit: SlotId,
}

impl SwapSlots {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: HashMap::new(),
            free: VecDeque::new(),
            next_slot: 0,
            limit: limit as SlotId,
        }
    }

    pub fn slot_of(&self, key: &PageKey) -> Option<SlotId> {
        self.slots.get(key).copied()
    }

    /// The slot of `key`, allocating one the first time the page is flushed.
    pub fn slot_for(&mut self, key: PageKey) -> Result<SlotId, PagerError> {
        if let Some(slot) = self.slots.get(&key) {
            return Ok(*slot);
        }
        let slot = match self.free.pop_front() {
            Some(slot) => slot,
            None if self.next_slot < self.limit => {
                self.next_slot += 1;
                self.next_slot - 1
            }
            None => {
                warn!("Swap space exhausted ({} slots)", self.limit);
                return Err(PagerError::SwapFull);
            }
        };
        debug!("Page {} gets swap slot {}", key, slot);
        self.slots.insert(key, slot);
        Ok(slot)
    }

    pub fn release(&mut self, key: &PageKey) -> Option<SlotId> {
        let slot = self.slots.remove(key)?;
        self.free.push_back(slot);
        Some(slot)
    }

    #[cfg(test)]
    pub fn high_water(&self) -> SlotId {
        self.next_slot
    }

    pub fn mapped(&self) -> impl Iterator<Item = (&PageKey, &SlotId)> {
        self.slots.iter()
    }

    pub fn free_slots(&self) -> impl Iterator<Item = &SlotId> {
        self.free.iter()
    }
}

/// The swap device. Holding its guard is the blocking I/O lock: every block
/// transfer happens while the guard is alive.
#[derive(Debug)]
pub struct SwapStore<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize> {
    disk: Mutex<Disk<PAGE_SIZE, SWAP_CAPACITY>>,
}

impl<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize> SwapStore<PAGE_SIZE, SWAP_CAPACITY> {
    pub fn new(disk: &Disk<PAGE_SIZE, SWAP_CAPACITY>) -> Self {
        Self {
            disk: Mutex::new(disk.clone()),
        }
    }

    pub fn slots() -> usize {
        Disk::<PAGE_SIZE, SWAP_CAPACITY>::blocks()
    }

    pub fn lock(&self) -> MutexGuard<'_, Disk<PAGE_SIZE, SWAP_CAPACITY>> {
        self.disk.lock().unwrap()
    }

    /// Blocks until whoever holds the device finishes its transfer.
    pub fn wait_idle(&self) {
        drop(self.lock());
    }
}
