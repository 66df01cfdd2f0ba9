use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    error::PagerError,
    eviction::{select_victim, EvictionTier, Victim},
    frame_pool::FramePool,
    page_table::{FrameNumber, PageKey, PageTable, ProcessId, TranslationEntry},
    registry::ResidencyRegistry,
    swap::{SlotId, SwapSlots},
    tlb::Tlb,
};

/// A frame taken from a resident page. If `flush` is set, the frame holds
/// the only up-to-date copy of that page and must be written to the slot
/// before the frame is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Eviction {
    pub frame: FrameNumber,
    pub flush: Option<(PageKey, SlotId)>,
}

/// All paging metadata shared by every process. Only reachable through the
/// atomic section.
#[derive(Debug)]
pub(crate) struct PagerState {
    pub frames: FramePool,
    pub registry: ResidencyRegistry,
    pub slots: SwapSlots,
    pub tables: HashMap<ProcessId, PageTable>,
    /// Pages whose contents are on their way between a frame and swap.
    pub in_transit: HashSet<PageKey>,
    /// Frames held outside the section for a transfer. Each one comes back
    /// resident or free once its transfer is done.
    pub in_flight: usize,
    /// Frames handed out by `Pager::acquire_frame`.
    pub lent: HashSet<FrameNumber>,
    pub tlb: Tlb,
    next_pid: ProcessId,
}

impl PagerState {
    pub fn new(frames: FramePool, slots: SwapSlots, tlb: Tlb) -> Self {
        Self {
            frames,
            registry: ResidencyRegistry::new(),
            slots,
            tables: HashMap::new(),
            in_transit: HashSet::new(),
            in_flight: 0,
            lent: HashSet::new(),
            tlb,
            next_pid: 1,
        }
    }

    pub fn create_table(&mut self, page_count: usize) -> ProcessId {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.tables.insert(pid, PageTable::init(page_count));
        pid
    }

    pub fn table(&self, pid: ProcessId) -> Result<&PageTable, PagerError> {
        self.tables.get(&pid).ok_or(PagerError::NoSuchProcess(pid))
    }

    pub fn entry(&self, key: PageKey) -> Result<&TranslationEntry, PagerError> {
        self.table(key.pid)?
            .get_entry(key.vpn)
            .ok_or(PagerError::InvalidRange)
    }

    pub fn entry_mut(&mut self, key: PageKey) -> Result<&mut TranslationEntry, PagerError> {
        self.tables
            .get_mut(&key.pid)
            .ok_or(PagerError::NoSuchProcess(key.pid))?
            .get_entry_mut(key.vpn)
            .ok_or(PagerError::InvalidRange)
    }

    /// Runs the tier scan. When every resident page is used and dirty, all
    /// used bits are cleared before the last page is handed back.
    pub fn choose_victim(&mut self) -> Option<Victim> {
        let tables = &self.tables;
        let victim = select_victim(self.registry.iter().filter_map(|key| {
            let entry = tables.get(&key.pid)?.get_entry(key.vpn)?;
            Some((*key, entry))
        }))?;

        if victim.tier == EvictionTier::SecondChance {
            for key in self.registry.iter() {
                if let Some(entry) = self
                    .tables
                    .get_mut(&key.pid)
                    .and_then(|t| t.get_entry_mut(key.vpn))
                {
                    entry.used = false;
                }
            }
        }
        Some(victim)
    }

    /// Takes the frame of a resident page. Dirty victims get a swap slot and
    /// are marked in transit until the caller has flushed them.
    pub fn evict(&mut self) -> Result<Eviction, PagerError> {
        let victim = self.choose_victim().ok_or(PagerError::OutOfMemory)?;
        let key = victim.key;
        let entry = *self.entry(key)?;
        let flush = if entry.dirty {
            Some((key, self.slots.slot_for(key)?))
        } else {
            None
        };

        self.registry.remove(&key);
        self.entry_mut(key)?.invalidate();
        self.tlb.invalidate(&key);
        if flush.is_some() {
            self.in_transit.insert(key);
        }
        debug!(
            "Evicting {} from frame {} ({:?}, {})",
            key,
            entry.ppn,
            victim.tier,
            if flush.is_some() { "flush" } else { "drop" }
        );
        Ok(Eviction {
            frame: entry.ppn,
            flush,
        })
    }

    /// Gives a frame back to the page it was taken from after a failed flush.
    /// If the page is gone, or was unmapped and bound again meanwhile, the
    /// frame returns to the pool.
    pub fn restore_resident(&mut self, key: PageKey, frame: FrameNumber) {
        match self.entry_mut(key) {
            Ok(entry) if !entry.valid => {
                entry.ppn = frame;
                entry.valid = true;
                self.registry.insert(key);
            }
            _ => self.frames.release_frame(frame),
        }
    }

    /// Marks a freshly filled frame as the resident copy of `key`. A page
    /// that was bound again while loading keeps its new frame.
    pub fn finish_swap_in(&mut self, key: PageKey, frame: FrameNumber) -> Result<(), PagerError> {
        match self.entry_mut(key) {
            Ok(entry) if !entry.valid => {
                entry.swapped_in(frame);
                self.registry.insert(key);
                Ok(())
            }
            Ok(_) => {
                self.frames.release_frame(frame);
                Ok(())
            }
            Err(err) => {
                self.frames.release_frame(frame);
                Err(err)
            }
        }
    }

    /// Unmaps pages of `pid`, returning their frames and slots.
    pub fn discard_pages(&mut self, pid: ProcessId, vpns: impl IntoIterator<Item = u32>) {
        for vpn in vpns {
            let key = PageKey::new(pid, vpn);
            let Some(entry) = self.tables.get_mut(&pid).and_then(|t| t.unmap_page(vpn)) else {
                continue;
            };
            self.forget(key, &entry);
        }
    }

    /// Destroys the page table of `pid`. Returns how many pages it had.
    pub fn release_process(&mut self, pid: ProcessId) -> Result<usize, PagerError> {
        let table = self
            .tables
            .remove(&pid)
            .ok_or(PagerError::NoSuchProcess(pid))?;
        let mut pages = 0;
        for entry in table.iter() {
            self.forget(PageKey::new(pid, entry.vpn), entry);
            pages += 1;
        }
        self.tlb.invalidate_process(pid);
        Ok(pages)
    }

    fn forget(&mut self, key: PageKey, entry: &TranslationEntry) {
        self.registry.remove(&key);
        self.tlb.invalidate(&key);
        if entry.valid {
            self.frames.release_frame(entry.ppn);
        }
        self.slots.release(&key);
    }
}
