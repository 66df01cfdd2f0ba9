//! Demand paging for processes on a machine with a software-managed TLB.
//!
//! A [`Pager`] owns every piece of shared paging state: the pool of free
//! physical frames, the per-process page tables, the registry of resident
//! pages that eviction scans, the swap slot map and the TLB. Pages are bound
//! to frames when a process asks for them, evicted with a second-chance
//! policy when frames run out, and brought back from the swap device on the
//! next access.

pub mod error;
pub mod eviction;
pub mod frame_pool;
pub mod page_table;
pub mod registry;
pub mod swap;
pub mod sync;
pub mod tlb;

mod access;
mod fault;
mod state;


use std::{collections::HashSet, sync::MutexGuard};

use disk::Disk;
use log::info;
use memory::PhysicalMemory;

pub use error::PagerError;
pub use page_table::{FrameNumber, PageKey, ProcessId, TranslationEntry};
pub use swap::SlotId;
pub use tlb::{TlbEntry, TlbPolicy};

use frame_pool::FramePool;
use state::PagerState;
use swap::{SwapSlots, SwapStore};
use sync::AtomicSection;
use tlb::Tlb;

type StateGuard<'a> = MutexGuard<'a, PagerState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    pub tlb_size: usize,
    pub tlb_policy: TlbPolicy,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            tlb_size: 4,
            tlb_policy: TlbPolicy::Random,
        }
    }
}

/// Where the allocated pages of one process currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCounts {
    pub resident: usize,
    /// Evicted, with a copy in swap.
    pub swapped: usize,
    /// Neither resident nor ever written to swap.
    pub untouched: usize,
    pub total: usize,
}

pub struct Pager<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize, const MEMORY_CAPACITY: usize>
{
    memory: PhysicalMemory<MEMORY_CAPACITY>,
    swap: SwapStore<PAGE_SIZE, SWAP_CAPACITY>,
    state: AtomicSection<PagerState>,
}

impl<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize, const MEMORY_CAPACITY: usize>
    Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>
{
    /// Builds a pager over `memory` and the swap `disk`. Only the frames in
    /// `free_frames` are ever handed to processes; each must lie inside
    /// memory and appear once.
    pub fn new(
        memory: &PhysicalMemory<MEMORY_CAPACITY>,
        disk: &Disk<PAGE_SIZE, SWAP_CAPACITY>,
        free_frames: impl IntoIterator<Item = FrameNumber>,
        config: PagerConfig,
    ) -> Result<Self, PagerError> {
        assert_eq!(
            MEMORY_CAPACITY % PAGE_SIZE,
            0,
            "Memory capacity must be a multiply of the page size"
        );
        let frames: Vec<FrameNumber> = free_frames.into_iter().collect();
        let mut seen = HashSet::new();
        if frames
            .iter()
            .any(|&f| f as usize >= Self::frames() || !seen.insert(f))
        {
            return Err(PagerError::InvalidRange);
        }
        info!(
            "Pager up: {} free frames of {}, {} swap slots, {} TLB slots ({:?})",
            frames.len(),
            Self::frames(),
            SwapStore::<PAGE_SIZE, SWAP_CAPACITY>::slots(),
            config.tlb_size,
            config.tlb_policy
        );
        let state = PagerState::new(
            FramePool::init(frames),
            SwapSlots::new(SwapStore::<PAGE_SIZE, SWAP_CAPACITY>::slots()),
            Tlb::new(config.tlb_size, config.tlb_policy.build()),
        );
        Ok(Self {
            memory: memory.clone(),
            swap: SwapStore::new(disk),
            state: AtomicSection::new(state),
        })
    }

    /// Number of frames physical memory is divided into.
    pub const fn frames() -> usize {
        MEMORY_CAPACITY / PAGE_SIZE
    }

    /// Creates an empty page table with `page_count` slots.
    pub fn create_process(&self, page_count: usize) -> ProcessId {
        let pid = self.state.enter().create_table(page_count);
        info!("Process {} created with {} page slots", pid, page_count);
        pid
    }

    pub fn entry(&self, pid: ProcessId, vpn: u32) -> Option<TranslationEntry> {
        self.state.enter().entry(PageKey::new(pid, vpn)).ok().copied()
    }

    /// Resident pages in eviction scan order.
    pub fn resident_pages(&self) -> Vec<(PageKey, TranslationEntry)> {
        let state = self.state.enter();
        state
            .registry
            .iter()
            .filter_map(|key| Some((*key, *state.entry(*key).ok()?)))
            .collect()
    }

    pub fn swap_slots(&self) -> Vec<(PageKey, SlotId)> {
        let mut slots: Vec<(PageKey, SlotId)> = self
            .state
            .enter()
            .slots
            .mapped()
            .map(|(key, slot)| (*key, *slot))
            .collect();
        slots.sort();
        slots
    }

    pub fn free_frames(&self) -> Vec<FrameNumber> {
        self.state.enter().frames.iter().copied().collect()
    }

    pub fn free_slots(&self) -> Vec<SlotId> {
        self.state.enter().slots.free_slots().copied().collect()
    }

    pub fn tlb_entries(&self) -> Vec<Option<TlbEntry>> {
        self.state.enter().tlb.entries().to_vec()
    }

    pub fn page_counts(&self, pid: ProcessId) -> Result<PageCounts, PagerError> {
        let state = self.state.enter();
        let mut counts = PageCounts::default();
        for entry in state.table(pid)?.iter() {
            counts.total += 1;
            if entry.valid {
                counts.resident += 1;
            } else if state.slots.slot_of(&PageKey::new(pid, entry.vpn)).is_some() {
                counts.swapped += 1;
            } else {
                counts.untouched += 1;
            }
        }
        Ok(counts)
    }

    fn frame_address(frame: FrameNumber) -> u64 {
        frame as u64 * PAGE_SIZE as u64
    }

    /// Splits a virtual address into page number and offset.
    fn split(vaddr: u64) -> Option<(u32, usize)> {
        let vpn = u32::try_from(vaddr / PAGE_SIZE as u64).ok()?;
        Some((vpn, (vaddr % PAGE_SIZE as u64) as usize))
    }
}
