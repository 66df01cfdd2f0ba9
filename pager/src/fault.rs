use std::thread;

use disk::Disk;
use log::{debug, trace, warn};

use crate::{
    error::PagerError,
    page_table::{FrameNumber, PageKey, ProcessId},
    state::Eviction,
    swap::SlotId,
    tlb::TlbEntry,
    Pager, StateGuard,
};

impl<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize, const MEMORY_CAPACITY: usize>
    Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>
{
    /// Takes a free frame, evicting one resident page if the pool is empty.
    ///
    /// At most one page is evicted: a victim's frame is always reusable once
    /// flushed. When nothing is resident but other contexts hold frames for
    /// a transfer, waits for the device and looks again. `OutOfMemory` means
    /// no frame is free, resident or in flight. The atomic section may be
    /// left and re-entered; the guard handed back is always live, whatever
    /// the outcome.
    pub(crate) fn acquire_frame_locked<'a>(
        &'a self,
        mut state: StateGuard<'a>,
    ) -> (StateGuard<'a>, Result<FrameNumber, PagerError>) {
        loop {
            if let Some(frame) = state.frames.allocate_frame() {
                return (state, Ok(frame));
            }
            match state.evict() {
                Ok(eviction) => return self.release_frame(state, eviction),
                Err(PagerError::OutOfMemory) if state.in_flight > 0 => {
                    trace!("Waiting for {} frames in flight", state.in_flight);
                    drop(state);
                    self.swap.wait_idle();
                    thread::yield_now();
                    state = self.state.enter();
                }
                Err(err) => {
                    if err == PagerError::OutOfMemory {
                        warn!("No reclaimable frame");
                    }
                    return (state, Err(err));
                }
            }
        }
    }

    /// Writes an evicted dirty page to its slot so its frame can be reused.
    fn release_frame<'a>(
        &'a self,
        mut state: StateGuard<'a>,
        eviction: Eviction,
    ) -> (StateGuard<'a>, Result<FrameNumber, PagerError>) {
        let Some((victim, slot)) = eviction.flush else {
            return (state, Ok(eviction.frame));
        };
        state.in_flight += 1;
        let disk = self.swap.lock();
        drop(state);
        let flushed = self.flush_frame(&disk, slot, eviction.frame);
        drop(disk);

        let mut state = self.state.enter();
        state.in_flight -= 1;
        state.in_transit.remove(&victim);
        match flushed {
            Ok(()) => (state, Ok(eviction.frame)),
            Err(err) => {
                warn!("Flushing {} to slot {} failed: {}", victim, slot, err);
                state.restore_resident(victim, eviction.frame);
                (state, Err(err))
            }
        }
    }

    fn flush_frame(
        &self,
        disk: &Disk<PAGE_SIZE, SWAP_CAPACITY>,
        slot: SlotId,
        frame: FrameNumber,
    ) -> Result<(), PagerError> {
        let mut buf = vec![0; PAGE_SIZE];
        self.memory.read(Self::frame_address(frame), &mut buf)?;
        disk.write_block(slot as usize, &buf)?;
        Ok(())
    }

    fn load_frame(
        &self,
        disk: &Disk<PAGE_SIZE, SWAP_CAPACITY>,
        slot: SlotId,
        frame: FrameNumber,
    ) -> Result<(), PagerError> {
        let mut buf = vec![0; PAGE_SIZE];
        disk.read_block_into(slot as usize, &mut buf)?;
        self.memory.write(Self::frame_address(frame), &buf)?;
        Ok(())
    }

    /// Brings a non-resident page back into a frame. Returns with the page
    /// resident and the atomic section held.
    fn swap_in<'a>(
        &'a self,
        mut state: StateGuard<'a>,
        key: PageKey,
    ) -> Result<StateGuard<'a>, PagerError> {
        state.in_transit.insert(key);
        let (mut state, frame) = self.acquire_frame_locked(state);
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                state.in_transit.remove(&key);
                return Err(err);
            }
        };

        let loaded = match state.slots.slot_of(&key) {
            Some(slot) => {
                debug!("Swapping in {} from slot {} to frame {}", key, slot, frame);
                state.in_flight += 1;
                let disk = self.swap.lock();
                drop(state);
                let loaded = self.load_frame(&disk, slot, frame);
                drop(disk);
                state = self.state.enter();
                state.in_flight -= 1;
                loaded
            }
            None => {
                debug!("Zero-filling {} in frame {}", key, frame);
                self.memory
                    .fill(Self::frame_address(frame), PAGE_SIZE, 0)
                    .map_err(PagerError::from)
            }
        };

        state.in_transit.remove(&key);
        if let Err(err) = loaded {
            warn!("Swapping in {} failed: {}", key, err);
            state.frames.release_frame(frame);
            return Err(err);
        }
        state.finish_swap_in(key, frame)?;
        Ok(state)
    }

    /// Re-checks residency of `key` inside the atomic section and swaps the
    /// page in if it was reclaimed. Returns with the page resident.
    pub(crate) fn ensure_resident<'a>(
        &'a self,
        mut state: StateGuard<'a>,
        key: PageKey,
    ) -> Result<StateGuard<'a>, PagerError> {
        loop {
            if state.entry(key)?.valid {
                return Ok(state);
            }
            if !state.in_transit.contains(&key) {
                return self.swap_in(state, key);
            }
            drop(state);
            self.swap.wait_idle();
            thread::yield_now();
            state = self.state.enter();
        }
    }

    /// Takes a frame out of the pool (evicting if necessary) for use outside
    /// paging. It stays owned by the caller until [`Pager::free_frame`].
    pub fn acquire_frame(&self) -> Result<FrameNumber, PagerError> {
        let (mut state, frame) = self.acquire_frame_locked(self.state.enter());
        let frame = frame?;
        state.lent.insert(frame);
        Ok(frame)
    }

    /// Returns a frame taken with [`Pager::acquire_frame`]. Any other frame,
    /// free or mapped, is refused with `InvalidRange`.
    pub fn free_frame(&self, frame: FrameNumber) -> Result<(), PagerError> {
        let mut state = self.state.enter();
        if !state.lent.remove(&frame) {
            warn!("Refusing to free frame {}: not lent out", frame);
            return Err(PagerError::InvalidRange);
        }
        state.frames.release_frame(frame);
        Ok(())
    }

    /// Resolves a TLB miss at `vaddr`. Returns `Ok(false)` when the address
    /// has no translation in the process's table, leaving the fault to the
    /// caller.
    pub fn handle_tlb_miss(&self, pid: ProcessId, vaddr: u64) -> Result<bool, PagerError> {
        let Some((vpn, _)) = Self::split(vaddr) else {
            return Ok(false);
        };
        let key = PageKey::new(pid, vpn);
        let state = self.state.enter();
        if !state.table(pid)?.is_mapped(vpn) {
            debug!("TLB miss at {:#x} for process {} is out of range", vaddr, pid);
            return Ok(false);
        }
        let mut state = self.ensure_resident(state, key)?;
        let entry = *state.entry(key)?;
        state.tlb.install(key, entry);
        Ok(true)
    }

    /// Translates `vaddr` the way the MMU would: TLB first, the miss handler
    /// on a miss. Marks the page used, and dirty when `writing`.
    pub fn translate(&self, pid: ProcessId, vaddr: u64, writing: bool) -> Result<u64, PagerError> {
        let (vpn, offset) = Self::split(vaddr).ok_or(PagerError::AddressFault(vaddr))?;
        let key = PageKey::new(pid, vpn);
        loop {
            {
                let mut state = self.state.enter();
                if let Some((slot, cached)) = state.tlb.lookup(&key) {
                    if writing && cached.entry.read_only {
                        return Err(PagerError::ReadOnly(vaddr));
                    }
                    let entry = state.entry_mut(key)?;
                    entry.touch(writing);
                    let entry = *entry;
                    state.tlb.write_entry(slot, Some(TlbEntry { key, entry }));
                    trace!("{:#x} -> frame {} (TLB[{}])", vaddr, entry.ppn, slot);
                    return Ok(Self::frame_address(entry.ppn) + offset as u64);
                }
            }
            if !self.handle_tlb_miss(pid, vaddr)? {
                return Err(PagerError::AddressFault(vaddr));
            }
        }
    }

    /// Reloads the TLB for `pid` after a context switch: slot `i` caches the
    /// translation of vpn `i` if that page is resident, every other slot is
    /// emptied.
    pub fn restore_state(&self, pid: ProcessId) -> Result<(), PagerError> {
        let mut guard = self.state.enter();
        let state = &mut *guard;
        let table = state
            .tables
            .get(&pid)
            .ok_or(PagerError::NoSuchProcess(pid))?;
        state.tlb.flush();
        for slot in 0..state.tlb.size() {
            let cached = table
                .get_entry(slot as u32)
                .filter(|entry| entry.valid)
                .map(|entry| TlbEntry {
                    key: PageKey::new(pid, slot as u32),
                    entry: *entry,
                });
            state.tlb.write_entry(slot, cached);
        }
        Ok(())
    }
}
