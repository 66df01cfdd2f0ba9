use log::{info, warn};

use crate::{
    error::PagerError,
    page_table::{FrameNumber, PageKey, ProcessId, TranslationEntry},
    state::PagerState,
    Pager,
};

fn check_buffer(buffer_len: usize, offset: usize, length: usize) -> Result<(), PagerError> {
    match offset.checked_add(length) {
        Some(end) if end <= buffer_len => Ok(()),
        _ => Err(PagerError::InvalidRange),
    }
}

impl<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize, const MEMORY_CAPACITY: usize>
    Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>
{
    /// Binds a frame to every page in `offset..offset + count` of the
    /// process's table and registers them as resident.
    ///
    /// Pages start zeroed, used and dirty. Their contents are filled in
    /// afterwards with [`Pager::fill_page`], which re-checks residency since
    /// the pages may be evicted in between. On failure, pages bound by this
    /// call are unmapped again.
    pub fn allocate_page_range(
        &self,
        pid: ProcessId,
        offset: u32,
        count: u32,
    ) -> Result<Vec<TranslationEntry>, PagerError> {
        if count == 0 {
            return Err(PagerError::InvalidRange);
        }
        let end = offset.checked_add(count).ok_or(PagerError::InvalidRange)?;
        let mut state = self.state.enter();
        let table = state.table(pid)?;
        if end as usize > table.len() || (offset..end).any(|vpn| table.is_mapped(vpn)) {
            return Err(PagerError::InvalidRange);
        }

        let mut bound = Vec::with_capacity(count as usize);
        for vpn in offset..end {
            let (guard, frame) = self.acquire_frame_locked(state);
            state = guard;
            match frame.and_then(|frame| self.bind(&mut state, PageKey::new(pid, vpn), frame)) {
                Ok(entry) => bound.push(entry),
                Err(err) => {
                    warn!(
                        "Allocating pages {}..{} of process {} failed at {}: {}",
                        offset, end, pid, vpn, err
                    );
                    state.discard_pages(pid, bound.iter().map(|e| e.vpn));
                    return Err(err);
                }
            }
        }
        info!("Process {} bound pages {}..{}", pid, offset, end);
        Ok(bound)
    }

    fn bind(
        &self,
        state: &mut PagerState,
        key: PageKey,
        frame: FrameNumber,
    ) -> Result<TranslationEntry, PagerError> {
        // The section may have been left while a victim was flushed.
        let bound = match state.tables.get_mut(&key.pid) {
            Some(table) if table.is_mapped(key.vpn) => Err(PagerError::InvalidRange),
            Some(_) => self
                .memory
                .fill(Self::frame_address(frame), PAGE_SIZE, 0)
                .map_err(PagerError::from),
            None => Err(PagerError::NoSuchProcess(key.pid)),
        };
        if let Err(err) = bound {
            state.frames.release_frame(frame);
            return Err(err);
        }
        let entry = state
            .tables
            .get_mut(&key.pid)
            .ok_or(PagerError::NoSuchProcess(key.pid))?
            .map_to_frame(key.vpn, frame);
        state.registry.insert(key);
        Ok(entry)
    }

    /// Copies loader content into an allocated page, swapping it back in if
    /// it was evicted since it was bound. Ignores the read-only flag.
    pub fn fill_page(
        &self,
        pid: ProcessId,
        vpn: u32,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), PagerError> {
        check_buffer(PAGE_SIZE, offset, bytes.len())?;
        let key = PageKey::new(pid, vpn);
        let state = self.state.enter();
        state.entry(key)?;
        let mut state = self.ensure_resident(state, key)?;
        let entry = state.entry_mut(key)?;
        self.memory
            .write(Self::frame_address(entry.ppn) + offset as u64, bytes)?;
        entry.dirty = true;
        Ok(())
    }

    pub fn set_read_only(&self, pid: ProcessId, vpn: u32, read_only: bool) -> Result<(), PagerError> {
        let key = PageKey::new(pid, vpn);
        let mut state = self.state.enter();
        state.entry_mut(key)?.read_only = read_only;
        state.tlb.invalidate(&key);
        Ok(())
    }

    /// Copies `length` bytes starting at `vaddr` into `data[offset..]`.
    ///
    /// Stops at the first page outside the process's table and returns the
    /// number of bytes copied.
    pub fn read_virtual_memory(
        &self,
        pid: ProcessId,
        vaddr: u64,
        data: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize, PagerError> {
        check_buffer(data.len(), offset, length)?;
        self.state.enter().table(pid)?;

        let mut amount = 0;
        while amount < length {
            let Some((vpn, start)) = vaddr
                .checked_add(amount as u64)
                .and_then(Self::split)
            else {
                break;
            };
            let key = PageKey::new(pid, vpn);
            let state = self.state.enter();
            if !state.table(pid)?.is_mapped(vpn) {
                break;
            }
            let mut state = self.ensure_resident(state, key)?;
            let count = (PAGE_SIZE - start).min(length - amount);
            let entry = state.entry_mut(key)?;
            let from = offset + amount;
            self.memory.read(
                Self::frame_address(entry.ppn) + start as u64,
                &mut data[from..from + count],
            )?;
            entry.touch(false);
            amount += count;
        }
        Ok(amount)
    }

    /// Copies `length` bytes from `data[offset..]` to `vaddr`.
    ///
    /// Stops at the first page that is outside the process's table or
    /// read-only. Bytes already written stay written; the return value says
    /// how many there were.
    pub fn write_virtual_memory(
        &self,
        pid: ProcessId,
        vaddr: u64,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<usize, PagerError> {
        check_buffer(data.len(), offset, length)?;
        self.state.enter().table(pid)?;

        let mut amount = 0;
        while amount < length {
            let Some((vpn, start)) = vaddr
                .checked_add(amount as u64)
                .and_then(Self::split)
            else {
                break;
            };
            let key = PageKey::new(pid, vpn);
            let state = self.state.enter();
            match state.table(pid)?.get_entry(vpn) {
                Some(entry) if !entry.read_only => {}
                _ => break,
            }
            let mut state = self.ensure_resident(state, key)?;
            let count = (PAGE_SIZE - start).min(length - amount);
            let entry = state.entry_mut(key)?;
            let from = offset + amount;
            self.memory.write(
                Self::frame_address(entry.ppn) + start as u64,
                &data[from..from + count],
            )?;
            entry.touch(true);
            amount += count;
        }
        Ok(amount)
    }

    /// Tears down the paging state of `pid`: frames go back to the pool,
    /// swap slots to the free list, and its TLB entries are dropped.
    pub fn release_all(&self, pid: ProcessId) -> Result<(), PagerError> {
        let pages = self.state.enter().release_process(pid)?;
        info!("Process {} released {} pages", pid, pages);
        Ok(())
    }
}
