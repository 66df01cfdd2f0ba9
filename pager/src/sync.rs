//! Locking discipline.
//!
//! Two locks guard the pager:
//!
//! * the atomic section ([`AtomicSection`]) around all paging metadata: frame
//!   pool, residency registry, swap slot map, page tables, TLB. It is held
//!   only for short, bounded work, which includes copying bytes to or from a
//!   resident frame;
//! * the swap device lock ([`crate::swap::SwapStore::lock`]), held for the
//!   duration of one block transfer.
//!
//! Lock order is atomic section, then device. A context may wait for the
//! device while inside the atomic section (this is how a transfer is handed
//! off without a gap), but must leave the device before entering the atomic
//! section again. Pages whose frame is being transferred are listed as in
//! transit; anyone who needs such a page waits for the device and retries.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct AtomicSection<T> {
    inner: Mutex<T>,
}

impl<T> AtomicSection<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn enter(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap()
    }
}
