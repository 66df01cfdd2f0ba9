use std::fmt;

use disk::DiskError;
use memory::MemoryError;

use crate::page_table::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerError {
    /// No free frame and nothing resident that could be evicted.
    OutOfMemory,
    /// Every swap slot is taken.
    SwapFull,
    Swap(DiskError),
    Memory(MemoryError),
    NoSuchProcess(ProcessId),
    /// Page range outside the process's table, already mapped, or a buffer
    /// range that does not fit.
    InvalidRange,
    /// Write through a read-only translation.
    ReadOnly(u64),
    /// Address with no translation in the process's table.
    AddressFault(u64),
}

impl fmt::Display for PagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagerError::OutOfMemory => write!(f, "no physical frame can be reclaimed"),
            PagerError::SwapFull => write!(f, "swap space exhausted"),
            PagerError::Swap(err) => write!(f, "swap i/o failed: {}", err),
            PagerError::Memory(err) => write!(f, "physical memory access failed: {}", err),
            PagerError::NoSuchProcess(pid) => write!(f, "no process with id {}", pid),
            PagerError::InvalidRange => write!(f, "invalid page range"),
            PagerError::ReadOnly(vaddr) => write!(f, "write to read-only address {:#x}", vaddr),
            PagerError::AddressFault(vaddr) => write!(f, "unmapped address {:#x}", vaddr),
        }
    }
}

impl std::error::Error for PagerError {}

impl From<DiskError> for PagerError {
    fn from(err: DiskError) -> Self {
        PagerError::Swap(err)
    }
}

impl From<MemoryError> for PagerError {
    fn from(err: MemoryError) -> Self {
        PagerError::Memory(err)
    }
}
