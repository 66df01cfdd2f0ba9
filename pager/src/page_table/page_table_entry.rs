use std::fmt;

pub type ProcessId = u32;
pub type FrameNumber = u32;

/// Identifies one virtual page across every process in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub pid: ProcessId,
    pub vpn: u32,
}

impl PageKey {
    pub fn new(pid: ProcessId, vpn: u32) -> Self {
        PageKey { pid, vpn }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.vpn)
    }
}

/// Maps one virtual page to a physical frame.
///
/// `ppn` is only meaningful while `valid` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: u32,
    pub ppn: FrameNumber,
    pub valid: bool,
    pub read_only: bool,
    pub used: bool,
    pub dirty: bool,
}

impl TranslationEntry {
    /// A freshly bound page. It has never been written to swap, so it starts
    /// used and dirty: its first eviction must flush it.
    pub(crate) fn bound(vpn: u32, ppn: FrameNumber) -> Self {
        TranslationEntry {
            vpn,
            ppn,
            valid: true,
            read_only: false,
            used: true,
            dirty: true,
        }
    }

    pub(crate) fn swapped_in(&mut self, ppn: FrameNumber) {
        self.ppn = ppn;
        self.valid = true;
        self.used = false;
        self.dirty = false;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    pub(crate) fn touch(&mut self, writing: bool) {
        self.used = true;
        if writing {
            self.dirty = true;
        }
    }
}
