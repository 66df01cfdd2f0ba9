mod iter;
mod page_table_entry;

pub use iter::PageTableIterator;
pub use page_table_entry::{FrameNumber, PageKey, ProcessId, TranslationEntry};

/// Flat per-process table indexed by virtual page number.
///
/// A slot is `None` until the process requests the page.
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<Option<TranslationEntry>>,
}

impl PageTable {
    pub fn init(page_count: usize) -> Self {
        Self {
            entries: vec![None; page_count],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_entry(&self, vpn: u32) -> Option<&TranslationEntry> {
        self.entries.get(vpn as usize)?.as_ref()
    }

    pub fn get_entry_mut(&mut self, vpn: u32) -> Option<&mut TranslationEntry> {
        self.entries.get_mut(vpn as usize)?.as_mut()
    }

    pub fn is_mapped(&self, vpn: u32) -> bool {
        self.get_entry(vpn).is_some()
    }

    pub fn map_to_frame(&mut self, vpn: u32, frame: FrameNumber) -> TranslationEntry {
        let entry = TranslationEntry::bound(vpn, frame);
        self.entries[vpn as usize] = Some(entry);
        entry
    }

    pub(crate) fn unmap_page(&mut self, vpn: u32) -> Option<TranslationEntry> {
        self.entries.get_mut(vpn as usize)?.take()
    }

    pub fn iter(&self) -> PageTableIterator<'_> {
        PageTableIterator::new(&self.entries)
    }
}
