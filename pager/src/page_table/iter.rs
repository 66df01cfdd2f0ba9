use super::TranslationEntry;

/// Walks the mapped slots of a page table in vpn order.
pub struct PageTableIterator<'a> {
    current: usize,
    entries: &'a [Option<TranslationEntry>],
}

impl<'a> PageTableIterator<'a> {
    pub fn new(entries: &'a [Option<TranslationEntry>]) -> Self {
        Self {
            current: 0,
            entries,
        }
    }
}

impl<'a> Iterator for PageTableIterator<'a> {
    type Item = &'a TranslationEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.entries.get(self.current) {
            self.current += 1;
            if let Some(entry) = slot {
                return Some(entry);
            }
        }
        None
    }
}
