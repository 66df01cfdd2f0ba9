use std::str::FromStr;

use log::trace;
use rand::Rng;

use crate::page_table::{PageKey, ProcessId, TranslationEntry};

/// Chooses which TLB slot a new translation overwrites.
pub trait ReplacementPolicy: Send {
    fn select(&mut self, slots: usize) -> usize;
}

/// Uniformly random slot.
#[derive(Debug, Default)]
pub struct RandomReplacement;

impl ReplacementPolicy for RandomReplacement {
    fn select(&mut self, slots: usize) -> usize {
        rand::thread_rng().gen_range(0..slots)
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: usize,
}

impl ReplacementPolicy for RoundRobin {
    fn select(&mut self, slots: usize) -> usize {
        let slot = self.next % slots;
        self.next = (slot + 1) % slots;
        slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlbPolicy {
    #[default]
    Random,
    RoundRobin,
}

impl TlbPolicy {
    pub fn build(self) -> Box<dyn ReplacementPolicy> {
        match self {
            TlbPolicy::Random => Box::new(RandomReplacement),
            TlbPolicy::RoundRobin => Box::new(RoundRobin::default()),
        }
    }
}

impl FromStr for TlbPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(TlbPolicy::Random),
            "round-robin" => Ok(TlbPolicy::RoundRobin),
            other => Err(format!("unknown TLB policy: {}", other)),
        }
    }
}

/// A cached translation. Copies of page-table entries are tagged with the
/// owning page so stale copies can be shot down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub key: PageKey,
    pub entry: TranslationEntry,
}

/// Software-managed TLB with a fixed number of slots.
pub struct Tlb {
    slots: Vec<Option<TlbEntry>>,
    policy: Box<dyn ReplacementPolicy>,
}

impl Tlb {
    pub fn new(size: usize, policy: Box<dyn ReplacementPolicy>) -> Self {
        assert!(size > 0, "TLB needs at least one slot");
        Self {
            slots: vec![None; size],
            policy,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn write_entry(&mut self, slot: usize, entry: Option<TlbEntry>) {
        self.slots[slot] = entry;
    }

    pub fn lookup(&self, key: &PageKey) -> Option<(usize, TlbEntry)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(slot, e)| e.filter(|e| e.key == *key).map(|e| (slot, e)))
    }

    /// Installs a translation, refreshing the slot that already caches `key`
    /// or else the slot the replacement policy picks.
    pub fn install(&mut self, key: PageKey, entry: TranslationEntry) -> usize {
        let slot = match self.lookup(&key) {
            Some((slot, _)) => slot,
            None => self.policy.select(self.slots.len()),
        };
        trace!("TLB[{}] <- {} -> frame {}", slot, key, entry.ppn);
        self.write_entry(slot, Some(TlbEntry { key, entry }));
        slot
    }

    pub fn invalidate(&mut self, key: &PageKey) {
        for slot in self.slots.iter_mut() {
            if slot.map_or(false, |e| e.key == *key) {
                *slot = None;
            }
        }
    }

    pub fn invalidate_process(&mut self, pid: ProcessId) {
        for slot in self.slots.iter_mut() {
            if slot.map_or(false, |e| e.key.pid == pid) {
                *slot = None;
            }
        }
    }

    pub fn flush(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn entries(&self) -> &[Option<TlbEntry>] {
        &self.slots
    }
}

impl std::fmt::Debug for Tlb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tlb").field("slots", &self.slots).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(vpn: u32, ppn: u32) -> TranslationEntry {
        TranslationEntry::bound(vpn, ppn)
    }

    #[test]
    fn round_robin_cycles() {
        let mut tlb = Tlb::new(2, TlbPolicy::RoundRobin.build());
        assert_eq!(tlb.install(PageKey::new(1, 0), entry(0, 5)), 0);
        assert_eq!(tlb.install(PageKey::new(1, 1), entry(1, 6)), 1);
        assert_eq!(tlb.install(PageKey::new(1, 2), entry(2, 7)), 0);
        assert!(tlb.lookup(&PageKey::new(1, 0)).is_none());
    }

    #[test]
    fn random_policy_stays_in_range() {
        let mut policy = RandomReplacement;
        for _ in 0..100 {
            assert!(policy.select(4) < 4);
        }
    }

    #[test]
    fn reinstall_refreshes_existing_slot() {
        let mut tlb = Tlb::new(4, TlbPolicy::Random.build());
        let key = PageKey::new(2, 3);
        let slot = tlb.install(key, entry(3, 1));
        assert_eq!(tlb.install(key, entry(3, 9)), slot);
        assert_eq!(tlb.lookup(&key).unwrap().1.entry.ppn, 9);
        assert_eq!(tlb.entries().iter().flatten().count(), 1);
    }

    #[test]
    fn shootdown() {
        let mut tlb = Tlb::new(3, TlbPolicy::RoundRobin.build());
        tlb.install(PageKey::new(1, 0), entry(0, 0));
        tlb.install(PageKey::new(2, 0), entry(0, 1));
        tlb.install(PageKey::new(1, 1), entry(1, 2));

        tlb.invalidate(&PageKey::new(2, 0));
        assert!(tlb.entries()[1].is_none());
        tlb.invalidate_process(1);
        assert!(tlb.entries().iter().all(Option::is_none));

        tlb.install(PageKey::new(3, 0), entry(0, 0));
        tlb.flush();
        assert!(tlb.entries().iter().all(Option::is_none));
    }

    #[test]
    fn parse_policy() {
        assert_eq!("random".parse(), Ok(TlbPolicy::Random));
        assert_eq!("round-robin".parse(), Ok(TlbPolicy::RoundRobin));
        assert!("lru".parse::<TlbPolicy>().is_err());
    }
}
