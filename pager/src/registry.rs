use std::collections::{HashSet, VecDeque};

use crate::page_table::PageKey;

/// Inverted view of residency: the keys of every page that currently owns a
/// frame, kept in the order the pages became resident.
///
/// The ring order is the eviction scan order, so victim selection is
/// reproducible.
#[derive(Debug, Default)]
pub struct ResidencyRegistry {
    ring: VecDeque<PageKey>,
    members: HashSet<PageKey>,
}

impl ResidencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PageKey) {
        if self.members.insert(key) {
            self.ring.push_back(key);
        }
    }

    pub fn remove(&mut self, key: &PageKey) -> bool {
        if !self.members.remove(key) {
            return false;
        }
        if let Some(pos) = self.ring.iter().position(|k| k == key) {
            self.ring.remove(pos);
        }
        true
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Keys in scan order, oldest resident first.
    pub fn iter(&self) -> impl Iterator<Item = &PageKey> {
        self.ring.iter()
    }
}
