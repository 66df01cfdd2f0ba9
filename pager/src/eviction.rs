//! Second-chance victim selection over the residency registry.
//!
//! One pass over the resident pages, in registry order, sorts them into four
//! tiers using only the used and dirty bits:
//!
//! 1. the first page that is neither used nor dirty (evicted with no I/O),
//! 2. otherwise the last unused page (flushed first if dirty),
//! 3. otherwise the last clean page,
//! 4. otherwise every page is used and dirty: the caller clears all used
//!    bits and the last page scanned is flushed and evicted.

use crate::page_table::{PageKey, TranslationEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionTier {
    UnusedClean,
    Unused,
    Clean,
    SecondChance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub key: PageKey,
    pub tier: EvictionTier,
}

/// Picks a victim among `candidates`, or `None` when there is nothing to evict.
pub fn select_victim<'a, I>(candidates: I) -> Option<Victim>
where
    I: IntoIterator<Item = (PageKey, &'a TranslationEntry)>,
{
    let mut last_unused = None;
    let mut last_clean = None;
    let mut last = None;

    for (key, entry) in candidates {
        last = Some(key);
        if !entry.used {
            if !entry.dirty {
                return Some(Victim {
                    key,
                    tier: EvictionTier::UnusedClean,
                });
            }
            last_unused = Some(key);
        } else if !entry.dirty {
            last_clean = Some(key);
        }
    }

    if let Some(key) = last_unused {
        return Some(Victim {
            key,
            tier: EvictionTier::Unused,
        });
    }
    if let Some(key) = last_clean {
        return Some(Victim {
            key,
            tier: EvictionTier::Clean,
        });
    }
    last.map(|key| Victim {
        key,
        tier: EvictionTier::SecondChance,
    })
}
