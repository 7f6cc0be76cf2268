//! Linked offer cache
//!
//! The offer list is a doubly-linked list on chain. Locally it is stored as an
//! id-indexed map plus the id of the best offer: links are ids, never
//! references, so cloning the whole cache for a checkpoint is a plain map
//! clone.
//!
//! The cache only ever holds a prefix of the remote list. A link pointing at
//! an id that is not cached simply marks the edge of that prefix.

use semibook_types::{BookSide, OfferEntry, OfferId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

/// Result of linking an entry into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Entry was linked into the cached prefix
    Inserted,
    /// Entry's predecessor is not cached: it sits beyond the prefix
    OutsidePrefix,
}

/// Broken linked-list invariant, reported by [`OfferCache::check_links`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("best offer {0} is not cached")]
    MissingBest(OfferId),
    #[error("best offer {best} has a predecessor {prev}")]
    BestHasPrev { best: OfferId, prev: OfferId },
    #[error("cache holds {count} offers but has no best offer")]
    NoBest { count: usize },
    #[error("offer {id} points back to {prev}, whose next is {actual:?}")]
    PrevMismatch {
        id: OfferId,
        prev: OfferId,
        actual: Option<OfferId>,
    },
    #[error("offer {id} points forward to {next}, whose prev is {actual:?}")]
    NextMismatch {
        id: OfferId,
        next: OfferId,
        actual: Option<OfferId>,
    },
    #[error("walking from best reached {reached} of {count} cached offers")]
    Unreachable { reached: usize, count: usize },
}

/// Cached prefix of one offer list
#[derive(Debug, Clone)]
pub struct OfferCache {
    /// Side this list represents (decides what "better" means)
    side: BookSide,
    /// Offer index: id -> entry
    offers: HashMap<OfferId, OfferEntry>,
    /// Head of the list
    best: Option<OfferId>,
}

impl OfferCache {
    /// Create an empty cache
    pub fn new(side: BookSide) -> Self {
        Self {
            side,
            offers: HashMap::new(),
            best: None,
        }
    }

    /// Build a cache from entries fetched best-first
    ///
    /// Links are rewritten from the fetch order. The last entry keeps the
    /// `next` reported by the chain, which points past the cached prefix.
    pub fn from_entries(side: BookSide, entries: Vec<OfferEntry>) -> Self {
        let mut cache = Self::new(side);
        cache.best = entries.first().map(|e| e.id);

        let ids: Vec<OfferId> = entries.iter().map(|e| e.id).collect();
        for (i, mut entry) in entries.into_iter().enumerate() {
            entry.prev = if i == 0 { None } else { Some(ids[i - 1]) };
            if let Some(next) = ids.get(i + 1) {
                entry.next = Some(*next);
            }
            cache.offers.insert(entry.id, entry);
        }

        cache
    }

    /// Get the side
    pub fn side(&self) -> BookSide {
        self.side
    }

    /// Id of the best offer
    pub fn best(&self) -> Option<OfferId> {
        self.best
    }

    /// Get an entry by id
    pub fn get(&self, id: OfferId) -> Option<&OfferEntry> {
        self.offers.get(&id)
    }

    /// Check if an offer is cached
    pub fn contains(&self, id: OfferId) -> bool {
        self.offers.contains_key(&id)
    }

    /// Number of cached offers
    pub fn len(&self) -> usize {
        self.offers.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Clear all offers
    pub fn clear(&mut self) {
        self.offers.clear();
        self.best = None;
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Link an unlinked entry after `prev`
    ///
    /// `prev == None` makes the entry the new best. If `prev` is given but not
    /// cached the entry is dropped and [`InsertOutcome::OutsidePrefix`] is
    /// returned. The caller must have removed any previous entry with the same
    /// id.
    pub fn insert(&mut self, mut entry: OfferEntry, prev: Option<OfferId>) -> InsertOutcome {
        let id = entry.id;

        match prev {
            None => {
                entry.prev = None;
                entry.next = self.best;
                if let Some(old_best) = self.best.and_then(|b| self.offers.get_mut(&b)) {
                    old_best.prev = Some(id);
                }
                self.best = Some(id);
            }
            Some(prev_id) => {
                let Some(prev_entry) = self.offers.get_mut(&prev_id) else {
                    return InsertOutcome::OutsidePrefix;
                };
                let next = prev_entry.next;
                prev_entry.next = Some(id);

                entry.prev = Some(prev_id);
                entry.next = next;
                if let Some(next_entry) = next.and_then(|n| self.offers.get_mut(&n)) {
                    next_entry.prev = Some(id);
                }
            }
        }

        self.offers.insert(id, entry);
        InsertOutcome::Inserted
    }

    /// Remove an offer and stitch its neighbours together
    ///
    /// Returns the removed entry, or `None` if the id was not cached (in which
    /// case nothing changes).
    pub fn remove(&mut self, id: OfferId) -> Option<OfferEntry> {
        let removed = self.offers.remove(&id)?;

        match removed.prev {
            None => self.best = removed.next.filter(|n| self.offers.contains_key(n)),
            Some(prev) => {
                if let Some(prev_entry) = self.offers.get_mut(&prev) {
                    prev_entry.next = removed.next;
                }
            }
        }

        if let Some(next_entry) = removed.next.and_then(|n| self.offers.get_mut(&n)) {
            next_entry.prev = removed.prev;
        }

        Some(removed)
    }

    /// Remove then re-link an offer (insert-or-move)
    ///
    /// Returns the entry that was cached before the write, if any, and whether
    /// the new entry landed inside the cached prefix.
    pub fn write(
        &mut self,
        entry: OfferEntry,
        prev: Option<OfferId>,
    ) -> (Option<OfferEntry>, InsertOutcome) {
        let previous = self.remove(entry.id);
        let outcome = self.insert(entry, prev);
        (previous, outcome)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Iterate from best to worst through cached offers
    pub fn iter(&self) -> OfferIter<'_> {
        OfferIter {
            cache: self,
            cursor: self.best,
        }
    }

    /// Cached ids in list order
    pub fn ids(&self) -> Vec<OfferId> {
        self.iter().map(|e| e.id).collect()
    }

    /// First cached offer whose price is not strictly better than `price`
    pub fn pivot_id(&self, price: Decimal) -> Option<OfferId> {
        self.iter()
            .find(|entry| !entry.is_better_than(self.side, price))
            .map(|entry| entry.id)
    }

    /// Verify the doubly-linked list invariants
    pub fn check_links(&self) -> Result<(), LinkError> {
        match self.best {
            None if !self.offers.is_empty() => {
                return Err(LinkError::NoBest {
                    count: self.offers.len(),
                })
            }
            Some(best) => match self.offers.get(&best) {
                None => return Err(LinkError::MissingBest(best)),
                Some(entry) => {
                    if let Some(prev) = entry.prev {
                        return Err(LinkError::BestHasPrev { best, prev });
                    }
                }
            },
            None => {}
        }

        for entry in self.offers.values() {
            if let Some(prev) = entry.prev.and_then(|p| self.offers.get(&p)) {
                if prev.next != Some(entry.id) {
                    return Err(LinkError::PrevMismatch {
                        id: entry.id,
                        prev: prev.id,
                        actual: prev.next,
                    });
                }
            }
            if let Some(next) = entry.next.and_then(|n| self.offers.get(&n)) {
                if next.prev != Some(entry.id) {
                    return Err(LinkError::NextMismatch {
                        id: entry.id,
                        next: next.id,
                        actual: next.prev,
                    });
                }
            }
        }

        let reached = self.iter().take(self.offers.len() + 1).count();
        if reached != self.offers.len() {
            return Err(LinkError::Unreachable {
                reached,
                count: self.offers.len(),
            });
        }

        Ok(())
    }
}

/// Best-to-worst iterator over a cache
pub struct OfferIter<'a> {
    cache: &'a OfferCache,
    cursor: Option<OfferId>,
}

impl<'a> Iterator for OfferIter<'a> {
    type Item = &'a OfferEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.cache.get(self.cursor?)?;
        self.cursor = entry.next;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: OfferId) -> OfferEntry {
        OfferEntry::new(id, dec!(100), dec!(50) + Decimal::from(id)).unwrap()
    }

    fn cache_of(ids: &[OfferId]) -> OfferCache {
        OfferCache::from_entries(BookSide::Asks, ids.iter().map(|id| entry(*id)).collect())
    }

    #[test]
    fn test_write_into_empty() {
        let mut cache = OfferCache::new(BookSide::Asks);
        let (previous, outcome) = cache.write(entry(5), None);

        assert!(previous.is_none());
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.best(), Some(5));
        cache.check_links().unwrap();
    }

    #[test]
    fn test_write_between() {
        let mut cache = cache_of(&[5, 7]);
        cache.write(entry(6), Some(5));

        assert_eq!(cache.ids(), vec![5, 6, 7]);
        assert_eq!(cache.get(6).unwrap().prev, Some(5));
        assert_eq!(cache.get(6).unwrap().next, Some(7));
        assert_eq!(cache.get(7).unwrap().prev, Some(6));
        cache.check_links().unwrap();
    }

    #[test]
    fn test_write_new_best() {
        let mut cache = cache_of(&[5, 7]);
        cache.write(entry(3), None);

        assert_eq!(cache.best(), Some(3));
        assert_eq!(cache.ids(), vec![3, 5, 7]);
        cache.check_links().unwrap();
    }

    #[test]
    fn test_write_moves_existing() {
        let mut cache = cache_of(&[5, 6, 7]);
        let (previous, outcome) = cache.write(entry(5), Some(7));

        assert_eq!(previous.map(|e| e.id), Some(5));
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(cache.ids(), vec![6, 7, 5]);
        cache.check_links().unwrap();
    }

    #[test]
    fn test_write_outside_prefix_keeps_removal() {
        let mut cache = cache_of(&[5, 6, 7]);
        let (previous, outcome) = cache.write(entry(6), Some(42));

        assert!(previous.is_some());
        assert_eq!(outcome, InsertOutcome::OutsidePrefix);
        assert_eq!(cache.ids(), vec![5, 7]);
        cache.check_links().unwrap();
    }

    #[test]
    fn test_remove_best() {
        let mut cache = cache_of(&[5, 7]);
        let removed = cache.remove(5).unwrap();

        assert_eq!(removed.id, 5);
        assert_eq!(cache.best(), Some(7));
        assert_eq!(cache.get(7).unwrap().prev, None);
        cache.check_links().unwrap();
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut cache = cache_of(&[5, 7]);
        let before: Vec<_> = cache.iter().cloned().collect();

        assert!(cache.remove(99).is_none());
        assert_eq!(cache.best(), Some(5));
        assert_eq!(cache.iter().cloned().collect::<Vec<_>>(), before);
    }

    #[test]
    fn test_remove_last_cached_keeps_remote_tail_out_of_best() {
        // 7 points at 8, which is beyond the prefix
        let mut cache =
            OfferCache::from_entries(BookSide::Asks, vec![entry(7).with_links(None, Some(8))]);
        assert_eq!(cache.get(7).unwrap().next, Some(8));

        cache.remove(7);
        assert_eq!(cache.best(), None);
        assert!(cache.is_empty());
        cache.check_links().unwrap();
    }

    #[test]
    fn test_from_entries_links_in_fetch_order() {
        let entries = vec![
            entry(1).with_links(None, Some(2)),
            entry(2).with_links(Some(1), Some(3)),
            entry(3).with_links(Some(2), Some(4)),
        ];
        let cache = OfferCache::from_entries(BookSide::Asks, entries);

        assert_eq!(cache.ids(), vec![1, 2, 3]);
        // Tail still points at the uncached remote successor
        assert_eq!(cache.get(3).unwrap().next, Some(4));
        cache.check_links().unwrap();
    }

    #[test]
    fn test_pivot_id() {
        // Asks priced 0.5, 1, 2
        let entries = vec![
            OfferEntry::new(1, dec!(100), dec!(50)).unwrap(),
            OfferEntry::new(2, dec!(100), dec!(100)).unwrap(),
            OfferEntry::new(3, dec!(100), dec!(200)).unwrap(),
        ];
        let cache = OfferCache::from_entries(BookSide::Asks, entries);

        assert_eq!(cache.pivot_id(dec!(0.4)), Some(1));
        assert_eq!(cache.pivot_id(dec!(1)), Some(2));
        assert_eq!(cache.pivot_id(dec!(1.5)), Some(3));
        assert_eq!(cache.pivot_id(dec!(3)), None);
    }

    #[test]
    fn test_check_links_detects_corruption() {
        let mut cache = cache_of(&[1, 2]);
        cache.offers.get_mut(&2).unwrap().prev = Some(9);
        // 2 no longer points back to 1, but 1 still points forward to 2
        assert!(matches!(
            cache.check_links(),
            Err(LinkError::NextMismatch { id: 1, next: 2, .. })
        ));
    }

    #[test]
    fn test_link_integrity_under_random_ops() {
        // Deterministic LCG so the sequence is reproducible
        let mut seed: u64 = 0x5eed;
        let mut rand = move |bound: u32| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as u32) % bound
        };

        let mut cache = OfferCache::new(BookSide::Bids);
        for _ in 0..2000 {
            let id = rand(30) + 1;
            if rand(3) == 0 {
                cache.remove(id);
            } else {
                let ids = cache.ids();
                let prev = match rand(ids.len() as u32 + 2) as usize {
                    0 => None,
                    n if n <= ids.len() => Some(ids[n - 1]),
                    _ => Some(1000),
                };
                cache.write(entry(id), prev);
            }
            cache.check_links().unwrap();
            if let Some(best) = cache.best() {
                assert_eq!(cache.get(best).unwrap().prev, None);
            }
        }
    }
}
