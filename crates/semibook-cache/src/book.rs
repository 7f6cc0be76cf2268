//! Semibook state machine
//!
//! Applies decoded offer-list logs to the cache and turns them into semantic
//! events for subscribers.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized → Initializing → Ready
//! ```
//!
//! Logs are only applied in `Ready`. Logs at or below the snapshot block are
//! already reflected in the snapshot and are dropped.

use crate::cache::{InsertOutcome, OfferCache, OfferIter};
use crate::history::{CheckpointHistory, RestoreOutcome};
use rust_decimal::Decimal;
use semibook_types::{
    Address, BlockNumber, BookSide, EventKind, Offer, OfferEntry, OfferId, OfferListEvent,
    OfferListKey, RawLog, SemibookResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Semibook lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemibookState {
    /// No snapshot loaded
    #[default]
    Uninitialized,
    /// Registered for logs, snapshot fetch in progress
    Initializing,
    /// Snapshot loaded, applying logs
    Ready,
}

/// Semantic event emitted for a confirmed cache mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemibookEvent {
    /// What happened
    pub kind: EventKind,
    /// Side of the semibook that changed
    pub side: BookSide,
    /// Affected offer (none for gas base changes)
    pub offer_id: Option<OfferId>,
    /// Offer as written, or as it was cached before removal
    pub offer: Option<OfferEntry>,
    /// Taker of a fill
    pub taker: Option<Address>,
    /// Amount the taker received (fills only)
    pub taker_wants: Option<Decimal>,
    /// Amount the taker paid (fills only)
    pub taker_gives: Option<Decimal>,
    /// New gas base (gas base changes only)
    pub offer_gasbase: Option<u64>,
    /// Block of the log
    pub block_number: BlockNumber,
    /// Position of the log within its block
    pub log_index: u32,
    /// Transaction that emitted the log
    pub tx_hash: Option<String>,
}

impl SemibookEvent {
    fn new(kind: EventKind, side: BookSide, log: &RawLog) -> Self {
        Self {
            kind,
            side,
            offer_id: None,
            offer: None,
            taker: None,
            taker_wants: None,
            taker_gives: None,
            offer_gasbase: None,
            block_number: log.block_number,
            log_index: log.log_index,
            tx_hash: log.tx_hash.clone(),
        }
    }

    /// Priced view of the affected offer
    pub fn priced_offer(&self) -> Option<SemibookResult<Offer>> {
        self.offer.as_ref().map(|entry| Offer::from_entry(entry, self.side))
    }
}

/// Result of applying a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// Cache changed; subscribers should be notified
    Applied(SemibookEvent),
    /// Log touched nothing inside the cached prefix
    Silent,
    /// Log is already reflected in the snapshot
    Stale,
    /// Log belongs to a block older than one already applied
    OutOfOrder,
    /// Semibook is not ready; the caller should queue the log
    NotReady,
}

/// Result of a rollback request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Nothing applied above the target
    Unchanged,
    /// State restored from a checkpoint
    Restored,
    /// The target predates retained state; a fresh snapshot is needed
    ReinitializeRequired,
}

/// State captured by checkpoints
#[derive(Debug, Clone)]
struct BookCheckpoint {
    cache: OfferCache,
    offer_gasbase: u64,
    last_block: BlockNumber,
}

/// Cache state for one (market, side)
#[derive(Debug)]
pub struct OfferBook {
    /// Offer list mirrored by this book
    key: OfferListKey,
    /// Cached prefix
    cache: OfferCache,
    /// Current offer-list gas base
    offer_gasbase: u64,
    /// Block the snapshot is consistent with
    first_block_number: BlockNumber,
    /// Highest block applied
    last_block: BlockNumber,
    /// Lifecycle state
    state: SemibookState,
    /// Reorg checkpoints
    history: CheckpointHistory<BookCheckpoint>,
}

impl OfferBook {
    /// Create an uninitialized book
    pub fn new(key: OfferListKey, side: BookSide, max_retained_blocks: usize) -> Self {
        Self {
            key,
            cache: OfferCache::new(side),
            offer_gasbase: 0,
            first_block_number: 0,
            last_block: 0,
            state: SemibookState::Uninitialized,
            history: CheckpointHistory::new(max_retained_blocks),
        }
    }

    /// Get the offer list key
    pub fn key(&self) -> &OfferListKey {
        &self.key
    }

    /// Get the side
    pub fn side(&self) -> BookSide {
        self.cache.side()
    }

    /// Get the current state
    pub fn state(&self) -> SemibookState {
        self.state
    }

    /// Check if the book is applying logs
    pub fn is_ready(&self) -> bool {
        self.state == SemibookState::Ready
    }

    /// Block the snapshot is consistent with
    pub fn first_block_number(&self) -> BlockNumber {
        self.first_block_number
    }

    /// Highest block reflected in the cache
    pub fn last_block(&self) -> BlockNumber {
        self.last_block
    }

    /// Current offer-list gas base
    pub fn offer_gasbase(&self) -> u64 {
        self.offer_gasbase
    }

    /// Read-only access to the cache
    pub fn cache(&self) -> &OfferCache {
        &self.cache
    }

    /// Id of the best cached offer
    pub fn best(&self) -> Option<OfferId> {
        self.cache.best()
    }

    /// Number of cached offers
    pub fn size(&self) -> usize {
        self.cache.len()
    }

    /// Get a cached entry
    pub fn entry(&self, id: OfferId) -> Option<&OfferEntry> {
        self.cache.get(id)
    }

    /// Priced view of a cached offer
    pub fn offer(&self, id: OfferId) -> SemibookResult<Option<Offer>> {
        self.cache
            .get(id)
            .map(|entry| Offer::from_entry(entry, self.side()))
            .transpose()
    }

    /// Iterate cached entries best to worst
    pub fn iter(&self) -> OfferIter<'_> {
        self.cache.iter()
    }

    /// First cached offer whose price is not strictly better than `price`
    pub fn pivot_id(&self, price: Decimal) -> Option<OfferId> {
        self.cache.pivot_id(price)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Mark as initializing (call when registering for logs)
    pub fn set_initializing(&mut self) {
        self.state = SemibookState::Initializing;
    }

    /// Load a snapshot fetched best-first at `block`
    ///
    /// Replaces all cached state and clears reorg checkpoints.
    pub fn load_snapshot(&mut self, block: BlockNumber, entries: Vec<OfferEntry>, offer_gasbase: u64) {
        self.cache = OfferCache::from_entries(self.side(), entries);
        self.offer_gasbase = offer_gasbase;
        self.first_block_number = block;
        self.last_block = block;
        self.history.clear();
        self.state = SemibookState::Ready;
    }

    /// Clear and reset the book
    pub fn reset(&mut self) {
        self.cache.clear();
        self.offer_gasbase = 0;
        self.first_block_number = 0;
        self.last_block = 0;
        self.history.clear();
        self.state = SemibookState::Uninitialized;
    }

    // ========================================================================
    // Log Handling
    // ========================================================================

    /// Decode and apply a raw log
    pub fn apply_log(&mut self, log: &RawLog) -> SemibookResult<ApplyResult> {
        let event = OfferListEvent::decode(log)?;
        Ok(self.apply_event(&event, log))
    }

    /// Apply a decoded event carried by `log`
    pub fn apply_event(&mut self, event: &OfferListEvent, log: &RawLog) -> ApplyResult {
        if self.state != SemibookState::Ready {
            return ApplyResult::NotReady;
        }

        let block = log.block_number;
        if block <= self.first_block_number {
            debug!(block, first_block = self.first_block_number, "dropping log covered by snapshot");
            return ApplyResult::Stale;
        }
        if block < self.last_block {
            warn!(block, last_block = self.last_block, key = %self.key, "dropping out-of-order log");
            return ApplyResult::OutOfOrder;
        }
        if block > self.last_block {
            self.history.push(block, self.checkpoint());
            self.last_block = block;
        }

        let side = self.side();
        match event {
            OfferListEvent::OfferWrite(write) => {
                let removed = self.cache.remove(write.id);

                let entry = match OfferEntry::new(write.id, write.gives, write.wants) {
                    Ok(entry) => entry
                        .with_gas(write.gasprice, write.gasreq, self.offer_gasbase)
                        .with_maker(write.maker.clone()),
                    Err(e) => {
                        warn!(id = write.id, error = %e, "invalid offer write, offer removed");
                        // The removal is a real change even though nothing is relinked
                        return match removed {
                            Some(old) => {
                                let mut out = SemibookEvent::new(EventKind::OfferRetract, side, log);
                                out.offer_id = Some(write.id);
                                out.offer = Some(old);
                                ApplyResult::Applied(out)
                            }
                            None => ApplyResult::Silent,
                        };
                    }
                };

                match self.cache.insert(entry, write.prev) {
                    InsertOutcome::Inserted => {
                        let mut out = SemibookEvent::new(EventKind::OfferWrite, side, log);
                        out.offer_id = Some(write.id);
                        out.offer = self.cache.get(write.id).cloned();
                        ApplyResult::Applied(out)
                    }
                    InsertOutcome::OutsidePrefix => {
                        debug!(id = write.id, prev = ?write.prev, "offer written outside cached prefix");
                        ApplyResult::Silent
                    }
                }
            }
            OfferListEvent::OfferFail(fill) | OfferListEvent::OfferSuccess(fill) => {
                match self.cache.remove(fill.id) {
                    Some(removed) => {
                        let mut out = SemibookEvent::new(event.kind(), side, log);
                        out.offer_id = Some(fill.id);
                        out.offer = Some(removed);
                        out.taker = fill.taker.clone();
                        out.taker_wants = Some(fill.taker_wants);
                        out.taker_gives = Some(fill.taker_gives);
                        ApplyResult::Applied(out)
                    }
                    None => ApplyResult::Silent,
                }
            }
            OfferListEvent::OfferRetract(retract) => match self.cache.remove(retract.id) {
                Some(removed) => {
                    let mut out = SemibookEvent::new(EventKind::OfferRetract, side, log);
                    out.offer_id = Some(retract.id);
                    out.offer = Some(removed);
                    ApplyResult::Applied(out)
                }
                None => ApplyResult::Silent,
            },
            OfferListEvent::SetGasbase(gasbase) => {
                self.offer_gasbase = gasbase.offer_gasbase;
                let mut out = SemibookEvent::new(EventKind::SetGasbase, side, log);
                out.offer_gasbase = Some(gasbase.offer_gasbase);
                ApplyResult::Applied(out)
            }
        }
    }

    // ========================================================================
    // Reorg Handling
    // ========================================================================

    /// Discard everything applied above `block`
    pub fn rollback(&mut self, block: BlockNumber) -> RollbackOutcome {
        if self.last_block <= block {
            return RollbackOutcome::Unchanged;
        }
        if block < self.first_block_number {
            return RollbackOutcome::ReinitializeRequired;
        }

        match self.history.restore(block) {
            RestoreOutcome::Restored(checkpoint) => {
                self.cache = checkpoint.cache;
                self.offer_gasbase = checkpoint.offer_gasbase;
                self.last_block = checkpoint.last_block;
                RollbackOutcome::Restored
            }
            RestoreOutcome::Unavailable => RollbackOutcome::ReinitializeRequired,
            RestoreOutcome::NothingToUndo => {
                self.last_block = block;
                RollbackOutcome::Unchanged
            }
        }
    }

    /// Number of retained reorg checkpoints
    pub fn retained_blocks(&self) -> usize {
        self.history.len()
    }

    fn checkpoint(&self) -> BookCheckpoint {
        BookCheckpoint {
            cache: self.cache.clone(),
            offer_gasbase: self.offer_gasbase,
            last_block: self.last_block,
        }
    }

    /// Capture current state as a snapshot
    pub fn snapshot(&self) -> SemibookSnapshot {
        SemibookSnapshot {
            key: self.key.clone(),
            side: self.side(),
            best: self.best(),
            offers: self.iter().cloned().collect(),
            offer_gasbase: self.offer_gasbase,
            first_block_number: self.first_block_number,
            last_block: self.last_block,
        }
    }
}

/// Immutable snapshot of a semibook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemibookSnapshot {
    /// Offer list
    pub key: OfferListKey,
    /// Side
    pub side: BookSide,
    /// Best offer id
    pub best: Option<OfferId>,
    /// Cached offers, best first
    pub offers: Vec<OfferEntry>,
    /// Offer-list gas base
    pub offer_gasbase: u64,
    /// Snapshot block
    pub first_block_number: BlockNumber,
    /// Last applied block
    pub last_block: BlockNumber,
}

impl SemibookSnapshot {
    /// Cached ids, best first
    pub fn ids(&self) -> Vec<OfferId> {
        self.offers.iter().map(|o| o.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use semibook_types::Market;
    use serde_json::json;

    const BASE: &str = "0xbase";
    const QUOTE: &str = "0xquote";

    fn ready_book(ids: &[OfferId], block: BlockNumber) -> OfferBook {
        let market = Market::new(BASE, QUOTE);
        let mut book = OfferBook::new(market.offer_list(BookSide::Asks), BookSide::Asks, 16);
        let entries = ids
            .iter()
            .map(|id| OfferEntry::new(*id, dec!(10), dec!(20)).unwrap())
            .collect();
        book.load_snapshot(block, entries, 0);
        book
    }

    fn write(id: OfferId, prev: Option<OfferId>, block: BlockNumber) -> RawLog {
        RawLog::new(
            "0xmgv",
            block,
            "OfferWrite",
            json!({
                "outbound_tkn": BASE, "inbound_tkn": QUOTE,
                "id": id, "prev": prev.unwrap_or(0),
                "gives": "100", "wants": "50",
                "gasprice": 1, "gasreq": 100, "maker": "0xmaker"
            }),
        )
    }

    fn retract(id: OfferId, block: BlockNumber) -> RawLog {
        RawLog::new(
            "0xmgv",
            block,
            "OfferRetract",
            json!({"outbound_tkn": BASE, "inbound_tkn": QUOTE, "id": id}),
        )
    }

    fn gasbase(value: u64, block: BlockNumber) -> RawLog {
        RawLog::new(
            "0xmgv",
            block,
            "SetGasbase",
            json!({"outbound_tkn": BASE, "inbound_tkn": QUOTE, "offer_gasbase": value}),
        )
    }

    #[test]
    fn test_write_into_empty_book() {
        let mut book = ready_book(&[], 10);
        let result = book.apply_log(&write(5, None, 11)).unwrap();

        let ApplyResult::Applied(event) = result else {
            panic!("expected Applied, got {:?}", result);
        };
        assert_eq!(event.kind, EventKind::OfferWrite);
        assert_eq!(event.offer_id, Some(5));
        assert_eq!(book.best(), Some(5));
        assert_eq!(book.size(), 1);

        let offer = book.offer(5).unwrap().unwrap();
        assert_eq!(offer.gives, dec!(100));
        assert_eq!(offer.price, dec!(0.5));
    }

    #[test]
    fn test_write_between_cached() {
        let mut book = ready_book(&[5, 7], 10);
        book.apply_log(&write(6, Some(5), 11)).unwrap();
        assert_eq!(book.cache().ids(), vec![5, 6, 7]);
    }

    #[test]
    fn test_retract_best() {
        let mut book = ready_book(&[5, 7], 10);
        let result = book.apply_log(&retract(5, 11)).unwrap();
        assert!(matches!(result, ApplyResult::Applied(_)));
        assert_eq!(book.cache().ids(), vec![7]);
        assert_eq!(book.best(), Some(7));
    }

    #[test]
    fn test_retract_unknown_is_silent() {
        let mut book = ready_book(&[5, 7], 10);
        let result = book.apply_log(&retract(99, 11)).unwrap();
        assert_eq!(result, ApplyResult::Silent);
        assert_eq!(book.cache().ids(), vec![5, 7]);
    }

    #[test]
    fn test_write_outside_prefix_is_silent() {
        let mut book = ready_book(&[5, 7], 10);
        let result = book.apply_log(&write(7, Some(1234), 11)).unwrap();
        assert_eq!(result, ApplyResult::Silent);
        assert_eq!(book.cache().ids(), vec![5]);
    }

    #[test]
    fn test_empty_write_removes_cached_offer() {
        let mut book = ready_book(&[5, 7], 10);
        let mut log = write(5, None, 11);
        log.args["gives"] = json!("0");

        match book.apply_log(&log).unwrap() {
            ApplyResult::Applied(event) => {
                assert_eq!(event.kind, EventKind::OfferRetract);
                assert_eq!(event.offer_id, Some(5));
                assert_eq!(event.offer.map(|o| o.id), Some(5));
            }
            other => panic!("expected an applied removal, got {:?}", other),
        }
        assert_eq!(book.cache().ids(), vec![7]);

        // Not cached: nothing to report
        let mut log = write(42, None, 12);
        log.args["gives"] = json!("0");
        assert_eq!(book.apply_log(&log).unwrap(), ApplyResult::Silent);
    }

    #[test]
    fn test_stale_logs_rejected() {
        let mut book = ready_book(&[5, 7], 10);
        assert_eq!(book.apply_log(&retract(5, 10)).unwrap(), ApplyResult::Stale);
        assert_eq!(book.apply_log(&write(9, None, 3)).unwrap(), ApplyResult::Stale);
        assert_eq!(book.cache().ids(), vec![5, 7]);
        assert_eq!(book.last_block(), 10);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut book = ready_book(&[5, 7], 10);
        book.apply_log(&retract(5, 13)).unwrap();
        assert_eq!(book.apply_log(&retract(7, 12)).unwrap(), ApplyResult::OutOfOrder);
        assert_eq!(book.cache().ids(), vec![7]);
    }

    #[test]
    fn test_not_ready_before_snapshot() {
        let market = Market::new(BASE, QUOTE);
        let mut book = OfferBook::new(market.offer_list(BookSide::Asks), BookSide::Asks, 4);
        book.set_initializing();
        assert_eq!(book.apply_log(&write(1, None, 5)).unwrap(), ApplyResult::NotReady);
        assert_eq!(book.size(), 0);
    }

    #[test]
    fn test_gasbase_applies_to_later_writes() {
        let mut book = ready_book(&[5], 10);
        let result = book.apply_log(&gasbase(80_000, 11)).unwrap();
        assert!(matches!(result, ApplyResult::Applied(SemibookEvent { offer_gasbase: Some(80_000), .. })));

        book.apply_log(&write(6, Some(5), 12)).unwrap();
        assert_eq!(book.entry(6).unwrap().offer_gasbase, 80_000);
        assert_eq!(book.entry(5).unwrap().offer_gasbase, 0);
        assert_eq!(book.cache().ids(), vec![5, 6]);
    }

    #[test]
    fn test_unknown_event_errors() {
        let mut book = ready_book(&[5], 10);
        let log = RawLog::new("0xmgv", 11, "OfferTeleport", json!({}));
        assert!(book.apply_log(&log).is_err());
    }

    #[test]
    fn test_rollback_restores_block_state() {
        let mut book = ready_book(&[5, 7], 10);
        book.apply_log(&write(6, Some(5), 11)).unwrap();
        book.apply_log(&retract(5, 12)).unwrap();
        book.apply_log(&gasbase(42, 12)).unwrap();
        book.apply_log(&write(1, None, 13)).unwrap();
        assert_eq!(book.cache().ids(), vec![1, 6, 7]);

        assert_eq!(book.rollback(11), RollbackOutcome::Restored);
        assert_eq!(book.cache().ids(), vec![5, 6, 7]);
        assert_eq!(book.offer_gasbase(), 0);
        assert!(book.last_block() <= 11);

        // Replaying the new fork works from the restored state
        book.apply_log(&retract(7, 12)).unwrap();
        assert_eq!(book.cache().ids(), vec![5, 6]);
    }

    #[test]
    fn test_rollback_below_snapshot_requires_reinit() {
        let mut book = ready_book(&[5], 10);
        book.apply_log(&retract(5, 11)).unwrap();
        assert_eq!(book.rollback(9), RollbackOutcome::ReinitializeRequired);
    }

    #[test]
    fn test_rollback_noop_when_not_ahead() {
        let mut book = ready_book(&[5], 10);
        book.apply_log(&retract(5, 11)).unwrap();
        assert_eq!(book.rollback(11), RollbackOutcome::Unchanged);
        assert_eq!(book.rollback(20), RollbackOutcome::Unchanged);
        assert!(book.cache().is_empty());
    }

    #[test]
    fn test_rollback_past_retained_window_requires_reinit() {
        let market = Market::new(BASE, QUOTE);
        let mut book = OfferBook::new(market.offer_list(BookSide::Asks), BookSide::Asks, 2);
        book.load_snapshot(10, vec![OfferEntry::new(5, dec!(1), dec!(1)).unwrap()], 0);
        for block in 11..=14 {
            book.apply_log(&gasbase(block, block)).unwrap();
        }
        assert_eq!(book.retained_blocks(), 2);
        assert_eq!(book.rollback(11), RollbackOutcome::ReinitializeRequired);
        assert_eq!(book.rollback(12), RollbackOutcome::Restored);
        assert_eq!(book.offer_gasbase(), 12);
    }

    #[test]
    fn test_snapshot_serializes() {
        let book = ready_book(&[1, 2, 3], 10);
        let snapshot = book.snapshot();
        assert_eq!(snapshot.ids(), vec![1, 2, 3]);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"first_block_number\":10"));
    }
}
