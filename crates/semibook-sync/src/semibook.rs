//! Async semibook handle
//!
//! A [`Semibook`] owns the cached prefix of one offer list and the listeners
//! observing it. It is a cheap-to-clone handle; clones share state.
//!
//! # Initialization
//!
//! Logs can arrive while the snapshot is still being fetched. The handle
//! queues them and, under the same lock that flips the state to `Ready`, loads
//! the snapshot and replays the queue. Logs already covered by the snapshot
//! are dropped during the replay.

use crate::config::SemibookOptions;
use crate::fetch::fetch_prefix;
use crate::listeners::{EventFilter, ListenerId, Listeners, OnceHandle};
use crate::provider::{JsonLogDecoder, LogDecoder, OfferListReader};
use parking_lot::{RwLock, RwLockReadGuard};
use rust_decimal::Decimal;
use semibook_cache::{ApplyResult, OfferBook, RollbackOutcome, SemibookEvent, SemibookSnapshot, SemibookState};
use semibook_types::{
    BlockNumber, BookSide, Market, Offer, OfferEntry, OfferId, OfferListKey, RawLog, SemibookError,
    SemibookResult,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

/// Snapshot read from the chain, not yet loaded
#[derive(Debug, Clone)]
pub(crate) struct FetchedSnapshot {
    pub block: BlockNumber,
    pub entries: Vec<OfferEntry>,
    pub offer_gasbase: u64,
}

/// Outcome of the latest initialization, as seen by `ready()` waiters
#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Waiting,
    Ready,
    Failed(SemibookError),
}

struct Shared {
    book: OfferBook,
    /// Logs received while initializing
    pending: Vec<RawLog>,
    disconnected: bool,
}

struct SemibookInner {
    key: OfferListKey,
    market: Market,
    options: SemibookOptions,
    reader: Arc<dyn OfferListReader>,
    decoder: Arc<dyn LogDecoder>,
    shared: RwLock<Shared>,
    listeners: Listeners,
    ready_tx: watch::Sender<Readiness>,
}

/// Cached view of one side of a market
#[derive(Clone)]
pub struct Semibook {
    inner: Arc<SemibookInner>,
}

impl fmt::Debug for Semibook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semibook")
            .field("key", &self.inner.key)
            .field("side", &self.side())
            .field("state", &self.state())
            .field("size", &self.size())
            .finish()
    }
}

impl Semibook {
    /// Create an uninitialized semibook decoding logs as JSON arguments
    pub fn new(
        market: &Market,
        side: BookSide,
        reader: Arc<dyn OfferListReader>,
        options: SemibookOptions,
    ) -> SemibookResult<Self> {
        Self::with_decoder(market, side, reader, Arc::new(JsonLogDecoder), options)
    }

    /// Create an uninitialized semibook with a custom log decoder
    pub fn with_decoder(
        market: &Market,
        side: BookSide,
        reader: Arc<dyn OfferListReader>,
        decoder: Arc<dyn LogDecoder>,
        options: SemibookOptions,
    ) -> SemibookResult<Self> {
        options.validate()?;
        let key = market.offer_list(side);
        let book = OfferBook::new(key.clone(), side, options.max_retained_blocks);
        let (ready_tx, _) = watch::channel(Readiness::Waiting);

        Ok(Self {
            inner: Arc::new(SemibookInner {
                key,
                market: market.clone(),
                options,
                reader,
                decoder,
                shared: RwLock::new(Shared {
                    book,
                    pending: Vec::new(),
                    disconnected: false,
                }),
                listeners: Listeners::new(),
                ready_tx,
            }),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Offer list mirrored by this semibook
    pub fn key(&self) -> &OfferListKey {
        &self.inner.key
    }

    /// Market this semibook belongs to
    pub fn market(&self) -> &Market {
        &self.inner.market
    }

    pub fn side(&self) -> BookSide {
        self.inner.shared.read().book.side()
    }

    pub fn options(&self) -> &SemibookOptions {
        &self.inner.options
    }

    /// Lifecycle state
    pub fn state(&self) -> SemibookState {
        self.inner.shared.read().book.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SemibookState::Ready
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.shared.read().disconnected
    }

    /// Id of the best cached offer
    pub fn best_id(&self) -> Option<OfferId> {
        self.inner.shared.read().book.best()
    }

    /// Number of cached offers
    pub fn size(&self) -> usize {
        self.inner.shared.read().book.size()
    }

    /// Block the snapshot was read at
    pub fn first_block_number(&self) -> BlockNumber {
        self.inner.shared.read().book.first_block_number()
    }

    /// Highest block applied to the cache
    pub fn last_block(&self) -> BlockNumber {
        self.inner.shared.read().book.last_block()
    }

    /// Highest block seen, including logs queued during initialization
    pub fn last_seen_block(&self) -> BlockNumber {
        let shared = self.inner.shared.read();
        let queued = shared.pending.iter().map(|l| l.block_number).max().unwrap_or(0);
        shared.book.last_block().max(queued)
    }

    /// Current offer-list gas base
    pub fn offer_gasbase(&self) -> u64 {
        self.inner.shared.read().book.offer_gasbase()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Priced view of a cached offer
    ///
    /// Returns `Ok(None)` for offers outside the cached prefix.
    pub fn offer_info(&self, id: OfferId) -> SemibookResult<Option<Offer>> {
        self.read_ready()?.book.offer(id)
    }

    /// Lazy iteration over cached offers, best first
    ///
    /// The iterator reads the cache on every step, starting from the best offer
    /// at the time of the first call to `next`.
    pub fn iter(&self) -> SemibookIter {
        SemibookIter {
            semibook: self.clone(),
            cursor: None,
            started: false,
        }
    }

    /// All cached offers, best first
    pub fn offers(&self) -> SemibookResult<Vec<Offer>> {
        let shared = self.read_ready()?;
        let side = shared.book.side();
        shared.book.iter().map(|e| Offer::from_entry(e, side)).collect()
    }

    /// Best cached offer
    pub fn best(&self) -> SemibookResult<Option<Offer>> {
        let shared = self.read_ready()?;
        match shared.book.best() {
            Some(id) => shared.book.offer(id),
            None => Ok(None),
        }
    }

    /// First cached offer whose price is not strictly better than `price`
    pub fn pivot_id(&self, price: Decimal) -> Option<OfferId> {
        self.inner.shared.read().book.pivot_id(price)
    }

    fn read_ready(&self) -> SemibookResult<RwLockReadGuard<'_, Shared>> {
        let shared = self.inner.shared.read();
        if shared.disconnected {
            return Err(SemibookError::Disconnected);
        }
        if !shared.book.is_ready() {
            return Err(SemibookError::NotInitialized);
        }
        Ok(shared)
    }

    /// Serializable copy of the cached state
    pub fn snapshot(&self) -> SemibookSnapshot {
        self.inner.shared.read().book.snapshot()
    }

    /// Read the best `max_count` offers at the chain head, bypassing the cache
    #[instrument(skip(self), fields(key = %self.inner.key))]
    pub async fn request_prefix(&self, max_count: usize) -> SemibookResult<Vec<Offer>> {
        let head = self.inner.reader.chain_head().await?;
        let entries = fetch_prefix(
            self.inner.reader.as_ref(),
            &self.inner.key,
            max_count,
            self.inner.options.chunk_size,
            head,
        )
        .await?;

        let side = self.side();
        entries.iter().map(|e| Offer::from_entry(e, side)).collect()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Call `callback` on every cache mutation
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SemibookEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    /// Call `callback` on mutations passing `filter`
    pub fn subscribe_filtered<F>(&self, filter: EventFilter, callback: F) -> ListenerId
    where
        F: Fn(&SemibookEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe_filtered(filter, callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// Resolve with the first mutation accepted by an async predicate
    pub fn once<F, Fut>(&self, predicate: F) -> OnceHandle
    where
        F: Fn(&SemibookEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.inner.listeners.once(predicate)
    }

    /// Resolve with the first mutation passing `filter`
    pub fn once_matching(&self, filter: EventFilter) -> OnceHandle {
        self.inner.listeners.once_matching(filter)
    }

    pub fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }

    /// Wait until the semibook is ready
    ///
    /// Fails with the error of the latest initialization attempt if it did not
    /// succeed, and with [`SemibookError::Disconnected`] once disconnected. A
    /// new attempt clears the failure.
    pub async fn ready(&self) -> SemibookResult<()> {
        let mut rx = self.inner.ready_tx.subscribe();
        loop {
            let readiness = rx.borrow_and_update().clone();
            if self.is_disconnected() {
                return Err(SemibookError::Disconnected);
            }
            match readiness {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(e) => return Err(e),
                Readiness::Waiting => {}
            }
            rx.changed().await.map_err(|_| SemibookError::ChannelClosed)?;
        }
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Initialize from a snapshot read at the current chain head
    #[instrument(skip(self), fields(key = %self.inner.key))]
    pub async fn initialize(&self) -> SemibookResult<()> {
        self.begin_initialization()?;
        let fetched = async {
            let block = self.inner.reader.chain_head().await?;
            self.fetch_snapshot(block).await
        }
        .await;
        self.finish_initialization(fetched)
    }

    /// Initialize from a snapshot read at `block`
    #[instrument(skip(self), fields(key = %self.inner.key))]
    pub async fn initialize_at(&self, block: BlockNumber) -> SemibookResult<()> {
        self.begin_initialization()?;
        let fetched = self.fetch_snapshot(block).await;
        self.finish_initialization(fetched)
    }

    /// Start queueing logs ahead of a snapshot
    pub(crate) fn begin_initialization(&self) -> SemibookResult<()> {
        let mut shared = self.inner.shared.write();
        if shared.disconnected {
            return Err(SemibookError::Disconnected);
        }
        shared.book.set_initializing();
        self.inner.ready_tx.send_replace(Readiness::Waiting);
        debug!(key = %self.inner.key, "initializing");
        Ok(())
    }

    pub(crate) async fn fetch_snapshot(&self, block: BlockNumber) -> SemibookResult<FetchedSnapshot> {
        let reader = self.inner.reader.as_ref();
        let entries = fetch_prefix(
            reader,
            &self.inner.key,
            self.inner.options.max_offers,
            self.inner.options.chunk_size,
            block,
        )
        .await?;
        let offer_gasbase = reader.offer_gasbase(&self.inner.key, block).await?;

        Ok(FetchedSnapshot {
            block,
            entries,
            offer_gasbase,
        })
    }

    /// Load a snapshot and replay queued logs
    pub(crate) fn commit_snapshot(&self, snapshot: FetchedSnapshot) -> SemibookResult<()> {
        let events = {
            let mut shared = self.inner.shared.write();
            if shared.disconnected {
                return Err(SemibookError::Disconnected);
            }

            let offers = snapshot.entries.len();
            shared
                .book
                .load_snapshot(snapshot.block, snapshot.entries, snapshot.offer_gasbase);

            let pending = std::mem::take(&mut shared.pending);
            let mut events = Vec::new();
            for log in &pending {
                match self.apply_locked(&mut shared, log) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => error!(block = log.block_number, error = %e, "dropping undecodable queued log"),
                }
            }

            self.inner.ready_tx.send_replace(Readiness::Ready);
            info!(
                key = %self.inner.key,
                block = snapshot.block,
                offers,
                replayed = pending.len(),
                "semibook ready"
            );
            events
        };

        for event in &events {
            self.inner.listeners.dispatch(event);
        }
        Ok(())
    }

    /// Drop a failed initialization and fail pending `ready()` calls with `error`
    pub(crate) fn abandon_initialization(&self, error: SemibookError) {
        let mut shared = self.inner.shared.write();
        shared.book.reset();
        shared.pending.clear();
        self.inner.ready_tx.send_replace(Readiness::Failed(error));
    }

    fn finish_initialization(&self, fetched: SemibookResult<FetchedSnapshot>) -> SemibookResult<()> {
        match fetched {
            Ok(snapshot) => self.commit_snapshot(snapshot),
            Err(e) => {
                warn!(key = %self.inner.key, error = %e, "initialization failed");
                self.abandon_initialization(e.clone());
                Err(e)
            }
        }
    }

    // ========================================================================
    // Log Handling
    // ========================================================================

    /// Apply one log and notify listeners
    ///
    /// Logs received while initializing are queued. Fails only if the log
    /// cannot be decoded.
    pub fn handle_log(&self, log: &RawLog) -> SemibookResult<()> {
        let event = {
            let mut shared = self.inner.shared.write();
            if shared.disconnected {
                return Ok(());
            }
            match shared.book.state() {
                SemibookState::Uninitialized => {
                    trace!(block = log.block_number, "ignoring log before initialization");
                    return Ok(());
                }
                SemibookState::Initializing => {
                    shared.pending.push(log.clone());
                    return Ok(());
                }
                SemibookState::Ready => {}
            }
            self.apply_locked(&mut shared, log)?
        };

        if let Some(event) = event {
            self.inner.listeners.dispatch(&event);
        }
        Ok(())
    }

    /// Apply logs in order
    pub fn handle_logs(&self, logs: &[RawLog]) -> SemibookResult<()> {
        logs.iter().try_for_each(|log| self.handle_log(log))
    }

    fn apply_locked(&self, shared: &mut Shared, log: &RawLog) -> SemibookResult<Option<SemibookEvent>> {
        let decoded = self.inner.decoder.decode(log)?;
        if decoded.offer_list() != self.inner.key {
            debug!(list = %decoded.offer_list(), "ignoring log for another offer list");
            return Ok(None);
        }

        match shared.book.apply_event(&decoded, log) {
            ApplyResult::Applied(event) => Ok(Some(event)),
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Reorgs and Shutdown
    // ========================================================================

    /// Undo everything applied above `block`
    ///
    /// Restores a retained checkpoint when possible; otherwise reinitializes
    /// from a snapshot pinned at `block`.
    #[instrument(skip(self), fields(key = %self.inner.key))]
    pub async fn rollback(&self, block: BlockNumber) -> SemibookResult<()> {
        let outcome = {
            let mut shared = self.inner.shared.write();
            if shared.disconnected {
                return Err(SemibookError::Disconnected);
            }
            match shared.book.state() {
                SemibookState::Uninitialized => return Ok(()),
                SemibookState::Initializing => {
                    let before = shared.pending.len();
                    shared.pending.retain(|l| l.block_number <= block);
                    debug!(dropped = before - shared.pending.len(), "pruned queued logs");
                    return Ok(());
                }
                SemibookState::Ready => shared.book.rollback(block),
            }
        };

        match outcome {
            RollbackOutcome::Unchanged => Ok(()),
            RollbackOutcome::Restored => {
                info!(block, "restored checkpoint");
                Ok(())
            }
            RollbackOutcome::ReinitializeRequired => {
                info!(block, "rollback beyond retained state, reinitializing");
                match self.initialize_at(block).await {
                    Ok(()) => Ok(()),
                    Err(SemibookError::Disconnected) => Err(SemibookError::Disconnected),
                    Err(e) => {
                        warn!(block, error = %e, "reinitialization after rollback failed");
                        Err(SemibookError::RollbackUnavailable { block })
                    }
                }
            }
        }
    }

    /// Stop applying logs and discard all state and listeners
    pub fn disconnect(&self) {
        {
            let mut shared = self.inner.shared.write();
            if shared.disconnected {
                return;
            }
            shared.disconnected = true;
            shared.pending.clear();
            shared.book.reset();
        }
        self.inner.listeners.clear();
        self.inner.ready_tx.send_replace(Readiness::Failed(SemibookError::Disconnected));
        info!(key = %self.inner.key, "semibook disconnected");
    }
}

/// Lazy iterator over a semibook's cached offers
pub struct SemibookIter {
    semibook: Semibook,
    cursor: Option<OfferId>,
    started: bool,
}

impl Iterator for SemibookIter {
    type Item = SemibookResult<Offer>;

    fn next(&mut self) -> Option<Self::Item> {
        let shared = self.semibook.inner.shared.read();
        let id = if self.started {
            self.cursor?
        } else {
            self.started = true;
            shared.book.best()?
        };

        let entry = shared.book.entry(id)?;
        self.cursor = entry.next;
        Some(Offer::from_entry(entry, shared.book.side()))
    }
}
