//! Event router
//!
//! The router owns the single log subscription for a contract and fans each
//! offer-list log out to the semibook registered for its token pair.
//!
//! # Registration
//!
//! A semibook is routed to before its snapshot is read, so no log can slip
//! between the snapshot and live delivery. The snapshot is pinned at the
//! router's last processed block; if the router processes another block while
//! the snapshot is being read, the attempt is thrown away and retried once that
//! block is done.
//!
//! # Example
//!
//! ```no_run
//! use semibook_sync::{EventRouter, RouterConfig, Semibook, SemibookOptions};
//! use semibook_sync::provider::{BlockManager, OfferListReader};
//! use semibook_types::{BookSide, Market};
//! use std::sync::Arc;
//!
//! async fn example(
//!     chain: Arc<dyn BlockManager>,
//!     reader: Arc<dyn OfferListReader>,
//! ) -> semibook_types::SemibookResult<()> {
//!     let router = EventRouter::new(RouterConfig::new("0xmangrove"), chain).await?;
//!     let runner = router.clone();
//!     tokio::spawn(async move { runner.run().await });
//!
//!     let market = Market::new("0xbase", "0xquote");
//!     let asks = Semibook::new(&market, BookSide::Asks, reader, SemibookOptions::default())?;
//!     router.register(asks.clone()).await?;
//!     println!("best ask: {:?}", asks.best()?);
//!     Ok(())
//! }
//! ```

use crate::config::RouterConfig;
use crate::provider::{BlockManager, BlockNotification};
use crate::semibook::Semibook;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use semibook_types::{BlockNumber, LogFilter, OfferListKey, RawLog, SemibookError, SemibookResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

struct RouterInner {
    config: RouterConfig,
    filter: LogFilter,
    block_manager: Arc<dyn BlockManager>,
    /// Routing key -> semibook
    routes: DashMap<String, Semibook>,
    processed_tx: watch::Sender<BlockNumber>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
}

/// Routes offer-list logs to registered semibooks
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("address", &self.inner.config.address)
            .field("routes", &self.inner.routes.len())
            .field("last_processed_block", &self.last_processed_block())
            .finish()
    }
}

impl EventRouter {
    /// Create a router starting at the block manager's last block
    pub async fn new(config: RouterConfig, block_manager: Arc<dyn BlockManager>) -> SemibookResult<Self> {
        config.validate()?;
        let last_block = block_manager.last_block().await?;
        let (processed_tx, _) = watch::channel(last_block);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(RouterInner {
                filter: LogFilter::offer_list_events(config.address.clone()),
                config,
                block_manager,
                routes: DashMap::new(),
                processed_tx,
                shutdown_tx,
                running: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Last block whose logs have been routed
    pub fn last_processed_block(&self) -> BlockNumber {
        *self.inner.processed_tx.borrow()
    }

    /// Receiver updated after every processed block or rollback
    pub fn processed_blocks(&self) -> watch::Receiver<BlockNumber> {
        self.inner.processed_tx.subscribe()
    }

    /// Semibook registered for an offer list
    pub fn semibook(&self, key: &OfferListKey) -> Option<Semibook> {
        self.inner.routes.get(&key.routing_key()).map(|r| r.value().clone())
    }

    /// Number of registered semibooks
    pub fn route_count(&self) -> usize {
        self.inner.routes.len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Route logs to `semibook` and initialize it
    ///
    /// Fails with [`SemibookError::RegistrationRace`] if every attempt raced a
    /// new block; the route is removed in that case.
    #[instrument(skip(self, semibook), fields(key = %semibook.key()))]
    pub async fn register(&self, semibook: Semibook) -> SemibookResult<()> {
        let route = semibook.key().routing_key();
        match self.inner.routes.entry(route.clone()) {
            Entry::Occupied(_) => {
                return Err(SemibookError::Configuration(format!(
                    "offer list {} is already registered",
                    semibook.key()
                )));
            }
            Entry::Vacant(slot) => {
                semibook.begin_initialization()?;
                slot.insert(semibook.clone());
            }
        }

        let result = self.initialize_registered(&semibook).await;
        if let Err(e) = &result {
            self.inner.routes.remove(&route);
            semibook.abandon_initialization(e.clone());
        }
        result
    }

    async fn initialize_registered(&self, semibook: &Semibook) -> SemibookResult<()> {
        let max_attempts = self.inner.config.max_registration_attempts;
        let mut blocks = self.inner.processed_tx.subscribe();

        for attempt in 1..=max_attempts {
            let pinned = *blocks.borrow_and_update();
            let snapshot = semibook.fetch_snapshot(pinned).await?;

            if !blocks.has_changed().unwrap_or(true) {
                semibook.commit_snapshot(snapshot)?;
                info!(attempt, block = pinned, "semibook registered");
                return Ok(());
            }

            warn!(
                attempt,
                pinned,
                current = *blocks.borrow(),
                "block processed during initialization, retrying"
            );
            if attempt < max_attempts {
                self.next_processed_block(&mut blocks).await?;
            }
        }

        Err(SemibookError::RegistrationRace {
            attempts: max_attempts,
        })
    }

    /// Wait for the router to process its next block
    pub async fn wait_next_block(&self) -> SemibookResult<BlockNumber> {
        let mut blocks = self.inner.processed_tx.subscribe();
        self.next_processed_block(&mut blocks).await
    }

    async fn next_processed_block(&self, blocks: &mut watch::Receiver<BlockNumber>) -> SemibookResult<BlockNumber> {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(SemibookError::Disconnected);
        }

        tokio::select! {
            changed = blocks.changed() => {
                changed.map_err(|_| SemibookError::ChannelClosed)?;
                Ok(*blocks.borrow_and_update())
            }
            _ = shutdown.changed() => Err(SemibookError::Disconnected),
        }
    }

    /// Stop routing to an offer list, leaving its semibook connected
    ///
    /// The semibook is returned so it can be registered again.
    pub fn unregister(&self, key: &OfferListKey) -> Option<Semibook> {
        self.inner.routes.remove(&key.routing_key()).map(|(_, semibook)| semibook)
    }

    /// Stop routing to an offer list and disconnect its semibook
    pub fn disconnect(&self, key: &OfferListKey) -> bool {
        match self.inner.routes.remove(&key.routing_key()) {
            Some((_, semibook)) => {
                semibook.disconnect();
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    /// Consume the block manager's notifications until shutdown
    ///
    /// Returns an error if the log stream closes or a routed log cannot be
    /// decoded.
    #[instrument(skip(self), fields(address = %self.inner.config.address))]
    pub async fn run(&self) -> SemibookResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(SemibookError::Configuration(
                "router is already running".to_string(),
            ));
        }
        let result = self.run_loop().await;
        self.inner.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_loop(&self) -> SemibookResult<()> {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        let mut notifications = self
            .inner
            .block_manager
            .subscribe_logs(self.inner.filter.clone())
            .await?;
        info!("router started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("router shutting down");
                    return Ok(());
                }
                notification = notifications.recv() => match notification {
                    Some(BlockNotification::Block { number, logs }) => {
                        self.handle_block(number, &logs)?;
                    }
                    Some(BlockNotification::Rollback { block }) => {
                        self.rollback(block).await;
                    }
                    None => {
                        error!("log stream closed");
                        return Err(SemibookError::ChannelClosed);
                    }
                },
            }
        }
    }

    /// Route the logs of one block
    pub fn handle_block(&self, number: BlockNumber, logs: &[RawLog]) -> SemibookResult<()> {
        for log in logs {
            self.route_log(log)?;
        }
        self.inner.processed_tx.send_replace(number);
        trace!(block = number, logs = logs.len(), "block processed");
        Ok(())
    }

    fn route_log(&self, log: &RawLog) -> SemibookResult<()> {
        if !self.inner.filter.matches(log) {
            trace!(name = %log.name, "ignoring unrecognized log");
            return Ok(());
        }
        let Some(route) = log.routing_key() else {
            warn!(name = %log.name, block = log.block_number, "log without token pair");
            return Ok(());
        };
        // Clone the handle so the map guard is released before applying
        let Some(semibook) = self.inner.routes.get(&route).map(|r| r.value().clone()) else {
            return Ok(());
        };

        semibook.handle_log(log).map_err(|e| {
            error!(error = %e, block = log.block_number, "failed to apply routed log");
            e
        })
    }

    /// Undo blocks above `block` in every semibook that has seen them
    #[instrument(skip(self))]
    pub async fn rollback(&self, block: BlockNumber) {
        let affected: Vec<Semibook> = self
            .inner
            .routes
            .iter()
            .filter(|r| r.value().last_seen_block() > block)
            .map(|r| r.value().clone())
            .collect();

        debug!(semibooks = affected.len(), "forwarding rollback");
        for semibook in affected {
            if let Err(e) = semibook.rollback(block).await {
                warn!(key = %semibook.key(), error = %e, "semibook rollback failed");
            }
        }
        self.inner.processed_tx.send_replace(block);
    }

    /// Stop the event loop and any pending registration waits
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }
}
