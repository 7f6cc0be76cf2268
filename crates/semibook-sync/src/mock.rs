//! In-memory chain for testing
//!
//! [`MockChain`] plays both collaborators of a semibook: it answers offer-list
//! reads from versioned lists and pushes blocks and rollbacks to log
//! subscribers. Every page read is recorded.

use crate::provider::{BlockManager, BlockNotification, OfferListPage, OfferListReader};
use async_trait::async_trait;
use parking_lot::Mutex;
use semibook_types::{
    BlockNumber, LogFilter, OfferEntry, OfferId, OfferListKey, RawLog, SemibookError,
    SemibookResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A recorded `read_prefix` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRead {
    pub key: OfferListKey,
    pub from_id: OfferId,
    pub page_size: usize,
    pub at_block: BlockNumber,
}

#[derive(Debug, Clone)]
struct ListVersion {
    block: BlockNumber,
    entries: Vec<OfferEntry>,
}

#[derive(Default)]
struct MockChainInner {
    head: Mutex<BlockNumber>,
    lists: Mutex<HashMap<OfferListKey, Vec<ListVersion>>>,
    gasbases: Mutex<HashMap<OfferListKey, u64>>,
    reads: Mutex<Vec<PageRead>>,
    subscribers: Mutex<Vec<(LogFilter, mpsc::UnboundedSender<BlockNotification>)>>,
    fail_reads: AtomicBool,
    racing_reads: AtomicU32,
    processed: Mutex<Option<watch::Receiver<BlockNumber>>>,
}

/// Mock chain for testing
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<MockChainInner>,
}

impl MockChain {
    /// Create a chain whose head is `head`
    pub fn new(head: BlockNumber) -> Self {
        let inner = MockChainInner::default();
        *inner.head.lock() = head;
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Current head
    pub fn head(&self) -> BlockNumber {
        *self.inner.head.lock()
    }

    /// Set the contents of an offer list from `block` onwards
    ///
    /// Entries are given best first; links are derived from their order.
    pub fn set_offers(&self, key: &OfferListKey, block: BlockNumber, entries: Vec<OfferEntry>) {
        let mut lists = self.inner.lists.lock();
        let versions = lists.entry(key.clone()).or_default();
        versions.retain(|v| v.block != block);
        versions.push(ListVersion { block, entries });
        versions.sort_by_key(|v| v.block);
    }

    /// Set an offer list's gas base
    pub fn set_gasbase(&self, key: &OfferListKey, gasbase: u64) {
        self.inner.gasbases.lock().insert(key.clone(), gasbase);
    }

    /// Make subsequent reads fail
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Produce a new block during each of the next `count` page reads
    ///
    /// When a processed-block receiver is tracked, the read returns only after
    /// the new block has been processed.
    pub fn race_next_reads(&self, count: u32) {
        self.inner.racing_reads.store(count, Ordering::SeqCst);
    }

    /// Track the blocks processed by a router
    pub fn track_processed(&self, processed: watch::Receiver<BlockNumber>) {
        *self.inner.processed.lock() = Some(processed);
    }

    /// Recorded page reads
    pub fn reads(&self) -> Vec<PageRead> {
        self.inner.reads.lock().clone()
    }

    /// Forget recorded page reads
    pub fn clear_reads(&self) {
        self.inner.reads.lock().clear();
    }

    /// Number of live log subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Publish a block, advancing the head
    pub fn push_block(&self, number: BlockNumber, logs: Vec<RawLog>) {
        {
            let mut head = self.inner.head.lock();
            *head = (*head).max(number);
        }
        self.inner.subscribers.lock().retain(|(filter, tx)| {
            let logs = logs.iter().filter(|l| filter.matches(l)).cloned().collect();
            tx.send(BlockNotification::Block { number, logs }).is_ok()
        });
    }

    /// Publish a reorg back to `block`
    pub fn push_rollback(&self, block: BlockNumber) {
        *self.inner.head.lock() = block;
        self.inner
            .subscribers
            .lock()
            .retain(|(_, tx)| tx.send(BlockNotification::Rollback { block }).is_ok());
    }

    /// Close every log stream
    pub fn close_streams(&self) {
        self.inner.subscribers.lock().clear();
    }

    fn list_at(&self, key: &OfferListKey, block: BlockNumber) -> Vec<OfferEntry> {
        self.inner
            .lists
            .lock()
            .get(key)
            .and_then(|versions| versions.iter().rev().find(|v| v.block <= block))
            .map(|v| v.entries.clone())
            .unwrap_or_default()
    }

    async fn maybe_race(&self) {
        let raced = self
            .inner
            .racing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !raced {
            return;
        }

        let number = self.head() + 1;
        self.push_block(number, Vec::new());

        let processed = self.inner.processed.lock().clone();
        if let Some(mut processed) = processed {
            while *processed.borrow_and_update() < number {
                if processed.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl OfferListReader for MockChain {
    async fn chain_head(&self) -> SemibookResult<BlockNumber> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(SemibookError::provider("chain_head", "mock read failure"));
        }
        Ok(self.head())
    }

    async fn read_prefix(
        &self,
        key: &OfferListKey,
        from_id: OfferId,
        page_size: usize,
        at_block: BlockNumber,
    ) -> SemibookResult<OfferListPage> {
        self.inner.reads.lock().push(PageRead {
            key: key.clone(),
            from_id,
            page_size,
            at_block,
        });
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(SemibookError::provider("read_prefix", "mock read failure"));
        }

        let list = self.list_at(key, at_block);
        let start = if from_id == 0 {
            0
        } else {
            match list.iter().position(|e| e.id == from_id) {
                Some(index) => index,
                None => return Ok(OfferListPage::default()),
            }
        };
        let end = (start + page_size).min(list.len());

        let entries = (start..end)
            .map(|i| {
                let prev = i.checked_sub(1).map(|p| list[p].id);
                let next = list.get(i + 1).map(|e| e.id);
                list[i].clone().with_links(prev, next)
            })
            .collect();
        let next_id = list.get(end).map_or(0, |e| e.id);

        self.maybe_race().await;
        Ok(OfferListPage::new(next_id, entries))
    }

    async fn offer_gasbase(&self, key: &OfferListKey, _at_block: BlockNumber) -> SemibookResult<u64> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(SemibookError::provider("offer_gasbase", "mock read failure"));
        }
        Ok(self.inner.gasbases.lock().get(key).copied().unwrap_or(0))
    }
}

#[async_trait]
impl BlockManager for MockChain {
    async fn last_block(&self) -> SemibookResult<BlockNumber> {
        Ok(self.head())
    }

    async fn subscribe_logs(
        &self,
        filter: LogFilter,
    ) -> SemibookResult<mpsc::UnboundedReceiver<BlockNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push((filter, tx));
        Ok(rx)
    }
}
