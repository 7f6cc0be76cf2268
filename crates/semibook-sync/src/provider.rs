//! Chain collaborator abstractions
//!
//! A semibook never talks to a node directly. It reads offer-list snapshots
//! through an [`OfferListReader`] and receives logs from a [`BlockManager`],
//! which tracks the canonical chain and reports reorgs. Both are traits so the
//! sync layer can be driven by [`MockChain`](crate::mock::MockChain) in tests.

use async_trait::async_trait;
use semibook_types::{
    BlockNumber, LogFilter, OfferEntry, OfferId, OfferListEvent, OfferListKey, RawLog,
    SemibookResult,
};
use tokio::sync::mpsc;

/// One page of an offer-list read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferListPage {
    /// Id of the first offer after this page (`0` when the list ends)
    pub next_id: OfferId,
    /// Offers in list order, best first
    pub entries: Vec<OfferEntry>,
}

impl OfferListPage {
    pub fn new(next_id: OfferId, entries: Vec<OfferEntry>) -> Self {
        Self { next_id, entries }
    }

    /// Check if the list continues past this page
    pub fn has_more(&self) -> bool {
        self.next_id != 0
    }
}

/// Read access to offer lists on the remote contract
#[async_trait]
pub trait OfferListReader: Send + Sync {
    /// Current chain head
    async fn chain_head(&self) -> SemibookResult<BlockNumber>;

    /// Read up to `page_size` offers starting at `from_id`, as of `at_block`
    ///
    /// `from_id == 0` starts from the best offer.
    async fn read_prefix(
        &self,
        key: &OfferListKey,
        from_id: OfferId,
        page_size: usize,
        at_block: BlockNumber,
    ) -> SemibookResult<OfferListPage>;

    /// Offer-list gas base as of `at_block`
    async fn offer_gasbase(&self, key: &OfferListKey, at_block: BlockNumber) -> SemibookResult<u64>;
}

/// Notification pushed by a block manager
#[derive(Debug, Clone, PartialEq)]
pub enum BlockNotification {
    /// A new canonical block and the matching logs it contains
    Block {
        number: BlockNumber,
        logs: Vec<RawLog>,
    },
    /// Blocks above `block` were reorged out
    Rollback { block: BlockNumber },
}

impl BlockNotification {
    /// Block number carried by the notification
    pub fn block_number(&self) -> BlockNumber {
        match self {
            Self::Block { number, .. } => *number,
            Self::Rollback { block } => *block,
        }
    }
}

/// Source of canonical blocks and reorg notifications
#[async_trait]
pub trait BlockManager: Send + Sync {
    /// Last block the manager has processed
    async fn last_block(&self) -> SemibookResult<BlockNumber>;

    /// Subscribe to blocks carrying logs that match `filter`
    ///
    /// Notifications arrive in chain order; a rollback is delivered before any
    /// block of the replacing fork.
    async fn subscribe_logs(
        &self,
        filter: LogFilter,
    ) -> SemibookResult<mpsc::UnboundedReceiver<BlockNotification>>;
}

/// Turns raw logs into offer-list events
pub trait LogDecoder: Send + Sync {
    fn decode(&self, log: &RawLog) -> SemibookResult<OfferListEvent>;
}

/// Decoder for logs whose arguments arrive as named JSON values
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogDecoder;

impl LogDecoder for JsonLogDecoder {
    fn decode(&self, log: &RawLog) -> SemibookResult<OfferListEvent> {
        OfferListEvent::decode(log)
    }
}
