//! Both semibooks of a market

use crate::config::SemibookOptions;
use crate::provider::OfferListReader;
use crate::router::EventRouter;
use crate::semibook::Semibook;
use rust_decimal::Decimal;
use semibook_types::{BookSide, Market, Offer, SemibookResult};
use std::sync::Arc;
use tracing::instrument;

/// Asks and bids of one market
#[derive(Debug, Clone)]
pub struct MarketBooks {
    market: Market,
    asks: Semibook,
    bids: Semibook,
}

impl MarketBooks {
    /// Create both semibooks (uninitialized)
    pub fn new(
        market: Market,
        reader: Arc<dyn OfferListReader>,
        options: SemibookOptions,
    ) -> SemibookResult<Self> {
        let asks = Semibook::new(&market, BookSide::Asks, reader.clone(), options.clone())?;
        let bids = Semibook::new(&market, BookSide::Bids, reader, options)?;
        Ok(Self { market, asks, bids })
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn asks(&self) -> &Semibook {
        &self.asks
    }

    pub fn bids(&self) -> &Semibook {
        &self.bids
    }

    /// Semibook for one side
    pub fn book(&self, side: BookSide) -> &Semibook {
        match side {
            BookSide::Asks => &self.asks,
            BookSide::Bids => &self.bids,
        }
    }

    /// Initialize both sides at the chain head
    pub async fn initialize(&self) -> SemibookResult<()> {
        futures::try_join!(self.asks.initialize(), self.bids.initialize())?;
        Ok(())
    }

    /// Register both sides with a router
    ///
    /// If the bids fail, the asks are unregistered again so the pair can be
    /// retried as a whole.
    #[instrument(skip(self, router), fields(base = %self.market.base, quote = %self.market.quote))]
    pub async fn register(&self, router: &EventRouter) -> SemibookResult<()> {
        router.register(self.asks.clone()).await?;
        if let Err(e) = router.register(self.bids.clone()).await {
            if let Some(asks) = router.unregister(self.asks.key()) {
                asks.abandon_initialization(e.clone());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Wait until both sides are ready
    pub async fn ready(&self) -> SemibookResult<()> {
        futures::try_join!(self.asks.ready(), self.bids.ready())?;
        Ok(())
    }

    pub fn best_ask(&self) -> SemibookResult<Option<Offer>> {
        self.asks.best()
    }

    pub fn best_bid(&self) -> SemibookResult<Option<Offer>> {
        self.bids.best()
    }

    /// Best ask price minus best bid price
    pub fn spread(&self) -> SemibookResult<Option<Decimal>> {
        match (self.best_ask()?, self.best_bid()?) {
            (Some(ask), Some(bid)) => Ok(Some(ask.price - bid.price)),
            _ => Ok(None),
        }
    }

    /// Midpoint of best ask and best bid
    pub fn mid_price(&self) -> SemibookResult<Option<Decimal>> {
        match (self.best_ask()?, self.best_bid()?) {
            (Some(ask), Some(bid)) => Ok(Some((ask.price + bid.price) / Decimal::TWO)),
            _ => Ok(None),
        }
    }

    /// Disconnect both sides
    pub fn disconnect(&self) {
        self.asks.disconnect();
        self.bids.disconnect();
    }
}
