//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use rust_decimal::Decimal;
use semibook_sync::mock::MockChain;
use semibook_sync::{EventRouter, RouterConfig, Semibook, SemibookOptions};
use semibook_types::{BlockNumber, BookSide, Market, OfferEntry, OfferId, OfferListKey, RawLog};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const MANGROVE: &str = "0x1111111111111111111111111111111111111111";
pub const BASE: &str = "0x2222222222222222222222222222222222222222";
pub const QUOTE: &str = "0x3333333333333333333333333333333333333333";

/// Route test logs through the env filter (RUST_LOG=semibook_sync=debug)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn market() -> Market {
    Market::new(BASE, QUOTE)
}

pub fn asks_key() -> OfferListKey {
    market().offer_list(BookSide::Asks)
}

pub fn bids_key() -> OfferListKey {
    market().offer_list(BookSide::Bids)
}

/// Ask entries priced 1 + id/100 quote per base, best first
pub fn ask_entries(ids: &[OfferId]) -> Vec<OfferEntry> {
    ids.iter()
        .map(|id| OfferEntry::new(*id, Decimal::from(100), Decimal::from(100 + id)).unwrap())
        .collect()
}

pub fn write_log(
    key: &OfferListKey,
    id: OfferId,
    prev: OfferId,
    gives: &str,
    wants: &str,
    block: BlockNumber,
) -> RawLog {
    RawLog::new(
        MANGROVE,
        block,
        "OfferWrite",
        json!({
            "outbound_tkn": key.outbound_tkn.as_str(),
            "inbound_tkn": key.inbound_tkn.as_str(),
            "id": id,
            "prev": prev,
            "gives": gives,
            "wants": wants,
            "gasprice": 10,
            "gasreq": 80000,
            "maker": "0x4444444444444444444444444444444444444444"
        }),
    )
    .with_tx_hash(format!("0x{:064x}", block))
}

pub fn retract_log(key: &OfferListKey, id: OfferId, block: BlockNumber) -> RawLog {
    RawLog::new(
        MANGROVE,
        block,
        "OfferRetract",
        json!({
            "outbound_tkn": key.outbound_tkn.as_str(),
            "inbound_tkn": key.inbound_tkn.as_str(),
            "id": id
        }),
    )
}

pub fn success_log(key: &OfferListKey, id: OfferId, taker_wants: &str, taker_gives: &str, block: BlockNumber) -> RawLog {
    RawLog::new(
        MANGROVE,
        block,
        "OfferSuccess",
        json!({
            "outbound_tkn": key.outbound_tkn.as_str(),
            "inbound_tkn": key.inbound_tkn.as_str(),
            "id": id,
            "taker": "0x5555555555555555555555555555555555555555",
            "taker_wants": taker_wants,
            "taker_gives": taker_gives
        }),
    )
}

pub fn semibook(chain: &MockChain, side: BookSide, options: SemibookOptions) -> Semibook {
    Semibook::new(&market(), side, Arc::new(chain.clone()), options).unwrap()
}

/// Router running on its own task, with the mock tracking processed blocks
pub async fn running_router(chain: &MockChain) -> EventRouter {
    let router = EventRouter::new(RouterConfig::new(MANGROVE), Arc::new(chain.clone()))
        .await
        .unwrap();
    chain.track_processed(router.processed_blocks());

    let runner = router.clone();
    tokio::spawn(async move { runner.run().await });
    wait_until(|| chain.subscriber_count() == 1).await;
    router
}

/// Push a block and wait until the router has routed it
pub async fn push_and_process(chain: &MockChain, router: &EventRouter, number: BlockNumber, logs: Vec<RawLog>) {
    let mut processed = router.processed_blocks();
    chain.push_block(number, logs);
    while *processed.borrow_and_update() != number {
        processed.changed().await.unwrap();
    }
}

/// Poll a condition for up to one second
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
