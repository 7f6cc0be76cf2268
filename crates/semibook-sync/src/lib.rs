//! Async synchronization layer for semibooks
//!
//! This crate keeps [`Semibook`] caches in step with the chain:
//!
//! - [`provider`] - Traits for the offer-list reader and block manager
//! - [`Semibook`] - Cached offer-list prefix with initialization gate and reorg handling
//! - [`EventRouter`] - Single log subscription fanned out to registered semibooks
//! - [`listeners`] - Persistent callbacks and one-shot subscriptions
//! - [`MarketBooks`] - Asks and bids of one market
//!
//! # Example
//!
//! ```no_run
//! use semibook_sync::{MarketBooks, SemibookOptions};
//! use semibook_sync::provider::OfferListReader;
//! use semibook_types::Market;
//! use std::sync::Arc;
//!
//! async fn example(reader: Arc<dyn OfferListReader>) -> semibook_types::SemibookResult<()> {
//!     let books = MarketBooks::new(Market::new("0xbase", "0xquote"), reader, SemibookOptions::default())?;
//!     books.initialize().await?;
//!
//!     for offer in books.asks().iter() {
//!         let offer = offer?;
//!         println!("#{} {} @ {}", offer.id, offer.volume, offer.price);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod fetch;
pub mod listeners;
pub mod market;
pub mod provider;
pub mod router;
pub mod semibook;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types
pub use config::{RouterConfig, SemibookOptions};
pub use fetch::fetch_prefix;
pub use listeners::{EventFilter, ListenerId, Listeners, OnceHandle, OnceState};
pub use market::MarketBooks;
pub use provider::{BlockManager, BlockNotification, JsonLogDecoder, LogDecoder, OfferListPage, OfferListReader};
pub use router::EventRouter;
pub use semibook::{Semibook, SemibookIter};

// Re-export cache types surfaced through the handle
pub use semibook_cache::{SemibookEvent, SemibookSnapshot, SemibookState};
