//! Synchronous offer-list cache engine
//!
//! This crate holds the state of one semibook: the cached prefix of an
//! on-chain offer list, the bookkeeping needed to reject stale logs, and the
//! per-block checkpoints used to undo reorged blocks. It performs no I/O; the
//! async layer in `semibook-sync` feeds it snapshots and decoded logs.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized → Initializing → Ready
//!        ↑                         │
//!        └──────── reset ──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use semibook_cache::{OfferBook, SemibookState};
//! use semibook_types::{BookSide, Market};
//!
//! let market = Market::new("0xbase", "0xquote");
//! let book = OfferBook::new(market.offer_list(BookSide::Asks), BookSide::Asks, 50);
//! assert_eq!(book.state(), SemibookState::Uninitialized);
//! ```

pub mod book;
pub mod cache;
pub mod history;

// Re-export main types
pub use book::{ApplyResult, OfferBook, RollbackOutcome, SemibookEvent, SemibookSnapshot, SemibookState};
pub use cache::{InsertOutcome, LinkError, OfferCache, OfferIter};
pub use history::{Checkpoint, CheckpointHistory, RestoreOutcome};
