//! Shared types for the semibook offer-list cache
//!
//! This crate provides the domain types used across the workspace.
//! It has minimal dependencies and can be used independently.
//!
//! # Key Types
//!
//! - [`Address`], [`OfferListKey`], [`Market`] - Token addresses and routing keys
//! - [`BookSide`] - Which side of a market an offer list represents
//! - [`OfferEntry`], [`Offer`] - Cached offer records and their priced view
//! - [`RawLog`], [`OfferListEvent`] - Chain logs and their decoded form
//! - [`SemibookError`] - Error types

pub mod address;
pub mod enums;
pub mod error;
pub mod logs;
pub mod offer;

// Re-export commonly used types
pub use address::*;
pub use enums::*;
pub use error::*;
pub use logs::*;
pub use offer::*;

// Re-export rust_decimal for users
pub use rust_decimal::Decimal;

/// Offer identifier, unique within one offer list. `0` is never a valid id.
pub type OfferId = u32;

/// Block height on the remote chain
pub type BlockNumber = u64;
