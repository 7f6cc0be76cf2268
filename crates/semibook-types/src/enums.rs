//! BookSide and EventKind enums

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a market an offer list represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    /// Offers selling base for quote (best = lowest price)
    Asks,
    /// Offers buying base with quote (best = highest price)
    Bids,
}

impl BookSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Self::Asks => Self::Bids,
            Self::Bids => Self::Asks,
        }
    }

    /// Returns the side name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asks => "asks",
            Self::Bids => "bids",
        }
    }
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five offer-list events the cache understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Offer created or updated (insert-or-move)
    OfferWrite,
    /// Offer taken but the maker failed to deliver
    OfferFail,
    /// Offer taken successfully
    OfferSuccess,
    /// Offer retracted by its maker
    OfferRetract,
    /// Offer-list gas base changed
    SetGasbase,
}

impl EventKind {
    /// All recognized kinds, in log-filter order
    pub const ALL: [EventKind; 5] = [
        Self::OfferWrite,
        Self::OfferFail,
        Self::OfferSuccess,
        Self::OfferRetract,
        Self::SetGasbase,
    ];

    /// Returns the event name as it appears in chain logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfferWrite => "OfferWrite",
            Self::OfferFail => "OfferFail",
            Self::OfferSuccess => "OfferSuccess",
            Self::OfferRetract => "OfferRetract",
            Self::SetGasbase => "SetGasbase",
        }
    }

    /// Look up a kind by its log name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Returns true if this event removes an offer from the list
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::OfferFail | Self::OfferSuccess | Self::OfferRetract)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
