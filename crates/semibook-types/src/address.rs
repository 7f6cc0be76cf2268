//! Token addresses, offer-list keys and markets

use crate::BookSide;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain address (token, maker, taker or contract)
///
/// Stored lower-cased so that addresses coming from logs, configuration and
/// RPC responses compare equal regardless of checksum casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// The zero address
    pub const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Create an address, normalizing its casing
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().to_ascii_lowercase())
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }
}

/// Error parsing an address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),
    #[error("address must have 40 hex digits: {0}")]
    InvalidLength(String),
    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AddressParseError::MissingPrefix(s.to_string()))?;

        if digits.len() != 40 {
            return Err(AddressParseError::InvalidLength(s.to_string()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError::InvalidHex(s.to_string()));
        }

        Ok(Self::new(s))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Identifies one offer list on the remote ledger
///
/// An offer list is keyed by the token makers send (`outbound_tkn`) and the
/// token they receive (`inbound_tkn`). The key is order-sensitive: swapping the
/// tokens names the opposite side of the same market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferListKey {
    /// Token given by makers
    pub outbound_tkn: Address,
    /// Token received by makers
    pub inbound_tkn: Address,
}

impl OfferListKey {
    pub fn new(outbound_tkn: impl Into<Address>, inbound_tkn: impl Into<Address>) -> Self {
        Self {
            outbound_tkn: outbound_tkn.into(),
            inbound_tkn: inbound_tkn.into(),
        }
    }

    /// Key used by the event router to find the semibook for a log
    pub fn routing_key(&self) -> String {
        routing_key(&self.outbound_tkn, &self.inbound_tkn)
    }

    /// The key of the opposite offer list
    pub fn flipped(&self) -> Self {
        Self {
            outbound_tkn: self.inbound_tkn.clone(),
            inbound_tkn: self.outbound_tkn.clone(),
        }
    }
}

impl fmt::Display for OfferListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.outbound_tkn, self.inbound_tkn)
    }
}

/// Build a routing key from a token pair (order-sensitive, lower-cased)
pub fn routing_key(outbound_tkn: impl AsRef<str>, inbound_tkn: impl AsRef<str>) -> String {
    let outbound = outbound_tkn.as_ref();
    let inbound = inbound_tkn.as_ref();
    let mut key = String::with_capacity(outbound.len() + inbound.len());
    key.push_str(&outbound.to_ascii_lowercase());
    key.push_str(&inbound.to_ascii_lowercase());
    key
}

/// A trading pair made of two offer lists
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    /// Base token
    pub base: Address,
    /// Quote token
    pub quote: Address,
}

impl Market {
    pub fn new(base: impl Into<Address>, quote: impl Into<Address>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Offer list backing one side of this market
    ///
    /// Asks give base for quote; bids give quote for base.
    pub fn offer_list(&self, side: BookSide) -> OfferListKey {
        match side {
            BookSide::Asks => OfferListKey::new(self.base.clone(), self.quote.clone()),
            BookSide::Bids => OfferListKey::new(self.quote.clone(), self.base.clone()),
        }
    }
}
