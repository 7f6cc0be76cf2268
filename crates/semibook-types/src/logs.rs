//! Chain log types and offer-list event decoding

use crate::offer::{deserialize_decimal, normalize_id};
use crate::{routing_key, Address, BlockNumber, EventKind, OfferId, OfferListKey, SemibookError, SemibookResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Raw Logs
// ============================================================================

/// Log entry as delivered by the block manager
///
/// ABI decoding happens upstream; `name` is the event name and `args` holds
/// the named event arguments as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Block the log was included in
    pub block_number: BlockNumber,
    /// Position of the log within its block
    #[serde(default)]
    pub log_index: u32,
    /// Transaction that emitted the log
    #[serde(default)]
    pub tx_hash: Option<String>,
    /// Event name (e.g. "OfferWrite")
    pub name: String,
    /// Named event arguments
    #[serde(default)]
    pub args: serde_json::Value,
}

impl RawLog {
    /// Create a new raw log
    pub fn new(
        address: impl Into<Address>,
        block_number: BlockNumber,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            address: address.into(),
            block_number,
            log_index: 0,
            tx_hash: None,
            name: name.into(),
            args,
        }
    }

    /// Attach a transaction hash
    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    /// Set the log index
    pub fn with_log_index(mut self, log_index: u32) -> Self {
        self.log_index = log_index;
        self
    }

    /// Recognized event kind, if any
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.name)
    }

    /// Routing key built from the log's token arguments
    ///
    /// Returns `None` when either token argument is missing.
    pub fn routing_key(&self) -> Option<String> {
        let outbound = self.args.get("outbound_tkn")?.as_str()?;
        let inbound = self.args.get("inbound_tkn")?.as_str()?;
        Some(routing_key(outbound, inbound))
    }
}

/// Filter passed to the block manager when subscribing to logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract whose logs are wanted
    pub address: Address,
    /// Accepted event names
    pub topics: Vec<String>,
}

impl LogFilter {
    /// Filter for all offer-list events of a contract
    pub fn offer_list_events(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            topics: EventKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
        }
    }

    /// Check if a log passes this filter
    pub fn matches(&self, log: &RawLog) -> bool {
        log.address == self.address && self.topics.iter().any(|t| *t == log.name)
    }
}

// ============================================================================
// Decoded Events
// ============================================================================

/// Offer created or moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferWrite {
    pub outbound_tkn: Address,
    pub inbound_tkn: Address,
    pub id: OfferId,
    /// Offer this one is inserted after (`None`/0 = new best)
    #[serde(default)]
    pub prev: Option<OfferId>,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub gives: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub wants: Decimal,
    #[serde(default)]
    pub gasprice: u64,
    #[serde(default)]
    pub gasreq: u64,
    pub maker: Address,
}

/// Offer taken (successfully or not)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferFill {
    pub outbound_tkn: Address,
    pub inbound_tkn: Address,
    pub id: OfferId,
    #[serde(default)]
    pub taker: Option<Address>,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub taker_wants: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub taker_gives: Decimal,
    /// Revert reason reported by a failing maker
    #[serde(default)]
    pub mgv_data: Option<String>,
}

/// Offer retracted by its maker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRetract {
    pub outbound_tkn: Address,
    pub inbound_tkn: Address,
    pub id: OfferId,
}

/// Offer-list gas base changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetGasbase {
    pub outbound_tkn: Address,
    pub inbound_tkn: Address,
    pub offer_gasbase: u64,
}

/// Decoded offer-list event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferListEvent {
    OfferWrite(OfferWrite),
    OfferFail(OfferFill),
    OfferSuccess(OfferFill),
    OfferRetract(OfferRetract),
    SetGasbase(SetGasbase),
}

impl OfferListEvent {
    /// Decode a raw log
    ///
    /// Fails with [`SemibookError::UnknownEvent`] for names outside the five
    /// recognized kinds and [`SemibookError::Decode`] for malformed arguments.
    pub fn decode(log: &RawLog) -> SemibookResult<Self> {
        let kind = log.kind().ok_or_else(|| SemibookError::UnknownEvent {
            name: log.name.clone(),
        })?;

        let event = match kind {
            EventKind::OfferWrite => {
                let mut write: OfferWrite = decode_args(log)?;
                write.prev = normalize_id(write.prev);
                Self::OfferWrite(write)
            }
            EventKind::OfferFail => Self::OfferFail(decode_args(log)?),
            EventKind::OfferSuccess => Self::OfferSuccess(decode_args(log)?),
            EventKind::OfferRetract => Self::OfferRetract(decode_args(log)?),
            EventKind::SetGasbase => Self::SetGasbase(decode_args(log)?),
        };

        Ok(event)
    }

    /// Event kind
    pub fn kind(&self) -> EventKind {
        match self {
            Self::OfferWrite(_) => EventKind::OfferWrite,
            Self::OfferFail(_) => EventKind::OfferFail,
            Self::OfferSuccess(_) => EventKind::OfferSuccess,
            Self::OfferRetract(_) => EventKind::OfferRetract,
            Self::SetGasbase(_) => EventKind::SetGasbase,
        }
    }

    /// Offer list the event belongs to
    pub fn offer_list(&self) -> OfferListKey {
        let (outbound, inbound) = match self {
            Self::OfferWrite(e) => (&e.outbound_tkn, &e.inbound_tkn),
            Self::OfferFail(e) | Self::OfferSuccess(e) => (&e.outbound_tkn, &e.inbound_tkn),
            Self::OfferRetract(e) => (&e.outbound_tkn, &e.inbound_tkn),
            Self::SetGasbase(e) => (&e.outbound_tkn, &e.inbound_tkn),
        };
        OfferListKey::new(outbound.clone(), inbound.clone())
    }

    /// Affected offer id (none for gas base changes)
    pub fn offer_id(&self) -> Option<OfferId> {
        match self {
            Self::OfferWrite(e) => Some(e.id),
            Self::OfferFail(e) | Self::OfferSuccess(e) => Some(e.id),
            Self::OfferRetract(e) => Some(e.id),
            Self::SetGasbase(_) => None,
        }
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(log: &RawLog) -> SemibookResult<T> {
    serde_json::from_value(log.args.clone()).map_err(|e| SemibookError::decode(&log.name, e))
}
