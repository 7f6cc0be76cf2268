//! Offer records with decimal precision
//!
//! Two representations live here:
//!
//! - [`OfferEntry`] is what a semibook caches: the raw fields read from the
//!   chain plus the `prev`/`next` links that thread the offer list.
//! - [`Offer`] is the priced view handed to callers, reconstructed from an
//!   entry for a given [`BookSide`].

use crate::{Address, BookSide, OfferId, SemibookError, SemibookResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Cached offer record
///
/// An entry with `gives == 0` is invalid and cannot be constructed: both
/// [`OfferEntry::new`] and deserialization reject it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOfferEntry")]
pub struct OfferEntry {
    /// Offer id (positive)
    pub id: OfferId,
    /// Better-ranked neighbour
    pub prev: Option<OfferId>,
    /// Worse-ranked neighbour
    pub next: Option<OfferId>,
    gives: Decimal,
    wants: Decimal,
    /// Gas price the maker committed to
    pub gasprice: u64,
    /// Gas the maker's hook requires
    pub gasreq: u64,
    /// Maker contract or account
    pub maker: Address,
    /// Offer-list gas base in effect when this offer was written
    pub offer_gasbase: u64,
}

impl OfferEntry {
    /// Create a new unlinked entry
    ///
    /// Fails if `id` is zero or `gives` is not strictly positive.
    pub fn new(id: OfferId, gives: Decimal, wants: Decimal) -> SemibookResult<Self> {
        if id == 0 {
            return Err(SemibookError::InvalidOffer {
                id,
                reason: "offer id must be positive".to_string(),
            });
        }
        if gives <= Decimal::ZERO {
            return Err(SemibookError::InvalidOffer {
                id,
                reason: format!("gives must be positive, got {}", gives),
            });
        }
        if wants < Decimal::ZERO {
            return Err(SemibookError::InvalidOffer {
                id,
                reason: format!("wants must not be negative, got {}", wants),
            });
        }

        Ok(Self {
            id,
            prev: None,
            next: None,
            gives,
            wants,
            gasprice: 0,
            gasreq: 0,
            maker: Address::new(Address::ZERO),
            offer_gasbase: 0,
        })
    }

    /// Set the neighbour links
    pub fn with_links(mut self, prev: Option<OfferId>, next: Option<OfferId>) -> Self {
        self.prev = prev;
        self.next = next;
        self
    }

    /// Set gas parameters
    pub fn with_gas(mut self, gasprice: u64, gasreq: u64, offer_gasbase: u64) -> Self {
        self.gasprice = gasprice;
        self.gasreq = gasreq;
        self.offer_gasbase = offer_gasbase;
        self
    }

    /// Set the maker
    pub fn with_maker(mut self, maker: impl Into<Address>) -> Self {
        self.maker = maker.into();
        self
    }

    /// Amount of outbound token offered
    pub fn gives(&self) -> Decimal {
        self.gives
    }

    /// Amount of inbound token requested
    pub fn wants(&self) -> Decimal {
        self.wants
    }

    /// Check if this entry's price is strictly better than `price` on `side`
    ///
    /// Compares by cross-multiplication so bids with `wants == 0` rank as
    /// infinitely good instead of dividing by zero.
    pub fn is_better_than(&self, side: BookSide, price: Decimal) -> bool {
        match side {
            // wants / gives < price
            BookSide::Asks => match price.checked_mul(self.gives) {
                Some(bound) => self.wants < bound,
                None => true,
            },
            // gives / wants > price
            BookSide::Bids => match price.checked_mul(self.wants) {
                Some(bound) => self.gives > bound,
                None => false,
            },
        }
    }
}

#[derive(Deserialize)]
struct RawOfferEntry {
    id: OfferId,
    #[serde(default)]
    prev: Option<OfferId>,
    #[serde(default)]
    next: Option<OfferId>,
    #[serde(deserialize_with = "deserialize_decimal")]
    gives: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    wants: Decimal,
    #[serde(default)]
    gasprice: u64,
    #[serde(default)]
    gasreq: u64,
    maker: Address,
    #[serde(default)]
    offer_gasbase: u64,
}

impl TryFrom<RawOfferEntry> for OfferEntry {
    type Error = SemibookError;

    fn try_from(raw: RawOfferEntry) -> Result<Self, Self::Error> {
        Ok(OfferEntry::new(raw.id, raw.gives, raw.wants)?
            .with_links(normalize_id(raw.prev), normalize_id(raw.next))
            .with_gas(raw.gasprice, raw.gasreq, raw.offer_gasbase)
            .with_maker(raw.maker))
    }
}

/// Chain encodes "no neighbour" as id 0
pub fn normalize_id(id: Option<OfferId>) -> Option<OfferId> {
    id.filter(|id| *id != 0)
}

/// Priced offer as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer id
    pub id: OfferId,
    /// Better-ranked neighbour
    pub prev: Option<OfferId>,
    /// Worse-ranked neighbour
    pub next: Option<OfferId>,
    /// Amount of outbound token offered
    pub gives: Decimal,
    /// Amount of inbound token requested
    pub wants: Decimal,
    /// Price in quote per base
    pub price: Decimal,
    /// Volume in base token
    pub volume: Decimal,
    /// Gas price the maker committed to
    pub gasprice: u64,
    /// Gas the maker's hook requires
    pub gasreq: u64,
    /// Maker contract or account
    pub maker: Address,
    /// Offer-list gas base in effect when this offer was written
    pub offer_gasbase: u64,
}

impl Offer {
    /// Reconstruct a priced offer from a cached entry
    ///
    /// Asks give base for quote, so `price = wants / gives` and
    /// `volume = gives`. Bids give quote for base, so `price = gives / wants`
    /// and `volume = wants`. Fails if the base volume is zero.
    pub fn from_entry(entry: &OfferEntry, side: BookSide) -> SemibookResult<Self> {
        let (base, quote) = match side {
            BookSide::Asks => (entry.gives, entry.wants),
            BookSide::Bids => (entry.wants, entry.gives),
        };

        if base.is_zero() {
            return Err(SemibookError::ZeroVolume { id: entry.id });
        }

        let price = quote
            .checked_div(base)
            .ok_or_else(|| SemibookError::InvalidOffer {
                id: entry.id,
                reason: "price overflow".to_string(),
            })?;

        Ok(Self {
            id: entry.id,
            prev: entry.prev,
            next: entry.next,
            gives: entry.gives,
            wants: entry.wants,
            price,
            volume: base,
            gasprice: entry.gasprice,
            gasreq: entry.gasreq,
            maker: entry.maker.clone(),
            offer_gasbase: entry.offer_gasbase,
        })
    }
}

/// Custom deserializer that accepts decimals as strings or JSON numbers
///
/// Amounts arrive as strings when they exceed f64 precision, so both forms
/// must be accepted without going through f64.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use rust_decimal::prelude::FromPrimitive;
    use serde::de::Error;
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => Decimal::from_str(&s).map_err(D::Error::custom),
        StringOrNumber::Number(n) => {
            let s = n.to_string();
            // Scientific notation (e.g. 5e-6) has to go through f64
            if s.contains('e') || s.contains('E') {
                let f = n.as_f64().ok_or_else(|| D::Error::custom("invalid number"))?;
                Decimal::from_f64(f).ok_or_else(|| D::Error::custom("cannot convert to decimal"))
            } else {
                Decimal::from_str(&s).map_err(D::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_gives_rejected() {
        let err = OfferEntry::new(1, dec!(0), dec!(10)).unwrap_err();
        assert!(matches!(err, SemibookError::InvalidOffer { id: 1, .. }));
        assert!(OfferEntry::new(0, dec!(1), dec!(1)).is_err());
        assert!(OfferEntry::new(2, dec!(1), dec!(-1)).is_err());
    }

    #[test]
    fn test_ask_price_and_volume() {
        let entry = OfferEntry::new(5, dec!(100), dec!(50)).unwrap();
        let offer = Offer::from_entry(&entry, BookSide::Asks).unwrap();
        assert_eq!(offer.price, dec!(0.5));
        assert_eq!(offer.volume, dec!(100));
    }

    #[test]
    fn test_bid_price_and_volume() {
        let entry = OfferEntry::new(5, dec!(100), dec!(50)).unwrap();
        let offer = Offer::from_entry(&entry, BookSide::Bids).unwrap();
        assert_eq!(offer.price, dec!(2));
        assert_eq!(offer.volume, dec!(50));
    }

    #[test]
    fn test_zero_base_volume_errors() {
        let entry = OfferEntry::new(9, dec!(100), dec!(0)).unwrap();
        assert_eq!(
            Offer::from_entry(&entry, BookSide::Bids),
            Err(SemibookError::ZeroVolume { id: 9 })
        );
        // Same entry is a valid (free) ask
        assert_eq!(Offer::from_entry(&entry, BookSide::Asks).unwrap().price, dec!(0));
    }

    #[test]
    fn test_is_better_than() {
        // ask at price 0.5
        let entry = OfferEntry::new(1, dec!(100), dec!(50)).unwrap();
        assert!(entry.is_better_than(BookSide::Asks, dec!(0.6)));
        assert!(!entry.is_better_than(BookSide::Asks, dec!(0.5)));
        assert!(!entry.is_better_than(BookSide::Asks, dec!(0.4)));

        // bid at price 2
        assert!(entry.is_better_than(BookSide::Bids, dec!(1.5)));
        assert!(!entry.is_better_than(BookSide::Bids, dec!(2)));

        // bid wanting nothing is infinitely good
        let free = OfferEntry::new(2, dec!(1), dec!(0)).unwrap();
        assert!(free.is_better_than(BookSide::Bids, dec!(1000000)));
    }

    #[test]
    fn test_deserialize_entry() {
        let json = r#"{
            "id": 7, "prev": 0, "next": 8,
            "gives": "1.5", "wants": 3000,
            "gasprice": 10, "gasreq": 50000,
            "maker": "0xMAKER"
        }"#;
        let entry: OfferEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, 7);
        assert_eq!(entry.prev, None);
        assert_eq!(entry.next, Some(8));
        assert_eq!(entry.gives(), dec!(1.5));
        assert_eq!(entry.wants(), dec!(3000));
        assert_eq!(entry.maker.as_str(), "0xmaker");
    }

    #[test]
    fn test_deserialize_rejects_zero_gives() {
        let json = r#"{"id": 7, "gives": "0", "wants": "1", "maker": "0x1"}"#;
        assert!(serde_json::from_str::<OfferEntry>(json).is_err());
    }
}
