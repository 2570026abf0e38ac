//! Simulated Item Payloads
//!
//! One payload type per served domain. Depth domains share the
//! [`DepthBook`] trait so the response encoder can split refreshes into
//! parts and apply the temporary size perturbation between parts without
//! knowing which book it holds.

pub mod fields;
pub mod market_by_order;
pub mod market_by_price;
pub mod market_price;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::DomainType;

pub use fields::{FieldDictionary, FieldEntry, FieldError, FieldId, FieldKind, FieldValue, fid};
pub use market_by_order::MarketByOrderItem;
pub use market_by_price::MarketByPriceItem;
pub use market_price::MarketPriceItem;

// =============================================================================
// Map Entries
// =============================================================================

/// Action carried by a map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapAction {
    /// A new entry.
    Add,
    /// A change to an existing entry.
    Update,
    /// Removal of an entry.
    Delete,
}

/// One keyed entry of a map payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    /// Entry action.
    pub action: MapAction,
    /// Entry key (order id, price point or item name).
    pub key: String,
    /// Entry fields; empty for symbol list entries and deletes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldEntry>,
}

impl MapEntry {
    /// Entry with no fields.
    #[must_use]
    pub fn bare(action: MapAction, key: impl Into<String>) -> Self {
        Self {
            action,
            key: key.into(),
            fields: Vec::new(),
        }
    }
}

/// Side of an order or price point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    /// Bid side.
    Bid,
    /// Ask side.
    Ask,
}

impl OrderSide {
    /// Enumerated ORDER_SIDE value.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Bid => 1,
            Self::Ask => 2,
        }
    }

    /// Suffix used in entry keys.
    #[must_use]
    pub const fn key_suffix(self) -> char {
        match self {
            Self::Bid => 'B',
            Self::Ask => 'A',
        }
    }
}

// =============================================================================
// Depth Book Trait
// =============================================================================

/// Ticks before depth sizes return to their seed values.
pub(crate) const DEPTH_TICKS_BEFORE_WRAP: u32 = 100;

/// Behavior shared by depth-of-book payloads.
pub trait DepthBook {
    /// Summary data carried on the first refresh part.
    fn summary_fields(&self) -> Vec<FieldEntry> {
        vec![
            FieldEntry::new(fid::CURRENCY, FieldValue::Enum(840)),
            FieldEntry::new(fid::RDN_EXCHID, FieldValue::Enum(155)),
            FieldEntry::new(fid::TRADE_UNITS, FieldValue::Enum(2)),
            FieldEntry::new(fid::MKT_ST_IND, FieldValue::Enum(1)),
        ]
    }

    /// Every entry with the ADD action, in book order.
    fn refresh_entries(&self) -> Vec<MapEntry>;

    /// Every entry with the UPDATE action, in book order.
    fn update_entries(&self) -> Vec<MapEntry>;

    /// Add `delta` to the size of every entry.
    fn adjust_sizes(&mut self, delta: Decimal);

    /// Advance the simulation by one tick.
    fn tick(&mut self);
}

// =============================================================================
// Item Payload
// =============================================================================

/// Payload held by a shared item, chosen by domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPayload {
    /// Flat quote record.
    MarketPrice(MarketPriceItem),
    /// Order book.
    MarketByOrder(MarketByOrderItem),
    /// Price-point book.
    MarketByPrice(MarketByPriceItem),
    /// The symbol list item carries no payload of its own.
    SymbolList,
}

impl ItemPayload {
    /// Fresh payload for a domain, or `None` when the domain is not served.
    #[must_use]
    pub fn for_domain(domain: DomainType) -> Option<Self> {
        match domain {
            DomainType::MarketPrice => Some(Self::MarketPrice(MarketPriceItem::new())),
            DomainType::MarketByOrder => Some(Self::MarketByOrder(MarketByOrderItem::new())),
            DomainType::MarketByPrice => Some(Self::MarketByPrice(MarketByPriceItem::new())),
            DomainType::SymbolList => Some(Self::SymbolList),
            DomainType::Other(_) => None,
        }
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        match self {
            Self::MarketPrice(item) => item.tick(),
            Self::MarketByOrder(book) => book.tick(),
            Self::MarketByPrice(book) => book.tick(),
            Self::SymbolList => {}
        }
    }

    /// The depth book, for depth payloads.
    #[must_use]
    pub fn depth(&self) -> Option<&dyn DepthBook> {
        match self {
            Self::MarketByOrder(book) => Some(book),
            Self::MarketByPrice(book) => Some(book),
            Self::MarketPrice(_) | Self::SymbolList => None,
        }
    }

    /// Mutable depth book, for depth payloads.
    pub fn depth_mut(&mut self) -> Option<&mut dyn DepthBook> {
        match self {
            Self::MarketByOrder(book) => Some(book),
            Self::MarketByPrice(book) => Some(book),
            Self::MarketPrice(_) | Self::SymbolList => None,
        }
    }

    /// The market price record, for flat payloads.
    #[must_use]
    pub const fn market_price(&self) -> Option<&MarketPriceItem> {
        match self {
            Self::MarketPrice(item) => Some(item),
            _ => None,
        }
    }

    /// Mutable market price record, for flat payloads.
    pub fn market_price_mut(&mut self) -> Option<&mut MarketPriceItem> {
        match self {
            Self::MarketPrice(item) => Some(item),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_domain() {
        assert!(matches!(
            ItemPayload::for_domain(DomainType::MarketPrice),
            Some(ItemPayload::MarketPrice(_))
        ));
        assert!(matches!(
            ItemPayload::for_domain(DomainType::MarketByPrice),
            Some(ItemPayload::MarketByPrice(_))
        ));
        assert_eq!(
            ItemPayload::for_domain(DomainType::SymbolList),
            Some(ItemPayload::SymbolList)
        );
        assert_eq!(ItemPayload::for_domain(DomainType::Other(200)), None);
    }

    #[test]
    fn only_depth_payloads_expose_a_book() {
        let mut flat = ItemPayload::for_domain(DomainType::MarketPrice).unwrap();
        let mut depth = ItemPayload::for_domain(DomainType::MarketByOrder).unwrap();

        assert!(flat.depth_mut().is_none());
        assert!(depth.depth_mut().is_some());
        assert!(flat.market_price().is_some());
    }
}
