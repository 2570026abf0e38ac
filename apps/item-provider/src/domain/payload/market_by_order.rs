//! Market By Order Item
//!
//! Order book with three resting orders keyed by order id.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::fields::{FieldEntry, FieldValue, fid};
use super::{DEPTH_TICKS_BEFORE_WRAP, DepthBook, MapAction, MapEntry, OrderSide};

const SEED_ORDERS: [(&str, Decimal, Decimal, OrderSide); 3] = [
    ("100", dec!(3.5), dec!(7), OrderSide::Bid),
    ("200", dec!(3.4), dec!(8), OrderSide::Bid),
    ("300", dec!(3.7), dec!(9), OrderSide::Ask),
];

const QUOTE_STEP_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Order {
    id: String,
    price: Decimal,
    size: Decimal,
    side: OrderSide,
    quote_ms: u64,
}

impl Order {
    fn entry(&self, action: MapAction) -> MapEntry {
        MapEntry {
            action,
            key: format!("{}{}", self.id, self.side.key_suffix()),
            fields: vec![
                FieldEntry::new(fid::ORDER_PRC, FieldValue::Real(self.price)),
                FieldEntry::new(fid::ORDER_SIZE, FieldValue::Real(self.size)),
                FieldEntry::new(fid::ORDER_SIDE, FieldValue::Enum(self.side.code())),
                FieldEntry::new(fid::QUOTIM_MS, FieldValue::UInt(self.quote_ms)),
            ],
        }
    }
}

/// Simulated order book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketByOrderItem {
    orders: Vec<Order>,
    ticks: u32,
}

impl MarketByOrderItem {
    /// Book seeded with three orders.
    #[must_use]
    pub fn new() -> Self {
        let orders = SEED_ORDERS
            .iter()
            .map(|(id, price, size, side)| Order {
                id: (*id).to_string(),
                price: *price,
                size: *size,
                side: *side,
                quote_ms: 0,
            })
            .collect();

        Self { orders, ticks: 0 }
    }

    /// Order sizes in book order.
    #[must_use]
    pub fn sizes(&self) -> Vec<Decimal> {
        self.orders.iter().map(|order| order.size).collect()
    }
}

impl Default for MarketByOrderItem {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthBook for MarketByOrderItem {
    fn refresh_entries(&self) -> Vec<MapEntry> {
        self.orders.iter().map(|o| o.entry(MapAction::Add)).collect()
    }

    fn update_entries(&self) -> Vec<MapEntry> {
        self.orders.iter().map(|o| o.entry(MapAction::Update)).collect()
    }

    fn adjust_sizes(&mut self, delta: Decimal) {
        for order in &mut self.orders {
            order.size += delta;
        }
    }

    fn tick(&mut self) {
        self.ticks += 1;
        let wrap = self.ticks >= DEPTH_TICKS_BEFORE_WRAP;
        if wrap {
            self.ticks = 0;
        }

        for (order, (_, _, seed_size, _)) in self.orders.iter_mut().zip(SEED_ORDERS.iter()) {
            order.size = if wrap { *seed_size } else { order.size + Decimal::ONE };
            order.quote_ms += QUOTE_STEP_MS;
        }
    }
}
