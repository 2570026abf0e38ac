//! Market By Price Item
//!
//! Aggregated book with three price points keyed by price and side.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::fields::{FieldEntry, FieldValue, fid};
use super::{DEPTH_TICKS_BEFORE_WRAP, DepthBook, MapAction, MapEntry, OrderSide};

const SEED_POINTS: [(Decimal, Decimal, u64, OrderSide); 3] = [
    (dec!(3.5), dec!(10), 2, OrderSide::Bid),
    (dec!(3.4), dec!(20), 3, OrderSide::Bid),
    (dec!(3.7), dec!(15), 4, OrderSide::Ask),
];

const QUOTE_STEP_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PricePoint {
    price: Decimal,
    size: Decimal,
    orders: u64,
    side: OrderSide,
    quote_ms: u64,
}

impl PricePoint {
    fn entry(&self, action: MapAction) -> MapEntry {
        MapEntry {
            action,
            key: format!("{}{}", self.price, self.side.key_suffix()),
            fields: vec![
                FieldEntry::new(fid::ORDER_PRC, FieldValue::Real(self.price)),
                FieldEntry::new(fid::ORDER_SIDE, FieldValue::Enum(self.side.code())),
                FieldEntry::new(fid::ORDER_SIZE, FieldValue::Real(self.size)),
                FieldEntry::new(fid::NO_ORD, FieldValue::UInt(self.orders)),
                FieldEntry::new(fid::QUOTIM_MS, FieldValue::UInt(self.quote_ms)),
            ],
        }
    }
}

/// Simulated price-point book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketByPriceItem {
    points: Vec<PricePoint>,
    ticks: u32,
}

impl MarketByPriceItem {
    /// Book seeded with three price points.
    #[must_use]
    pub fn new() -> Self {
        let points = SEED_POINTS
            .iter()
            .map(|(price, size, orders, side)| PricePoint {
                price: *price,
                size: *size,
                orders: *orders,
                side: *side,
                quote_ms: 0,
            })
            .collect();

        Self { points, ticks: 0 }
    }

    /// Sizes in book order.
    #[must_use]
    pub fn sizes(&self) -> Vec<Decimal> {
        self.points.iter().map(|point| point.size).collect()
    }
}

impl Default for MarketByPriceItem {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthBook for MarketByPriceItem {
    fn refresh_entries(&self) -> Vec<MapEntry> {
        self.points.iter().map(|p| p.entry(MapAction::Add)).collect()
    }

    fn update_entries(&self) -> Vec<MapEntry> {
        self.points.iter().map(|p| p.entry(MapAction::Update)).collect()
    }

    fn adjust_sizes(&mut self, delta: Decimal) {
        for point in &mut self.points {
            point.size += delta;
        }
    }

    fn tick(&mut self) {
        self.ticks += 1;
        let wrap = self.ticks >= DEPTH_TICKS_BEFORE_WRAP;
        if wrap {
            self.ticks = 0;
        }

        for (point, (_, seed_size, seed_orders, _)) in self.points.iter_mut().zip(SEED_POINTS.iter()) {
            if wrap {
                point.size = *seed_size;
                point.orders = *seed_orders;
            } else {
                point.size += Decimal::ONE;
                point.orders += 1;
            }
            point.quote_ms += QUOTE_STEP_MS;
        }
    }
}
