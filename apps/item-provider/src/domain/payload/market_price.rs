//! Market Price Item
//!
//! Flat level-one quote record. Each tick nudges the prices up by one cent,
//! bumps the volume and advances the quote times; after a fixed number of
//! ticks the prices return to their seed values.

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::fields::{FieldEntry, FieldValue, fid};

const PRICE_STEP: Decimal = dec!(0.01);
const TICKS_BEFORE_WRAP: u32 = 100;

const SEED_TRADE_PRICE: Decimal = dec!(1.00);
const SEED_BID: Decimal = dec!(0.99);
const SEED_ASK: Decimal = dec!(1.03);
const SEED_PE_RATIO: Decimal = dec!(5.00);
const SEED_VOLUME: Decimal = dec!(100000);
const SEED_NET_CHANGE: Decimal = dec!(2.15548);

/// Simulated market price record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketPriceItem {
    rdn_display: u64,
    exchange_id: u16,
    div_pay_date: NaiveDate,
    trade_price: Decimal,
    bid: Decimal,
    ask: Decimal,
    volume: Decimal,
    net_change: Decimal,
    ask_time: NaiveTime,
    pe_ratio: Decimal,
    sale_time: NaiveTime,
    ticks: u32,
}

impl MarketPriceItem {
    /// Record seeded with the standard starting values.
    #[must_use]
    pub fn new() -> Self {
        let now = chrono::Utc::now().time();

        Self {
            rdn_display: 100,
            exchange_id: 155,
            div_pay_date: NaiveDate::from_ymd_opt(2010, 10, 22).unwrap_or_default(),
            trade_price: SEED_TRADE_PRICE,
            bid: SEED_BID,
            ask: SEED_ASK,
            volume: SEED_VOLUME,
            net_change: SEED_NET_CHANGE,
            ask_time: now,
            pe_ratio: SEED_PE_RATIO,
            sale_time: now,
            ticks: 0,
        }
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) {
        self.ticks += 1;

        if self.ticks >= TICKS_BEFORE_WRAP {
            self.ticks = 0;
            self.trade_price = SEED_TRADE_PRICE;
            self.bid = SEED_BID;
            self.ask = SEED_ASK;
            self.pe_ratio = SEED_PE_RATIO;
        } else {
            self.trade_price += PRICE_STEP;
            self.bid += PRICE_STEP;
            self.ask += PRICE_STEP;
            self.pe_ratio += PRICE_STEP;
        }

        self.volume += Decimal::ONE;
        self.ask_time += TimeDelta::seconds(1);
        self.sale_time = self.ask_time;
    }

    /// Every field, for refreshes.
    #[must_use]
    pub fn refresh_fields(&self) -> Vec<FieldEntry> {
        vec![
            FieldEntry::new(fid::RDNDISPLAY, FieldValue::UInt(self.rdn_display)),
            FieldEntry::new(fid::RDN_EXCHID, FieldValue::Enum(self.exchange_id)),
            FieldEntry::new(fid::DIVPAYDATE, FieldValue::Date(self.div_pay_date)),
            FieldEntry::new(fid::TRDPRC_1, FieldValue::Real(self.trade_price)),
            FieldEntry::new(fid::BID, FieldValue::Real(self.bid)),
            FieldEntry::new(fid::ASK, FieldValue::Real(self.ask)),
            FieldEntry::new(fid::ACVOL_1, FieldValue::Real(self.volume)),
            FieldEntry::new(fid::NETCHNG_1, FieldValue::Real(self.net_change)),
            FieldEntry::new(fid::ASK_TIME, FieldValue::Time(self.ask_time)),
            FieldEntry::new(fid::PERATIO, FieldValue::Real(self.pe_ratio)),
            FieldEntry::new(fid::SALTIME, FieldValue::Time(self.sale_time)),
        ]
    }

    /// The fields a tick changes, for updates.
    #[must_use]
    pub fn update_fields(&self) -> Vec<FieldEntry> {
        vec![
            FieldEntry::new(fid::TRDPRC_1, FieldValue::Real(self.trade_price)),
            FieldEntry::new(fid::BID, FieldValue::Real(self.bid)),
            FieldEntry::new(fid::ASK, FieldValue::Real(self.ask)),
            FieldEntry::new(fid::ACVOL_1, FieldValue::Real(self.volume)),
            FieldEntry::new(fid::ASK_TIME, FieldValue::Time(self.ask_time)),
            FieldEntry::new(fid::PERATIO, FieldValue::Real(self.pe_ratio)),
            FieldEntry::new(fid::SALTIME, FieldValue::Time(self.sale_time)),
        ]
    }

    /// Apply posted field content. Fields this record does not carry, or
    /// values of the wrong kind, are skipped.
    ///
    /// Returns the number of fields applied.
    pub fn apply_fields(&mut self, entries: &[FieldEntry]) -> usize {
        let mut applied = 0;

        for entry in entries {
            let changed = match (entry.fid, &entry.value) {
                (fid::RDNDISPLAY, FieldValue::UInt(v)) => {
                    self.rdn_display = *v;
                    true
                }
                (fid::RDN_EXCHID, FieldValue::Enum(v)) => {
                    self.exchange_id = *v;
                    true
                }
                (fid::DIVPAYDATE, FieldValue::Date(v)) => {
                    self.div_pay_date = *v;
                    true
                }
                (fid::TRDPRC_1, FieldValue::Real(v)) => {
                    self.trade_price = *v;
                    true
                }
                (fid::BID, FieldValue::Real(v)) => {
                    self.bid = *v;
                    true
                }
                (fid::ASK, FieldValue::Real(v)) => {
                    self.ask = *v;
                    true
                }
                (fid::ACVOL_1, FieldValue::Real(v)) => {
                    self.volume = *v;
                    true
                }
                (fid::NETCHNG_1, FieldValue::Real(v)) => {
                    self.net_change = *v;
                    true
                }
                (fid::ASK_TIME, FieldValue::Time(v)) => {
                    self.ask_time = *v;
                    true
                }
                (fid::PERATIO, FieldValue::Real(v)) => {
                    self.pe_ratio = *v;
                    true
                }
                (fid::SALTIME, FieldValue::Time(v)) => {
                    self.sale_time = *v;
                    true
                }
                _ => false,
            };

            if changed {
                applied += 1;
            }
        }

        applied
    }

    /// Last trade price.
    #[must_use]
    pub const fn trade_price(&self) -> Decimal {
        self.trade_price
    }

    /// Bid price.
    #[must_use]
    pub const fn bid(&self) -> Decimal {
        self.bid
    }

    /// Ask price.
    #[must_use]
    pub const fn ask(&self) -> Decimal {
        self.ask
    }
}

impl Default for MarketPriceItem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_has_seed_prices() {
        let item = MarketPriceItem::new();

        assert_eq!(item.trade_price(), dec!(1.00));
        assert_eq!(item.bid(), dec!(0.99));
        assert_eq!(item.ask(), dec!(1.03));
    }

    #[test]
    fn tick_moves_prices_by_one_cent() {
        let mut item = MarketPriceItem::new();

        item.tick();

        assert_eq!(item.trade_price(), dec!(1.01));
        assert_eq!(item.bid(), dec!(1.00));
        assert_eq!(item.ask(), dec!(1.04));
    }

    #[test]
    fn prices_wrap_to_seed() {
        let mut item = MarketPriceItem::new();

        for _ in 0..TICKS_BEFORE_WRAP {
            item.tick();
        }

        assert_eq!(item.trade_price(), SEED_TRADE_PRICE);
        assert_eq!(item.bid(), SEED_BID);
    }

    #[test]
    fn refresh_carries_every_field_and_update_a_subset() {
        let item = MarketPriceItem::new();

        let refresh = item.refresh_fields();
        let update = item.update_fields();

        assert_eq!(refresh.len(), 11);
        assert!(update.len() < refresh.len());
        assert!(update.iter().all(|u| refresh.iter().any(|r| r.fid == u.fid)));
    }

    #[test]
    fn apply_fields_skips_unknown_and_mistyped() {
        let mut item = MarketPriceItem::new();
        let entries = vec![
            FieldEntry::new(fid::BID, FieldValue::Real(dec!(2.50))),
            FieldEntry::new(fid::ASK, FieldValue::Ascii("bad".into())),
            FieldEntry::new(9999, FieldValue::UInt(1)),
        ];

        let applied = item.apply_fields(&entries);

        assert_eq!(applied, 1);
        assert_eq!(item.bid(), dec!(2.50));
        assert_eq!(item.ask(), SEED_ASK);
    }
}
