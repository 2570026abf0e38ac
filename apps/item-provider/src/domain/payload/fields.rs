//! Field Lists and the Field Dictionary
//!
//! Field entries are (field id, typed value) pairs. The dictionary maps the
//! ids this provider publishes to their acronym and value kind; it is used to
//! type-check posted content and to name fields in diagnostics.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Numeric field identifier.
pub type FieldId = i16;

/// Field ids published by the simulated items.
pub mod fid {
    use super::FieldId;

    /// Display template number.
    pub const RDNDISPLAY: FieldId = 2;
    /// Exchange identifier.
    pub const RDN_EXCHID: FieldId = 4;
    /// Last trade price.
    pub const TRDPRC_1: FieldId = 6;
    /// Net change.
    pub const NETCHNG_1: FieldId = 11;
    /// Currency (enumerated).
    pub const CURRENCY: FieldId = 15;
    /// Bid price.
    pub const BID: FieldId = 22;
    /// Ask price.
    pub const ASK: FieldId = 25;
    /// Accumulated volume.
    pub const ACVOL_1: FieldId = 32;
    /// Price/earnings ratio.
    pub const PERATIO: FieldId = 36;
    /// Dividend pay date.
    pub const DIVPAYDATE: FieldId = 38;
    /// Trading units.
    pub const TRADE_UNITS: FieldId = 53;
    /// Market state indicator.
    pub const MKT_ST_IND: FieldId = 133;
    /// Time of the last ask.
    pub const ASK_TIME: FieldId = 267;
    /// Time of the last sale.
    pub const SALTIME: FieldId = 379;
    /// Order side (enumerated).
    pub const ORDER_SIDE: FieldId = 3264;
    /// Order or price-point price.
    pub const ORDER_PRC: FieldId = 3427;
    /// Order or price-point size.
    pub const ORDER_SIZE: FieldId = 3428;
    /// Number of orders at a price point.
    pub const NO_ORD: FieldId = 3430;
    /// Quote time in milliseconds since midnight.
    pub const QUOTIM_MS: FieldId = 3855;
}

// =============================================================================
// Field Entries
// =============================================================================

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Unsigned integer.
    UInt(u64),
    /// Signed integer.
    Int(i64),
    /// Decimal real.
    Real(Decimal),
    /// Enumerated value.
    Enum(u16),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// ASCII string.
    Ascii(String),
}

impl FieldValue {
    /// Kind of this value.
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::UInt(_) => FieldKind::UInt,
            Self::Int(_) => FieldKind::Int,
            Self::Real(_) => FieldKind::Real,
            Self::Enum(_) => FieldKind::Enum,
            Self::Date(_) => FieldKind::Date,
            Self::Time(_) => FieldKind::Time,
            Self::Ascii(_) => FieldKind::Ascii,
        }
    }
}

/// One entry of a field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    /// Field id.
    pub fid: FieldId,
    /// Field value.
    pub value: FieldValue,
}

impl FieldEntry {
    /// Build an entry.
    #[must_use]
    pub const fn new(fid: FieldId, value: FieldValue) -> Self {
        Self { fid, value }
    }
}

// =============================================================================
// Dictionary
// =============================================================================

/// Value kind of a dictionary field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Unsigned integer.
    UInt,
    /// Signed integer.
    Int,
    /// Decimal real.
    Real,
    /// Enumerated value.
    Enum,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// ASCII string.
    Ascii,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt => "uint",
            Self::Int => "int",
            Self::Real => "real",
            Self::Enum => "enum",
            Self::Date => "date",
            Self::Time => "time",
            Self::Ascii => "ascii",
        };
        f.write_str(name)
    }
}

/// Dictionary definition of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefinition {
    /// Field acronym.
    pub acronym: &'static str,
    /// Expected value kind.
    pub kind: FieldKind,
}

/// Field content rejected by the dictionary or by a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The value kind does not match the dictionary definition.
    #[error("field {acronym} ({fid}) expects {expected}, got {actual}")]
    TypeMismatch {
        /// Field id.
        fid: FieldId,
        /// Field acronym.
        acronym: &'static str,
        /// Kind from the dictionary.
        expected: FieldKind,
        /// Kind that was supplied.
        actual: FieldKind,
    },
}

/// Static field id to definition lookup.
#[derive(Debug, Clone)]
pub struct FieldDictionary {
    fields: HashMap<FieldId, FieldDefinition>,
}

impl FieldDictionary {
    /// Dictionary covering every field the simulated items publish.
    #[must_use]
    pub fn standard() -> Self {
        let definitions = [
            (fid::RDNDISPLAY, "RDNDISPLAY", FieldKind::UInt),
            (fid::RDN_EXCHID, "RDN_EXCHID", FieldKind::Enum),
            (fid::TRDPRC_1, "TRDPRC_1", FieldKind::Real),
            (fid::NETCHNG_1, "NETCHNG_1", FieldKind::Real),
            (fid::CURRENCY, "CURRENCY", FieldKind::Enum),
            (fid::BID, "BID", FieldKind::Real),
            (fid::ASK, "ASK", FieldKind::Real),
            (fid::ACVOL_1, "ACVOL_1", FieldKind::Real),
            (fid::PERATIO, "PERATIO", FieldKind::Real),
            (fid::DIVPAYDATE, "DIVPAYDATE", FieldKind::Date),
            (fid::TRADE_UNITS, "TRADE_UNITS", FieldKind::Enum),
            (fid::MKT_ST_IND, "MKT_ST_IND", FieldKind::Enum),
            (fid::ASK_TIME, "ASK_TIME", FieldKind::Time),
            (fid::SALTIME, "SALTIME", FieldKind::Time),
            (fid::ORDER_SIDE, "ORDER_SIDE", FieldKind::Enum),
            (fid::ORDER_PRC, "ORDER_PRC", FieldKind::Real),
            (fid::ORDER_SIZE, "ORDER_SIZE", FieldKind::Real),
            (fid::NO_ORD, "NO_ORD", FieldKind::UInt),
            (fid::QUOTIM_MS, "QUOTIM_MS", FieldKind::UInt),
        ];

        let fields = definitions
            .into_iter()
            .map(|(id, acronym, kind)| (id, FieldDefinition { acronym, kind }))
            .collect();

        Self { fields }
    }

    /// Look up a field definition.
    #[must_use]
    pub fn get(&self, fid: FieldId) -> Option<&FieldDefinition> {
        self.fields.get(&fid)
    }

    /// Acronym of a field, if known.
    #[must_use]
    pub fn acronym(&self, fid: FieldId) -> Option<&'static str> {
        self.fields.get(&fid).map(|def| def.acronym)
    }

    /// Number of known fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check that every known field carries a value of its dictionary kind.
    ///
    /// Unknown field ids pass through; payloads ignore them.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::TypeMismatch`] for the first mistyped entry.
    pub fn validate(&self, entries: &[FieldEntry]) -> Result<(), FieldError> {
        for entry in entries {
            let Some(def) = self.fields.get(&entry.fid) else {
                continue;
            };

            let actual = entry.value.kind();
            if actual != def.kind {
                return Err(FieldError::TypeMismatch {
                    fid: entry.fid,
                    acronym: def.acronym,
                    expected: def.kind,
                    actual,
                });
            }
        }

        Ok(())
    }
}

impl Default for FieldDictionary {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn standard_dictionary_names_published_fields() {
        let dictionary = FieldDictionary::standard();

        assert_eq!(dictionary.acronym(fid::BID), Some("BID"));
        assert_eq!(dictionary.acronym(fid::ORDER_SIZE), Some("ORDER_SIZE"));
        assert_eq!(dictionary.acronym(9999), None);
    }

    #[test]
    fn validate_accepts_matching_kinds() {
        let dictionary = FieldDictionary::standard();
        let entries = vec![
            FieldEntry::new(fid::BID, FieldValue::Real(dec!(1.25))),
            FieldEntry::new(fid::RDNDISPLAY, FieldValue::UInt(100)),
        ];

        assert!(dictionary.validate(&entries).is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_kind() {
        let dictionary = FieldDictionary::standard();
        let entries = vec![FieldEntry::new(fid::BID, FieldValue::Ascii("high".into()))];

        let err = dictionary.validate(&entries).unwrap_err();

        assert_eq!(
            err,
            FieldError::TypeMismatch {
                fid: fid::BID,
                acronym: "BID",
                expected: FieldKind::Real,
                actual: FieldKind::Ascii,
            }
        );
    }

    #[test]
    fn validate_ignores_unknown_fields() {
        let dictionary = FieldDictionary::standard();
        let entries = vec![FieldEntry::new(30_000, FieldValue::Ascii("x".into()))];

        assert!(dictionary.validate(&entries).is_ok());
    }
}
