//! Core Provider Types
//!
//! Identifiers and value types shared by every layer: connection and stream
//! ids, the message domains the provider serves, item keys and quality of
//! service.
//!
//! # Design
//!
//! Quality of service is ordered by a rank where lower is better, so a
//! range check against a consumer's best/worst pair is two comparisons per
//! dimension.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a consumer connection (one transport channel).
pub type ConnectionId = u64;

/// Connection-scoped identifier of one subscription.
pub type StreamId = i32;

/// Service id advertised in the source directory.
pub type ServiceId = u16;

// =============================================================================
// Domain Type
// =============================================================================

/// Message domain of a request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    /// Flat level-one quote data.
    MarketPrice,
    /// Depth of book keyed by order id.
    MarketByOrder,
    /// Depth of book keyed by price point.
    MarketByPrice,
    /// The provider's list of currently published item names.
    SymbolList,
    /// Any other domain number; never served.
    Other(u8),
}

impl DomainType {
    /// Numeric domain code as carried on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::MarketPrice => 6,
            Self::MarketByOrder => 7,
            Self::MarketByPrice => 8,
            Self::SymbolList => 10,
            Self::Other(code) => code,
        }
    }

    /// Map a wire domain code back to a domain type.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            6 => Self::MarketPrice,
            7 => Self::MarketByOrder,
            8 => Self::MarketByPrice,
            10 => Self::SymbolList,
            other => Self::Other(other),
        }
    }

    /// Whether the provider can serve items of this domain.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Whether refreshes of this domain are delivered in multiple parts.
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::MarketByOrder | Self::MarketByPrice)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketPrice => "market_price",
            Self::MarketByOrder => "market_by_order",
            Self::MarketByPrice => "market_by_price",
            Self::SymbolList => "symbol_list",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "domain({code})"),
            known => f.write_str(known.as_str()),
        }
    }
}

// =============================================================================
// Message Key
// =============================================================================

/// Item key: name, service id and optional opaque attribute bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgKey {
    /// Item name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Service the item belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    /// Key attribute bytes. This provider never accepts them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrib: Option<Vec<u8>>,
}

impl MsgKey {
    /// Key with a name and service id.
    #[must_use]
    pub fn named(name: impl Into<String>, service_id: ServiceId) -> Self {
        Self {
            name: Some(name.into()),
            service_id: Some(service_id),
            attrib: None,
        }
    }

    /// The item name, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

// =============================================================================
// Quality of Service
// =============================================================================

/// Data timeliness dimension of QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeliness {
    /// Real-time data.
    Realtime,
    /// Delayed by the given number of seconds.
    Delayed(u16),
    /// Delayed by an unknown amount.
    DelayedUnknown,
}

impl Timeliness {
    fn rank(self) -> u32 {
        match self {
            Self::Realtime => 0,
            Self::Delayed(seconds) => u32::from(seconds) + 1,
            Self::DelayedUnknown => u32::MAX,
        }
    }
}

/// Update rate dimension of QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    /// Every change is delivered.
    TickByTick,
    /// Conflated over the given interval in milliseconds.
    TimeConflated(u16),
    /// Conflated just in time.
    JitConflated,
}

impl Rate {
    fn rank(self) -> u32 {
        match self {
            Self::TickByTick => 0,
            Self::TimeConflated(millis) => u32::from(millis) + 1,
            Self::JitConflated => u32::MAX,
        }
    }
}

/// Quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Qos {
    /// Timeliness.
    pub timeliness: Timeliness,
    /// Rate.
    pub rate: Rate,
    /// Whether the QoS may change over the life of the stream.
    #[serde(default)]
    pub dynamic: bool,
}

impl Qos {
    /// Realtime, tick-by-tick, static: the QoS this provider publishes.
    #[must_use]
    pub const fn realtime_tick_by_tick() -> Self {
        Self {
            timeliness: Timeliness::Realtime,
            rate: Rate::TickByTick,
            dynamic: false,
        }
    }

    /// Whether `self` is at least as good as `other` in both dimensions.
    #[must_use]
    pub fn is_at_least(&self, other: &Self) -> bool {
        self.timeliness.rank() <= other.timeliness.rank() && self.rate.rank() <= other.rate.rank()
    }

    /// Whether `self` lies within `[worst, best]`.
    #[must_use]
    pub fn is_in_range(&self, best: &Self, worst: &Self) -> bool {
        best.is_at_least(self) && self.is_at_least(worst)
    }
}

impl Default for Qos {
    fn default() -> Self {
        Self::realtime_tick_by_tick()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_codes_round_trip() {
        for domain in [
            DomainType::MarketPrice,
            DomainType::MarketByOrder,
            DomainType::MarketByPrice,
            DomainType::SymbolList,
            DomainType::Other(42),
        ] {
            assert_eq!(DomainType::from_code(domain.code()), domain);
        }
    }

    #[test]
    fn only_depth_domains_are_depth() {
        assert!(DomainType::MarketByOrder.is_depth());
        assert!(DomainType::MarketByPrice.is_depth());
        assert!(!DomainType::MarketPrice.is_depth());
        assert!(!DomainType::SymbolList.is_depth());
    }

    #[test]
    fn realtime_is_within_realtime_to_delayed_range() {
        let provider = Qos::realtime_tick_by_tick();
        let worst = Qos {
            timeliness: Timeliness::Delayed(60),
            rate: Rate::JitConflated,
            dynamic: false,
        };

        assert!(provider.is_in_range(&provider, &worst));
    }

    #[test]
    fn realtime_is_outside_delayed_only_range() {
        let provider = Qos::realtime_tick_by_tick();
        let best = Qos {
            timeliness: Timeliness::Delayed(5),
            rate: Rate::TickByTick,
            dynamic: false,
        };
        let worst = Qos {
            timeliness: Timeliness::DelayedUnknown,
            rate: Rate::JitConflated,
            dynamic: false,
        };

        assert!(!provider.is_in_range(&best, &worst));
    }

    #[test]
    fn conflated_rate_is_worse_than_tick_by_tick() {
        let conflated = Qos {
            rate: Rate::TimeConflated(500),
            ..Qos::default()
        };

        assert!(Qos::default().is_at_least(&conflated));
        assert!(!conflated.is_at_least(&Qos::default()));
    }
}
