#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )
)]

//! Item Provider - Interactive Market Data Provider Engine
//!
//! Serves item subscriptions to many consumer connections. Consumers that
//! ask for the same item share one item record; every tick the provider
//! advances each item's simulated data and sends an update on every stream
//! watching it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Provider state with no runtime dependencies
//!   - `registry`: Request slots and shared item records
//!   - `payload`: Simulated market price and depth data
//!   - `symbol_list`: Published item names
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Channel and wire codec interfaces
//!   - `admission`, `batch`, `posting`, `lifecycle`: Request handling
//!   - `encoder`: Response encoding with buffer growth and retry
//!   - `provider`: The event facade tying them together
//!
//! - **Infrastructure**: Adapters and runtime
//!   - `codec`: JSON wire codec
//!   - `memory`: Loopback channel
//!   - `dispatch`: Event loop owning the provider
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! consumer ──► DispatcherHandle ──► Dispatcher ──► ItemProvider
//!                                       │              │
//!                                     tick       ItemRegistry
//!                                       │              │
//!                                       └────► ResponseEncoder ──► Channel ──► consumers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Items, slots and simulated market data.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and runtime.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::directory::ServiceDirectory;
pub use domain::message::{PostContent, PostMsg, RequestMsg, ResponseMsg};
pub use domain::registry::ItemRegistry;
pub use domain::types::{ConnectionId, DomainType, StreamId};

// Application
pub use application::error::ProviderError;
pub use application::ports::{Channel, SubmitStatus, WireCodec};
pub use application::provider::{
    Disposition, FanOutReport, ItemProvider, PostReport, ProviderOptions, RequestReport,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ProviderConfig};

// Adapters
pub use infrastructure::codec::JsonCodec;
pub use infrastructure::dispatch::{Dispatcher, DispatcherConfig, DispatcherHandle, ProviderEvent};
pub use infrastructure::memory::MemoryChannel;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, init as init_telemetry};
