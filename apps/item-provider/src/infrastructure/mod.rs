//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the runtime
//! pieces around the provider: configuration, the event loop, metrics and
//! logging.

/// JSON wire codec.
pub mod codec;

/// In-memory loopback channel.
pub mod memory;

/// Configuration from the environment.
pub mod config;

/// Single-task event loop that owns the provider.
pub mod dispatch;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber setup.
pub mod telemetry;
