//! Application Layer - Provider use cases and port definitions.
//!
//! The port traits in `ports` are implemented by the infrastructure layer;
//! everything else here is transport agnostic.

/// Transport and codec interfaces.
pub mod ports;

/// Provider error type.
pub mod error;

/// Size-classed scratch buffers for encoding.
pub mod buffers;

/// Response encoding and delivery with buffer growth and retry.
pub mod encoder;

/// Request validation and slot admission.
pub mod admission;

/// Batch request decomposition and accounting.
pub mod batch;

/// Stream and connection teardown.
pub mod lifecycle;

/// Post validation and reflection.
pub mod posting;

/// Event handling facade over the registry.
pub mod provider;
