//! Prometheus Metrics Module
//!
//! Exposes provider metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Requests**: Item request outcomes and reject reasons
//! - **Posts**: Post results by nak code
//! - **Delivery**: Messages written and failed writes
//! - **State**: Open streams, shared items and connections
//! - **Latency**: Tick processing time
//!
//! # Integration
//!
//! With a non-zero port the exporter serves `/metrics` itself; with port 0
//! only the in-process recorder is installed and [`get_metrics_handle`]
//! renders on demand.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::error::ProviderError;
use crate::application::provider::{Disposition, FanOutReport, PostReport, RequestReport};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder, listening on `port` unless it is 0.
///
/// Later calls are no-ops.
///
/// # Errors
///
/// Fails if the recorder or the HTTP listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    if port == 0 {
        let handle = builder.install_recorder()?;
        let _ = PROMETHEUS_HANDLE.set(handle);
    } else {
        builder
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()?;
    }

    register_metrics();
    let _ = INSTALLED.set(());
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` unless metrics were initialized without a listener.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Request counters
    describe_counter!(
        "item_provider_requests_total",
        "Item requests handled, by outcome"
    );
    describe_counter!(
        "item_provider_rejects_total",
        "Item requests rejected, by reason"
    );

    // Post counters
    describe_counter!("item_provider_posts_total", "Posts handled, by result");

    // Delivery counters
    describe_counter!(
        "item_provider_messages_sent_total",
        "Messages written to consumers, by triggering event"
    );
    describe_counter!(
        "item_provider_delivery_failures_total",
        "Failed writes to consumers, by error kind"
    );

    // State gauges
    describe_gauge!("item_provider_open_streams", "Open item streams");
    describe_gauge!("item_provider_shared_items", "Live shared items");
    describe_gauge!("item_provider_connections", "Registered connections");

    // Latency histograms
    describe_histogram!(
        "item_provider_tick_seconds",
        "Time to advance items and send periodic updates"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for the event that caused a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Item or batch request.
    Request,
    /// Stream or batch close.
    Close,
    /// Post.
    Post,
    /// Periodic tick.
    Tick,
    /// Connection loss.
    ChannelDown,
    /// Provider shutdown.
    Shutdown,
}

impl EventKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Close => "close",
            Self::Post => "post",
            Self::Tick => "tick",
            Self::ChannelDown => "channel_down",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Record the outcomes of a request.
pub fn record_request(report: &RequestReport) {
    for outcome in &report.outcomes {
        counter!(
            "item_provider_requests_total",
            "outcome" => outcome.disposition.as_str()
        )
        .increment(1);

        if let Disposition::Rejected(reason) = outcome.disposition {
            counter!(
                "item_provider_rejects_total",
                "reason" => reason.as_str()
            )
            .increment(1);
        }
    }

    for failure in &report.response_failures {
        record_delivery_failure(&failure.error);
    }
    record_fan_out(EventKind::Request, &report.fan_out);
}

/// Record a handled post.
pub fn record_post(report: &PostReport) {
    counter!("item_provider_posts_total", "result" => report.result()).increment(1);
    record_fan_out(EventKind::Post, &report.fan_out);
}

/// Record the writes of a fan-out.
pub fn record_fan_out(event: EventKind, report: &FanOutReport) {
    if report.delivered > 0 {
        counter!(
            "item_provider_messages_sent_total",
            "event" => event.as_str()
        )
        .increment(report.delivered as u64);
    }

    for failure in &report.failures {
        record_delivery_failure(&failure.error);
    }
}

/// Record one failed write.
pub fn record_delivery_failure(error: &ProviderError) {
    counter!(
        "item_provider_delivery_failures_total",
        "error" => error.kind()
    )
    .increment(1);
}

/// Update the state gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_provider_state(open_streams: usize, shared_items: usize, connections: usize) {
    gauge!("item_provider_open_streams").set(open_streams as f64);
    gauge!("item_provider_shared_items").set(shared_items as f64);
    gauge!("item_provider_connections").set(connections as f64);
}

/// Record tick processing duration.
pub fn record_tick_duration(duration: Duration) {
    histogram!("item_provider_tick_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
