//! Tracing Subscriber Setup
//!
//! Installs a `tracing-subscriber` registry with an environment filter and
//! a formatting layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Extra filter directives, merged with the defaults
//! - `ITEM_PROVIDER_LOG_ANSI`: Set to "false" to disable colored output (default: true)
//! - `ITEM_PROVIDER_LOG_TARGET`: Set to "false" to hide event targets (default: true)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Directive applied on top of `RUST_LOG`.
const DEFAULT_DIRECTIVE: &str = "item_provider=info";

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Default filter directive for this crate.
    pub directive: String,
    /// Colored output.
    pub ansi: bool,
    /// Print event targets.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_string(),
            ansi: env_flag("ITEM_PROVIDER_LOG_ANSI", true),
            with_target: env_flag("ITEM_PROVIDER_LOG_TARGET", true),
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map_or(default, |v| v.to_lowercase() != "false")
}

/// Initialize logging with configuration from the environment.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), TryInitError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Initialize logging with a custom configuration.
///
/// An unparsable directive is reported on stderr and skipped.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_with_config(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let mut env_filter = EnvFilter::from_default_env();
    match config.directive.parse() {
        Ok(directive) => env_filter = env_filter.add_directive(directive),
        Err(e) => eprintln!("ignoring log directive {:?}: {e}", config.directive),
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.ansi)
        .with_target(config.with_target)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.directive, DEFAULT_DIRECTIVE);
        assert!(config.ansi);
        assert!(config.with_target);
    }

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let config = TelemetryConfig {
            ansi: false,
            ..TelemetryConfig::default()
        };

        let _ = init_with_config(&config);
        let second = init_with_config(&config);

        assert!(second.is_err());
    }
}
