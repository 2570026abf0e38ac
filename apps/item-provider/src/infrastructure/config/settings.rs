//! Provider Configuration Settings
//!
//! Configuration types for the item provider, loaded from environment
//! variables. Unset or unparsable numeric variables fall back to their
//! defaults; the assembled configuration is then validated as a whole.

use std::time::Duration;

use crate::application::encoder::EncoderLimits;
use crate::application::provider::ProviderOptions;
use crate::domain::directory::{DEFAULT_SYMBOL_LIST_NAME, ServiceDirectory};
use crate::domain::symbol_list::{DEFAULT_CAPACITY, RESERVED_NAMES};
use crate::infrastructure::dispatch::DispatcherConfig;

/// Published service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Service id requests must carry.
    pub service_id: u16,
    /// Service name.
    pub service_name: String,
    /// Maximum open streams per connection.
    pub open_limit: usize,
    /// Name of the symbol list item.
    pub symbol_list_name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            service_id: 1,
            service_name: "DIRECT_FEED".to_string(),
            open_limit: 10,
            symbol_list_name: DEFAULT_SYMBOL_LIST_NAME.to_string(),
        }
    }
}

/// Pool and queue sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacitySettings {
    /// Request slots shared by every connection.
    pub slot_capacity: usize,
    /// Symbol list entries, reserved names included.
    pub symbol_list_capacity: usize,
    /// Inbound event queue depth.
    pub event_queue_capacity: usize,
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            slot_capacity: 100,
            symbol_list_capacity: DEFAULT_CAPACITY,
            event_queue_capacity: 1_024,
        }
    }
}

/// Encode buffer sizing and refresh splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Buffer size for single-attempt messages.
    pub message_size: usize,
    /// First buffer size for refresh parts and symbol list refreshes.
    pub refresh_part_size: usize,
    /// Buffer ceiling for growable messages.
    pub max_buffer_size: usize,
    /// Encode attempts for growable messages.
    pub max_encode_attempts: u32,
    /// Parts per depth refresh.
    pub refresh_parts: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        let limits = EncoderLimits::default();
        Self {
            message_size: limits.message_size,
            refresh_part_size: limits.refresh_part_size,
            max_buffer_size: limits.max_buffer_size,
            max_encode_attempts: limits.max_encode_attempts,
            refresh_parts: limits.refresh_parts,
        }
    }
}

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Period of the update tick.
    pub tick_interval: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            metrics_port: 9090,
        }
    }
}

/// Complete provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Published service.
    pub service: ServiceSettings,
    /// Pool and queue sizes.
    pub capacity: CapacitySettings,
    /// Encoder sizing.
    pub encoder: EncoderSettings,
    /// Runtime settings.
    pub runtime: RuntimeSettings,
}

impl ProviderConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a name variable is set but empty, or if the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let service = ServiceSettings {
            service_id: parse_env_u16("ITEM_PROVIDER_SERVICE_ID", defaults.service.service_id),
            service_name: parse_env_name(
                "ITEM_PROVIDER_SERVICE_NAME",
                &defaults.service.service_name,
            )?,
            open_limit: parse_env_usize("ITEM_PROVIDER_OPEN_LIMIT", defaults.service.open_limit),
            symbol_list_name: parse_env_name(
                "ITEM_PROVIDER_SYMBOL_LIST_NAME",
                &defaults.service.symbol_list_name,
            )?,
        };

        let capacity = CapacitySettings {
            slot_capacity: parse_env_usize(
                "ITEM_PROVIDER_SLOT_CAPACITY",
                defaults.capacity.slot_capacity,
            ),
            symbol_list_capacity: parse_env_usize(
                "ITEM_PROVIDER_SYMBOL_LIST_CAPACITY",
                defaults.capacity.symbol_list_capacity,
            ),
            event_queue_capacity: parse_env_usize(
                "ITEM_PROVIDER_EVENT_QUEUE_CAPACITY",
                defaults.capacity.event_queue_capacity,
            ),
        };

        let encoder = EncoderSettings {
            message_size: parse_env_usize(
                "ITEM_PROVIDER_MESSAGE_SIZE",
                defaults.encoder.message_size,
            ),
            refresh_part_size: parse_env_usize(
                "ITEM_PROVIDER_REFRESH_PART_SIZE",
                defaults.encoder.refresh_part_size,
            ),
            max_buffer_size: parse_env_usize(
                "ITEM_PROVIDER_MAX_BUFFER_SIZE",
                defaults.encoder.max_buffer_size,
            ),
            max_encode_attempts: parse_env_u32(
                "ITEM_PROVIDER_MAX_ENCODE_ATTEMPTS",
                defaults.encoder.max_encode_attempts,
            ),
            refresh_parts: parse_env_u32(
                "ITEM_PROVIDER_REFRESH_PARTS",
                defaults.encoder.refresh_parts,
            ),
        };

        let runtime = RuntimeSettings {
            tick_interval: parse_env_duration_millis(
                "ITEM_PROVIDER_TICK_INTERVAL_MS",
                defaults.runtime.tick_interval,
            ),
            metrics_port: parse_env_u16(
                "ITEM_PROVIDER_METRICS_PORT",
                defaults.runtime.metrics_port,
            ),
        };

        let config = Self {
            service,
            capacity,
            encoder,
            runtime,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings against each other.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first inconsistent setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity.slot_capacity == 0 {
            return Err(ConfigError::invalid("ITEM_PROVIDER_SLOT_CAPACITY", "must be positive"));
        }
        if self.capacity.symbol_list_capacity < RESERVED_NAMES.len() {
            return Err(ConfigError::invalid(
                "ITEM_PROVIDER_SYMBOL_LIST_CAPACITY",
                "must hold the reserved names",
            ));
        }
        if self.capacity.event_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "ITEM_PROVIDER_EVENT_QUEUE_CAPACITY",
                "must be positive",
            ));
        }
        if self.encoder.refresh_parts == 0 {
            return Err(ConfigError::invalid("ITEM_PROVIDER_REFRESH_PARTS", "must be positive"));
        }
        if self.encoder.refresh_part_size == 0 {
            return Err(ConfigError::invalid(
                "ITEM_PROVIDER_REFRESH_PART_SIZE",
                "must be positive",
            ));
        }
        if self.encoder.max_buffer_size < self.encoder.refresh_part_size {
            return Err(ConfigError::invalid(
                "ITEM_PROVIDER_MAX_BUFFER_SIZE",
                "must not be below the refresh part size",
            ));
        }
        if self.runtime.tick_interval.is_zero() {
            return Err(ConfigError::invalid(
                "ITEM_PROVIDER_TICK_INTERVAL_MS",
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl From<&ProviderConfig> for ProviderOptions {
    fn from(config: &ProviderConfig) -> Self {
        let mut directory = ServiceDirectory::new(config.service.service_id, config.service.service_name.clone())
            .with_open_limit(config.service.open_limit);
        directory.symbol_list_name.clone_from(&config.service.symbol_list_name);

        Self {
            directory,
            limits: EncoderLimits {
                message_size: config.encoder.message_size,
                refresh_part_size: config.encoder.refresh_part_size,
                max_buffer_size: config.encoder.max_buffer_size,
                max_encode_attempts: config.encoder.max_encode_attempts,
                refresh_parts: config.encoder.refresh_parts,
            },
            slot_capacity: config.capacity.slot_capacity,
            symbol_list_capacity: config.capacity.symbol_list_capacity,
        }
    }
}

impl From<&ProviderConfig> for DispatcherConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            tick_interval: config.runtime.tick_interval,
            queue_capacity: config.capacity.event_queue_capacity,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A setting is out of range or inconsistent with another.
    #[error("invalid {key}: {reason}")]
    Invalid {
        /// Environment variable of the offending setting.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn parse_env_name(key: &str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Ok(value) => Ok(value),
        Err(_) => Ok(default.to_string()),
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
