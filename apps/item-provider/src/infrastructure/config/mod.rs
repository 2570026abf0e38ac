//! Configuration Module
//!
//! Provider configuration loaded from `ITEM_PROVIDER_*` environment
//! variables.

mod settings;

pub use settings::{
    CapacitySettings, ConfigError, EncoderSettings, ProviderConfig, RuntimeSettings,
    ServiceSettings,
};
