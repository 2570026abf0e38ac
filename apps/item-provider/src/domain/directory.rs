//! Service Directory
//!
//! The one service this provider publishes, as advertised to consumers.

use crate::domain::types::{Qos, ServiceId};

/// Item published on every service and pinned in the symbol list.
pub const ANCHOR_ITEM: &str = "TRI";

/// Item that may only be opened on a private stream.
pub const PRIVATE_STREAM_ITEM: &str = "RES-DS";

/// Default name of the symbol list item.
pub const DEFAULT_SYMBOL_LIST_NAME: &str = "_ETA_ITEM_LIST";

/// Read-only description of the published service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDirectory {
    /// Service id requests must carry.
    pub service_id: ServiceId,
    /// Service name.
    pub service_name: String,
    /// QoS the service publishes at.
    pub qos: Qos,
    /// Maximum open streams per connection.
    pub open_limit: usize,
    /// Name of the symbol list item.
    pub symbol_list_name: String,
}

impl ServiceDirectory {
    /// Directory for a service id with default QoS, limit and list name.
    #[must_use]
    pub fn new(service_id: ServiceId, service_name: impl Into<String>) -> Self {
        Self {
            service_id,
            service_name: service_name.into(),
            qos: Qos::realtime_tick_by_tick(),
            open_limit: 10,
            symbol_list_name: DEFAULT_SYMBOL_LIST_NAME.to_string(),
        }
    }

    /// Override the per-connection open limit.
    #[must_use]
    pub const fn with_open_limit(mut self, open_limit: usize) -> Self {
        self.open_limit = open_limit;
        self
    }

    /// Whether `name` is the private-stream-only item.
    #[must_use]
    pub fn is_private_only(name: &str) -> bool {
        name == PRIVATE_STREAM_ITEM
    }
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self::new(1, "DIRECT_FEED")
    }
}
