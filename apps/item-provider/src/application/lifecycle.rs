//! Stream Lifecycle
//!
//! Releases request slots when a consumer closes a stream, when its
//! connection goes away, when a post deletes an item, and at shutdown.
//!
//! Every sweep snapshots the slot ids first and releases them one by one,
//! so the registry is never iterated while it is being mutated. The
//! returned [`Release`] records tell the caller which symbol list
//! deletions to broadcast.

use crate::application::encoder::ResponseEncoder;
use crate::application::error::ProviderError;
use crate::application::ports::Channel;
use crate::domain::registry::{ItemId, ItemRegistry, Release, SlotId};
use crate::domain::types::{ConnectionId, StreamId};

/// Slot release operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleManager;

impl LifecycleManager {
    /// Release the slot bound to `stream_id` on `connection`.
    ///
    /// An unknown stream is logged and ignored.
    pub fn close_stream(registry: &mut ItemRegistry, connection: ConnectionId, stream_id: StreamId) -> Option<Release> {
        let Some(slot) = registry.find_by_stream(connection, stream_id) else {
            tracing::debug!(connection, stream_id, "close for unknown stream ignored");
            return None;
        };

        Self::release_slot(registry, slot)
    }

    /// Release every slot the connection owns.
    pub fn release_connection(registry: &mut ItemRegistry, connection: ConnectionId) -> Vec<Release> {
        let releases: Vec<_> = registry
            .slots_for_connection(connection)
            .into_iter()
            .filter_map(|slot| Self::release_slot(registry, slot))
            .collect();

        tracing::info!(connection, released = releases.len(), "released connection streams");
        releases
    }

    /// Release every slot referencing `item`, freeing the item.
    pub fn release_item(registry: &mut ItemRegistry, item: ItemId) -> Vec<Release> {
        registry
            .slots_for_item(item)
            .into_iter()
            .filter_map(|slot| Self::release_slot(registry, slot))
            .collect()
    }

    /// Send a closing status on every stream the channel's connection owns,
    /// then release them.
    ///
    /// Streams are released whether or not their status was delivered;
    /// failed writes are returned next to the release they belong to.
    pub fn close_all_streams(
        registry: &mut ItemRegistry,
        encoder: &ResponseEncoder,
        channel: &dyn Channel,
    ) -> Vec<(Release, Result<(), ProviderError>)> {
        let mut closed = Vec::new();

        for slot_id in registry.slots_for_connection(channel.id()) {
            let written = match (registry.slot(slot_id), registry.item_for_slot(slot_id)) {
                (Some(slot), Some(item)) => encoder.send_close(channel, slot, item.name()),
                _ => Ok(()),
            };

            if let Some(release) = Self::release_slot(registry, slot_id) {
                closed.push((release, written));
            }
        }

        closed
    }

    /// Release one slot.
    pub fn release_slot(registry: &mut ItemRegistry, slot: SlotId) -> Option<Release> {
        let release = registry.release(slot)?;

        tracing::debug!(
            connection = release.slot.connection,
            stream_id = release.slot.stream_id,
            item = %release.item_name,
            item_released = release.item_released,
            "released stream"
        );

        Some(release)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::encoder::EncoderLimits;
    use crate::domain::registry::SlotBinding;
    use crate::domain::state::StreamState;
    use crate::domain::symbol_list::Membership;
    use crate::domain::types::{DomainType, MsgKey, Qos};
    use crate::infrastructure::codec::JsonCodec;
    use crate::infrastructure::memory::MemoryChannel;

    fn open(registry: &mut ItemRegistry, connection: ConnectionId, stream_id: StreamId, name: &str) -> SlotId {
        registry
            .allocate(SlotBinding {
                connection,
                stream_id,
                domain: DomainType::MarketPrice,
                key: MsgKey::named(name, 1),
                item_name: name.to_string(),
                streaming: true,
                private_stream: false,
                key_in_updates: false,
                refresh_pending: false,
            })
            .unwrap()
            .slot
    }

    #[test]
    fn close_unknown_stream_is_ignored() {
        let mut registry = ItemRegistry::new(4, 10);

        assert!(LifecycleManager::close_stream(&mut registry, 1, 5).is_none());
    }

    #[test]
    fn closing_last_interest_frees_item_and_evicts_symbol() {
        let mut registry = ItemRegistry::new(4, 10);
        open(&mut registry, 1, 5, "IBM");

        let release = LifecycleManager::close_stream(&mut registry, 1, 5).unwrap();

        assert!(release.item_released);
        assert_eq!(release.symbol_list, Some(Membership::Removed));
        assert_eq!(registry.shared_items(), 0);
        assert!(!registry.symbol_list().contains("IBM"));
    }

    #[test]
    fn connection_release_leaves_other_connections() {
        let mut registry = ItemRegistry::new(8, 10);
        open(&mut registry, 1, 5, "IBM");
        open(&mut registry, 1, 6, "TRI");
        let survivor = open(&mut registry, 2, 5, "IBM");

        let releases = LifecycleManager::release_connection(&mut registry, 1);

        assert_eq!(releases.len(), 2);
        assert_eq!(registry.open_streams(), 1);
        assert_eq!(registry.item_for_slot(survivor).unwrap().interest(), 1);
        assert!(releases.iter().all(|r| !r.evicted_from_symbol_list()));
    }

    #[test]
    fn item_release_frees_every_viewer() {
        let mut registry = ItemRegistry::new(8, 10);
        let slot = open(&mut registry, 1, 5, "IBM");
        open(&mut registry, 2, 7, "IBM");
        open(&mut registry, 2, 8, "TRI");
        let item = registry.slot(slot).unwrap().item;

        let releases = LifecycleManager::release_item(&mut registry, item);

        assert_eq!(releases.len(), 2);
        assert!(registry.item(item).is_none());
        assert_eq!(registry.open_streams(), 1);
    }

    #[test]
    fn close_all_streams_sends_closed_status_then_releases() {
        let mut registry = ItemRegistry::new(8, 10);
        open(&mut registry, 1, 5, "IBM");
        open(&mut registry, 1, 6, "TRI");
        let encoder = ResponseEncoder::new(Arc::new(JsonCodec), EncoderLimits::default(), Qos::default());
        let channel = MemoryChannel::new(1);

        let closed = LifecycleManager::close_all_streams(&mut registry, &encoder, &channel);

        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|(_, written)| written.is_ok()));
        assert_eq!(registry.open_streams(), 0);
        let texts: Vec<_> = channel
            .messages()
            .iter()
            .filter_map(|m| m.as_status().and_then(|s| s.state.clone()))
            .inspect(|state| assert_eq!(state.stream, StreamState::Closed))
            .map(|state| state.text)
            .collect();
        assert_eq!(
            texts,
            vec!["Stream closed for item: IBM", "Stream closed for item: TRI"]
        );
    }
}
