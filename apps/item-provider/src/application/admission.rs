//! Admission Control
//!
//! Decides whether an item request is legal and what it means: a new
//! subscription, a reissue of an open stream, a redirect to a private
//! stream, or a rejection.
//!
//! # Design
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. service id present and equal to the directory's
//! 2. requested QoS equal to (or a range containing) the published QoS
//! 3. no key attribute bytes
//! 4. a served domain
//! 5. a usable item name (the symbol list's own name, or none, for the
//!    symbol list domain)
//! 6. private-only items requested on a private stream, else redirect
//! 7. reissue / collision scan over the connection's open streams
//! 8. per-connection open limit and slot pool capacity
//!
//! Steps 1-4 depend only on the request and are shared with batch
//! requests, which run them once for the whole batch.

use crate::domain::directory::ServiceDirectory;
use crate::domain::message::{RequestFlags, RequestMsg};
use crate::domain::registry::{Allocation, AllocationError, ItemRegistry, SlotBinding, SlotId};
use crate::domain::reject::RejectReason;
use crate::domain::types::{ConnectionId, DomainType, MsgKey, StreamId};

/// What an admitted or refused request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// A slot was bound.
    New(Allocation),
    /// The request matches an open stream.
    Reissue {
        /// The matching slot.
        slot: SlotId,
        /// Whether the consumer wants a fresh refresh.
        refresh_required: bool,
    },
    /// The item is only served on a private stream.
    Redirected,
    /// The request was refused.
    Rejected(RejectReason),
}

/// One item's worth of request, standalone or derived from a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    /// Stream to bind.
    pub stream_id: StreamId,
    /// Requested domain.
    pub domain: DomainType,
    /// Item key.
    pub key: MsgKey,
    /// Behavior flags.
    pub flags: RequestFlags,
}

impl From<&RequestMsg> for ItemRequest {
    fn from(request: &RequestMsg) -> Self {
        Self {
            stream_id: request.stream_id,
            domain: request.domain,
            key: request.key.clone(),
            flags: request.flags,
        }
    }
}

/// Request validation and slot allocation.
#[derive(Debug, Clone)]
pub struct AdmissionControl {
    directory: ServiceDirectory,
}

impl AdmissionControl {
    /// Admission against `directory`.
    #[must_use]
    pub const fn new(directory: ServiceDirectory) -> Self {
        Self { directory }
    }

    /// The published service.
    #[must_use]
    pub const fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    /// Checks that depend only on the request: service, QoS, key
    /// attributes and domain.
    ///
    /// # Errors
    ///
    /// The first failed check's reason.
    pub fn validate(&self, request: &RequestMsg) -> Result<(), RejectReason> {
        if request.key.service_id != Some(self.directory.service_id) {
            return Err(RejectReason::InvalidServiceId);
        }

        if let Some(qos) = &request.qos {
            let provided = &self.directory.qos;
            let acceptable = match &request.worst_qos {
                Some(worst) => provided.is_in_range(qos, worst),
                None => provided == qos,
            };
            if !acceptable {
                return Err(RejectReason::QosNotSupported);
            }
        }

        if request.key.attrib.is_some() {
            return Err(RejectReason::KeyAttribNotSupported);
        }

        if !request.domain.is_supported() {
            return Err(RejectReason::DomainNotSupported);
        }

        Ok(())
    }

    /// Validate and admit a single-item request.
    pub fn admit(
        &self,
        registry: &mut ItemRegistry,
        connection: ConnectionId,
        request: &RequestMsg,
    ) -> AdmissionOutcome {
        if let Err(reason) = self.validate(request) {
            return AdmissionOutcome::Rejected(reason);
        }

        self.admit_item(registry, connection, &ItemRequest::from(request))
    }

    /// Admit one already-validated item request.
    pub fn admit_item(
        &self,
        registry: &mut ItemRegistry,
        connection: ConnectionId,
        request: &ItemRequest,
    ) -> AdmissionOutcome {
        let item_name = match self.item_name(request) {
            Ok(name) => name,
            Err(reason) => return AdmissionOutcome::Rejected(reason),
        };

        if ServiceDirectory::is_private_only(&item_name) && !request.flags.private_stream {
            return AdmissionOutcome::Redirected;
        }

        if let Some(outcome) = Self::match_open_stream(registry, connection, request) {
            return outcome;
        }

        if registry.connection_slot_count(connection) >= self.directory.open_limit {
            return AdmissionOutcome::Rejected(RejectReason::ItemCountReached);
        }

        let binding = SlotBinding {
            connection,
            stream_id: request.stream_id,
            domain: request.domain,
            key: request.key.clone(),
            item_name,
            streaming: request.flags.streaming,
            private_stream: request.flags.private_stream,
            key_in_updates: request.flags.msg_key_in_updates,
            refresh_pending: !request.flags.no_refresh,
        };

        match registry.allocate(binding) {
            Ok(allocation) => AdmissionOutcome::New(allocation),
            Err(AllocationError::PoolExhausted) => {
                AdmissionOutcome::Rejected(RejectReason::ItemCountReached)
            }
            Err(AllocationError::UnsupportedDomain(_)) => {
                AdmissionOutcome::Rejected(RejectReason::DomainNotSupported)
            }
        }
    }

    fn item_name(&self, request: &ItemRequest) -> Result<String, RejectReason> {
        let list_name = &self.directory.symbol_list_name;

        match (request.domain, request.key.name()) {
            (DomainType::SymbolList, None) => Ok(list_name.clone()),
            (DomainType::SymbolList, Some(name)) if name == list_name => Ok(name.to_string()),
            (DomainType::SymbolList, Some(_)) => Err(RejectReason::ItemNotSupported),
            (_, Some(name)) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(RejectReason::ItemNotSupported),
        }
    }

    /// Scan the connection's open streams for a reissue or a collision.
    fn match_open_stream(
        registry: &ItemRegistry,
        connection: ConnectionId,
        request: &ItemRequest,
    ) -> Option<AdmissionOutcome> {
        for slot_id in registry.slots_for_connection(connection) {
            let Some(slot) = registry.slot(slot_id) else {
                continue;
            };

            if slot.domain == request.domain && slot.key == request.key {
                if slot.stream_id != request.stream_id {
                    if request.flags.private_stream {
                        continue;
                    }
                    return Some(AdmissionOutcome::Rejected(RejectReason::ItemAlreadyOpened));
                }

                if slot.private_stream != request.flags.private_stream {
                    return Some(AdmissionOutcome::Rejected(
                        RejectReason::PrivateStreamMismatch,
                    ));
                }

                return Some(AdmissionOutcome::Reissue {
                    slot: slot_id,
                    refresh_required: !request.flags.no_refresh,
                });
            }

            if slot.stream_id == request.stream_id {
                return Some(AdmissionOutcome::Rejected(RejectReason::StreamAlreadyInUse));
            }
        }

        None
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::symbol_list::Membership;
    use crate::domain::types::{Qos, Rate, Timeliness};

    fn admission() -> AdmissionControl {
        AdmissionControl::new(ServiceDirectory::new(1, "DIRECT_FEED").with_open_limit(3))
    }

    fn registry() -> ItemRegistry {
        ItemRegistry::new(8, 100)
    }

    fn rejected(outcome: AdmissionOutcome) -> Option<RejectReason> {
        match outcome {
            AdmissionOutcome::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    #[test]
    fn new_request_allocates_slot() {
        let mut registry = registry();

        let outcome = admission().admit(
            &mut registry,
            1,
            &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1),
        );

        let AdmissionOutcome::New(allocation) = outcome else {
            panic!("expected new allocation, got {outcome:?}");
        };
        assert_eq!(registry.slot(allocation.slot).unwrap().stream_id, 5);
        assert_eq!(allocation.symbol_list, Some(Membership::Reserved));
    }

    #[test_case(RequestMsg::item(5, DomainType::MarketPrice, "TRI", 2), RejectReason::InvalidServiceId ; "wrong service")]
    #[test_case(RequestMsg { key: MsgKey { name: Some("TRI".into()), service_id: None, attrib: None }, ..RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1) }, RejectReason::InvalidServiceId ; "missing service")]
    #[test_case(RequestMsg { key: MsgKey { name: Some("TRI".into()), service_id: Some(1), attrib: Some(vec![1]) }, ..RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1) }, RejectReason::KeyAttribNotSupported ; "key attributes")]
    #[test_case(RequestMsg::item(5, DomainType::Other(128), "TRI", 1), RejectReason::DomainNotSupported ; "unknown domain")]
    #[test_case(RequestMsg::item(5, DomainType::SymbolList, "OTHER_LIST", 1), RejectReason::ItemNotSupported ; "foreign symbol list")]
    #[test_case(RequestMsg::item(5, DomainType::MarketPrice, "", 1), RejectReason::ItemNotSupported ; "empty name")]
    fn invalid_requests_are_rejected(request: RequestMsg, reason: RejectReason) {
        let mut registry = registry();

        let outcome = admission().admit(&mut registry, 1, &request);

        assert_eq!(rejected(outcome), Some(reason));
        assert_eq!(registry.open_streams(), 0);
    }

    #[test]
    fn qos_without_range_must_match_exactly() {
        let delayed = Qos {
            timeliness: Timeliness::Delayed(10),
            rate: Rate::TickByTick,
            dynamic: false,
        };
        let request = RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1).with_qos(delayed, None);

        let outcome = admission().admit(&mut registry(), 1, &request);

        assert_eq!(rejected(outcome), Some(RejectReason::QosNotSupported));
    }

    #[test]
    fn qos_range_containing_provider_is_accepted() {
        let worst = Qos {
            timeliness: Timeliness::DelayedUnknown,
            rate: Rate::JitConflated,
            dynamic: false,
        };
        let request = RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1)
            .with_qos(Qos::realtime_tick_by_tick(), Some(worst));

        let outcome = admission().admit(&mut registry(), 1, &request);

        assert!(matches!(outcome, AdmissionOutcome::New(_)));
    }

    #[test]
    fn unnamed_symbol_list_request_uses_list_name() {
        let mut registry = registry();
        let mut request = RequestMsg::item(5, DomainType::SymbolList, "", 1);
        request.key.name = None;

        let AdmissionOutcome::New(allocation) = admission().admit(&mut registry, 1, &request) else {
            panic!("symbol list request should be admitted");
        };

        assert_eq!(registry.item(allocation.item).unwrap().name(), "_ETA_ITEM_LIST");
    }

    #[test]
    fn private_only_item_on_public_stream_is_redirected() {
        let mut registry = registry();

        let outcome = admission().admit(
            &mut registry,
            1,
            &RequestMsg::item(5, DomainType::MarketPrice, "RES-DS", 1),
        );

        assert_eq!(outcome, AdmissionOutcome::Redirected);
        assert_eq!(registry.open_streams(), 0);
    }

    #[test]
    fn private_only_item_on_private_stream_is_admitted() {
        let outcome = admission().admit(
            &mut registry(),
            1,
            &RequestMsg::item(5, DomainType::MarketPrice, "RES-DS", 1).private(),
        );

        assert!(matches!(outcome, AdmissionOutcome::New(_)));
    }

    #[test]
    fn same_stream_same_key_is_reissue() {
        let mut registry = registry();
        let admission = admission();
        let request = RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1);
        let AdmissionOutcome::New(first) = admission.admit(&mut registry, 1, &request) else {
            panic!("first request should be admitted");
        };

        let outcome = admission.admit(&mut registry, 1, &request);

        assert_eq!(
            outcome,
            AdmissionOutcome::Reissue {
                slot: first.slot,
                refresh_required: true
            }
        );
        assert_eq!(registry.item(first.item).unwrap().interest(), 1);
        assert_eq!(registry.open_streams(), 1);
    }

    #[test]
    fn reissue_without_refresh() {
        let mut registry = registry();
        let admission = admission();
        let request = RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1);
        admission.admit(&mut registry, 1, &request);

        let outcome = admission.admit(&mut registry, 1, &request.without_refresh());

        assert!(matches!(
            outcome,
            AdmissionOutcome::Reissue {
                refresh_required: false,
                ..
            }
        ));
    }

    #[test]
    fn same_key_other_stream_is_already_opened() {
        let mut registry = registry();
        let admission = admission();
        admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1));

        let outcome = admission.admit(&mut registry, 1, &RequestMsg::item(6, DomainType::MarketPrice, "TRI", 1));

        assert_eq!(rejected(outcome), Some(RejectReason::ItemAlreadyOpened));
    }

    #[test]
    fn same_key_other_stream_private_opens_new_stream() {
        let mut registry = registry();
        let admission = admission();
        admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1));

        let outcome = admission.admit(
            &mut registry,
            1,
            &RequestMsg::item(6, DomainType::MarketPrice, "TRI", 1).private(),
        );

        assert!(matches!(outcome, AdmissionOutcome::New(_)));
        assert_eq!(registry.shared_items(), 2);
    }

    #[test]
    fn reissue_with_flipped_private_flag_is_mismatch() {
        let mut registry = registry();
        let admission = admission();
        admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1));

        let outcome = admission.admit(
            &mut registry,
            1,
            &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1).private(),
        );

        assert_eq!(rejected(outcome), Some(RejectReason::PrivateStreamMismatch));
    }

    #[test]
    fn stream_reuse_for_other_item_is_in_use() {
        let mut registry = registry();
        let admission = admission();
        admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1));

        let outcome = admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "IBM", 1));

        assert_eq!(rejected(outcome), Some(RejectReason::StreamAlreadyInUse));
    }

    #[test]
    fn streams_on_other_connections_do_not_collide() {
        let mut registry = registry();
        let admission = admission();
        admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1));

        let outcome = admission.admit(&mut registry, 2, &RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1));

        let AdmissionOutcome::New(allocation) = outcome else {
            panic!("second connection should get its own slot");
        };
        assert!(!allocation.item_created);
    }

    #[test]
    fn open_limit_per_connection() {
        let mut registry = registry();
        let admission = admission();
        for (stream, name) in [(5, "A"), (6, "B"), (7, "C")] {
            admission.admit(&mut registry, 1, &RequestMsg::item(stream, DomainType::MarketPrice, name, 1));
        }

        let outcome = admission.admit(&mut registry, 1, &RequestMsg::item(8, DomainType::MarketPrice, "D", 1));
        let other = admission.admit(&mut registry, 2, &RequestMsg::item(8, DomainType::MarketPrice, "D", 1));

        assert_eq!(rejected(outcome), Some(RejectReason::ItemCountReached));
        assert!(matches!(other, AdmissionOutcome::New(_)));
    }

    #[test]
    fn exhausted_pool_is_item_count_reached() {
        let mut registry = ItemRegistry::new(1, 100);
        let admission = admission();
        admission.admit(&mut registry, 1, &RequestMsg::item(5, DomainType::MarketPrice, "A", 1));

        let outcome = admission.admit(&mut registry, 2, &RequestMsg::item(5, DomainType::MarketPrice, "B", 1));

        assert_eq!(rejected(outcome), Some(RejectReason::ItemCountReached));
    }
}
