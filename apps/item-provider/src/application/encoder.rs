//! Response Encoder
//!
//! Builds refresh, update, status and ack messages for request slots and
//! writes them to a channel.
//!
//! # Design
//!
//! - Flat items send one refresh or update per call; the item's
//!   pending-refresh flag decides which.
//! - Depth items split a refresh into a fixed number of parts. Between two
//!   parts a synthetic update goes out with every size raised by the part
//!   number plus one; the raise is undone before the next part so the book
//!   is unchanged once the sequence ends, whether or not it completed.
//! - Refresh parts and symbol list refreshes start from a small encode
//!   buffer and double it on overflow up to a ceiling. Everything else is
//!   encoded once into a buffer of the configured message size.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::application::buffers::BufferPool;
use crate::application::error::ProviderError;
use crate::application::ports::{Channel, CodecError, SubmitStatus, WireCodec};
use crate::application::posting::Nak;
use crate::domain::message::{
    AckMsg, MapPayload, Payload, PostMsg, RefreshMsg, ResponseMsg, StatusMsg, UpdateMsg,
};
use crate::domain::payload::{MapAction, MapEntry};
use crate::domain::registry::{ItemRegistry, RequestSlot, SlotId};
use crate::domain::reject::RejectReason;
use crate::domain::state::{DataState, State, StateCode, StreamState};
use crate::domain::symbol_list::SymbolListTracker;
use crate::domain::types::{DomainType, MsgKey, Qos, StreamId};

const REFRESH_COMPLETE_TEXT: &str = "Item Refresh Completed";
const REFRESH_IN_PROGRESS_TEXT: &str = "Item Refresh In Progress";

// =============================================================================
// Limits
// =============================================================================

/// Encode buffer sizing and refresh splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderLimits {
    /// Buffer size for messages encoded in one attempt.
    pub message_size: usize,
    /// First buffer size tried for growable messages.
    pub refresh_part_size: usize,
    /// Ceiling for growable messages.
    pub max_buffer_size: usize,
    /// Encode attempts for growable messages, first included.
    pub max_encode_attempts: u32,
    /// Parts per depth refresh.
    pub refresh_parts: u32,
}

impl Default for EncoderLimits {
    fn default() -> Self {
        Self {
            message_size: 4096,
            refresh_part_size: 200,
            max_buffer_size: 65_536,
            max_encode_attempts: 10,
            refresh_parts: 3,
        }
    }
}

/// How a message may use the encode buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// One attempt at the configured message size.
    Fixed,
    /// Double from the refresh part size until it fits or the ceiling is hit.
    Bounded,
}

// =============================================================================
// Encoder
// =============================================================================

/// Produces and writes responses.
#[derive(Debug)]
pub struct ResponseEncoder {
    codec: Arc<dyn WireCodec>,
    pool: BufferPool,
    limits: EncoderLimits,
    qos: Qos,
}

impl ResponseEncoder {
    /// Encoder writing through `codec`, publishing at `qos`.
    #[must_use]
    pub fn new(codec: Arc<dyn WireCodec>, limits: EncoderLimits, qos: Qos) -> Self {
        let pool = BufferPool::new(
            limits.refresh_part_size.min(limits.message_size),
            limits.max_buffer_size.max(limits.message_size),
        );

        Self {
            codec,
            pool,
            limits,
            qos,
        }
    }

    /// Configured limits.
    #[must_use]
    pub const fn limits(&self) -> &EncoderLimits {
        &self.limits
    }

    /// Encode `msg` and submit it on `channel`.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be encoded within its buffer budget,
    /// the transport has no buffer, or the submit is refused.
    pub fn send(
        &self,
        channel: &dyn Channel,
        msg: &ResponseMsg,
        growth: Growth,
    ) -> Result<(), ProviderError> {
        let (mut limit, max_attempts) = match growth {
            Growth::Fixed => (self.limits.message_size, 1),
            Growth::Bounded => (
                self.limits.refresh_part_size,
                self.limits.max_encode_attempts.max(1),
            ),
        };
        let mut attempts = 0;

        loop {
            attempts += 1;
            let mut buffer = self.pool.checkout(limit);

            match self.codec.encode(msg, &mut buffer) {
                Ok(()) => return self.submit(channel, msg, buffer.as_slice()),
                Err(CodecError::BufferTooSmall { .. })
                    if attempts < max_attempts && limit < self.limits.max_buffer_size =>
                {
                    limit = limit.saturating_mul(2).min(self.limits.max_buffer_size);
                    tracing::debug!(
                        connection = channel.id(),
                        stream_id = msg.stream_id(),
                        kind = msg.kind(),
                        limit,
                        "encode buffer too small, retrying larger"
                    );
                }
                Err(CodecError::BufferTooSmall { .. }) => {
                    return Err(ProviderError::BufferCeilingExceeded {
                        kind: msg.kind(),
                        size: limit,
                        attempts,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn submit(&self, channel: &dyn Channel, msg: &ResponseMsg, bytes: &[u8]) -> Result<(), ProviderError> {
        let connection = channel.id();

        let Some(mut transport) = channel.get_buffer(bytes.len()) else {
            return Err(ProviderError::BufferUnavailable {
                connection,
                size: bytes.len(),
            });
        };

        if !transport.fill(bytes) {
            return Err(ProviderError::BufferUnavailable {
                connection,
                size: bytes.len(),
            });
        }

        match channel.submit(transport) {
            SubmitStatus::Success => Ok(()),
            status => Err(ProviderError::Submit {
                connection,
                stream_id: msg.stream_id(),
                status,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Item responses
    // -------------------------------------------------------------------------

    /// Send the response a slot is due: a refresh when its item has one
    /// pending, otherwise an update. Symbol list slots only ever get
    /// refreshes here.
    ///
    /// Returns the number of messages written.
    ///
    /// # Errors
    ///
    /// Propagates the first failed write; for depth refreshes the book is
    /// restored before returning.
    pub fn send_item(
        &self,
        channel: &dyn Channel,
        registry: &mut ItemRegistry,
        slot_id: SlotId,
        solicited: bool,
    ) -> Result<usize, ProviderError> {
        let Some(slot) = registry.slot(slot_id).cloned() else {
            return Ok(0);
        };
        let Some(item) = registry.item(slot.item) else {
            return Ok(0);
        };
        let refresh = item.refresh_pending();
        let name = item.name().to_string();

        match slot.domain {
            DomainType::SymbolList => {
                if !refresh {
                    return Ok(0);
                }
                let msg = self.symbol_list_refresh(&slot, &name, registry.symbol_list(), solicited);
                self.send(channel, &msg, Growth::Bounded)?;
                Ok(1)
            }
            DomainType::MarketByOrder | DomainType::MarketByPrice => {
                if refresh {
                    self.send_depth_refresh(channel, registry, &slot, &name, solicited)
                } else {
                    let entries = item
                        .payload()
                        .depth()
                        .map(|book| book.update_entries())
                        .unwrap_or_default();
                    let msg = Self::update(&slot, &name, Payload::Map(MapPayload {
                        summary: Vec::new(),
                        entries,
                    }));
                    self.send(channel, &msg, Growth::Fixed)?;
                    Ok(1)
                }
            }
            DomainType::Other(_) => Ok(0),
            DomainType::MarketPrice => {
                let Some(record) = item.payload().market_price() else {
                    return Ok(0);
                };
                let msg = if refresh {
                    let fields = record.refresh_fields();
                    ResponseMsg::Refresh(self.refresh(
                        &slot,
                        &name,
                        solicited,
                        None,
                        true,
                        Payload::FieldList(fields),
                    ))
                } else {
                    Self::update(&slot, &name, Payload::FieldList(record.update_fields()))
                };
                self.send(channel, &msg, Growth::Fixed)?;
                Ok(1)
            }
        }
    }

    fn send_depth_refresh(
        &self,
        channel: &dyn Channel,
        registry: &mut ItemRegistry,
        slot: &RequestSlot,
        name: &str,
        solicited: bool,
    ) -> Result<usize, ProviderError> {
        let Some(book) = registry.item(slot.item).and_then(|item| item.payload().depth()) else {
            return Ok(0);
        };
        let summary = book.summary_fields();
        let entries = book.refresh_entries();

        let parts = self.limits.refresh_parts.max(1);
        let chunk = entries.len().div_ceil(parts as usize).max(1);
        let mut sent = 0;

        for part in 0..parts {
            let start = (part as usize * chunk).min(entries.len());
            let end = (start + chunk).min(entries.len());
            let last = part + 1 == parts;

            let payload = Payload::Map(MapPayload {
                summary: if part == 0 { summary.clone() } else { Vec::new() },
                entries: entries[start..end].to_vec(),
            });

            let mut refresh = self.refresh(slot, name, solicited, Some(part), last, payload);
            refresh.clear_cache = part == 0;
            self.send(channel, &ResponseMsg::Refresh(refresh), Growth::Bounded)?;
            sent += 1;

            if !last {
                self.send_perturbed_update(channel, registry, slot, name, Decimal::from(part + 1))?;
                sent += 1;
            }
        }

        Ok(sent)
    }

    fn send_perturbed_update(
        &self,
        channel: &dyn Channel,
        registry: &mut ItemRegistry,
        slot: &RequestSlot,
        name: &str,
        delta: Decimal,
    ) -> Result<(), ProviderError> {
        let Some(book) = registry
            .item_mut(slot.item)
            .and_then(|item| item.payload_mut().depth_mut())
        else {
            return Ok(());
        };

        book.adjust_sizes(delta);
        let entries = book.update_entries();
        book.adjust_sizes(-delta);

        let msg = Self::update(slot, name, Payload::Map(MapPayload {
            summary: Vec::new(),
            entries,
        }));
        self.send(channel, &msg, Growth::Fixed)
    }

    fn symbol_list_refresh(
        &self,
        slot: &RequestSlot,
        name: &str,
        symbol_list: &SymbolListTracker,
        solicited: bool,
    ) -> ResponseMsg {
        let entries = symbol_list
            .names()
            .map(|symbol| MapEntry::bare(MapAction::Add, symbol))
            .collect();

        ResponseMsg::Refresh(self.refresh(
            slot,
            name,
            solicited,
            None,
            true,
            Payload::Map(MapPayload {
                summary: Vec::new(),
                entries,
            }),
        ))
    }

    fn refresh(
        &self,
        slot: &RequestSlot,
        name: &str,
        solicited: bool,
        part_number: Option<u32>,
        complete: bool,
        payload: Payload,
    ) -> RefreshMsg {
        let stream = if slot.streaming {
            StreamState::Open
        } else {
            StreamState::NonStreaming
        };
        let text = if complete {
            REFRESH_COMPLETE_TEXT
        } else {
            REFRESH_IN_PROGRESS_TEXT
        };

        RefreshMsg {
            stream_id: slot.stream_id,
            domain: slot.domain,
            key: Some(response_key(slot, name)),
            state: State::new(stream, DataState::Ok, StateCode::None, text),
            qos: Some(self.qos),
            solicited,
            complete,
            clear_cache: true,
            private_stream: slot.private_stream,
            part_number,
            post_user: None,
            payload,
        }
    }

    fn update(slot: &RequestSlot, name: &str, payload: Payload) -> ResponseMsg {
        ResponseMsg::Update(UpdateMsg {
            stream_id: slot.stream_id,
            domain: slot.domain,
            key: slot.key_in_updates.then(|| response_key(slot, name)),
            post_user: None,
            payload,
        })
    }

    // -------------------------------------------------------------------------
    // Symbol list updates
    // -------------------------------------------------------------------------

    /// Send a one-entry ADD or DELETE to a symbol list slot.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn send_symbol_list_entry(
        &self,
        channel: &dyn Channel,
        slot: &RequestSlot,
        symbol: &str,
        action: MapAction,
    ) -> Result<(), ProviderError> {
        let msg = ResponseMsg::Update(UpdateMsg {
            stream_id: slot.stream_id,
            domain: DomainType::SymbolList,
            key: None,
            post_user: None,
            payload: Payload::Map(MapPayload {
                summary: Vec::new(),
                entries: vec![MapEntry::bare(action, symbol)],
            }),
        });

        self.send(channel, &msg, Growth::Fixed)
    }

    // -------------------------------------------------------------------------
    // Statuses and acks
    // -------------------------------------------------------------------------

    /// Send the reject status for `reason` on a stream.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn send_reject(
        &self,
        channel: &dyn Channel,
        stream_id: StreamId,
        domain: DomainType,
        key: Option<MsgKey>,
        reason: RejectReason,
    ) -> Result<(), ProviderError> {
        let msg = ResponseMsg::Status(StatusMsg {
            stream_id,
            domain,
            key,
            state: Some(reason.status(stream_id)),
            private_stream: reason.is_private(),
            post_user: None,
        });

        self.send(channel, &msg, Growth::Fixed)
    }

    /// Send a status.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn send_status(&self, channel: &dyn Channel, status: StatusMsg) -> Result<(), ProviderError> {
        self.send(channel, &ResponseMsg::Status(status), Growth::Fixed)
    }

    /// Send the closing status for an item stream.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn send_close(&self, channel: &dyn Channel, slot: &RequestSlot, name: &str) -> Result<(), ProviderError> {
        self.send_status(
            channel,
            StatusMsg {
                stream_id: slot.stream_id,
                domain: slot.domain,
                key: None,
                state: Some(State::closed_suspect(format!("Stream closed for item: {name}"))),
                private_stream: slot.private_stream,
                post_user: None,
            },
        )
    }

    /// Acknowledge a post, negatively when `nak` is given.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub fn send_ack(&self, channel: &dyn Channel, post: &PostMsg, nak: Option<&Nak>) -> Result<(), ProviderError> {
        let msg = ResponseMsg::Ack(AckMsg {
            stream_id: post.stream_id,
            domain: post.domain,
            ack_id: post.post_id,
            seq_num: post.seq_num,
            nak_code: nak.map(|nak| nak.code),
            text: nak.map(|nak| nak.text.clone()),
        });

        self.send(channel, &msg, Growth::Fixed)
    }
}

/// Key carried on responses for a slot: the shared item name under the
/// requested service.
pub(crate) fn response_key(slot: &RequestSlot, name: &str) -> MsgKey {
    MsgKey {
        name: Some(name.to_string()),
        service_id: slot.key.service_id,
        attrib: None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use mockall::predicate::always;

    use super::*;
    use crate::application::ports::{MockChannel, TransportBuffer};
    use crate::domain::message::PostContent;
    use crate::domain::state::NakCode;
    use crate::domain::registry::SlotBinding;
    use crate::infrastructure::codec::JsonCodec;
    use crate::infrastructure::memory::MemoryChannel;

    fn encoder(limits: EncoderLimits) -> ResponseEncoder {
        ResponseEncoder::new(Arc::new(JsonCodec), limits, Qos::realtime_tick_by_tick())
    }

    fn bind(registry: &mut ItemRegistry, domain: DomainType, name: &str) -> SlotId {
        registry
            .allocate(SlotBinding {
                connection: 1,
                stream_id: 5,
                domain,
                key: MsgKey::named(name, 1),
                item_name: name.to_string(),
                streaming: true,
                private_stream: false,
                key_in_updates: false,
                refresh_pending: true,
            })
            .unwrap()
            .slot
    }

    #[test]
    fn flat_refresh_then_update() {
        let encoder = encoder(EncoderLimits::default());
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketPrice, "TRI");

        assert_eq!(encoder.send_item(&channel, &mut registry, slot, true).unwrap(), 1);
        let item = registry.slot(slot).unwrap().item;
        registry.item_mut(item).unwrap().set_refresh_pending(false);
        assert_eq!(encoder.send_item(&channel, &mut registry, slot, false).unwrap(), 1);

        let messages = channel.messages();
        let refresh = messages[0].as_refresh().unwrap();
        assert!(refresh.solicited);
        assert!(refresh.complete);
        assert_eq!(refresh.state.stream, StreamState::Open);
        assert_eq!(refresh.key.as_ref().and_then(MsgKey::name), Some("TRI"));
        assert!(messages[1].as_update().unwrap().key.is_none());
    }

    #[test]
    fn unsupported_domain_writes_nothing() {
        let encoder = encoder(EncoderLimits::default());
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketPrice, "TRI");
        registry.slot_mut(slot).unwrap().domain = DomainType::Other(200);

        assert_eq!(encoder.send_item(&channel, &mut registry, slot, true).unwrap(), 0);
        assert!(channel.frames().is_empty());
    }

    #[test]
    fn depth_refresh_emits_parts_and_interleaved_updates() {
        let encoder = encoder(EncoderLimits::default());
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketByPrice, "AAO.V");
        let item = registry.slot(slot).unwrap().item;
        let before = registry.item(item).unwrap().payload().clone();

        let sent = encoder.send_item(&channel, &mut registry, slot, true).unwrap();

        assert_eq!(sent, 5);
        let kinds: Vec<_> = channel.messages().iter().map(ResponseMsg::kind).collect();
        assert_eq!(kinds, vec!["refresh", "update", "refresh", "update", "refresh"]);
        assert_eq!(registry.item(item).unwrap().payload(), &before);
    }

    #[test]
    fn depth_refresh_parts_are_numbered_and_only_last_complete() {
        let encoder = encoder(EncoderLimits::default());
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketByOrder, "AAO.V");

        encoder.send_item(&channel, &mut registry, slot, true).unwrap();

        let refreshes: Vec<_> = channel
            .messages()
            .into_iter()
            .filter_map(|m| m.as_refresh().cloned())
            .collect();
        let parts: Vec<_> = refreshes.iter().map(|r| r.part_number).collect();
        assert_eq!(parts, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(
            refreshes.iter().map(|r| r.complete).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert!(refreshes[0].clear_cache);
        assert!(!refreshes[1].clear_cache);
    }

    #[test]
    fn bounded_growth_retries_until_it_fits() {
        let encoder = encoder(EncoderLimits {
            refresh_part_size: 16,
            ..EncoderLimits::default()
        });
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketByOrder, "AAO.V");

        let sent = encoder.send_item(&channel, &mut registry, slot, true).unwrap();

        assert_eq!(sent, 5);
    }

    #[test]
    fn bounded_growth_gives_up_at_ceiling() {
        let encoder = encoder(EncoderLimits {
            refresh_part_size: 16,
            max_buffer_size: 64,
            ..EncoderLimits::default()
        });
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketByOrder, "AAO.V");
        let item = registry.slot(slot).unwrap().item;
        let before = registry.item(item).unwrap().payload().clone();

        let err = encoder.send_item(&channel, &mut registry, slot, true).unwrap_err();

        assert!(matches!(err, ProviderError::BufferCeilingExceeded { size: 64, .. }));
        assert!(err.is_fatal());
        assert!(channel.messages().is_empty());
        assert_eq!(registry.item(item).unwrap().payload(), &before);
    }

    #[test]
    fn fixed_message_too_large_is_fatal() {
        let encoder = encoder(EncoderLimits {
            message_size: 32,
            ..EncoderLimits::default()
        });
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketPrice, "TRI");

        let err = encoder.send_item(&channel, &mut registry, slot, true).unwrap_err();

        assert!(matches!(err, ProviderError::BufferCeilingExceeded { attempts: 1, .. }));
    }

    #[test]
    fn retryable_submit_is_reported_non_fatal() {
        let encoder = encoder(EncoderLimits::default());
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(7_u64);
        channel
            .expect_get_buffer()
            .with(always())
            .returning(|size| Some(TransportBuffer::with_capacity(size)));
        channel.expect_submit().times(1).return_const(SubmitStatus::Retryable);
        let mut registry = ItemRegistry::new(4, 10);
        let slot = bind(&mut registry, DomainType::MarketPrice, "TRI");

        let err = encoder.send_item(&channel, &mut registry, slot, true).unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Submit {
                connection: 7,
                stream_id: 5,
                status: SubmitStatus::Retryable
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_transport_buffer_is_fatal() {
        let encoder = encoder(EncoderLimits::default());
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(7_u64);
        channel.expect_get_buffer().returning(|_| None);
        channel.expect_submit().never();

        let err = encoder
            .send_reject(&channel, 5, DomainType::MarketPrice, None, RejectReason::ItemNotSupported)
            .unwrap_err();

        assert!(matches!(err, ProviderError::BufferUnavailable { connection: 7, .. }));
    }

    #[test]
    fn symbol_list_refresh_lists_reserved_and_added_names() {
        let encoder = encoder(EncoderLimits::default());
        let channel = MemoryChannel::new(1);
        let mut registry = ItemRegistry::new(4, 10);
        bind(&mut registry, DomainType::MarketPrice, "IBM");
        let list = registry
            .allocate(SlotBinding {
                connection: 1,
                stream_id: 6,
                domain: DomainType::SymbolList,
                key: MsgKey::named("_ETA_ITEM_LIST", 1),
                item_name: "_ETA_ITEM_LIST".to_string(),
                streaming: true,
                private_stream: false,
                key_in_updates: false,
                refresh_pending: true,
            })
            .unwrap()
            .slot;

        encoder.send_item(&channel, &mut registry, list, true).unwrap();

        let messages = channel.messages();
        let Payload::Map(map) = &messages[0].as_refresh().unwrap().payload else {
            panic!("symbol list refresh must carry a map");
        };
        let names: Vec<_> = map.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(names, vec!["TRI", "RES-DS", "IBM"]);
    }

    #[test]
    fn ack_echoes_post_id_and_sequence() {
        let encoder = encoder(EncoderLimits::default());
        let channel = MemoryChannel::new(1);
        let mut post = PostMsg::on_stream(5, DomainType::MarketPrice, 42, PostContent::Fields(vec![]));
        post.seq_num = Some(9);

        encoder
            .send_ack(&channel, &post, Some(&Nak::new(NakCode::SymbolUnknown, "unknown")))
            .unwrap();

        let messages = channel.messages();
        let ack = messages[0].as_ack().unwrap();
        assert_eq!(ack.ack_id, 42);
        assert_eq!(ack.seq_num, Some(9));
        assert_eq!(ack.nak_code, Some(NakCode::SymbolUnknown));
    }
}
