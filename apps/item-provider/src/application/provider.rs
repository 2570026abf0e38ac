//! Item Provider
//!
//! Event-driven facade over the registry, admission, batching, encoding,
//! posting and lifecycle components. One owner drives it through `&mut self`
//! handlers, one per inbound event.
//!
//! # Design
//!
//! - Writes answering the connection that raised a request (refreshes,
//!   rejects, batch close) never abort it either. They are recorded in
//!   [`RequestReport::response_failures`] and a batch moves on to its next
//!   item unless the failure was fatal.
//! - Writes to other connections (symbol list broadcasts, post fan-out,
//!   periodic updates) never abort the event. Each failure is recorded
//!   against its target in a [`FanOutReport`] and delivery continues.
//! - Every handler leaves the registry consistent even when a write fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::application::admission::{AdmissionControl, AdmissionOutcome, ItemRequest};
use crate::application::batch::{BatchDecomposer, BatchKind, BatchTally};
use crate::application::encoder::{EncoderLimits, Growth, ResponseEncoder};
use crate::application::error::ProviderError;
use crate::application::lifecycle::LifecycleManager;
use crate::application::ports::{Channel, WireCodec};
use crate::application::posting::{Nak, PostingPipeline, reflect_for};
use crate::domain::directory::ServiceDirectory;
use crate::domain::message::{PostMsg, RequestMsg};
use crate::domain::payload::MapAction;
use crate::domain::registry::{ItemId, ItemRegistry, Release, SlotId};
use crate::domain::reject::RejectReason;
use crate::domain::state::State;
use crate::domain::symbol_list::DEFAULT_CAPACITY;
use crate::domain::types::{ConnectionId, DomainType, StreamId};

// =============================================================================
// Options
// =============================================================================

/// Provider sizing and published service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Published service.
    pub directory: ServiceDirectory,
    /// Encode buffer sizing and refresh splitting.
    pub limits: EncoderLimits,
    /// Request slots shared by every connection.
    pub slot_capacity: usize,
    /// Symbol list entries, reserved names included.
    pub symbol_list_capacity: usize,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            directory: ServiceDirectory::default(),
            limits: EncoderLimits::default(),
            slot_capacity: 100,
            symbol_list_capacity: DEFAULT_CAPACITY,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// A failed write to one stream.
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Target connection.
    pub connection: ConnectionId,
    /// Target stream.
    pub stream_id: StreamId,
    /// What went wrong.
    pub error: ProviderError,
}

/// Result of writing to many streams.
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Messages written.
    pub delivered: usize,
    /// Failed writes, one per target.
    pub failures: Vec<DeliveryFailure>,
}

impl FanOutReport {
    /// Count a successful write of `messages` messages.
    pub const fn record_delivered(&mut self, messages: usize) {
        self.delivered += messages;
    }

    /// Record a failed write.
    pub fn record_failure(&mut self, connection: ConnectionId, stream_id: StreamId, error: ProviderError) {
        tracing::warn!(connection, stream_id, error = %error, "delivery failed");
        self.failures.push(DeliveryFailure {
            connection,
            stream_id,
            error,
        });
    }

    /// Record the outcome of one write.
    pub fn record(&mut self, connection: ConnectionId, stream_id: StreamId, result: Result<usize, ProviderError>) {
        match result {
            Ok(messages) => self.record_delivered(messages),
            Err(error) => self.record_failure(connection, stream_id, error),
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }

    /// Connections with at least one fatal failure, each listed once.
    #[must_use]
    pub fn fatal_connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<_> = self
            .failures
            .iter()
            .filter(|failure| failure.error.is_fatal())
            .map(|failure| failure.connection)
            .collect();
        connections.sort_unstable();
        connections.dedup();
        connections
    }

    /// Whether every write succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What became of one requested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A streaming subscription was opened.
    Opened,
    /// A snapshot was served and its stream released.
    Snapshot,
    /// An open stream was reissued.
    Reissued,
    /// The consumer was redirected to a private stream.
    Redirected,
    /// The request was rejected.
    Rejected(RejectReason),
}

impl Disposition {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Snapshot => "snapshot",
            Self::Reissued => "reissued",
            Self::Redirected => "redirected",
            Self::Rejected(_) => "rejected",
        }
    }

    /// Whether the item counts as served.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Opened | Self::Snapshot | Self::Reissued | Self::Redirected)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "rejected ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Outcome for one stream of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Stream the item was requested on.
    pub stream_id: StreamId,
    /// What happened.
    pub disposition: Disposition,
}

/// Result of handling a request.
#[derive(Debug, Default)]
pub struct RequestReport {
    /// One outcome per item, in request order.
    pub outcomes: Vec<ItemOutcome>,
    /// State sent to close a batch stream.
    pub batch_close: Option<State>,
    /// Symbol list broadcasts triggered by the request.
    pub fan_out: FanOutReport,
    /// Failed writes to the requesting connection.
    pub response_failures: Vec<DeliveryFailure>,
}

impl RequestReport {
    /// Record the outcome of one write to the requester.
    pub fn record_response(&mut self, connection: ConnectionId, stream_id: StreamId, result: Result<(), ProviderError>) {
        if let Err(error) = result {
            tracing::warn!(connection, stream_id, error = %error, "response not delivered");
            self.response_failures.push(DeliveryFailure {
                connection,
                stream_id,
                error,
            });
        }
    }

    /// Whether a write to the requester failed fatally.
    #[must_use]
    pub fn requester_lost(&self) -> bool {
        self.response_failures.iter().any(|failure| failure.error.is_fatal())
    }

    /// Every failed write, to the requester or to other streams.
    #[must_use]
    pub fn into_delivery(self) -> FanOutReport {
        let mut delivery = self.fan_out;
        delivery.failures.extend(self.response_failures);
        delivery
    }
}

/// Result of handling a post.
#[derive(Debug, Default)]
pub struct PostReport {
    /// The nak sent, or that would have been sent, when the post failed.
    pub nak: Option<Nak>,
    /// Whether an ack or nak went to the poster.
    pub acknowledged: bool,
    /// Reflection writes, plus any failed acknowledgement.
    pub fan_out: FanOutReport,
    /// Streams released because the post deleted the item.
    pub released: usize,
}

impl PostReport {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn result(&self) -> &'static str {
        self.nak.as_ref().map_or("accepted", |nak| nak.code.as_str())
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Interactive item provider.
pub struct ItemProvider {
    registry: ItemRegistry,
    admission: AdmissionControl,
    encoder: ResponseEncoder,
    posting: PostingPipeline,
    channels: HashMap<ConnectionId, Arc<dyn Channel>>,
}

impl fmt::Debug for ItemProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemProvider")
            .field("connections", &self.channels.len())
            .field("open_streams", &self.registry.open_streams())
            .field("shared_items", &self.registry.shared_items())
            .finish_non_exhaustive()
    }
}

impl ItemProvider {
    /// Provider writing through `codec`.
    #[must_use]
    pub fn new(options: ProviderOptions, codec: Arc<dyn WireCodec>) -> Self {
        let encoder = ResponseEncoder::new(codec, options.limits, options.directory.qos);

        Self {
            registry: ItemRegistry::new(options.slot_capacity, options.symbol_list_capacity),
            admission: AdmissionControl::new(options.directory),
            encoder,
            posting: PostingPipeline::default(),
            channels: HashMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Slot and item state.
    #[must_use]
    pub const fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    /// Published service.
    #[must_use]
    pub const fn directory(&self) -> &ServiceDirectory {
        self.admission.directory()
    }

    /// Open streams across every connection.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.registry.open_streams()
    }

    /// Live shared items.
    #[must_use]
    pub fn shared_items(&self) -> usize {
        self.registry.shared_items()
    }

    /// Registered connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, connection: ConnectionId) -> Result<Arc<dyn Channel>, ProviderError> {
        self.channels
            .get(&connection)
            .cloned()
            .ok_or(ProviderError::UnknownConnection(connection))
    }

    fn active_channel(&self, connection: ConnectionId) -> Option<&Arc<dyn Channel>> {
        self.channels.get(&connection).filter(|channel| channel.is_active())
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Register a connection.
    pub fn on_channel_up(&mut self, channel: Arc<dyn Channel>) {
        let connection = channel.id();
        tracing::info!(connection, "channel up");

        if self.channels.insert(connection, channel).is_some() {
            tracing::warn!(connection, "channel re-registered, streams kept");
        }
    }

    /// Forget a connection and release every stream it held.
    pub fn on_channel_down(&mut self, connection: ConnectionId) -> FanOutReport {
        self.channels.remove(&connection);
        let releases = LifecycleManager::release_connection(&mut self.registry, connection);

        let mut report = FanOutReport::default();
        self.settle_releases(&releases, &mut report);

        tracing::info!(connection, released = releases.len(), "channel down");
        report
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Handle an item or batch request.
    ///
    /// Failed writes to the requester are collected in
    /// [`RequestReport::response_failures`]; a batch keeps going past them
    /// unless the connection is lost.
    ///
    /// # Errors
    ///
    /// Fails only when the connection is unknown.
    pub fn on_request(&mut self, connection: ConnectionId, request: RequestMsg) -> Result<RequestReport, ProviderError> {
        let channel = self.channel(connection)?;

        if request.is_batch() {
            return Ok(self.on_batch_request(channel.as_ref(), &request));
        }

        tracing::debug!(
            connection,
            stream_id = request.stream_id,
            domain = %request.domain,
            item = request.key.name().unwrap_or_default(),
            "item request"
        );

        let mut report = RequestReport::default();
        let item = ItemRequest::from(&request);
        let outcome = self.admission.admit(&mut self.registry, connection, &request);
        let (disposition, written) = self.settle(channel.as_ref(), &item, outcome, &mut report.fan_out);

        report.record_response(connection, request.stream_id, written);
        report.outcomes.push(ItemOutcome {
            stream_id: request.stream_id,
            disposition,
        });
        Ok(report)
    }

    fn on_batch_request(&mut self, channel: &dyn Channel, request: &RequestMsg) -> RequestReport {
        let connection = channel.id();
        let mut report = RequestReport::default();

        tracing::debug!(
            connection,
            stream_id = request.stream_id,
            domain = %request.domain,
            items = request.batch.as_ref().map_or(0, Vec::len),
            "batch request"
        );

        let refusal = if self.registry.find_by_stream(connection, request.stream_id).is_some() {
            Some(RejectReason::StreamAlreadyInUse)
        } else {
            self.admission.validate(request).err()
        };

        if let Some(reason) = refusal {
            let written = self
                .encoder
                .send_reject(channel, request.stream_id, request.domain, None, reason);
            report.record_response(connection, request.stream_id, written);
            report.outcomes.push(ItemOutcome {
                stream_id: request.stream_id,
                disposition: Disposition::Rejected(reason),
            });
            return report;
        }

        let mut tally = BatchTally::new(BatchKind::Request);

        for item in BatchDecomposer::expand(request) {
            let outcome = BatchDecomposer::refine(self.admission.admit_item(&mut self.registry, connection, &item));
            let (disposition, written) = self.settle(channel, &item, outcome, &mut report.fan_out);

            tally.record(disposition.is_success() && written.is_ok());
            report.record_response(connection, item.stream_id, written);
            report.outcomes.push(ItemOutcome {
                stream_id: item.stream_id,
                disposition,
            });

            if report.requester_lost() {
                tracing::warn!(connection, stream_id = request.stream_id, "batch abandoned, connection lost");
                return report;
            }
        }

        let status = tally.close_status(request.stream_id, request.domain, request.flags.private_stream);
        report.batch_close.clone_from(&status.state);
        let written = self.encoder.send_status(channel, status);
        report.record_response(connection, request.stream_id, written);

        tracing::info!(
            connection,
            stream_id = request.stream_id,
            items = tally.processed(),
            failed = tally.failed(),
            "batch request handled"
        );
        report
    }

    /// Turn an admission outcome into responses on the requesting channel.
    ///
    /// The disposition stands even when the response could not be written.
    fn settle(
        &mut self,
        channel: &dyn Channel,
        request: &ItemRequest,
        outcome: AdmissionOutcome,
        fan_out: &mut FanOutReport,
    ) -> (Disposition, Result<(), ProviderError>) {
        match outcome {
            AdmissionOutcome::New(allocation) => {
                if allocation.symbol_list.is_some_and(|m| m.is_broadcast()) {
                    let name = self
                        .registry
                        .item(allocation.item)
                        .map(|item| item.name().to_string())
                        .unwrap_or_default();
                    self.broadcast_symbol(&name, MapAction::Add, fan_out);
                }

                let refreshed = if request.flags.no_refresh {
                    Ok(())
                } else {
                    self.refresh_slot(channel, allocation.slot, allocation.item)
                };

                let disposition = if request.flags.streaming {
                    Disposition::Opened
                } else {
                    if let Some(release) = LifecycleManager::release_slot(&mut self.registry, allocation.slot) {
                        self.settle_releases(&[release], fan_out);
                    }
                    Disposition::Snapshot
                };

                tracing::debug!(
                    connection = channel.id(),
                    stream_id = request.stream_id,
                    %disposition,
                    item_created = allocation.item_created,
                    "item request admitted"
                );
                (disposition, refreshed)
            }
            AdmissionOutcome::Reissue { slot, refresh_required } => {
                let item = self.registry.slot(slot).map(|slot| slot.item);
                let refreshed = match item {
                    Some(item) if refresh_required => {
                        if let Some(shared) = self.registry.item_mut(item) {
                            shared.set_refresh_pending(true);
                        }
                        self.refresh_slot(channel, slot, item)
                    }
                    _ => Ok(()),
                };
                (Disposition::Reissued, refreshed)
            }
            AdmissionOutcome::Redirected => {
                let written = self.encoder.send_reject(
                    channel,
                    request.stream_id,
                    request.domain,
                    Some(request.key.clone()),
                    RejectReason::PrivateStreamRedirect,
                );
                tracing::info!(connection = channel.id(), stream_id = request.stream_id, "redirected to private stream");
                (Disposition::Redirected, written)
            }
            AdmissionOutcome::Rejected(reason) => {
                let written = self
                    .encoder
                    .send_reject(channel, request.stream_id, request.domain, None, reason);
                tracing::info!(
                    connection = channel.id(),
                    stream_id = request.stream_id,
                    reason = reason.as_str(),
                    "item request rejected"
                );
                (Disposition::Rejected(reason), written)
            }
        }
    }

    /// Send a solicited refresh, then clear the item's pending flag whether
    /// or not the refresh went out.
    fn refresh_slot(&mut self, channel: &dyn Channel, slot: SlotId, item: ItemId) -> Result<(), ProviderError> {
        let written = self.encoder.send_item(channel, &mut self.registry, slot, true);

        if let Some(shared) = self.registry.item_mut(item) {
            shared.set_refresh_pending(false);
        }
        written.map(|_| ())
    }

    // -------------------------------------------------------------------------
    // Closes
    // -------------------------------------------------------------------------

    /// Handle a consumer closing one stream.
    pub fn on_close(&mut self, connection: ConnectionId, stream_id: StreamId) -> FanOutReport {
        let mut report = FanOutReport::default();

        if let Some(release) = LifecycleManager::close_stream(&mut self.registry, connection, stream_id) {
            tracing::info!(connection, stream_id, item = %release.item_name, "stream closed");
            self.settle_releases(&[release], &mut report);
        }

        report
    }

    /// Handle a batch close: close each listed stream, then close the
    /// stream the batch close arrived on.
    ///
    /// # Errors
    ///
    /// Fails when the connection is unknown or the closing status cannot be
    /// written.
    pub fn on_batch_close(
        &mut self,
        connection: ConnectionId,
        stream_id: StreamId,
        domain: DomainType,
        streams: &[StreamId],
    ) -> Result<FanOutReport, ProviderError> {
        let channel = self.channel(connection)?;
        let mut tally = BatchTally::new(BatchKind::Close);
        let mut report = FanOutReport::default();

        for &item_stream in streams {
            if let Some(release) = LifecycleManager::close_stream(&mut self.registry, connection, item_stream) {
                self.settle_releases(&[release], &mut report);
            }
            tally.record(true);
        }

        self.encoder
            .send_status(channel.as_ref(), tally.close_status(stream_id, domain, false))?;

        tracing::info!(connection, stream_id, streams = tally.processed(), "batch close handled");
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Posts
    // -------------------------------------------------------------------------

    /// Handle a post: validate, apply, acknowledge and reflect it.
    ///
    /// # Errors
    ///
    /// Fails only when the connection is unknown; write failures are
    /// reported per target.
    pub fn on_post(&mut self, connection: ConnectionId, post: PostMsg) -> Result<PostReport, ProviderError> {
        let channel = self.channel(connection)?;
        let mut report = PostReport::default();

        let applied = self
            .posting
            .resolve_target(&self.registry, channel.as_ref(), &post)
            .and_then(|item| {
                self.posting
                    .apply(&mut self.registry, item, &post)
                    .map(|reflection| (item, reflection))
            });

        let (item, reflection) = match applied {
            Ok(applied) => applied,
            Err(nak) => {
                tracing::info!(connection, stream_id = post.stream_id, post_id = post.post_id, nak = %nak, "post rejected");
                if post.ack_requested {
                    self.acknowledge(channel.as_ref(), &post, Some(&nak), &mut report);
                }
                report.nak = Some(nak);
                return Ok(report);
            }
        };

        if post.ack_requested {
            self.acknowledge(channel.as_ref(), &post, None, &mut report);
        }

        let name = self
            .registry
            .item(item)
            .map(|shared| shared.name().to_string())
            .unwrap_or_default();

        for slot_id in self.registry.slots_for_item(item) {
            let Some(slot) = self.registry.slot(slot_id) else {
                continue;
            };
            let Some(target) = self.active_channel(slot.connection) else {
                continue;
            };

            let msg = reflect_for(slot, &name, &reflection, post.user);
            let written = self.encoder.send(target.as_ref(), &msg, Growth::Fixed).map(|()| 1);
            report.fan_out.record(slot.connection, slot.stream_id, written);
        }

        if reflection.closes_item() {
            let releases = LifecycleManager::release_item(&mut self.registry, item);
            report.released = releases.len();
            self.settle_releases(&releases, &mut report.fan_out);
        }

        tracing::debug!(
            connection,
            item = %name,
            reflected = reflection.as_str(),
            delivered = report.fan_out.delivered,
            released = report.released,
            "post applied"
        );
        Ok(report)
    }

    fn acknowledge(&self, channel: &dyn Channel, post: &PostMsg, nak: Option<&Nak>, report: &mut PostReport) {
        match self.encoder.send_ack(channel, post, nak) {
            Ok(()) => report.acknowledged = true,
            Err(error) => report.fan_out.record_failure(channel.id(), post.stream_id, error),
        }
    }

    // -------------------------------------------------------------------------
    // Periodic and shutdown
    // -------------------------------------------------------------------------

    /// Advance every item and send each open stream its due response.
    pub fn on_tick(&mut self) -> FanOutReport {
        self.registry.tick();

        let mut report = FanOutReport::default();
        let mut refreshed = Vec::new();

        for slot_id in self.registry.in_use_slots() {
            let Some(slot) = self.registry.slot(slot_id) else {
                continue;
            };
            let (connection, stream_id, item) = (slot.connection, slot.stream_id, slot.item);
            let Some(channel) = self.active_channel(connection).cloned() else {
                continue;
            };

            if self.registry.item(item).is_some_and(|shared| shared.refresh_pending()) {
                refreshed.push(item);
            }

            let written = self.encoder.send_item(channel.as_ref(), &mut self.registry, slot_id, false);
            report.record(connection, stream_id, written);
        }

        for item in refreshed {
            if let Some(shared) = self.registry.item_mut(item) {
                shared.set_refresh_pending(false);
            }
        }

        report
    }

    /// Close every open stream on every connection.
    pub fn on_shutdown(&mut self) -> FanOutReport {
        let mut report = FanOutReport::default();
        let channels: Vec<_> = self.channels.values().cloned().collect();

        for channel in channels {
            let closed = LifecycleManager::close_all_streams(&mut self.registry, &self.encoder, channel.as_ref());

            for (release, written) in closed {
                report.record(release.slot.connection, release.slot.stream_id, written.map(|()| 1));
            }
        }

        tracing::info!(closed = report.delivered, failed = report.failures.len(), "provider shut down");
        report
    }

    // -------------------------------------------------------------------------
    // Symbol list
    // -------------------------------------------------------------------------

    fn settle_releases(&self, releases: &[Release], fan_out: &mut FanOutReport) {
        for release in releases.iter().filter(|release| release.evicted_from_symbol_list()) {
            self.broadcast_symbol(&release.item_name, MapAction::Delete, fan_out);
        }
    }

    /// Send one ADD or DELETE to every symbol list stream on an active
    /// connection.
    fn broadcast_symbol(&self, symbol: &str, action: MapAction, fan_out: &mut FanOutReport) {
        for slot_id in self.registry.symbol_list_slots() {
            let Some(slot) = self.registry.slot(slot_id) else {
                continue;
            };
            let Some(channel) = self.active_channel(slot.connection) else {
                continue;
            };

            let written = self
                .encoder
                .send_symbol_list_entry(channel.as_ref(), slot, symbol, action)
                .map(|()| 1);
            fan_out.record(slot.connection, slot.stream_id, written);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
