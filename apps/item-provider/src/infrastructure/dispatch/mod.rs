//! Event Dispatcher
//!
//! Owns the [`ItemProvider`] on a single tokio task and feeds it inbound
//! events and the periodic tick.
//!
//! # Design
//!
//! - Producers hold a cloneable [`DispatcherHandle`] and push
//!   [`ProviderEvent`]s onto a bounded mpsc queue.
//! - The run loop selects over cancellation, the queue and a tick
//!   interval, so every provider call is serialized without locks.
//! - After each event, connections reported with fatal write failures are
//!   torn down through `on_channel_down`. For requests this covers the
//!   requester as well as symbol list watchers.
//! - On cancellation the provider closes every open stream before the loop
//!   returns it to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::error::ProviderError;
use crate::application::ports::Channel;
use crate::application::provider::{FanOutReport, ItemProvider};
use crate::domain::message::{PostMsg, RequestMsg};
use crate::domain::types::{ConnectionId, DomainType, StreamId};
use crate::infrastructure::metrics::{self, EventKind};

/// Inbound event for the provider.
pub enum ProviderEvent {
    /// A consumer connected.
    ChannelUp(Arc<dyn Channel>),
    /// Item or batch request.
    Request {
        /// Requesting connection.
        connection: ConnectionId,
        /// The request.
        request: RequestMsg,
    },
    /// Stream close.
    Close {
        /// Closing connection.
        connection: ConnectionId,
        /// Stream to close.
        stream_id: StreamId,
    },
    /// Batch close.
    BatchClose {
        /// Closing connection.
        connection: ConnectionId,
        /// Stream the batch close arrived on.
        stream_id: StreamId,
        /// Domain of the batch close.
        domain: DomainType,
        /// Streams to close.
        streams: Vec<StreamId>,
    },
    /// Post.
    Post {
        /// Posting connection.
        connection: ConnectionId,
        /// The post.
        post: PostMsg,
    },
    /// A consumer disconnected.
    ChannelDown(ConnectionId),
}

impl ProviderEvent {
    /// Connection the event belongs to.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::ChannelUp(channel) => channel.id(),
            Self::Request { connection, .. }
            | Self::Close { connection, .. }
            | Self::BatchClose { connection, .. }
            | Self::Post { connection, .. } => *connection,
            Self::ChannelDown(connection) => *connection,
        }
    }

    const fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelUp(_) => "channel_up",
            Self::Request { .. } => "request",
            Self::Close { .. } => "close",
            Self::BatchClose { .. } => "batch_close",
            Self::Post { .. } => "post",
            Self::ChannelDown(_) => "channel_down",
        }
    }
}

impl fmt::Debug for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEvent")
            .field("kind", &self.as_str())
            .field("connection", &self.connection())
            .finish()
    }
}

/// Error submitting an event.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher has stopped.
    #[error("dispatcher stopped")]
    Stopped,
}

/// Cloneable sender of provider events.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<ProviderEvent>,
}

impl DispatcherHandle {
    /// Queue an event, waiting for room.
    ///
    /// # Errors
    ///
    /// Fails once the dispatcher has stopped.
    pub async fn send(&self, event: ProviderEvent) -> Result<(), DispatchError> {
        self.tx.send(event).await.map_err(|_| DispatchError::Stopped)
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Fails once the dispatcher has stopped.
    pub async fn channel_up(&self, channel: Arc<dyn Channel>) -> Result<(), DispatchError> {
        self.send(ProviderEvent::ChannelUp(channel)).await
    }

    /// Submit a request.
    ///
    /// # Errors
    ///
    /// Fails once the dispatcher has stopped.
    pub async fn request(&self, connection: ConnectionId, request: RequestMsg) -> Result<(), DispatchError> {
        self.send(ProviderEvent::Request { connection, request }).await
    }

    /// Close a stream.
    ///
    /// # Errors
    ///
    /// Fails once the dispatcher has stopped.
    pub async fn close(&self, connection: ConnectionId, stream_id: StreamId) -> Result<(), DispatchError> {
        self.send(ProviderEvent::Close { connection, stream_id }).await
    }

    /// Submit a post.
    ///
    /// # Errors
    ///
    /// Fails once the dispatcher has stopped.
    pub async fn post(&self, connection: ConnectionId, post: PostMsg) -> Result<(), DispatchError> {
        self.send(ProviderEvent::Post { connection, post }).await
    }

    /// Drop a connection.
    ///
    /// # Errors
    ///
    /// Fails once the dispatcher has stopped.
    pub async fn channel_down(&self, connection: ConnectionId) -> Result<(), DispatchError> {
        self.send(ProviderEvent::ChannelDown(connection)).await
    }
}

/// Dispatcher sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Period of the update tick.
    pub tick_interval: Duration,
    /// Event queue depth.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            queue_capacity: 1_024,
        }
    }
}

/// Single owner of the provider.
#[derive(Debug)]
pub struct Dispatcher {
    provider: ItemProvider,
    rx: mpsc::Receiver<ProviderEvent>,
    tick_interval: Duration,
}

impl Dispatcher {
    /// Dispatcher around `provider`, plus the handle that feeds it.
    #[must_use]
    pub fn new(provider: ItemProvider, config: DispatcherConfig) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        (
            Self {
                provider,
                rx,
                tick_interval: config.tick_interval,
            },
            DispatcherHandle { tx },
        )
    }

    /// Run until cancelled or every handle is dropped, then close all
    /// streams and hand the provider back.
    pub async fn run(mut self, shutdown: CancellationToken) -> ItemProvider {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::info!("dispatcher cancelled");
                    break;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        tracing::info!("all dispatcher handles dropped");
                        break;
                    };
                    self.handle(event);
                }
                _ = interval.tick() => self.tick(),
            }
        }

        let report = self.provider.on_shutdown();
        metrics::record_fan_out(EventKind::Shutdown, &report);
        self.publish_state();
        self.provider
    }

    fn handle(&mut self, event: ProviderEvent) {
        let connection = event.connection();
        tracing::trace!(?event, "dispatching");

        let (kind, result) = match event {
            ProviderEvent::ChannelUp(channel) => {
                self.provider.on_channel_up(channel);
                self.publish_state();
                return;
            }
            ProviderEvent::Request { connection, request } => {
                let result = self.provider.on_request(connection, request).map(|report| {
                    metrics::record_request(&report);
                    report.into_delivery()
                });
                (EventKind::Request, result)
            }
            ProviderEvent::Close { connection, stream_id } => {
                (EventKind::Close, Ok(self.provider.on_close(connection, stream_id)))
            }
            ProviderEvent::BatchClose {
                connection,
                stream_id,
                domain,
                streams,
            } => (
                EventKind::Close,
                self.provider.on_batch_close(connection, stream_id, domain, &streams),
            ),
            ProviderEvent::Post { connection, post } => {
                let result = self.provider.on_post(connection, post).map(|report| {
                    metrics::record_post(&report);
                    report.fan_out
                });
                (EventKind::Post, result)
            }
            ProviderEvent::ChannelDown(connection) => {
                (EventKind::ChannelDown, Ok(self.provider.on_channel_down(connection)))
            }
        };

        match result {
            Ok(report) => {
                if !matches!(kind, EventKind::Request | EventKind::Post) {
                    metrics::record_fan_out(kind, &report);
                }
                self.escalate(&report);
            }
            Err(error) => self.fail_connection(connection, &error),
        }

        self.publish_state();
    }

    fn tick(&mut self) {
        let started = Instant::now();
        let report = self.provider.on_tick();
        metrics::record_tick_duration(started.elapsed());
        metrics::record_fan_out(EventKind::Tick, &report);

        self.escalate(&report);
        self.publish_state();
    }

    /// Tear down every connection with a fatal delivery failure.
    fn escalate(&mut self, report: &FanOutReport) {
        for connection in report.fatal_connections() {
            tracing::warn!(connection, "closing connection after fatal write failure");
            let cleanup = self.provider.on_channel_down(connection);
            metrics::record_fan_out(EventKind::ChannelDown, &cleanup);
        }
    }

    fn fail_connection(&mut self, connection: ConnectionId, error: &ProviderError) {
        metrics::record_delivery_failure(error);

        if matches!(error, ProviderError::UnknownConnection(_)) {
            tracing::warn!(connection, "event for unknown connection dropped");
        } else if error.is_fatal() {
            tracing::warn!(connection, error = %error, "closing connection after failed response");
            let cleanup = self.provider.on_channel_down(connection);
            metrics::record_fan_out(EventKind::ChannelDown, &cleanup);
        } else {
            tracing::debug!(connection, error = %error, "response dropped");
        }
    }

    fn publish_state(&self) {
        metrics::set_provider_state(
            self.provider.open_streams(),
            self.provider.shared_items(),
            self.provider.connections(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::SubmitStatus;
    use crate::application::provider::ProviderOptions;
    use crate::infrastructure::codec::JsonCodec;
    use crate::infrastructure::memory::MemoryChannel;

    fn dispatcher(tick_interval: Duration) -> (Dispatcher, DispatcherHandle) {
        let provider = ItemProvider::new(ProviderOptions::default(), Arc::new(JsonCodec));
        Dispatcher::new(
            provider,
            DispatcherConfig {
                tick_interval,
                queue_capacity: 16,
            },
        )
    }

    #[tokio::test]
    async fn events_are_applied_in_order_and_streams_closed_on_shutdown() {
        let (dispatcher, handle) = dispatcher(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let channel = Arc::new(MemoryChannel::new(1));
        let task = tokio::spawn(dispatcher.run(shutdown.clone()));

        handle.channel_up(channel.clone()).await.unwrap();
        handle
            .request(1, RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1))
            .await
            .unwrap();
        drop(handle);
        let provider = task.await.unwrap();

        assert_eq!(provider.open_streams(), 0);
        let kinds: Vec<_> = channel.messages().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["refresh", "status"]);
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let (dispatcher, _handle) = dispatcher(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let provider = dispatcher.run(shutdown).await;

        assert_eq!(provider.connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_sends_updates() {
        let (dispatcher, handle) = dispatcher(Duration::from_millis(100));
        let shutdown = CancellationToken::new();
        let channel = Arc::new(MemoryChannel::new(1));
        let task = tokio::spawn(dispatcher.run(shutdown.clone()));

        handle.channel_up(channel.clone()).await.unwrap();
        handle
            .request(1, RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        shutdown.cancel();
        task.await.unwrap();

        let updates = channel.messages().iter().filter(|m| m.as_update().is_some()).count();
        assert!(updates >= 2, "expected periodic updates, got {updates}");
    }

    #[tokio::test]
    async fn fatal_response_failure_drops_connection() {
        let (dispatcher, handle) = dispatcher(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let channel = Arc::new(MemoryChannel::new(1));
        channel.fail_submits(SubmitStatus::Fatal);
        let task = tokio::spawn(dispatcher.run(shutdown.clone()));

        handle.channel_up(channel.clone()).await.unwrap();
        handle
            .request(1, RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1))
            .await
            .unwrap();
        drop(handle);
        let provider = task.await.unwrap();

        assert_eq!(provider.connections(), 0);
        assert_eq!(provider.open_streams(), 0);
    }

    #[tokio::test]
    async fn request_failure_also_drops_failed_symbol_list_watchers() {
        let (dispatcher, handle) = dispatcher(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let watcher = Arc::new(MemoryChannel::new(1));
        let requester = Arc::new(MemoryChannel::new(2));
        let bystander = Arc::new(MemoryChannel::new(3));
        // The watcher's symbol list refresh goes through, its ADD update does not.
        watcher.fail_submit_at(2, SubmitStatus::Fatal);
        requester.fail_submit_at(1, SubmitStatus::Fatal);
        let task = tokio::spawn(dispatcher.run(shutdown.clone()));

        handle.channel_up(watcher.clone()).await.unwrap();
        handle.channel_up(requester.clone()).await.unwrap();
        handle.channel_up(bystander.clone()).await.unwrap();
        handle
            .request(1, RequestMsg::item(3, DomainType::SymbolList, "_ETA_ITEM_LIST", 1))
            .await
            .unwrap();
        handle
            .request(2, RequestMsg::item(5, DomainType::MarketPrice, "IBM", 1))
            .await
            .unwrap();
        drop(handle);
        let provider = task.await.unwrap();

        assert_eq!(provider.connections(), 1);
        assert_eq!(watcher.messages().len(), 1);
        assert!(requester.messages().is_empty());
    }
}
