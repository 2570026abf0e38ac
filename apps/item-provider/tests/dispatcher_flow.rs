//! Dispatcher Integration Tests
//!
//! Runs the event loop on a tokio runtime and talks to it only through its
//! handle, the way a transport adapter would.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use item_provider::{
    Dispatcher, DispatcherConfig, DomainType, ItemProvider, JsonCodec, MemoryChannel,
    ProviderEvent, ProviderOptions, RequestMsg, WireCodec,
};

fn start(tick_interval: Duration) -> (item_provider::DispatcherHandle, CancellationToken, tokio::task::JoinHandle<ItemProvider>) {
    let provider = ItemProvider::new(ProviderOptions::default(), Arc::new(JsonCodec));
    let (dispatcher, handle) = Dispatcher::new(
        provider,
        DispatcherConfig {
            tick_interval,
            queue_capacity: 32,
        },
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(dispatcher.run(shutdown.clone()));
    (handle, shutdown, task)
}

#[tokio::test]
async fn subscriber_sees_refresh_then_updates() {
    let (handle, shutdown, task) = start(Duration::from_millis(20));
    let channel = Arc::new(MemoryChannel::new(1).without_retention());
    let mut frames = channel.subscribe();

    handle.channel_up(channel.clone()).await.unwrap();
    handle
        .request(1, RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1))
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 3 {
        let frame = timeout(Duration::from_secs(2), frames.recv()).await.unwrap().unwrap();
        kinds.push(JsonCodec.decode(&frame).unwrap().kind());
    }
    assert_eq!(kinds, vec!["refresh", "update", "update"]);

    shutdown.cancel();
    let provider = task.await.unwrap();
    assert_eq!(provider.open_streams(), 0);
}

#[tokio::test]
async fn close_and_channel_down_release_streams() {
    let (handle, _shutdown, task) = start(Duration::from_secs(3600));
    let first = Arc::new(MemoryChannel::new(1));
    let second = Arc::new(MemoryChannel::new(2));

    handle.channel_up(first).await.unwrap();
    handle.channel_up(second).await.unwrap();
    handle
        .request(1, RequestMsg::item(5, DomainType::MarketPrice, "TRI", 1))
        .await
        .unwrap();
    handle
        .request(2, RequestMsg::item(5, DomainType::MarketPrice, "IBM", 1))
        .await
        .unwrap();
    handle.close(1, 5).await.unwrap();
    handle.channel_down(2).await.unwrap();
    drop(handle);

    let provider = task.await.unwrap();
    assert_eq!(provider.open_streams(), 0);
    assert_eq!(provider.shared_items(), 0);
    assert_eq!(provider.connections(), 1);
}

#[tokio::test]
async fn batch_close_event_closes_listed_streams() {
    let (handle, _shutdown, task) = start(Duration::from_secs(3600));
    let channel = Arc::new(MemoryChannel::new(1));

    handle.channel_up(channel.clone()).await.unwrap();
    handle
        .request(1, RequestMsg::batch(10, DomainType::MarketPrice, 1, ["A", "B", "C"]))
        .await
        .unwrap();
    handle
        .send(ProviderEvent::BatchClose {
            connection: 1,
            stream_id: 20,
            domain: DomainType::MarketPrice,
            streams: vec![11, 13],
        })
        .await
        .unwrap();
    drop(handle);

    let provider = task.await.unwrap();
    assert_eq!(provider.open_streams(), 0);
    let closes_on_20 = channel
        .messages()
        .iter()
        .filter(|m| m.stream_id() == 20 && m.as_status().is_some())
        .count();
    assert_eq!(closes_on_20, 1);
}

#[tokio::test]
async fn handle_fails_after_dispatcher_stops() {
    let (handle, shutdown, task) = start(Duration::from_secs(3600));
    shutdown.cancel();
    task.await.unwrap();

    let result = handle.channel_down(1).await;

    assert!(result.is_err());
}
