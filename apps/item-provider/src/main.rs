//! Item Provider Binary
//!
//! Starts the provider event loop with a loopback consumer that subscribes
//! to a few items and logs every message it receives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin item-provider
//! ```
//!
//! # Environment Variables
//!
//! - `ITEM_PROVIDER_SERVICE_ID`: Published service id (default: 1)
//! - `ITEM_PROVIDER_SERVICE_NAME`: Published service name (default: `DIRECT_FEED`)
//! - `ITEM_PROVIDER_OPEN_LIMIT`: Open streams per connection (default: 10)
//! - `ITEM_PROVIDER_SLOT_CAPACITY`: Request slot pool size (default: 100)
//! - `ITEM_PROVIDER_TICK_INTERVAL_MS`: Update period (default: 1000)
//! - `ITEM_PROVIDER_METRICS_PORT`: Prometheus port, 0 to disable the listener (default: 9090)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use item_provider::application::ports::WireCodec;
use item_provider::infrastructure::telemetry;
use item_provider::{
    Dispatcher, DispatcherConfig, DispatcherHandle, DomainType, ItemProvider, JsonCodec,
    MemoryChannel, ProviderConfig, ProviderOptions, RequestMsg, ServiceDirectory, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection id of the loopback consumer.
const LOOPBACK_CONNECTION: u64 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    if let Err(e) = telemetry::init() {
        eprintln!("tracing subscriber not installed: {e}");
    }

    tracing::info!("Starting Item Provider");

    let config = ProviderConfig::from_env()?;
    init_metrics(config.runtime.metrics_port).context("installing metrics recorder")?;
    log_config(&config);

    let options = ProviderOptions::from(&config);
    let directory = options.directory.clone();
    let provider = ItemProvider::new(options, Arc::new(JsonCodec));
    let (dispatcher, handle) = Dispatcher::new(provider, DispatcherConfig::from(&config));

    let shutdown_token = CancellationToken::new();
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_token.clone()));

    // Loopback consumer
    let channel = Arc::new(MemoryChannel::new(LOOPBACK_CONNECTION).without_retention());
    tokio::spawn(log_frames(channel.subscribe()));
    handle.channel_up(channel).await?;
    subscribe_demo_items(&handle, &directory).await?;

    tracing::info!("Item provider ready");

    await_shutdown(shutdown_token).await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, dispatcher_task).await {
        Ok(Ok(provider)) => {
            tracing::info!(open_streams = provider.open_streams(), "Item provider stopped");
        }
        Ok(Err(e)) => tracing::error!(error = %e, "dispatcher task failed"),
        Err(_) => tracing::warn!("dispatcher did not stop in time"),
    }

    Ok(())
}

/// Open a price stream, a depth stream and the symbol list.
async fn subscribe_demo_items(handle: &DispatcherHandle, directory: &ServiceDirectory) -> anyhow::Result<()> {
    let service_id = directory.service_id;
    let requests = [
        RequestMsg::item(5, DomainType::MarketPrice, "TRI", service_id),
        RequestMsg::item(6, DomainType::MarketByOrder, "IBM", service_id),
        RequestMsg::item(
            7,
            DomainType::SymbolList,
            directory.symbol_list_name.clone(),
            service_id,
        ),
    ];

    for request in requests {
        handle.request(LOOPBACK_CONNECTION, request).await?;
    }
    Ok(())
}

/// Log every frame the loopback consumer receives.
async fn log_frames(mut rx: broadcast::Receiver<Vec<u8>>) {
    loop {
        match rx.recv().await {
            Ok(frame) => match JsonCodec.decode(&frame) {
                Ok(msg) => tracing::info!(
                    stream = msg.stream_id(),
                    kind = msg.kind(),
                    "Consumer received message"
                ),
                Err(e) => tracing::warn!(error = %e, "Consumer received undecodable frame"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Consumer lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProviderConfig) {
    tracing::info!(
        service_id = config.service.service_id,
        service_name = %config.service.service_name,
        open_limit = config.service.open_limit,
        slot_capacity = config.capacity.slot_capacity,
        tick_interval_ms = u64::try_from(config.runtime.tick_interval.as_millis()).unwrap_or(u64::MAX),
        metrics_port = config.runtime.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        message_size = config.encoder.message_size,
        refresh_part_size = config.encoder.refresh_part_size,
        max_buffer_size = config.encoder.max_buffer_size,
        refresh_parts = config.encoder.refresh_parts,
        "Encoder limits"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
