//! srtmon - headless channel monitor.
//!
//! Keeps a live view of the relay's channels: connects to the live feed,
//! polls the dashboard sources and logs what changes until interrupted.

use std::sync::Arc;

use anyhow::Context;
use srtmon_client::polling::SourceHealth;
use srtmon_client::{
    ApiClient, ConnectionManager, ConnectionState, DashboardView, PollingAggregator, SharedToken,
    Storage, StoredSession, SyncConfig, TokenSource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "srtmon=info,srtmon_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env();

    let tokens: Arc<dyn TokenSource> = match &config.token {
        Some(token) => Arc::new(SharedToken::new(Some(token.clone()))),
        None => {
            let storage = Storage::default_location()
                .context("no config directory for the stored session; set SRTMON_TOKEN instead")?;
            tracing::info!("using stored session in {}", storage.dir().display());
            Arc::new(StoredSession::watch(storage).context("failed to watch the stored session")?)
        }
    };

    let api = ApiClient::from_config(&config, tokens.clone()).context("failed to set up REST client")?;
    let manager = ConnectionManager::spawn(&config, tokens);
    let mut poller = PollingAggregator::new(Arc::new(api));

    let mut state = manager.subscribe_state();
    let mut channels = manager.subscribe_channels();
    let mut notices = manager.subscribe_notices();
    let mut views = poller.subscribe();

    manager.connect();
    poller.start(config.poll_interval);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                tracing::info!("shutting down");
                break;
            }
            Ok(()) = state.changed() => {
                let current = state.borrow_and_update().clone();
                log_state(&current);
            }
            Ok(()) = channels.changed() => {
                let snapshot = channels.borrow_and_update().clone();
                tracing::info!("live feed: {} channels [{}]", snapshot.len(), snapshot.names().join(", "));
            }
            Ok(notice) = notices.recv() => {
                tracing::warn!("{}", notice);
            }
            Ok(()) = views.changed() => {
                let view = views.borrow_and_update().clone();
                log_view(&view);
            }
        }
    }

    poller.stop();
    manager.shutdown().await;
    Ok(())
}

fn log_state(state: &ConnectionState) {
    match state {
        ConnectionState::Failed(err) if err.is_auth() => {
            tracing::error!("live feed {}; log in again to resume", state);
        }
        ConnectionState::Failed(_) => tracing::error!("live feed {}", state),
        _ => tracing::info!("live feed {}", state),
    }
}

fn log_view(view: &DashboardView) {
    let sources = view.sources();
    let degraded: Vec<&str> = [
        ("channels", sources.channel_list),
        ("analytics", sources.analytics),
        ("stream info", sources.stream_info),
        ("system", sources.host),
    ]
    .into_iter()
    .filter(|(_, health)| !matches!(health, SourceHealth::Fresh))
    .map(|(name, _)| name)
    .collect();

    let running = view.totals().map(|t| t.running).unwrap_or_default();
    let cpu = view.host().map(|h| h.cpu_percent).unwrap_or_default();
    if degraded.is_empty() {
        tracing::debug!(
            "dashboard tick {}: {} channels, {} running, cpu {:.1}%",
            view.tick,
            view.channels.len(),
            running,
            cpu
        );
    } else {
        tracing::info!(
            "dashboard tick {}: {} channels, {} running, cpu {:.1}% (degraded: {})",
            view.tick,
            view.channels.len(),
            running,
            cpu,
            degraded.join(", ")
        );
    }
}
