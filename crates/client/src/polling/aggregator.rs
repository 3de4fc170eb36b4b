use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::view::{DashboardView, SourceHealth, SourceSlot, TickResults};
use crate::api_client::DashboardSource;
use crate::timer::ScheduledTask;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polls the dashboard REST sources on a fixed interval and publishes one
/// merged [`DashboardView`] per tick.
pub struct PollingAggregator {
    source: Arc<dyn DashboardSource>,
    view: Arc<watch::Sender<Arc<DashboardView>>>,
    task: Option<ScheduledTask>,
}

impl PollingAggregator {
    pub fn new(source: Arc<dyn DashboardSource>) -> Self {
        let (view, _) = watch::channel(Arc::new(DashboardView::default()));
        Self {
            source,
            view: Arc::new(view),
            task: None,
        }
    }

    /// Poll every `interval`, starting now. Restarts if already running.
    pub fn start(&mut self, interval: Duration) {
        self.stop();
        let source = self.source.clone();
        let view = self.view.clone();
        let period = interval.max(MIN_INTERVAL);
        tracing::info!("polling dashboard every {}ms", period.as_millis());

        self.task = Some(ScheduledTask::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                poll(source.as_ref(), &view).await;
            }
        }));
    }

    /// Stop polling. The last published view stays available.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
            tracing::debug!("dashboard polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardView>> {
        self.view.subscribe()
    }

    pub fn view(&self) -> Arc<DashboardView> {
        self.view.borrow().clone()
    }

    /// Run a single tick now, outside the schedule.
    pub async fn poll_once(&self) -> Arc<DashboardView> {
        poll(self.source.as_ref(), &self.view).await
    }
}

impl Drop for PollingAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(source: &dyn DashboardSource, view: &watch::Sender<Arc<DashboardView>>) -> Arc<DashboardView> {
    let (channel_list, analytics, stream_info, host) = tokio::join!(
        source.channels(),
        source.analytics_summary(),
        source.stream_info(),
        source.server_stats(),
    );
    let results = TickResults {
        channel_list,
        analytics,
        stream_info,
        host,
    };

    view.send_modify(|current| {
        let next = current.advance(results, Utc::now());
        log_health("channel list", &current.channel_list.health(), &next.channel_list);
        log_health("analytics summary", &current.analytics.health(), &next.analytics);
        log_health("stream info", &current.stream_info.health(), &next.stream_info);
        log_health("system stats", &current.host.health(), &next.host);
        *current = Arc::new(next);
    });
    let published = view.borrow().clone();
    tracing::trace!(
        "dashboard tick {} ({} channels)",
        published.tick,
        published.channels.len()
    );
    published
}

/// Warn when a source starts failing and when it recovers; repeat failures
/// only show at debug level.
fn log_health<T>(name: &str, previous: &SourceHealth, next: &SourceSlot<T>) {
    let Some(error) = next.error() else {
        if previous.is_failing() {
            tracing::info!("{} recovered", name);
        }
        return;
    };
    if previous.is_failing() {
        tracing::debug!("{} still failing: {}", name, error);
    } else {
        tracing::warn!("{} fetch failed: {}", name, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use srtmon_shared::{AnalyticsSummary, ApiError, ChannelSnapshot, ServerStats, StreamInfoMap};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeSource {
        ticks: AtomicU32,
        stream_info_down: AtomicBool,
    }

    #[async_trait]
    impl DashboardSource for FakeSource {
        async fn channels(&self) -> Result<ChannelSnapshot, ApiError> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            let names: Vec<_> = (1..=n).map(|i| json!({ "channel_name": format!("cam{i}") })).collect();
            Ok(serde_json::from_value(serde_json::Value::Array(names)).unwrap())
        }

        async fn analytics_summary(&self) -> Result<AnalyticsSummary, ApiError> {
            Ok(AnalyticsSummary {
                total_channels: self.ticks.load(Ordering::SeqCst),
                ..Default::default()
            })
        }

        async fn stream_info(&self) -> Result<StreamInfoMap, ApiError> {
            if self.stream_info_down.load(Ordering::SeqCst) {
                return Err(ApiError::Network("connection refused".into()));
            }
            Ok(StreamInfoMap::from([(
                "cam1".to_string(),
                json!({ "tick": self.ticks.load(Ordering::SeqCst) }),
            )]))
        }

        async fn server_stats(&self) -> Result<ServerStats, ApiError> {
            Ok(ServerStats::default())
        }
    }

    #[tokio::test]
    async fn failing_source_is_isolated() {
        let source = Arc::new(FakeSource::default());
        let aggregator = PollingAggregator::new(source.clone());

        let first = aggregator.poll_once().await;
        assert!(first.sources().all_fresh());

        source.stream_info_down.store(true, Ordering::SeqCst);
        let second = aggregator.poll_once().await;
        assert_eq!(second.tick, 2);
        assert_eq!(second.sources().channel_list, SourceHealth::Fresh);
        assert_eq!(second.sources().analytics, SourceHealth::Fresh);
        assert_eq!(second.sources().host, SourceHealth::Fresh);
        assert!(matches!(second.sources().stream_info, SourceHealth::Stale { .. }));

        assert_eq!(second.totals().unwrap().total_channels, 2);
        assert_eq!(second.channel_names().count(), 2);
        assert_eq!(
            second.channel("cam1").unwrap().stream_info,
            Some(json!({ "tick": 1 }))
        );
        assert!(Arc::ptr_eq(&second, &aggregator.view()));
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_and_stop_halts() {
        let source = Arc::new(FakeSource::default());
        let mut aggregator = PollingAggregator::new(source.clone());
        let mut views = aggregator.subscribe();

        aggregator.start(Duration::from_secs(3));
        assert!(aggregator.is_running());
        views.changed().await.unwrap();
        assert_eq!(views.borrow_and_update().tick, 1);

        tokio::time::sleep(Duration::from_millis(6100)).await;
        assert_eq!(aggregator.view().tick, 3);

        aggregator.stop();
        assert!(!aggregator.is_running());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(aggregator.view().tick, 3);
        assert_eq!(source.ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_restarts_with_new_interval() {
        let source = Arc::new(FakeSource::default());
        let mut aggregator = PollingAggregator::new(source.clone());

        aggregator.start(Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(aggregator.view().tick, 1);

        aggregator.start(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(aggregator.view().tick, 2);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(aggregator.view().tick, 2);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(aggregator.view().tick, 3);
    }
}
