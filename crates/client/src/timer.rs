//! Scheduled tasks with explicit cancellation.
//!
//! Every timer in the sync core (ping, watchdog, reconnect backoff, poll tick)
//! is a [`ScheduledTask`]. The task is aborted when the handle is dropped, so
//! whoever owns the handle owns the timer's lifetime.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest period [`ScheduledTask::every`] will tick at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a spawned timer or background task. Dropping it cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: AbortHandle,
}

impl ScheduledTask {
    /// Run `fut` in the background.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut).abort_handle(),
        }
    }

    /// Run `fut` once after `delay`.
    pub fn after<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        })
    }

    /// Call `tick` every `period`, starting one period from now, until it
    /// returns [`ControlFlow::Break`] or the handle is dropped. Periods below
    /// one millisecond are raised to it.
    pub fn every<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        Self::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().is_break() {
                    break;
                }
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task now. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn after_fires_once_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let _task = ScheduledTask::after(Duration::from_secs(3), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let task = ScheduledTask::after(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_ticks_until_break() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = ScheduledTask::every(Duration::from_secs(10), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = ScheduledTask::every(Duration::ZERO, move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert!(task.is_finished());
    }
}
