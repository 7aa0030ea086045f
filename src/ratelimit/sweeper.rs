//! Background eviction of expired windows.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Default cadence of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweep task.
///
/// Dropping the handle aborts the task; [`SweepHandle::stop`] ends it cleanly.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<R: 'static> RateLimiter<R> {
    /// Start sweeping expired windows every `every`.
    ///
    /// The task only holds a weak reference and ends by itself once the
    /// limiter is dropped. Must be called from within a tokio runtime.
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> SweepHandle {
        spawn_sweeper(self, every, "rate limiter", Self::sweep)
    }
}

/// Run `sweep` on `target` every `every` until stopped or `target` is dropped.
pub(crate) fn spawn_sweeper<T>(
    target: &Arc<T>,
    every: Duration,
    name: &'static str,
    sweep: fn(&T) -> usize,
) -> SweepHandle
where
    T: Send + Sync + 'static,
{
    let every = every.max(Duration::from_millis(1));
    let target = Arc::downgrade(target);
    let (shutdown, mut stopped) = watch::channel(false);

    info!(sweeper = name, interval_ms = every.as_millis() as u64, "Starting sweeper");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(target) = target.upgrade() else {
                        debug!(sweeper = name, "Sweep target dropped, sweeper exiting");
                        break;
                    };
                    sweep(&target);
                }
                _ = stopped.changed() => {
                    debug!(sweeper = name, "Sweeper received shutdown");
                    break;
                }
            }
        }
    });

    SweepHandle {
        shutdown,
        task: Some(task),
    }
}
