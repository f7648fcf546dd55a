//! Fixed-rate update loop that drains the inbound queue.
//!
//! Network tasks only ever produce; this loop is the single consumer. At
//! each update it calls [`NetworkContext::poll`], which dispatches every
//! queued message on the loop's own task, then hands the resulting
//! lifecycle events to an application callback.
//!
//! When an update runs late the missed ones are skipped and the cadence
//! restarts from now, so a slow handler cannot cause a burst of updates.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

use crate::{NetworkContext, NetworkEvent, RelaynetError};

/// Information about one update, passed to the callback.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    /// Monotonically increasing update number (starts at 1).
    pub update: u64,
    /// Fixed interval between updates.
    pub dt: Duration,
    /// `true` if this update fired late.
    pub overrun: bool,
    /// Updates skipped because of the overrun.
    pub skipped: u64,
}

/// Runtime counters for an [`UpdateLoop`].
#[derive(Debug, Clone, Default)]
pub struct UpdateMetrics {
    pub total_updates: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Inbound items drained across all updates.
    pub total_drained: u64,
    /// Most items drained by a single update.
    pub max_drained: usize,
    /// Exponential moving average of the time spent in an update (α = 0.1).
    pub avg_update_time: Duration,
}

/// Fixed-rate scheduler.
pub struct UpdateLoop {
    interval: Duration,
    count: u64,
    next: TokioInstant,
    started: Option<Instant>,
    paused: bool,
    metrics: UpdateMetrics,
}

impl UpdateLoop {
    /// Creates a loop firing every `interval`. The first update is delayed
    /// by a random 0..`jitter_us` µs so loops created together drift apart.
    pub fn new(interval: Duration, jitter_us: u64) -> Self {
        let jitter = if jitter_us > 0 {
            Duration::from_micros(rand::rng().random_range(0..jitter_us))
        } else {
            Duration::ZERO
        };
        debug!(interval_ms = interval.as_secs_f64() * 1000.0, "update loop created");
        Self {
            interval,
            count: 0,
            next: TokioInstant::now() + interval + jitter,
            started: None,
            paused: false,
            metrics: UpdateMetrics::default(),
        }
    }

    /// Waits for the next update. Pends forever while paused.
    pub async fn wait(&mut self) -> UpdateInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }
        time::sleep_until(self.next).await;

        let now = TokioInstant::now();
        self.count += 1;
        self.started = Some(Instant::now());

        let late_by = now.saturating_duration_since(self.next);
        let overrun = late_by > self.interval / 10;
        let mut skipped = 0;
        if overrun {
            skipped = (late_by.as_nanos() / self.interval.as_nanos()) as u64;
            self.metrics.total_overruns += 1;
            if skipped > 0 {
                warn!(
                    update = self.count,
                    skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "update overrun, skipping ahead"
                );
            }
        }
        self.next = now + self.interval;
        self.metrics.total_skipped += skipped;
        self.metrics.total_updates += 1;
        trace!(update = self.count, overrun, "update fired");

        UpdateInfo {
            update: self.count,
            dt: self.interval,
            overrun,
            skipped,
        }
    }

    /// Records the end of the current update and how many inbound items it
    /// drained.
    pub fn record_end(&mut self, drained: usize) {
        self.metrics.total_drained += drained as u64;
        self.metrics.max_drained = self.metrics.max_drained.max(drained);

        let Some(start) = self.started.take() else {
            return;
        };
        let elapsed = start.elapsed();
        if elapsed >= self.interval {
            warn!(
                update = self.count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.interval.as_secs_f64() * 1000.0,
                "update exceeded its interval"
            );
        }
        let alpha = 0.1;
        let prev = self.metrics.avg_update_time.as_secs_f64();
        self.metrics.avg_update_time =
            Duration::from_secs_f64(prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha);
    }

    /// Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(update = self.count, "update loop paused");
        }
    }

    /// Restarts the cadence from now so no updates are replayed for the
    /// time spent paused.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next = TokioInstant::now() + self.interval;
            debug!(update = self.count, "update loop resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn update_count(&self) -> u64 {
        self.count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn metrics(&self) -> &UpdateMetrics {
        &self.metrics
    }
}

/// Controls a spawned update loop. Dropping it stops the loop.
pub struct UpdateHandle {
    task: JoinHandle<()>,
    paused: watch::Sender<bool>,
    metrics: watch::Receiver<UpdateMetrics>,
}

impl UpdateHandle {
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Latest metrics published by the loop.
    pub fn metrics(&self) -> UpdateMetrics {
        self.metrics.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for UpdateHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn<F>(context: NetworkContext, mut on_update: F) -> Result<UpdateHandle, RelaynetError>
where
    F: FnMut(&NetworkContext, &[NetworkEvent], &UpdateInfo) + Send + 'static,
{
    let config = context.config();
    let interval = config.update_interval().ok_or(RelaynetError::ManualPolling)?;
    let mut update_loop = UpdateLoop::new(interval, config.update_jitter_us);

    let (paused_tx, mut paused_rx) = watch::channel(false);
    let (metrics_tx, metrics_rx) = watch::channel(UpdateMetrics::default());

    let task = relaynet_transport::spawn_supervised("update-loop", async move {
        loop {
            tokio::select! {
                info = update_loop.wait() => {
                    let (events, drained) = context.drain();
                    on_update(&context, &events, &info);
                    update_loop.record_end(drained);
                    metrics_tx.send_replace(update_loop.metrics().clone());
                }
                changed = paused_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    if *paused_rx.borrow_and_update() {
                        update_loop.pause();
                    } else {
                        update_loop.resume();
                    }
                }
            }
        }
    });

    Ok(UpdateHandle {
        task,
        paused: paused_tx,
        metrics: metrics_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_50ms() -> UpdateLoop {
        UpdateLoop::new(Duration::from_millis(50), 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_fires_at_fixed_interval() {
        let mut l = loop_50ms();
        let start = TokioInstant::now();

        let info = l.wait().await;
        assert_eq!(info.update, 1);
        assert_eq!(info.dt, Duration::from_millis(50));
        assert!(!info.overrun);
        assert_eq!(TokioInstant::now() - start, Duration::from_millis(50));

        let info = l.wait().await;
        assert_eq!(info.update, 2);
        assert_eq!(TokioInstant::now() - start, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_update_skips_ahead() {
        let mut l = loop_50ms();
        l.wait().await;

        time::advance(Duration::from_millis(180)).await;
        let info = l.wait().await;
        assert!(info.overrun);
        assert_eq!(info.skipped, 2);
        assert_eq!(l.metrics().total_overruns, 1);
        assert_eq!(l.metrics().total_skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_loop_never_fires() {
        let mut l = loop_50ms();
        l.pause();
        l.pause();
        assert!(l.is_paused());

        let fired = time::timeout(Duration::from_secs(1), l.wait()).await;
        assert!(fired.is_err());
        assert_eq!(l.update_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_restarts_cadence_from_now() {
        let mut l = loop_50ms();
        l.pause();
        time::advance(Duration::from_secs(2)).await;
        l.resume();

        let before = TokioInstant::now();
        let info = l.wait().await;
        assert!(!info.overrun);
        assert_eq!(TokioInstant::now() - before, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_delays_only_the_first_update() {
        let mut l = UpdateLoop::new(Duration::from_millis(50), 5_000);
        let start = TokioInstant::now();
        l.wait().await;
        let first = TokioInstant::now() - start;
        assert!(first >= Duration::from_millis(50) && first < Duration::from_millis(55));
    }

    #[test]
    fn test_record_end_tracks_drain_counts() {
        let mut l = UpdateLoop::new(Duration::from_millis(50), 0);
        l.record_end(3);
        l.record_end(7);
        l.record_end(1);
        assert_eq!(l.metrics().total_drained, 11);
        assert_eq!(l.metrics().max_drained, 7);
    }
}
