//! Adaptive tuner (§4.K "Adaptive tuner (optional, toggle)"). Observes
//! pending-queue depth on a fixed control period and nudges
//! `land_interval_ms` / `batch_size` within configured bounds, with
//! hysteretic thresholds so the two directions don't fight each other
//! every tick.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AdaptiveOptions {
    pub enabled: bool,
    pub control_period: Duration,
    pub backlog_threshold: usize,
    pub idle_threshold: usize,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub min_batch: usize,
    pub max_batch: usize,
    pub step_batch: usize,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            control_period: Duration::from_secs(1),
            backlog_threshold: 1000,
            idle_threshold: 50,
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(200),
            min_batch: 50,
            max_batch: 1000,
            step_batch: 50,
        }
    }
}

/// Shared, atomically-updated tuning knobs read by the worker loop and
/// written by the tuner's control loop.
pub struct TunableParams {
    pub land_interval_millis: AtomicU64,
    pub batch_size: AtomicUsize,
}

impl TunableParams {
    pub fn new(interval: Duration, batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            land_interval_millis: AtomicU64::new(interval.as_millis() as u64),
            batch_size: AtomicUsize::new(batch_size),
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.land_interval_millis.load(Ordering::Relaxed))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }
}

/// Applies one control-loop decision given the current queue depth.
/// Exposed standalone (rather than buried in a loop) so its hysteresis
/// can be unit tested without spinning up the async worker pool.
pub fn adjust(params: &TunableParams, options: &AdaptiveOptions, queue_depth: usize) {
    if queue_depth >= options.backlog_threshold {
        let current = params.land_interval_millis.load(Ordering::Relaxed);
        let halved = std::cmp::max(current / 2, options.min_interval.as_millis() as u64);
        params.land_interval_millis.store(halved, Ordering::Relaxed);

        let current_batch = params.batch_size.load(Ordering::Relaxed);
        let grown = std::cmp::min(current_batch + options.step_batch, options.max_batch);
        params.batch_size.store(grown, Ordering::Relaxed);
    } else if queue_depth <= options.idle_threshold {
        let current = params.land_interval_millis.load(Ordering::Relaxed);
        let doubled = std::cmp::min(
            current.saturating_mul(2).max(1),
            options.max_interval.as_millis() as u64,
        );
        params.land_interval_millis.store(doubled, Ordering::Relaxed);

        let current_batch = params.batch_size.load(Ordering::Relaxed);
        let shrunk = current_batch.saturating_sub(options.step_batch).max(options.min_batch);
        params.batch_size.store(shrunk, Ordering::Relaxed);
    }
    // Between the two thresholds: hold steady (hysteresis band).
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_shortens_interval_and_grows_batch() {
        let params = TunableParams::new(Duration::from_millis(50), 200);
        let options = AdaptiveOptions::default();
        adjust(&params, &options, options.backlog_threshold + 1);
        assert!(params.interval() < Duration::from_millis(50));
        assert!(params.batch_size() > 200);
    }

    #[test]
    fn idle_lengthens_interval_and_shrinks_batch() {
        let params = TunableParams::new(Duration::from_millis(50), 200);
        let options = AdaptiveOptions::default();
        adjust(&params, &options, options.idle_threshold - 1);
        assert!(params.interval() > Duration::from_millis(50));
        assert!(params.batch_size() < 200);
    }

    #[test]
    fn never_exceeds_configured_bounds() {
        let params = TunableParams::new(Duration::from_millis(50), 200);
        let options = AdaptiveOptions::default();
        for _ in 0..50 {
            adjust(&params, &options, options.backlog_threshold + 1);
        }
        assert!(params.interval() >= options.min_interval);
        assert!(params.batch_size() <= options.max_batch);

        for _ in 0..50 {
            adjust(&params, &options, 0);
        }
        assert!(params.interval() <= options.max_interval);
        assert!(params.batch_size() >= options.min_batch);
    }

    #[test]
    fn middle_band_holds_steady() {
        let params = TunableParams::new(Duration::from_millis(50), 200);
        let options = AdaptiveOptions::default();
        let mid = (options.idle_threshold + options.backlog_threshold) / 2;
        adjust(&params, &options, mid);
        assert_eq!(params.interval(), Duration::from_millis(50));
        assert_eq!(params.batch_size(), 200);
    }
}
