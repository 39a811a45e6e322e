//! Tick scheduling and timing statistics.
//!
//! A [`TickTimer`] drives a tick callback from a tokio interval. Each tick
//! runs on the blocking pool and is awaited before the interval is polled
//! again, so ticks never overlap. Ticks that would have fired while one was
//! still running are skipped rather than queued.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Rolling statistics of tick durations.
#[derive(Debug, Clone)]
pub struct TickMetrics {
    /// Tick period
    period: Duration,
    /// Recent tick durations (seconds)
    tick_times: VecDeque<f32>,
    /// Maximum samples for averaging
    max_samples: usize,
    /// Ticks completed
    ticks: u64,
    /// Ticks that took longer than the period
    overruns: u64,
}

impl TickMetrics {
    /// Creates empty statistics for ticks of `period`.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tick_times: VecDeque::with_capacity(120),
            max_samples: 120,
            ticks: 0,
            overruns: 0,
        }
    }

    /// Records one completed tick.
    pub fn record(&mut self, elapsed: Duration) {
        self.ticks += 1;
        if elapsed > self.period {
            self.overruns += 1;
        }

        self.tick_times.push_back(elapsed.as_secs_f32());
        if self.tick_times.len() > self.max_samples {
            self.tick_times.pop_front();
        }
    }

    /// Average tick duration in milliseconds.
    #[must_use]
    pub fn average_tick_ms(&self) -> f32 {
        if self.tick_times.is_empty() {
            return 0.0;
        }

        (self.tick_times.iter().sum::<f32>() / self.tick_times.len() as f32) * 1000.0
    }

    /// Highest tick rate the recent durations would sustain.
    #[must_use]
    pub fn sustainable_rate(&self) -> f32 {
        let avg_ms = self.average_tick_ms();
        if avg_ms > 0.0 {
            1000.0 / avg_ms
        } else {
            0.0
        }
    }

    /// Ticks completed.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks slower than the period.
    #[must_use]
    pub const fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Clears the statistics.
    pub fn reset(&mut self) {
        self.tick_times.clear();
        self.ticks = 0;
        self.overruns = 0;
    }
}

/// Fixed-period driver for a tick callback.
#[derive(Debug)]
pub struct TickTimer {
    period: Duration,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<Mutex<TickMetrics>>,
}

impl TickTimer {
    /// Creates a stopped timer.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            period,
            handle: None,
            metrics: Arc::new(Mutex::new(TickMetrics::new(period))),
        }
    }

    /// Tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Starts calling `tick` every period, stopping any earlier run first.
    ///
    /// The timer stops by itself once `tick` returns `false`. Must be called
    /// from within a Tokio runtime.
    pub fn start<F>(&mut self, tick: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.stop();

        let tick = Arc::new(tick);
        let metrics = Arc::clone(&self.metrics);
        let period = self.period;
        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let tick = Arc::clone(&tick);
                let started = Instant::now();
                match tokio::task::spawn_blocking(move || tick()).await {
                    Ok(true) => metrics.lock().record(started.elapsed()),
                    Ok(false) => {
                        metrics.lock().record(started.elapsed());
                        debug!("Tick source finished, timer stopping");
                        break;
                    },
                    Err(e) => {
                        error!("Tick task failed: {e}");
                        break;
                    },
                }
            }
        }));
        debug!("Timer started ({period:?})");
    }

    /// Stops the timer. A tick already running completes.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Timer stopped");
        }
    }

    /// Whether ticks are being scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Snapshot of the tick statistics.
    #[must_use]
    pub fn metrics(&self) -> TickMetrics {
        self.metrics.lock().clone()
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
