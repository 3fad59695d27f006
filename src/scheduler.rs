//! Batch scheduling.
//!
//! Raw events land in a bounded input queue; a periodic tick drains a capped
//! number per cycle so detector work stays bounded during bursts (rapid app
//! switching, OCR storms). When a batch blows its evaluation budget the tick
//! interval backs off and recovers once batches run healthy again.

use crate::error::EngineError;
use crate::metrics::SharedMetrics;
use crate::signal::RawSignalEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Tick interval while batches stay within budget.
    pub interval_ms: u64,
    /// Events drained per tick.
    pub max_events_per_tick: usize,
    /// Input queue bound; overflow drops the oldest entry.
    pub queue_cap: usize,
    /// Per-batch evaluation budget.
    pub budget_ms: u64,
    /// Interval multiplier applied on a budget overrun.
    pub backoff_factor: f64,
    /// Ceiling for the backed-off interval.
    pub max_interval_ms: u64,
    /// Healthy batches required before the interval steps back down.
    pub recovery_batches: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            max_events_per_tick: 64,
            queue_cap: 1024,
            budget_ms: 100,
            backoff_factor: 1.5,
            max_interval_ms: 2000,
            recovery_batches: 4,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.interval_ms == 0 || self.max_interval_ms < self.interval_ms {
            return Err(EngineError::InvalidConfig(format!(
                "batch interval_ms {} / max_interval_ms {} are inconsistent",
                self.interval_ms, self.max_interval_ms
            )));
        }
        if self.max_events_per_tick == 0 {
            return Err(EngineError::InvalidConfig(
                "batch max_events_per_tick is zero".into(),
            ));
        }
        if self.queue_cap == 0 {
            return Err(EngineError::InvalidConfig("batch queue_cap is zero".into()));
        }
        if self.budget_ms == 0 {
            return Err(EngineError::InvalidConfig("batch budget_ms is zero".into()));
        }
        if self.backoff_factor <= 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "batch backoff_factor {} must be above 1.0",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Bounded, drop-oldest input queue. Producers push without ever blocking;
/// the engine drains on its tick.
#[derive(Debug)]
pub struct InputQueue {
    inner: Mutex<VecDeque<RawSignalEvent>>,
    cap: usize,
    metrics: SharedMetrics,
}

impl InputQueue {
    pub fn new(cap: usize, metrics: SharedMetrics) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap.max(1))),
            cap: cap.max(1),
            metrics,
        }
    }

    /// Append an event. On overflow the oldest entry is dropped (never the
    /// newest) and counted.
    pub fn push(&self, event: RawSignalEvent) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() == self.cap {
            queue.pop_front();
            self.metrics.record_event_dropped();
        }
        queue.push_back(event);
    }

    /// Remove up to `max` events from the front, in arrival order.
    pub fn drain(&self, max: usize) -> Vec<RawSignalEvent> {
        let mut queue = self.inner.lock().unwrap();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Remove everything still queued.
    pub fn drain_all(&self) -> Vec<RawSignalEvent> {
        let mut queue = self.inner.lock().unwrap();
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adaptive tick pacing: backs the interval off on budget overruns, steps it
/// back toward the configured base after a run of healthy batches.
#[derive(Debug)]
pub struct BatchPacer {
    base: Duration,
    current: Duration,
    max: Duration,
    budget: Duration,
    backoff_factor: f64,
    recovery_batches: u32,
    healthy_streak: u32,
}

impl BatchPacer {
    pub fn new(config: &BatchConfig) -> Self {
        let base = Duration::from_millis(config.interval_ms);
        Self {
            base,
            current: base,
            max: Duration::from_millis(config.max_interval_ms),
            budget: Duration::from_millis(config.budget_ms),
            backoff_factor: config.backoff_factor,
            recovery_batches: config.recovery_batches.max(1),
            healthy_streak: 0,
        }
    }

    /// Record a finished batch. Returns the budget error when the batch
    /// overran, after adjusting the interval.
    pub fn record(&mut self, elapsed: Duration) -> Option<EngineError> {
        if elapsed > self.budget {
            self.healthy_streak = 0;
            let next = self.current.as_secs_f64() * self.backoff_factor;
            self.current = Duration::from_secs_f64(next).min(self.max);
            return Some(EngineError::BatchBudgetExceeded {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: self.budget.as_millis() as u64,
            });
        }

        self.healthy_streak += 1;
        if self.healthy_streak >= self.recovery_batches && self.current > self.base {
            let next = self.current.as_secs_f64() / self.backoff_factor;
            self.current = Duration::from_secs_f64(next).max(self.base);
            self.healthy_streak = 0;
        }
        None
    }

    /// Interval until the next tick.
    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}
