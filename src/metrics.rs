//! Engine telemetry.
//!
//! Lock-free counters shared across the pipeline, exposed as a snapshot for
//! external health dashboards. Counters only ever describe volumes and
//! timings; no signal content is retained here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counter block for one engine instance.
#[derive(Debug)]
pub struct EngineMetrics {
    events_ingested: AtomicU64,
    events_rejected: AtomicU64,
    events_dropped: AtomicU64,
    events_unrouted: AtomicU64,
    detections_fired: AtomicU64,
    detector_errors: AtomicU64,
    detectors_disabled: AtomicU64,
    interventions_dispatched: AtomicU64,
    interventions_suppressed: AtomicU64,
    subscriber_drops: AtomicU64,
    severity_changes: AtomicU64,
    unified_interventions: AtomicU64,
    batches_run: AtomicU64,
    batch_budget_overruns: AtomicU64,
    batch_micros_total: AtomicU64,
    started_at: DateTime<Utc>,
}

impl EngineMetrics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            events_ingested: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_unrouted: AtomicU64::new(0),
            detections_fired: AtomicU64::new(0),
            detector_errors: AtomicU64::new(0),
            detectors_disabled: AtomicU64::new(0),
            interventions_dispatched: AtomicU64::new(0),
            interventions_suppressed: AtomicU64::new(0),
            subscriber_drops: AtomicU64::new(0),
            severity_changes: AtomicU64::new(0),
            unified_interventions: AtomicU64::new(0),
            batches_run: AtomicU64::new(0),
            batch_budget_overruns: AtomicU64::new(0),
            batch_micros_total: AtomicU64::new(0),
            started_at,
        }
    }

    pub fn record_event_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_unrouted(&self) {
        self.events_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self) {
        self.detections_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_error(&self) {
        self.detector_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_disabled(&self) {
        self.detectors_disabled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intervention_dispatched(&self) {
        self.interventions_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intervention_suppressed(&self) {
        self.interventions_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_drop(&self) {
        self.subscriber_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_severity_change(&self) {
        self.severity_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unified_intervention(&self) {
        self.unified_interventions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, elapsed_micros: u64, over_budget: bool) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.batch_micros_total
            .fetch_add(elapsed_micros, Ordering::Relaxed);
        if over_budget {
            self.batch_budget_overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let batches = self.batches_run.load(Ordering::Relaxed);
        let micros = self.batch_micros_total.load(Ordering::Relaxed);
        let avg_batch_latency_ms = if batches == 0 {
            0.0
        } else {
            micros as f64 / batches as f64 / 1000.0
        };

        MetricsSnapshot {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_unrouted: self.events_unrouted.load(Ordering::Relaxed),
            detections_fired: self.detections_fired.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            detectors_disabled: self.detectors_disabled.load(Ordering::Relaxed),
            interventions_dispatched: self.interventions_dispatched.load(Ordering::Relaxed),
            interventions_suppressed: self.interventions_suppressed.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
            severity_changes: self.severity_changes.load(Ordering::Relaxed),
            unified_interventions: self.unified_interventions.load(Ordering::Relaxed),
            batches_run: batches,
            batch_budget_overruns: self.batch_budget_overruns.load(Ordering::Relaxed),
            avg_batch_latency_ms,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable session report.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let s = self.snapshot(now);
        format!(
            "Engine statistics:\n\
             - Events ingested: {} (rejected: {}, dropped: {}, unrouted: {})\n\
             - Detections fired: {} (detector errors: {}, disabled: {})\n\
             - Interventions dispatched: {} (suppressed by cooldown: {}, unified: {})\n\
             - Severity changes: {}\n\
             - Batches: {} (budget overruns: {}, avg latency: {:.2}ms)\n\
             - Uptime: {}s",
            s.events_ingested,
            s.events_rejected,
            s.events_dropped,
            s.events_unrouted,
            s.detections_fired,
            s.detector_errors,
            s.detectors_disabled,
            s.interventions_dispatched,
            s.interventions_suppressed,
            s.unified_interventions,
            s.severity_changes,
            s.batches_run,
            s.batch_budget_overruns,
            s.avg_batch_latency_ms,
            s.uptime_secs
        )
    }
}

/// Serializable copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub events_dropped: u64,
    pub events_unrouted: u64,
    pub detections_fired: u64,
    pub detector_errors: u64,
    pub detectors_disabled: u64,
    pub interventions_dispatched: u64,
    pub interventions_suppressed: u64,
    pub subscriber_drops: u64,
    pub severity_changes: u64,
    pub unified_interventions: u64,
    pub batches_run: u64,
    pub batch_budget_overruns: u64,
    pub avg_batch_latency_ms: f64,
    pub uptime_secs: u64,
}

/// Thread-safe shared metrics handle.
pub type SharedMetrics = Arc<EngineMetrics>;
