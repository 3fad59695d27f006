//! Engine assembly and cross-feature coordination.
//!
//! [`EngineCore`] wires the pipeline together and exposes the two entry
//! points everything else reduces to: `ingest` (via [`SignalSender`]) and
//! `tick`. The core is synchronous and fully deterministic under a manual
//! clock; [`PatternEngine`] wraps it with a worker thread for production
//! use.
//!
//! The three feature instances (sarcasm, crisis, masking) run the same
//! machinery over disjoint detector sets. The [`CrossFeatureCoordinator`]
//! merges their weighted active state and owns the single escalation rule:
//! combined weighted confidence above the global threshold submits one
//! unified intervention, instead of each feature re-implementing its own
//! copy of that judgement.

use crate::buffer::{BufferKind, BufferStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{CoordinationConfig, EngineConfig, FeatureConfig};
use crate::detector::{DetectionResult, DetectorRegistry};
use crate::dispatch::{
    dedup_key_for, Intervention, InterventionDispatcher, InterventionPriority, SubscriberHandle,
};
use crate::error::EngineError;
use crate::fusion::{FusedAnalysis, FusionEngine};
use crate::metrics::{EngineMetrics, MetricsSnapshot, SharedMetrics};
use crate::scheduler::{BatchPacer, InputQueue};
use crate::severity::{
    ActivePatternSet, SeverityChanged, SeverityEvaluator, SeverityLevel, SeverityThresholds,
};
use crate::signal::{Modality, RawSignalEvent};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Cloneable ingestion handle. Adapters push events here and never block on
/// (or wait for) detection.
#[derive(Clone)]
pub struct SignalSender {
    queue: Arc<InputQueue>,
    metrics: SharedMetrics,
    clock: Arc<dyn Clock>,
    shutting_down: Arc<AtomicBool>,
    max_future_skew: Duration,
}

impl SignalSender {
    /// Validate and enqueue an event. Malformed events are rejected and
    /// counted; a full queue drops its oldest entry, never the new one.
    pub fn push(&self, event: RawSignalEvent) -> Result<(), EngineError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        if let Err(e) = event.validate(self.clock.now(), self.max_future_skew) {
            self.metrics.record_event_rejected();
            tracing::debug!(error = %e, "rejected malformed event");
            return Err(e);
        }
        self.metrics.record_event_ingested();
        self.queue.push(event);
        Ok(())
    }
}

/// One independently-running detector group with its own active set and
/// severity machine.
pub struct FeatureInstance {
    id: String,
    registry: DetectorRegistry,
    active: ActivePatternSet,
    severity: SeverityEvaluator,
}

impl FeatureInstance {
    fn new(
        config: &FeatureConfig,
        thresholds: SeverityThresholds,
        max_errors: u32,
    ) -> Result<Self, EngineError> {
        let mut registry = DetectorRegistry::new(max_errors);
        for spec in &config.detectors {
            registry.register(spec.clone())?;
        }
        Ok(Self {
            id: config.id.clone(),
            registry,
            active: ActivePatternSet::new(),
            severity: SeverityEvaluator::new(thresholds),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn severity_level(&self) -> SeverityLevel {
        self.severity.current()
    }

    pub fn active_patterns(&self) -> Vec<String> {
        self.active.ids()
    }

    pub fn active(&self) -> &ActivePatternSet {
        &self.active
    }
}

/// Result of one coordination pass that crossed the global threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationOutcome {
    pub merged_weighted_confidence: f64,
    pub contributing_patterns: Vec<String>,
    pub merged_level: SeverityLevel,
}

/// Merges per-feature active state under runtime-adjustable priorities.
pub struct CrossFeatureCoordinator {
    config: CoordinationConfig,
    merged_severity: SeverityEvaluator,
}

impl CrossFeatureCoordinator {
    fn new(config: CoordinationConfig, thresholds: SeverityThresholds) -> Self {
        Self {
            config,
            merged_severity: SeverityEvaluator::new(thresholds),
        }
    }

    /// Replace the per-feature weights in one step.
    pub fn update_priorities(&mut self, priorities: HashMap<String, f64>) {
        self.config.priorities = priorities;
    }

    fn priority_for(&self, feature_id: &str) -> f64 {
        self.config.priorities.get(feature_id).copied().unwrap_or(1.0)
    }

    /// Re-evaluate the merged weighted active set. Returns an outcome only
    /// when the combined weighted confidence crosses the global threshold.
    pub fn evaluate(
        &mut self,
        features: &[FeatureInstance],
        now: DateTime<Utc>,
    ) -> Option<CoordinationOutcome> {
        let mut merged_weight = 0.0;
        let mut merged_count = 0;
        let mut contributing = Vec::new();
        for feature in features {
            let priority = self.priority_for(&feature.id);
            merged_weight += priority * feature.active.total_weighted_confidence();
            merged_count += feature.active.len();
            contributing.extend(feature.active.ids());
        }
        contributing.sort();
        contributing.dedup();

        // Track the merged level even below the threshold so the FSM sees
        // de-escalations too.
        let _ = self.merged_severity.evaluate(merged_count, now);

        if merged_weight > self.config.global_threshold {
            Some(CoordinationOutcome {
                merged_weighted_confidence: merged_weight,
                contributing_patterns: contributing,
                merged_level: self.merged_severity.current(),
            })
        } else {
            None
        }
    }

    pub fn merged_level(&self) -> SeverityLevel {
        self.merged_severity.current()
    }
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub dispatched: Vec<Intervention>,
    pub severity_changes: Vec<(String, SeverityChanged)>,
    pub over_budget: bool,
}

/// The synchronous engine: buffers, detectors, fusion, severity, dispatch,
/// coordination. All evaluation happens inside `tick`; nothing here
/// suspends or performs I/O.
pub struct EngineCore {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    metrics: SharedMetrics,
    queue: Arc<InputQueue>,
    shutting_down: Arc<AtomicBool>,
    buffers: BufferStore,
    fusion: FusionEngine,
    features: Vec<FeatureInstance>,
    dispatcher: InterventionDispatcher,
    coordinator: CrossFeatureCoordinator,
    pacer: BatchPacer,
}

impl EngineCore {
    /// Build an engine from a validated configuration. Construction is the
    /// only place configuration errors are fatal.
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics: SharedMetrics = Arc::new(EngineMetrics::new(clock.now()));
        let queue = Arc::new(InputQueue::new(config.batch.queue_cap, Arc::clone(&metrics)));

        // Buffers are shared by every detector on the same signal key; the
        // widest retention requirement wins.
        let mut kinds: HashMap<String, BufferKind> = HashMap::new();
        for spec in config.all_detectors() {
            kinds
                .entry(spec.signal_key.clone())
                .and_modify(|kind| *kind = kind.merge(spec.buffer_kind()))
                .or_insert_with(|| spec.buffer_kind());
        }
        let mut buffers = BufferStore::new();
        for (key, kind) in &kinds {
            buffers.register(key, *kind);
        }

        let features = config
            .features
            .iter()
            .map(|f| FeatureInstance::new(f, config.severity, config.max_detector_errors))
            .collect::<Result<Vec<_>, _>>()?;

        let dispatcher = InterventionDispatcher::new(config.dispatch.clone(), Arc::clone(&metrics));
        let coordinator = CrossFeatureCoordinator::new(config.coordination.clone(), config.severity);
        let pacer = BatchPacer::new(&config.batch);
        let fusion = FusionEngine::new(config.fusion);

        Ok(Self {
            config,
            clock,
            metrics,
            queue,
            shutting_down: Arc::new(AtomicBool::new(false)),
            buffers,
            fusion,
            features,
            dispatcher,
            coordinator,
            pacer,
        })
    }

    /// Ingestion handle for adapters.
    pub fn sender(&self) -> SignalSender {
        SignalSender {
            queue: Arc::clone(&self.queue),
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
            shutting_down: Arc::clone(&self.shutting_down),
            max_future_skew: Duration::milliseconds(self.config.max_future_skew_ms as i64),
        }
    }

    /// Run one batch cycle: drain, route, detect, fuse, evaluate severity,
    /// coordinate, dispatch, prune.
    pub fn tick(&mut self) -> BatchOutcome {
        let started = std::time::Instant::now();
        let now = self.clock.now();

        let events = self.queue.drain(self.config.batch.max_events_per_tick);
        let processed = events.len();

        // Group results per feature and pattern so multi-modal detections
        // of the same pattern fuse together. One result stands per channel:
        // a channel that fired anywhere in the batch counts as fired (its
        // strongest trigger), otherwise its latest verdict holds.
        let mut grouped: Vec<HashMap<String, HashMap<Modality, DetectionResult>>> =
            (0..self.features.len()).map(|_| HashMap::new()).collect();

        for event in events {
            if !self.buffers.add(event.clone()) {
                self.metrics.record_event_unrouted();
                continue;
            }
            for (idx, feature) in self.features.iter_mut().enumerate() {
                let results = feature
                    .registry
                    .evaluate(&self.buffers, &event, now, &self.metrics);
                for result in results {
                    let channels = grouped[idx].entry(result.pattern_id.clone()).or_default();
                    let keep_existing = channels.get(&result.modality).is_some_and(|existing| {
                        existing.triggered
                            && (!result.triggered || result.confidence <= existing.confidence)
                    });
                    if !keep_existing {
                        channels.insert(result.modality, result);
                    }
                }
            }
        }

        let mut severity_changes = Vec::new();
        for (idx, feature) in self.features.iter_mut().enumerate() {
            let mut activated: Vec<FusedAnalysis> = Vec::new();
            for channels in grouped[idx].values() {
                let results: Vec<DetectionResult> = channels.values().cloned().collect();
                let Some(fused) = self.fusion.fuse(&results) else {
                    continue;
                };
                let Some(params) = feature.registry.pattern_params(&fused.pattern_id) else {
                    continue;
                };
                if fused.overall_confidence >= params.threshold {
                    feature.active.mark_active(
                        &fused.pattern_id,
                        now,
                        params.window,
                        fused.overall_confidence * params.weight,
                    );
                    activated.push(fused);
                }
            }

            feature.active.expire(now);

            if let Some(change) = feature.severity.evaluate(feature.active.len(), now) {
                self.metrics.record_severity_change();
                tracing::info!(
                    feature = %feature.id,
                    from = %change.from,
                    to = %change.to,
                    active = change.active_count,
                    "severity changed"
                );
                severity_changes.push((feature.id.clone(), change));
            }

            if !activated.is_empty() && feature.severity.current() > SeverityLevel::Normal {
                let candidate = feature_intervention(feature, &activated, now);
                self.dispatcher.submit(candidate, now);
            }
        }

        if let Some(outcome) = self.coordinator.evaluate(&self.features, now) {
            let candidate = unified_intervention(&outcome, now);
            if self.dispatcher.submit(candidate, now) {
                self.metrics.record_unified_intervention();
            }
        }

        let dispatched = self.dispatcher.dispatch_pending();

        self.buffers.prune_expired(now);
        self.dispatcher.prune(now);

        let elapsed = started.elapsed();
        let over_budget = match self.pacer.record(elapsed) {
            Some(e) => {
                tracing::warn!(error = %e, "batch overran its budget, backing off");
                true
            }
            None => false,
        };
        self.metrics.record_batch(elapsed.as_micros() as u64, over_budget);

        BatchOutcome {
            processed,
            dispatched,
            severity_changes,
            over_budget,
        }
    }

    /// Stop accepting work, reject everything still queued, and discard
    /// pending dispatches. Returns the number of rejected events.
    pub fn shutdown(&mut self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let rejected = self.queue.drain_all().len();
        for _ in 0..rejected {
            self.metrics.record_event_rejected();
        }
        self.dispatcher.begin_shutdown();
        tracing::info!(rejected, "engine shut down");
        rejected
    }

    pub fn subscribe(&mut self) -> (SubscriberHandle, Receiver<Intervention>) {
        self.dispatcher.subscribe()
    }

    pub fn unsubscribe(&mut self, handle: SubscriberHandle) {
        self.dispatcher.unsubscribe(handle);
    }

    /// Replace coordination priorities. Weights must be within [0, 1].
    pub fn update_priorities(&mut self, priorities: HashMap<String, f64>) -> Result<(), EngineError> {
        for (feature, weight) in &priorities {
            if !(0.0..=1.0).contains(weight) {
                return Err(EngineError::InvalidConfig(format!(
                    "coordination priority for '{feature}' is outside [0, 1]"
                )));
            }
        }
        self.coordinator.update_priorities(priorities);
        Ok(())
    }

    /// Re-arm a detector that was disabled after repeated failures.
    pub fn enable_detector(&mut self, feature_id: &str, detector_id: &str) -> Result<(), EngineError> {
        let feature = self
            .features
            .iter_mut()
            .find(|f| f.id == feature_id)
            .ok_or_else(|| EngineError::UnknownFeature(feature_id.to_string()))?;
        feature.registry.enable(detector_id)
    }

    pub fn feature(&self, feature_id: &str) -> Option<&FeatureInstance> {
        self.features.iter().find(|f| f.id == feature_id)
    }

    pub fn merged_severity(&self) -> SeverityLevel {
        self.coordinator.merged_level()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now())
    }

    pub fn metrics_handle(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    /// Recent dispatched interventions, oldest first.
    pub fn history(&self) -> Vec<Intervention> {
        self.dispatcher.history()
    }

    /// Current tick interval, as adjusted by the pacer.
    pub fn tick_interval(&self) -> std::time::Duration {
        self.pacer.interval()
    }
}

fn priority_for(level: SeverityLevel) -> InterventionPriority {
    match level {
        SeverityLevel::Normal | SeverityLevel::Gentle => InterventionPriority::Low,
        SeverityLevel::Supportive => InterventionPriority::Medium,
        SeverityLevel::Crisis => InterventionPriority::Critical,
    }
}

fn message_for(feature_id: &str, level: SeverityLevel) -> String {
    match (feature_id, level) {
        ("sarcasm", _) => "This exchange may not mean what it literally says.".into(),
        ("crisis", SeverityLevel::Crisis) => {
            "Everything can wait for one minute. Take a breath.".into()
        }
        ("crisis", _) => "Things look scattered. Try picking one window and staying there.".into(),
        ("masking", _) => "You've been holding the mask up for a while. You're safe here.".into(),
        (other, level) => format!("Pattern activity in {other} ({level})"),
    }
}

fn feature_intervention(
    feature: &FeatureInstance,
    activated: &[FusedAnalysis],
    now: DateTime<Utc>,
) -> Intervention {
    let level = feature.severity.current();
    let active_ids = feature.active.ids();
    let evidence = activated
        .iter()
        .flat_map(|f| f.evidence.iter().cloned())
        .collect();
    Intervention::new(
        feature.id.clone(),
        priority_for(level),
        dedup_key_for(&active_ids),
        message_for(&feature.id, level),
        evidence,
        now,
    )
}

fn unified_intervention(outcome: &CoordinationOutcome, now: DateTime<Utc>) -> Intervention {
    let priority = if outcome.merged_level >= SeverityLevel::Crisis {
        InterventionPriority::Critical
    } else {
        InterventionPriority::High
    };
    Intervention::new(
        "unified",
        priority,
        format!("unified:{}", dedup_key_for(&outcome.contributing_patterns)),
        "Several things are piling up at once. Let's slow the room down.",
        vec![format!(
            "combined weighted confidence {:.2} across {}",
            outcome.merged_weighted_confidence,
            outcome.contributing_patterns.join(", ")
        )],
        now,
    )
}

enum Control {
    Shutdown,
}

/// Threaded engine runner: one worker thread owns the tick loop, adapters
/// push through [`SignalSender`], subscribers consume over channels.
pub struct PatternEngine {
    core: Arc<Mutex<EngineCore>>,
    sender: SignalSender,
    metrics: SharedMetrics,
    clock: Arc<dyn Clock>,
    control: Sender<Control>,
    handle: Option<JoinHandle<()>>,
}

impl PatternEngine {
    /// Start an engine on the system clock.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let core = EngineCore::new(config, Arc::clone(&clock))?;
        let sender = core.sender();
        let metrics = core.metrics_handle();
        let core = Arc::new(Mutex::new(core));

        let (control_tx, control_rx) = bounded::<Control>(4);
        let worker = Arc::clone(&core);
        let handle = std::thread::spawn(move || loop {
            let interval = worker.lock().unwrap().tick_interval();
            match control_rx.recv_timeout(interval) {
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    worker.lock().unwrap().tick();
                }
            }
        });

        Ok(Self {
            core,
            sender,
            metrics,
            clock,
            control: control_tx,
            handle: Some(handle),
        })
    }

    /// Cloneable ingestion handle.
    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    pub fn metrics_handle(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Push one event; convenience over `sender()`.
    pub fn push(&self, event: RawSignalEvent) -> Result<(), EngineError> {
        self.sender.push(event)
    }

    pub fn subscribe(&self) -> (SubscriberHandle, Receiver<Intervention>) {
        self.core.lock().unwrap().subscribe()
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        self.core.lock().unwrap().unsubscribe(handle);
    }

    pub fn update_priorities(&self, priorities: HashMap<String, f64>) -> Result<(), EngineError> {
        self.core.lock().unwrap().update_priorities(priorities)
    }

    pub fn enable_detector(&self, feature_id: &str, detector_id: &str) -> Result<(), EngineError> {
        self.core.lock().unwrap().enable_detector(feature_id, detector_id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.clock.now())
    }

    /// Human-readable session report.
    pub fn summary(&self) -> String {
        self.metrics.summary(self.clock.now())
    }

    pub fn history(&self) -> Vec<Intervention> {
        self.core.lock().unwrap().history()
    }

    /// Stop the tick loop, then reject any work still queued. No
    /// intervention is dispatched after this returns.
    pub fn shutdown(mut self) {
        self.stop_worker();
        self.core.lock().unwrap().shutdown();
    }

    fn stop_worker(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control.send(Control::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for PatternEngine {
    fn drop(&mut self) {
        self.stop_worker();
        if let Ok(mut core) = self.core.lock() {
            core.shutdown();
        }
    }
}
