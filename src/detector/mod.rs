//! Pattern detectors.
//!
//! A detector reads one buffer plus the signal that just arrived and may
//! report a confidence-scored [`DetectionResult`] for the pattern it
//! watches. Detectors are deterministic for fixed inputs and must not
//! perform I/O; the only state they may keep is the re-fire anchor a
//! dwell-style detector needs.
//!
//! Several detectors can report the same pattern from different modalities
//! (lexical markers and tone both report `sarcasm`); fusion combines their
//! results. `evaluate` returns `None` when a signal is simply not the
//! detector's business — only an actual examined-and-absent verdict comes
//! back as `triggered: false`, because that is what fusion counts as
//! disagreement.
//!
//! Detectors are described by a [`DetectorSpec`] in configuration and built
//! into a [`DetectorRegistry`] at startup. A detector that keeps failing is
//! moved into a disabled state that stops producing detections while its
//! buffer keeps filling; `enable` re-arms it.

pub mod burst;
pub mod dwell;
pub mod lexical;
pub mod tone;

use crate::buffer::{BufferKind, BufferStore, SignalBuffer};
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::signal::{Modality, RawSignalEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use burst::BurstCountDetector;
pub use dwell::DwellTimeDetector;
pub use lexical::LexicalMarkerDetector;
pub use tone::ToneMismatchDetector;

/// Outcome of one detector evaluation. Ephemeral: lives for one batch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub pattern_id: String,
    pub triggered: bool,
    /// Always within [0, 1].
    pub confidence: f64,
    pub modality: Modality,
    pub evidence: Vec<String>,
}

impl DetectionResult {
    pub fn not_triggered(pattern_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            triggered: false,
            confidence: 0.0,
            modality,
            evidence: Vec::new(),
        }
    }

    pub fn triggered(
        pattern_id: impl Into<String>,
        modality: Modality,
        confidence: f64,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            triggered: true,
            confidence: confidence.clamp(0.0, 1.0),
            modality,
            evidence,
        }
    }
}

/// A weighted lexical marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub token: String,
    pub weight: f64,
}

impl Marker {
    pub fn new(token: impl Into<String>, weight: f64) -> Self {
        Self {
            token: token.into(),
            weight,
        }
    }
}

/// Detector-kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorKind {
    /// Count of events within the window reaches `threshold_count`,
    /// optionally requiring `unique sub-keys / threshold_count` to reach
    /// `min_unique_ratio`.
    BurstCount {
        threshold_count: usize,
        #[serde(default)]
        min_unique_ratio: f64,
    },
    /// Cursor movement stays below `epsilon` for at least `dwell_ms`.
    DwellTime { epsilon: f64, dwell_ms: u64 },
    /// Weighted marker scan over a text payload; single-shot.
    LexicalMarker { markers: Vec<Marker> },
    /// Lexically positive text delivered with flat acoustics.
    ToneMismatch {
        positive_markers: Vec<Marker>,
        flatness_floor: f64,
    },
}

/// Full description of one detector: identity, the pattern it reports,
/// contribution weight, activation threshold, window, and kind-specific
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSpec {
    /// Unique detector id within its feature, e.g. `sarcasm_markers`.
    pub id: String,
    /// Pattern this detector reports, e.g. `sarcasm`. Detectors on
    /// different modalities may share one pattern.
    pub pattern_id: String,
    /// Buffer key whose events feed this detector, e.g. `window_focus`.
    pub signal_key: String,
    /// Contribution weight in [0, 1] used by severity and coordination.
    pub weight: f64,
    /// Minimum fused confidence in [0, 1] for the pattern to become active.
    pub threshold: f64,
    /// Evaluation window; also bounds how long the pattern stays active
    /// without a re-trigger.
    pub window_ms: u64,
    #[serde(flatten)]
    pub kind: DetectorKind,
}

impl DetectorSpec {
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms.max(1) as i64)
    }

    /// Retention policy for this detector's buffer. Lexical detectors are
    /// single-shot and only keep a short tail for evidence; everything else
    /// needs the full time window.
    pub fn buffer_kind(&self) -> BufferKind {
        match self.kind {
            DetectorKind::LexicalMarker { .. } => BufferKind::Ring { capacity: 16 },
            _ => BufferKind::TimeWindow {
                window_ms: self.window_ms,
            },
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.id.trim().is_empty() {
            return fail("detector id is empty".into());
        }
        if self.pattern_id.trim().is_empty() {
            return fail(format!("detector '{}' has an empty pattern_id", self.id));
        }
        if self.signal_key.trim().is_empty() {
            return fail(format!("detector '{}' has an empty signal_key", self.id));
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return fail(format!(
                "detector '{}' weight {} is outside [0, 1]",
                self.id, self.weight
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return fail(format!(
                "detector '{}' threshold {} is outside [0, 1]",
                self.id, self.threshold
            ));
        }
        if self.window_ms == 0 {
            return fail(format!("detector '{}' window_ms is zero", self.id));
        }
        match &self.kind {
            DetectorKind::BurstCount {
                threshold_count,
                min_unique_ratio,
            } => {
                if *threshold_count == 0 {
                    return fail(format!("detector '{}' threshold_count is zero", self.id));
                }
                if !(0.0..=1.0).contains(min_unique_ratio) {
                    return fail(format!(
                        "detector '{}' min_unique_ratio {} is outside [0, 1]",
                        self.id, min_unique_ratio
                    ));
                }
            }
            DetectorKind::DwellTime { epsilon, dwell_ms } => {
                if !epsilon.is_finite() || *epsilon < 0.0 {
                    return fail(format!("detector '{}' epsilon is invalid", self.id));
                }
                if *dwell_ms == 0 || *dwell_ms > self.window_ms {
                    return fail(format!(
                        "detector '{}' dwell_ms must be within (0, window_ms]",
                        self.id
                    ));
                }
            }
            DetectorKind::LexicalMarker { markers }
            | DetectorKind::ToneMismatch {
                positive_markers: markers,
                ..
            } => {
                if markers.is_empty() {
                    return fail(format!("detector '{}' has no markers", self.id));
                }
                for marker in markers {
                    if marker.token.trim().is_empty() || !(0.0..=1.0).contains(&marker.weight) {
                        return fail(format!(
                            "detector '{}' marker '{}' is invalid",
                            self.id, marker.token
                        ));
                    }
                }
            }
        }
        if let DetectorKind::ToneMismatch { flatness_floor, .. } = &self.kind {
            if !(0.0..=1.0).contains(flatness_floor) {
                return fail(format!(
                    "detector '{}' flatness_floor {} is outside [0, 1]",
                    self.id, flatness_floor
                ));
            }
        }
        Ok(())
    }
}

/// Evaluate a buffer plus the current signal. `Ok(None)` means the signal
/// was not this detector's business; `triggered: false` means examined and
/// absent.
pub trait PatternDetector: Send {
    fn evaluate(
        &mut self,
        buffer: &SignalBuffer,
        signal: &RawSignalEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectionResult>, EngineError>;
}

/// Build the concrete detector for a spec.
pub fn build_detector(spec: &DetectorSpec) -> Box<dyn PatternDetector> {
    match &spec.kind {
        DetectorKind::BurstCount {
            threshold_count,
            min_unique_ratio,
        } => Box::new(BurstCountDetector::new(
            &spec.pattern_id,
            spec.window(),
            *threshold_count,
            *min_unique_ratio,
        )),
        DetectorKind::DwellTime { epsilon, dwell_ms } => Box::new(DwellTimeDetector::new(
            &spec.pattern_id,
            *epsilon,
            Duration::milliseconds(*dwell_ms as i64),
        )),
        DetectorKind::LexicalMarker { markers } => {
            Box::new(LexicalMarkerDetector::new(&spec.pattern_id, markers.clone()))
        }
        DetectorKind::ToneMismatch {
            positive_markers,
            flatness_floor,
        } => Box::new(ToneMismatchDetector::new(
            &spec.pattern_id,
            spec.window(),
            positive_markers.clone(),
            *flatness_floor,
        )),
    }
}

/// Activation parameters for one pattern, aggregated across the detectors
/// that report it: the loosest threshold, the strongest weight, the widest
/// window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternParams {
    pub threshold: f64,
    pub weight: f64,
    pub window: Duration,
}

struct RegisteredDetector {
    spec: DetectorSpec,
    detector: Box<dyn PatternDetector>,
    disabled: bool,
    error_count: u32,
}

/// Typed registry of detectors for one feature instance.
pub struct DetectorRegistry {
    detectors: Vec<RegisteredDetector>,
    max_errors: u32,
}

impl DetectorRegistry {
    /// `max_errors` consecutive failures move a detector into the disabled
    /// state.
    pub fn new(max_errors: u32) -> Self {
        Self {
            detectors: Vec::new(),
            max_errors: max_errors.max(1),
        }
    }

    /// Register a detector. Specs are validated and detector ids must be
    /// unique within the registry.
    pub fn register(&mut self, spec: DetectorSpec) -> Result<(), EngineError> {
        spec.validate()?;
        if self.detectors.iter().any(|d| d.spec.id == spec.id) {
            return Err(EngineError::InvalidConfig(format!(
                "duplicate detector id '{}'",
                spec.id
            )));
        }
        let detector = build_detector(&spec);
        self.detectors.push(RegisteredDetector {
            spec,
            detector,
            disabled: false,
            error_count: 0,
        });
        Ok(())
    }

    /// Evaluate every enabled detector listening on `signal.key`.
    ///
    /// A failing detector is logged, counted, and reported as not-triggered;
    /// the rest of the batch is unaffected.
    pub fn evaluate(
        &mut self,
        store: &BufferStore,
        signal: &RawSignalEvent,
        now: DateTime<Utc>,
        metrics: &EngineMetrics,
    ) -> Vec<DetectionResult> {
        let mut results = Vec::new();
        for entry in &mut self.detectors {
            if entry.disabled || entry.spec.signal_key != signal.key {
                continue;
            }
            let Some(buffer) = store.get(&entry.spec.signal_key) else {
                continue;
            };
            match entry.detector.evaluate(buffer, signal, now) {
                Ok(None) => {
                    entry.error_count = 0;
                }
                Ok(Some(result)) => {
                    entry.error_count = 0;
                    if result.triggered {
                        metrics.record_detection();
                    }
                    results.push(result);
                }
                Err(e) => {
                    entry.error_count += 1;
                    metrics.record_detector_error();
                    tracing::warn!(
                        detector = %entry.spec.id,
                        error = %e,
                        "detector evaluation failed"
                    );
                    if entry.error_count >= self.max_errors {
                        entry.disabled = true;
                        metrics.record_detector_disabled();
                        tracing::warn!(
                            detector = %entry.spec.id,
                            errors = entry.error_count,
                            "detector disabled after repeated failures"
                        );
                    }
                    results.push(DetectionResult::not_triggered(
                        entry.spec.pattern_id.clone(),
                        signal.modality,
                    ));
                }
            }
        }
        results
    }

    /// Re-enable a disabled detector and reset its error count.
    pub fn enable(&mut self, detector_id: &str) -> Result<(), EngineError> {
        let entry = self
            .detectors
            .iter_mut()
            .find(|d| d.spec.id == detector_id)
            .ok_or_else(|| EngineError::UnknownDetector(detector_id.to_string()))?;
        entry.disabled = false;
        entry.error_count = 0;
        Ok(())
    }

    pub fn is_disabled(&self, detector_id: &str) -> Option<bool> {
        self.detectors
            .iter()
            .find(|d| d.spec.id == detector_id)
            .map(|d| d.disabled)
    }

    pub fn spec(&self, detector_id: &str) -> Option<&DetectorSpec> {
        self.detectors
            .iter()
            .find(|d| d.spec.id == detector_id)
            .map(|d| &d.spec)
    }

    /// Aggregated activation parameters for a pattern across every detector
    /// that reports it.
    pub fn pattern_params(&self, pattern_id: &str) -> Option<PatternParams> {
        let mut params: Option<PatternParams> = None;
        for entry in &self.detectors {
            if entry.spec.pattern_id != pattern_id {
                continue;
            }
            let spec = &entry.spec;
            params = Some(match params {
                None => PatternParams {
                    threshold: spec.threshold,
                    weight: spec.weight,
                    window: spec.window(),
                },
                Some(p) => PatternParams {
                    threshold: p.threshold.min(spec.threshold),
                    weight: p.weight.max(spec.weight),
                    window: p.window.max(spec.window()),
                },
            });
        }
        params
    }

    pub fn specs(&self) -> impl Iterator<Item = &DetectorSpec> {
        self.detectors.iter().map(|d| &d.spec)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn burst_spec() -> DetectorSpec {
        DetectorSpec {
            id: "app_switching_storm".into(),
            pattern_id: "app_switching_storm".into(),
            signal_key: "window_focus".into(),
            weight: 0.8,
            threshold: 0.6,
            window_ms: 300_000,
            kind: DetectorKind::BurstCount {
                threshold_count: 20,
                min_unique_ratio: 0.7,
            },
        }
    }

    fn lexical_spec(id: &str, pattern: &str) -> DetectorSpec {
        DetectorSpec {
            id: id.into(),
            pattern_id: pattern.into(),
            signal_key: "conversation".into(),
            weight: 0.8,
            threshold: 0.6,
            window_ms: 30_000,
            kind: DetectorKind::LexicalMarker {
                markers: vec![Marker::new("fine", 0.5)],
            },
        }
    }

    /// A detector that always fails, for exercising the safe-mode path.
    struct FailingDetector;

    impl PatternDetector for FailingDetector {
        fn evaluate(
            &mut self,
            _buffer: &SignalBuffer,
            _signal: &RawSignalEvent,
            _now: DateTime<Utc>,
        ) -> Result<Option<DetectionResult>, EngineError> {
            Err(EngineError::DetectorFailed {
                detector: "broken".into(),
                reason: "synthetic".into(),
            })
        }
    }

    #[test]
    fn triggered_result_clamps_confidence() {
        let result = DetectionResult::triggered("p", Modality::Text, 1.7, vec![]);
        assert_eq!(result.confidence, 1.0);

        let result = DetectionResult::triggered("p", Modality::Text, -0.3, vec![]);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn spec_validation_catches_bad_weight() {
        let mut spec = burst_spec();
        spec.weight = 1.2;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn registry_rejects_duplicate_detector_ids() {
        let mut registry = DetectorRegistry::new(5);
        registry.register(burst_spec()).unwrap();
        assert!(registry.register(burst_spec()).is_err());
    }

    #[test]
    fn detectors_may_share_a_pattern() {
        let mut registry = DetectorRegistry::new(5);
        registry.register(lexical_spec("sarcasm_markers", "sarcasm")).unwrap();
        let mut second = lexical_spec("sarcasm_followup", "sarcasm");
        second.threshold = 0.5;
        second.weight = 0.9;
        second.window_ms = 60_000;
        registry.register(second).unwrap();

        let params = registry.pattern_params("sarcasm").unwrap();
        assert_eq!(params.threshold, 0.5);
        assert_eq!(params.weight, 0.9);
        assert_eq!(params.window, Duration::milliseconds(60_000));
        assert!(registry.pattern_params("unknown").is_none());
    }

    #[test]
    fn failing_detector_is_disabled_after_max_errors() {
        let metrics = EngineMetrics::new(t0());
        let mut registry = DetectorRegistry::new(3);
        registry.register(burst_spec()).unwrap();
        // Swap in the failing implementation behind the registered spec.
        registry.detectors[0].detector = Box::new(FailingDetector);

        let mut store = BufferStore::new();
        store.register(
            "window_focus",
            BufferKind::TimeWindow { window_ms: 300_000 },
        );

        let signal = RawSignalEvent::window_focus(t0(), "window_focus", "app-a");
        for _ in 0..3 {
            let results = registry.evaluate(&store, &signal, t0(), &metrics);
            assert_eq!(results.len(), 1);
            assert!(!results[0].triggered);
        }
        assert_eq!(registry.is_disabled("app_switching_storm"), Some(true));

        // Disabled detectors produce nothing.
        let results = registry.evaluate(&store, &signal, t0(), &metrics);
        assert!(results.is_empty());

        // Explicit re-enable re-arms it.
        registry.enable("app_switching_storm").unwrap();
        assert_eq!(registry.is_disabled("app_switching_storm"), Some(false));
    }

    #[test]
    fn detector_spec_round_trips_through_json() {
        let spec = burst_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: DetectorSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
