//! Engine configuration.
//!
//! Everything tunable lives here and is supplied at construction: detector
//! thresholds and weights, window sizes, cooldowns, batch pacing, queue
//! caps, and coordination priorities. No hidden globals. Validation is
//! fatal: an engine is never built on top of a bad config.
//!
//! The stock configuration carries the three feature instances the engine
//! ships with — sarcasm decoding, executive-dysfunction crisis detection,
//! and masking-fatigue tracking. The source material used thresholds
//! between 0.6 and 0.9 with no documented derivation, so every one of them
//! is an explicit field here rather than a constant.

use crate::detector::{DetectorKind, DetectorSpec, Marker};
use crate::dispatch::DispatchConfig;
use crate::error::EngineError;
use crate::fusion::FusionConfig;
use crate::scheduler::BatchConfig;
use crate::severity::SeverityThresholds;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One independently-running detector group (feature instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Instance id, e.g. `sarcasm`, `crisis`, `masking`.
    pub id: String,
    pub detectors: Vec<DetectorSpec>,
}

/// Cross-feature coordination tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Combined weighted confidence above which a unified intervention
    /// fires.
    pub global_threshold: f64,
    /// Per-feature-instance weights in [0, 1]; features missing from the
    /// map default to 1.0.
    pub priorities: HashMap<String, f64>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            global_threshold: 1.5,
            priorities: HashMap::new(),
        }
    }
}

/// Main configuration for the pattern engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub batch: BatchConfig,
    pub dispatch: DispatchConfig,
    pub severity: SeverityThresholds,
    pub fusion: FusionConfig,
    pub coordination: CoordinationConfig,
    /// Consecutive failures before a detector is moved into safe mode.
    pub max_detector_errors: u32,
    /// Events stamped further than this into the future are malformed.
    pub max_future_skew_ms: u64,
    pub features: Vec<FeatureConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            dispatch: DispatchConfig::default(),
            severity: SeverityThresholds::default(),
            fusion: FusionConfig::default(),
            coordination: CoordinationConfig::default(),
            max_detector_errors: 5,
            max_future_skew_ms: 5000,
            features: vec![sarcasm_feature(), crisis_feature(), masking_feature()],
        }
    }
}

/// Conversational sarcasm/emotion decoding: lexical markers plus the
/// text-vs-tone channel comparison, sharing the `conversation` buffer.
pub fn sarcasm_feature() -> FeatureConfig {
    FeatureConfig {
        id: "sarcasm".into(),
        detectors: vec![
            DetectorSpec {
                id: "sarcasm_markers".into(),
                pattern_id: "sarcasm".into(),
                signal_key: "conversation".into(),
                weight: 0.8,
                threshold: 0.6,
                window_ms: 30_000,
                kind: DetectorKind::LexicalMarker {
                    markers: vec![
                        Marker::new("fine", 0.25),
                        Marker::new("sure", 0.2),
                        Marker::new("whatever", 0.3),
                        Marker::new("great", 0.2),
                        Marker::new("totally", 0.15),
                        Marker::new("obviously", 0.2),
                    ],
                },
            },
            DetectorSpec {
                id: "tone_mismatch".into(),
                pattern_id: "sarcasm".into(),
                signal_key: "conversation".into(),
                weight: 0.9,
                threshold: 0.65,
                window_ms: 30_000,
                kind: DetectorKind::ToneMismatch {
                    positive_markers: vec![
                        Marker::new("great", 0.4),
                        Marker::new("fine", 0.3),
                        Marker::new("love", 0.4),
                        Marker::new("perfect", 0.35),
                        Marker::new("awesome", 0.35),
                    ],
                    flatness_floor: 0.6,
                },
            },
        ],
    }
}

/// Executive-dysfunction crisis detection: switching storms, document
/// spirals, and hover paralysis.
pub fn crisis_feature() -> FeatureConfig {
    FeatureConfig {
        id: "crisis".into(),
        detectors: vec![
            DetectorSpec {
                id: "app_switching_storm".into(),
                pattern_id: "app_switching_storm".into(),
                signal_key: "window_focus".into(),
                weight: 0.9,
                threshold: 0.7,
                window_ms: 300_000,
                kind: DetectorKind::BurstCount {
                    threshold_count: 20,
                    min_unique_ratio: 0.7,
                },
            },
            DetectorSpec {
                id: "document_spiral".into(),
                pattern_id: "document_spiral".into(),
                signal_key: "document_focus".into(),
                weight: 0.8,
                threshold: 0.7,
                window_ms: 300_000,
                kind: DetectorKind::BurstCount {
                    threshold_count: 15,
                    min_unique_ratio: 0.5,
                },
            },
            DetectorSpec {
                id: "hover_paralysis".into(),
                pattern_id: "hover_paralysis".into(),
                signal_key: "cursor".into(),
                weight: 0.7,
                threshold: 0.5,
                window_ms: 60_000,
                kind: DetectorKind::DwellTime {
                    epsilon: 3.0,
                    dwell_ms: 8000,
                },
            },
        ],
    }
}

/// Masking-fatigue tracking: scripted-politeness language and suppressed
/// vocal affect.
pub fn masking_feature() -> FeatureConfig {
    FeatureConfig {
        id: "masking".into(),
        detectors: vec![
            DetectorSpec {
                id: "masking_language".into(),
                pattern_id: "masking_language".into(),
                signal_key: "conversation".into(),
                weight: 0.7,
                threshold: 0.6,
                window_ms: 60_000,
                kind: DetectorKind::LexicalMarker {
                    markers: vec![
                        Marker::new("no worries", 0.35),
                        Marker::new("i'm fine", 0.4),
                        Marker::new("it's okay", 0.3),
                        Marker::new("happy to", 0.25),
                        Marker::new("sorry", 0.2),
                    ],
                },
            },
            DetectorSpec {
                id: "suppressed_affect".into(),
                pattern_id: "suppressed_affect".into(),
                signal_key: "conversation".into(),
                weight: 0.8,
                threshold: 0.65,
                window_ms: 60_000,
                kind: DetectorKind::ToneMismatch {
                    positive_markers: vec![
                        Marker::new("fine", 0.35),
                        Marker::new("okay", 0.3),
                        Marker::new("good", 0.3),
                        Marker::new("no problem", 0.35),
                    ],
                    flatness_floor: 0.65,
                },
            },
        ],
    }
}

impl EngineConfig {
    /// Validate the whole configuration. Any failure here rejects startup.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.batch.validate()?;
        self.dispatch.validate()?;
        self.severity.validate()?;
        self.fusion.validate()?;

        if !self.coordination.global_threshold.is_finite()
            || self.coordination.global_threshold <= 0.0
        {
            return Err(EngineError::InvalidConfig(format!(
                "coordination global_threshold {} must be positive",
                self.coordination.global_threshold
            )));
        }
        for (feature, weight) in &self.coordination.priorities {
            if !(0.0..=1.0).contains(weight) {
                return Err(EngineError::InvalidConfig(format!(
                    "coordination priority for '{feature}' is outside [0, 1]"
                )));
            }
        }

        if self.max_detector_errors == 0 {
            return Err(EngineError::InvalidConfig(
                "max_detector_errors is zero".into(),
            ));
        }
        if self.features.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one feature instance is required".into(),
            ));
        }

        let mut feature_ids = std::collections::HashSet::new();
        for feature in &self.features {
            if feature.id.trim().is_empty() {
                return Err(EngineError::InvalidConfig("feature id is empty".into()));
            }
            if !feature_ids.insert(feature.id.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate feature id '{}'",
                    feature.id
                )));
            }
            if feature.detectors.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "feature '{}' has no detectors",
                    feature.id
                )));
            }
            for spec in &feature.detectors {
                spec.validate()?;
            }
        }
        Ok(())
    }

    /// Load configuration from the default location, falling back to the
    /// stock config when none exists.
    pub fn load() -> Result<Self, EngineError> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| EngineError::InvalidConfig(format!("read {config_path:?}: {e}")))?;
            let config: EngineConfig = serde_json::from_str(&content)
                .map_err(|e| EngineError::InvalidConfig(format!("parse {config_path:?}: {e}")))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), EngineError> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::InvalidConfig(format!("create {parent:?}: {e}")))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidConfig(format!("serialize config: {e}")))?;
        std::fs::write(&config_path, content)
            .map_err(|e| EngineError::InvalidConfig(format!("write {config_path:?}: {e}")))?;
        Ok(())
    }

    /// Path of the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("velvet-pattern-engine")
            .join("config.json")
    }

    /// All detector specs across features.
    pub fn all_detectors(&self) -> impl Iterator<Item = &DetectorSpec> {
        self.features.iter().flat_map(|f| f.detectors.iter())
    }
}
