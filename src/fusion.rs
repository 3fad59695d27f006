//! Multimodal fusion.
//!
//! Independent detections for the same pattern are folded into one
//! confidence score. One reporting modality passes its confidence through;
//! two or more take the maximum confidence scaled by an agreement bonus —
//! above 1.0 when the channels agree, at or below 1.0 when they disagree —
//! and the result is re-clamped to [0, 1].

use crate::detector::DetectionResult;
use crate::error::EngineError;
use crate::signal::Modality;
use serde::{Deserialize, Serialize};

/// Tuning for the agreement rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Maximum boost at full agreement; 0.3 yields the 1.3x ceiling.
    pub agreement_bonus: f64,
    /// Maximum reduction at full disagreement; 0.2 yields a 0.8x floor.
    pub disagreement_penalty: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            agreement_bonus: 0.3,
            disagreement_penalty: 0.2,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=0.3).contains(&self.agreement_bonus) {
            return Err(EngineError::InvalidConfig(format!(
                "fusion agreement_bonus {} is outside [0, 0.3]",
                self.agreement_bonus
            )));
        }
        if !(0.0..=1.0).contains(&self.disagreement_penalty) {
            return Err(EngineError::InvalidConfig(format!(
                "fusion disagreement_penalty {} is outside [0, 1]",
                self.disagreement_penalty
            )));
        }
        Ok(())
    }
}

/// Combined view of one pattern across the modalities that reported on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedAnalysis {
    pub pattern_id: String,
    /// Always within [0, 1].
    pub overall_confidence: f64,
    /// Modalities that triggered, deduplicated, in report order.
    pub contributing_modalities: Vec<Modality>,
    /// -1.0 (full disagreement) to 1.0 (full agreement).
    pub agreement_score: f64,
    pub evidence: Vec<String>,
}

/// Applies the agreement rule.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Fuse the results reported for one pattern this cycle. Returns `None`
    /// when nothing triggered.
    pub fn fuse(&self, results: &[DetectionResult]) -> Option<FusedAnalysis> {
        let triggered: Vec<&DetectionResult> = results.iter().filter(|r| r.triggered).collect();
        let first = triggered.first()?;
        let pattern_id = first.pattern_id.clone();

        let mut contributing = Vec::new();
        let mut evidence = Vec::new();
        for result in &triggered {
            if !contributing.contains(&result.modality) {
                contributing.push(result.modality);
            }
            evidence.extend(result.evidence.iter().cloned());
        }

        let max_confidence = triggered
            .iter()
            .map(|r| r.confidence)
            .fold(0.0_f64, f64::max);

        // Agreement over everything that reported, triggered or not: a
        // modality that looked and saw nothing counts against.
        let agreement_score = if results.len() < 2 {
            1.0
        } else {
            2.0 * triggered.len() as f64 / results.len() as f64 - 1.0
        };

        let overall_confidence = if results.len() < 2 {
            max_confidence
        } else {
            let multiplier = if agreement_score >= 0.0 {
                1.0 + self.config.agreement_bonus * agreement_score
            } else {
                1.0 + self.config.disagreement_penalty * agreement_score
            };
            (max_confidence * multiplier).clamp(0.0, 1.0)
        };

        Some(FusedAnalysis {
            pattern_id,
            overall_confidence,
            contributing_modalities: contributing,
            agreement_score,
            evidence,
        })
    }
}
