//! Tone-mismatch detector.
//!
//! Compares the lexical positivity of recent text against acoustic features
//! from the audio adapter. Positive words delivered flat ("great." in a
//! monotone) score higher than ambiguous text alone, because the channels
//! disagreeing is itself the signal.

use crate::buffer::SignalBuffer;
use crate::detector::lexical::score_markers;
use crate::detector::{DetectionResult, Marker, PatternDetector};
use crate::error::EngineError;
use crate::signal::{RawSignalEvent, SignalPayload};
use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;

pub struct ToneMismatchDetector {
    pattern_id: String,
    window: Duration,
    positive_markers: Vec<Marker>,
    flatness_floor: f64,
}

impl ToneMismatchDetector {
    pub fn new(
        pattern_id: &str,
        window: Duration,
        positive_markers: Vec<Marker>,
        flatness_floor: f64,
    ) -> Self {
        let positive_markers = positive_markers
            .into_iter()
            .map(|m| Marker::new(m.token.to_lowercase(), m.weight))
            .collect();
        Self {
            pattern_id: pattern_id.to_string(),
            window,
            positive_markers,
            flatness_floor,
        }
    }
}

impl PatternDetector for ToneMismatchDetector {
    fn evaluate(
        &mut self,
        buffer: &SignalBuffer,
        signal: &RawSignalEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectionResult>, EngineError> {
        // Only audio deliveries are judged; everything else is not this
        // detector's business.
        let SignalPayload::Audio(features) = &signal.payload else {
            return Ok(None);
        };

        // The most recent text in the shared conversation buffer is what
        // this delivery is assumed to voice.
        let recent_text = buffer
            .query(now - self.window)
            .into_iter()
            .rev()
            .find_map(|e| match e.payload {
                SignalPayload::Text(t) => Some(t.content),
                _ => None,
            });
        let Some(text) = recent_text else {
            return Ok(None);
        };

        let (positivity, matched) = score_markers(&text, &self.positive_markers);
        if positivity <= 0.0 {
            // Neutral text gives no basis to judge a mismatch.
            return Ok(None);
        }

        // Flat delivery: high spectral flatness, low energy, little pitch
        // movement, folded into one score.
        let flatness_score = vec![
            features.flatness.clamp(0.0, 1.0),
            1.0 - features.energy.clamp(0.0, 1.0),
            1.0 - features.pitch_variance.clamp(0.0, 1.0),
        ]
        .mean();

        if flatness_score < self.flatness_floor {
            // Positive words with lively delivery: an examined verdict
            // against the pattern, which fusion counts as disagreement.
            return Ok(Some(DetectionResult::not_triggered(
                self.pattern_id.clone(),
                signal.modality,
            )));
        }

        let confidence = 0.4 + 0.3 * positivity + 0.3 * flatness_score;
        let evidence = vec![
            format!("positive markers: {}", matched.join(", ")),
            format!("acoustic flatness {flatness_score:.2}"),
        ];

        Ok(Some(DetectionResult::triggered(
            self.pattern_id.clone(),
            signal.modality,
            confidence,
            evidence,
        )))
    }
}
