//! Lexical-marker detector.
//!
//! Scans a text payload for weighted marker tokens; the score is the sum of
//! matched weights clamped to 1.0. Single-shot: the score depends only on
//! the current signal, never on buffer state. Marker sets are a pluggable
//! strategy supplied through configuration, not a contract of this engine.

use crate::buffer::SignalBuffer;
use crate::detector::{DetectionResult, Marker, PatternDetector};
use crate::error::EngineError;
use crate::signal::{RawSignalEvent, SignalPayload};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub struct LexicalMarkerDetector {
    pattern_id: String,
    markers: Vec<Marker>,
}

impl LexicalMarkerDetector {
    pub fn new(pattern_id: &str, markers: Vec<Marker>) -> Self {
        let markers = markers
            .into_iter()
            .map(|m| Marker::new(m.token.to_lowercase(), m.weight))
            .collect();
        Self {
            pattern_id: pattern_id.to_string(),
            markers,
        }
    }
}

/// Score `content` against a marker set: single-word markers match on word
/// boundaries, phrase markers match as substrings. Returns the clamped score
/// and the matched tokens.
pub(crate) fn score_markers(content: &str, markers: &[Marker]) -> (f64, Vec<String>) {
    let lower = content.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    let mut score = 0.0;
    let mut matched = Vec::new();
    for marker in markers {
        let hit = if marker.token.contains(char::is_whitespace) {
            lower.contains(&marker.token)
        } else {
            words.contains(marker.token.as_str())
        };
        if hit {
            score += marker.weight;
            matched.push(marker.token.clone());
        }
    }
    (score.min(1.0), matched)
}

impl PatternDetector for LexicalMarkerDetector {
    fn evaluate(
        &mut self,
        _buffer: &SignalBuffer,
        signal: &RawSignalEvent,
        _now: DateTime<Utc>,
    ) -> Result<Option<DetectionResult>, EngineError> {
        // Only text is scanned; other modalities are not this detector's
        // business.
        let SignalPayload::Text(text) = &signal.payload else {
            return Ok(None);
        };

        let (score, matched) = score_markers(&text.content, &self.markers);
        if matched.is_empty() {
            return Ok(Some(DetectionResult::not_triggered(
                self.pattern_id.clone(),
                signal.modality,
            )));
        }

        let evidence = vec![format!("markers matched: {}", matched.join(", "))];
        Ok(Some(DetectionResult::triggered(
            self.pattern_id.clone(),
            signal.modality,
            score,
            evidence,
        )))
    }
}
