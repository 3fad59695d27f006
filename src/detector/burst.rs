//! Burst-count detector.
//!
//! Triggers when the number of events inside the window reaches a threshold.
//! Covers app-switching storms and document spirals, where the tell is many
//! rapid focus changes. An optional uniqueness requirement (distinct apps or
//! documents relative to the threshold) filters out a single source firing
//! repeatedly.

use crate::buffer::SignalBuffer;
use crate::detector::{DetectionResult, PatternDetector};
use crate::error::EngineError;
use crate::signal::RawSignalEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

pub struct BurstCountDetector {
    pattern_id: String,
    window: Duration,
    threshold_count: usize,
    min_unique_ratio: f64,
}

impl BurstCountDetector {
    pub fn new(
        pattern_id: &str,
        window: Duration,
        threshold_count: usize,
        min_unique_ratio: f64,
    ) -> Self {
        Self {
            pattern_id: pattern_id.to_string(),
            window,
            threshold_count: threshold_count.max(1),
            min_unique_ratio,
        }
    }
}

impl PatternDetector for BurstCountDetector {
    fn evaluate(
        &mut self,
        buffer: &SignalBuffer,
        signal: &RawSignalEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectionResult>, EngineError> {
        let events = buffer.query(now - self.window);
        let count = events.len();

        if count < self.threshold_count {
            return Ok(Some(DetectionResult::not_triggered(
                self.pattern_id.clone(),
                signal.modality,
            )));
        }

        let unique: HashSet<&str> = events.iter().filter_map(|e| e.sub_key()).collect();
        let unique_ratio = unique.len() as f64 / self.threshold_count as f64;

        if self.min_unique_ratio > 0.0 && unique_ratio < self.min_unique_ratio {
            return Ok(Some(DetectionResult::not_triggered(
                self.pattern_id.clone(),
                signal.modality,
            )));
        }

        let base = (count as f64 / self.threshold_count as f64).min(1.0);
        let confidence = if self.min_unique_ratio > 0.0 {
            base * unique_ratio.min(1.0)
        } else {
            base
        };

        let evidence = vec![
            format!(
                "{count} events in {}s window",
                self.window.num_seconds().max(1)
            ),
            format!("{} unique sources", unique.len()),
        ];

        Ok(Some(DetectionResult::triggered(
            self.pattern_id.clone(),
            signal.modality,
            confidence,
            evidence,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn storm_buffer(apps: usize, events: usize) -> SignalBuffer {
        let mut buffer = SignalBuffer::new(BufferKind::TimeWindow { window_ms: 300_000 });
        for i in 0..events {
            let app = format!("app-{}", i % apps.max(1));
            buffer.add(RawSignalEvent::window_focus(
                t0() + Duration::seconds(i as i64 * 10),
                "window_focus",
                app,
            ));
        }
        buffer
    }

    fn last_signal(events: usize) -> RawSignalEvent {
        RawSignalEvent::window_focus(
            t0() + Duration::seconds(events as i64 * 10),
            "window_focus",
            "app-last",
        )
    }

    #[test]
    fn twenty_distinct_apps_trigger_the_storm() {
        // Threshold 20, uniqueness requirement 70%, 20 distinct apps.
        let mut detector =
            BurstCountDetector::new("app_switching_storm", Duration::minutes(5), 20, 0.7);
        let buffer = storm_buffer(20, 20);
        let signal = last_signal(20);

        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(result.triggered);
        assert!(result.confidence >= 0.7, "confidence {}", result.confidence);
    }

    #[test]
    fn single_app_flapping_does_not_trigger_with_uniqueness() {
        let mut detector =
            BurstCountDetector::new("app_switching_storm", Duration::minutes(5), 20, 0.7);
        // 25 switches but bouncing between only 2 apps.
        let buffer = storm_buffer(2, 25);
        let signal = last_signal(25);

        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(!result.triggered);
    }

    #[test]
    fn below_threshold_count_stays_quiet() {
        let mut detector =
            BurstCountDetector::new("app_switching_storm", Duration::minutes(5), 20, 0.0);
        let buffer = storm_buffer(10, 10);
        let signal = last_signal(10);

        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(!result.triggered);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn uniqueness_disabled_counts_everything() {
        let mut detector = BurstCountDetector::new("document_spiral", Duration::minutes(5), 10, 0.0);
        let buffer = storm_buffer(1, 12);
        let signal = last_signal(12);

        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(result.triggered);
        assert_eq!(result.confidence, 1.0);
    }
}
