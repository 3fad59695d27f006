//! Dwell-time detector.
//!
//! Hover/avoidance paralysis: the cursor barely moves for a sustained
//! stretch. Triggers once the trailing run of sub-epsilon movement spans the
//! dwell duration, then anchors itself so the same stillness cannot re-fire
//! every cycle; real movement clears the anchor.

use crate::buffer::SignalBuffer;
use crate::detector::{DetectionResult, PatternDetector};
use crate::error::EngineError;
use crate::signal::{RawSignalEvent, SignalPayload};
use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;

pub struct DwellTimeDetector {
    pattern_id: String,
    epsilon: f64,
    dwell: Duration,
    anchor: Option<DateTime<Utc>>,
}

impl DwellTimeDetector {
    pub fn new(pattern_id: &str, epsilon: f64, dwell: Duration) -> Self {
        Self {
            pattern_id: pattern_id.to_string(),
            epsilon,
            dwell,
            anchor: None,
        }
    }
}

impl PatternDetector for DwellTimeDetector {
    fn evaluate(
        &mut self,
        buffer: &SignalBuffer,
        signal: &RawSignalEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<DetectionResult>, EngineError> {
        let quiet = || {
            Some(DetectionResult::not_triggered(
                self.pattern_id.clone(),
                signal.modality,
            ))
        };

        // Other modalities are not this detector's business.
        if !matches!(signal.payload, SignalPayload::Cursor(_)) {
            return Ok(None);
        }

        let samples: Vec<(DateTime<Utc>, f64)> = buffer
            .query(now - self.dwell * 2)
            .into_iter()
            .filter_map(|e| match e.payload {
                SignalPayload::Cursor(c) => Some((e.timestamp, c.delta_magnitude)),
                _ => None,
            })
            .collect();

        if samples.len() < 2 {
            return Ok(quiet());
        }

        // Movement after the anchor clears it; otherwise this stillness
        // already fired.
        if let Some(anchor) = self.anchor {
            let moved_since = samples
                .iter()
                .any(|(ts, mag)| *ts > anchor && *mag >= self.epsilon);
            if moved_since {
                self.anchor = None;
            } else {
                return Ok(quiet());
            }
        }

        // Trailing run of sub-epsilon samples.
        let still: Vec<(DateTime<Utc>, f64)> = samples
            .iter()
            .rev()
            .take_while(|(_, mag)| *mag < self.epsilon)
            .copied()
            .collect();

        if still.len() < 2 {
            return Ok(quiet());
        }

        let (Some((newest, _)), Some((oldest, _))) = (still.first(), still.last()) else {
            return Ok(quiet());
        };
        let (newest, oldest) = (*newest, *oldest);
        let span = newest - oldest;

        if span < self.dwell {
            return Ok(quiet());
        }

        self.anchor = Some(newest);

        // Confidence starts at 0.5 at the threshold and saturates at twice
        // the dwell duration.
        let over = (span - self.dwell).num_milliseconds() as f64;
        let dwell_ms = self.dwell.num_milliseconds().max(1) as f64;
        let confidence = 0.5 + 0.5 * (over / dwell_ms).min(1.0);

        let mean_magnitude = still.iter().map(|(_, mag)| *mag).collect::<Vec<f64>>().mean();
        let evidence = vec![
            format!("cursor still for {}ms", span.num_milliseconds()),
            format!("mean movement {:.2} (epsilon {:.2})", mean_magnitude, self.epsilon),
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

    fn buffer_with_samples(samples: &[(i64, f64)]) -> SignalBuffer {
        let mut buffer = SignalBuffer::new(BufferKind::TimeWindow { window_ms: 60_000 });
        for (offset_ms, mag) in samples {
            buffer.add(RawSignalEvent::cursor(
                t0() + Duration::milliseconds(*offset_ms),
                "cursor",
                *mag,
            ));
        }
        buffer
    }

    fn cursor_signal(offset_ms: i64, mag: f64) -> RawSignalEvent {
        RawSignalEvent::cursor(t0() + Duration::milliseconds(offset_ms), "cursor", mag)
    }

    #[test]
    fn sustained_stillness_triggers() {
        let mut detector = DwellTimeDetector::new("hover_paralysis", 3.0, Duration::seconds(8));
        // Still samples every second for 10 seconds.
        let samples: Vec<(i64, f64)> = (0..=10).map(|i| (i * 1000, 0.5)).collect();
        let buffer = buffer_with_samples(&samples);
        let signal = cursor_signal(10_000, 0.5);

        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(result.triggered);
        assert!(result.confidence >= 0.5);
    }

    #[test]
    fn does_not_refire_without_movement() {
        let mut detector = DwellTimeDetector::new("hover_paralysis", 3.0, Duration::seconds(8));
        let samples: Vec<(i64, f64)> = (0..=10).map(|i| (i * 1000, 0.5)).collect();
        let buffer = buffer_with_samples(&samples);
        let signal = cursor_signal(10_000, 0.5);

        let first = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(first.triggered);

        // Same stillness one sample later: anchored, stays quiet.
        let mut samples = samples.clone();
        samples.push((11_000, 0.4));
        let buffer = buffer_with_samples(&samples);
        let signal = cursor_signal(11_000, 0.4);
        let second = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(!second.triggered);
    }

    #[test]
    fn movement_resets_the_anchor() {
        let mut detector = DwellTimeDetector::new("hover_paralysis", 3.0, Duration::seconds(4));
        let samples: Vec<(i64, f64)> = (0..=5).map(|i| (i * 1000, 0.5)).collect();
        let buffer = buffer_with_samples(&samples);
        let signal = cursor_signal(5000, 0.5);
        assert!(detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap()
            .triggered);

        // Burst of real movement, then a fresh stretch of stillness.
        let mut samples = samples;
        samples.push((6000, 12.0));
        for i in 7..=12 {
            samples.push((i * 1000, 0.3));
        }
        let buffer = buffer_with_samples(&samples);
        let signal = cursor_signal(12_000, 0.3);
        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(result.triggered);
    }

    #[test]
    fn short_stillness_stays_quiet() {
        let mut detector = DwellTimeDetector::new("hover_paralysis", 3.0, Duration::seconds(8));
        let samples: Vec<(i64, f64)> = (0..=3).map(|i| (i * 1000, 0.5)).collect();
        let buffer = buffer_with_samples(&samples);
        let signal = cursor_signal(3000, 0.5);

        let result = detector
            .evaluate(&buffer, &signal, signal.timestamp)
            .unwrap()
            .unwrap();
        assert!(!result.triggered);
    }
}
