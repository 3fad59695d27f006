//! Active pattern tracking and severity evaluation.
//!
//! The severity level is recomputed from the current active set on every
//! evaluation, never incremented or decremented in place, so replaying the
//! same active-set sequence always produces the same level sequence.

use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Discrete escalation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Normal,
    Gentle,
    Supportive,
    Crisis,
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeverityLevel::Normal => "normal",
            SeverityLevel::Gentle => "gentle",
            SeverityLevel::Supportive => "supportive",
            SeverityLevel::Crisis => "crisis",
        };
        f.write_str(s)
    }
}

/// Active-pattern counts at which each tier engages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub gentle: usize,
    pub supportive: usize,
    pub crisis: usize,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            gentle: 1,
            supportive: 2,
            crisis: 3,
        }
    }
}

impl SeverityThresholds {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.gentle == 0 || self.gentle >= self.supportive || self.supportive >= self.crisis {
            return Err(EngineError::InvalidConfig(format!(
                "severity thresholds must be strictly increasing and non-zero: {} < {} < {}",
                self.gentle, self.supportive, self.crisis
            )));
        }
        Ok(())
    }
}

/// One currently-active pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEntry {
    pub last_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Fused confidence scaled by the detector's weight.
    pub weighted_confidence: f64,
}

/// Patterns currently considered active, each expiring once its own
/// detector window passes without a re-trigger.
#[derive(Debug, Default)]
pub struct ActivePatternSet {
    entries: HashMap<String, ActiveEntry>,
}

impl ActivePatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a pattern active (or refresh it) until `now + window`.
    pub fn mark_active(
        &mut self,
        pattern_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        weighted_confidence: f64,
    ) {
        self.entries.insert(
            pattern_id.to_string(),
            ActiveEntry {
                last_seen: now,
                expires_at: now + window,
                weighted_confidence: weighted_confidence.clamp(0.0, 1.0),
            },
        );
    }

    /// Drop entries whose windows have elapsed.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pattern_id: &str) -> bool {
        self.entries.contains_key(pattern_id)
    }

    /// Active pattern ids, sorted for deterministic downstream keys.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sum of weighted confidences across active patterns.
    pub fn total_weighted_confidence(&self) -> f64 {
        self.entries.values().map(|e| e.weighted_confidence).sum()
    }

    pub fn get(&self, pattern_id: &str) -> Option<&ActiveEntry> {
        self.entries.get(pattern_id)
    }
}

/// Emitted exactly once per level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityChanged {
    pub from: SeverityLevel,
    pub to: SeverityLevel,
    pub active_count: usize,
    pub at: DateTime<Utc>,
}

/// Finite-state machine over [`SeverityLevel`].
#[derive(Debug)]
pub struct SeverityEvaluator {
    thresholds: SeverityThresholds,
    current: SeverityLevel,
}

impl SeverityEvaluator {
    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self {
            thresholds,
            current: SeverityLevel::Normal,
        }
    }

    /// Pure mapping from active-pattern count to level.
    pub fn level_for(&self, active_count: usize) -> SeverityLevel {
        if active_count >= self.thresholds.crisis {
            SeverityLevel::Crisis
        } else if active_count >= self.thresholds.supportive {
            SeverityLevel::Supportive
        } else if active_count >= self.thresholds.gentle {
            SeverityLevel::Gentle
        } else {
            SeverityLevel::Normal
        }
    }

    /// Recompute the level from the current active count. Returns a change
    /// event only when the level actually moved.
    pub fn evaluate(&mut self, active_count: usize, now: DateTime<Utc>) -> Option<SeverityChanged> {
        let next = self.level_for(active_count);
        if next == self.current {
            return None;
        }
        let change = SeverityChanged {
            from: self.current,
            to: next,
            active_count,
            at: now,
        };
        self.current = next;
        Some(change)
    }

    pub fn current(&self) -> SeverityLevel {
        self.current
    }
}
