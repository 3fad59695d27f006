//! Privacy-preserving signal event types.
//!
//! These types carry only what detection needs: text already on screen,
//! derived acoustic features, app identifiers, and cursor movement
//! magnitudes. No raw audio, no screenshots, no cursor coordinates.

use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Audio,
    Window,
    Cursor,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Modality::Text => "text",
            Modality::Audio => "audio",
            Modality::Window => "window",
            Modality::Cursor => "cursor",
        };
        f.write_str(s)
    }
}

/// On-screen or transcribed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub content: String,
}

/// Acoustic features derived by the audio adapter.
///
/// All values are normalized to [0, 1] by the adapter. Raw audio never
/// reaches this crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Spectral flatness: 1.0 is fully monotone delivery.
    pub flatness: f64,
    /// Vocal energy: 0.0 is near-silent delivery.
    pub energy: f64,
    /// Pitch variance: 0.0 is no intonation movement.
    pub pitch_variance: f64,
}

/// A window/app focus change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFocus {
    /// Stable identifier of the focused app or document.
    pub app_id: String,
}

/// A cursor movement sample.
///
/// Only the movement magnitude since the previous sample is recorded, never
/// a screen position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorSample {
    pub delta_magnitude: f64,
}

/// Modality-specific payload of a signal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Text(TextPayload),
    Audio(AudioFeatures),
    WindowFocus(WindowFocus),
    Cursor(CursorSample),
}

impl SignalPayload {
    /// The modality this payload belongs to.
    pub fn modality(&self) -> Modality {
        match self {
            SignalPayload::Text(_) => Modality::Text,
            SignalPayload::Audio(_) => Modality::Audio,
            SignalPayload::WindowFocus(_) => Modality::Window,
            SignalPayload::Cursor(_) => Modality::Cursor,
        }
    }
}

/// A single behavioral signal produced by an external adapter.
///
/// Immutable once created. The `key` names the pattern buffer this event is
/// routed to (e.g. `"conversation"`, `"window_focus"`, `"cursor"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignalEvent {
    pub timestamp: DateTime<Utc>,
    pub modality: Modality,
    pub key: String,
    pub payload: SignalPayload,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_context: Option<String>,
}

impl RawSignalEvent {
    /// Create an event. The modality is derived from the payload so the two
    /// can never disagree.
    pub fn new(timestamp: DateTime<Utc>, key: impl Into<String>, payload: SignalPayload) -> Self {
        Self {
            timestamp,
            modality: payload.modality(),
            key: key.into(),
            payload,
            source_context: None,
        }
    }

    /// Create a text event.
    pub fn text(timestamp: DateTime<Utc>, key: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            timestamp,
            key,
            SignalPayload::Text(TextPayload {
                content: content.into(),
            }),
        )
    }

    /// Create an audio-features event.
    pub fn audio(timestamp: DateTime<Utc>, key: impl Into<String>, features: AudioFeatures) -> Self {
        Self::new(timestamp, key, SignalPayload::Audio(features))
    }

    /// Create a window-focus event.
    pub fn window_focus(
        timestamp: DateTime<Utc>,
        key: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self::new(
            timestamp,
            key,
            SignalPayload::WindowFocus(WindowFocus {
                app_id: app_id.into(),
            }),
        )
    }

    /// Create a cursor movement event.
    pub fn cursor(timestamp: DateTime<Utc>, key: impl Into<String>, delta_magnitude: f64) -> Self {
        Self::new(
            timestamp,
            key,
            SignalPayload::Cursor(CursorSample { delta_magnitude }),
        )
    }

    /// Attach the source context (app name, conversation id) to this event.
    pub fn with_source(mut self, source_context: impl Into<String>) -> Self {
        self.source_context = Some(source_context.into());
        self
    }

    /// The sub-key used for uniqueness counting (distinct apps, distinct
    /// documents) by burst-style detectors.
    pub fn sub_key(&self) -> Option<&str> {
        match &self.payload {
            SignalPayload::WindowFocus(w) => Some(&w.app_id),
            _ => self.source_context.as_deref(),
        }
    }

    /// Reject events that could corrupt buffer ordering or detector math.
    ///
    /// Events from before the Unix epoch or more than `max_future_skew`
    /// ahead of `now`, events with an empty routing key, and events carrying
    /// non-finite numbers are malformed.
    pub fn validate(&self, now: DateTime<Utc>, max_future_skew: Duration) -> Result<(), EngineError> {
        if self.key.trim().is_empty() {
            return Err(EngineError::MalformedEvent("empty routing key".into()));
        }
        if self.timestamp.timestamp() < 0 {
            return Err(EngineError::MalformedEvent(format!(
                "timestamp {} predates the epoch",
                self.timestamp
            )));
        }
        if self.timestamp > now + max_future_skew {
            return Err(EngineError::MalformedEvent(format!(
                "timestamp {} is too far in the future",
                self.timestamp
            )));
        }
        let finite = match &self.payload {
            SignalPayload::Audio(a) => {
                a.flatness.is_finite() && a.energy.is_finite() && a.pitch_variance.is_finite()
            }
            SignalPayload::Cursor(c) => c.delta_magnitude.is_finite(),
            _ => true,
        };
        if !finite {
            return Err(EngineError::MalformedEvent(
                "non-finite numeric payload".into(),
            ));
        }
        Ok(())
    }
}
