//! Signal event model.
//!
//! External adapters (OCR text stream, audio-feature extractor, window/focus
//! tracker, cursor sampler) produce [`RawSignalEvent`]s and push them into the
//! engine. Events are immutable once created and die after being folded into
//! a buffer.

pub mod types;

pub use types::{
    AudioFeatures, CursorSample, Modality, RawSignalEvent, SignalPayload, TextPayload, WindowFocus,
};
