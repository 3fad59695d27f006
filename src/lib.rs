//! Velvet Pattern Engine - real-time multi-signal pattern detection and
//! intervention coordination for neurodivergent support.
//!
//! Behavioral adapters (on-screen text, voice-tone features, window focus,
//! cursor movement) push raw signals in; timely, de-duplicated, prioritized
//! interventions come out. Sarcasm decoding, executive-dysfunction crisis
//! detection, and masking-fatigue tracking are all instances of one
//! pipeline:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Velvet Pattern Engine                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌─────────┐   ┌───────────┐   ┌────────┐        │
//! │  │  Signal  │──▶│ Windowed│──▶│ Detectors │──▶│ Fusion │        │
//! │  │  Queue   │   │ Buffers │   │ (x3 sets) │   └───┬────┘        │
//! │  └──────────┘   └─────────┘   └───────────┘       │             │
//! │                                                   ▼             │
//! │  ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌──────────┐   │
//! │  │ Subscri- │◀──│ Dispatcher │◀──│ Coordin- │◀──│ Severity │   │
//! │  │   bers   │   │ (cooldown) │   │   ator   │   │   FSM    │   │
//! │  └──────────┘   └────────────┘   └──────────┘   └──────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Privacy guarantees
//!
//! - **No raw media**: audio reaches this crate only as derived features,
//!   screens only as already-extracted text
//! - **No coordinates**: cursor signals carry movement magnitude, never
//!   position
//! - **Bounded retention**: every buffer, queue, and log is size- or
//!   time-bounded; signals die once their window passes
//!
//! # Example
//!
//! ```no_run
//! use velvet_pattern_engine::{EngineConfig, PatternEngine, RawSignalEvent};
//! use chrono::Utc;
//!
//! let engine = PatternEngine::start(EngineConfig::default()).expect("valid config");
//! let (_handle, interventions) = engine.subscribe();
//!
//! engine
//!     .push(RawSignalEvent::text(Utc::now(), "conversation", "Sure, fine, whatever."))
//!     .expect("engine accepting events");
//!
//! // Interventions arrive on the channel in dispatch order.
//! if let Ok(intervention) = interventions.recv() {
//!     println!("[{}] {}", intervention.priority, intervention.message);
//! }
//! ```

pub mod buffer;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod fusion;
pub mod metrics;
pub mod scheduler;
pub mod severity;
pub mod signal;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use buffer::{BufferKind, BufferStore, SignalBuffer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoordinationConfig, EngineConfig, FeatureConfig};
pub use coordinator::{
    BatchOutcome, CoordinationOutcome, CrossFeatureCoordinator, EngineCore, FeatureInstance,
    PatternEngine, SignalSender,
};
pub use detector::{
    DetectionResult, DetectorKind, DetectorRegistry, DetectorSpec, Marker, PatternDetector,
};
pub use dispatch::{
    dedup_key_for, DispatchConfig, Intervention, InterventionDispatcher, InterventionPriority,
    SubscriberHandle,
};
pub use error::EngineError;
pub use fusion::{FusedAnalysis, FusionConfig, FusionEngine};
pub use metrics::{EngineMetrics, MetricsSnapshot, SharedMetrics};
pub use scheduler::{BatchConfig, BatchPacer, InputQueue};
pub use severity::{
    ActivePatternSet, SeverityChanged, SeverityEvaluator, SeverityLevel, SeverityThresholds,
};
pub use signal::{AudioFeatures, CursorSample, Modality, RawSignalEvent, SignalPayload, WindowFocus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║          VELVET PATTERN ENGINE - PRIVACY DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This engine reads behavioral signals to offer timely support.   ║
║                                                                  ║
║  ✓ WHAT IT PROCESSES:                                            ║
║    • Text already on your screen (supplied by your adapters)     ║
║    • Voice-tone features (flatness, energy - never recordings)   ║
║    • Which app has focus, and how often that changes             ║
║    • How far the cursor moved (speed only)                       ║
║                                                                  ║
║  ✗ WHAT IT NEVER KEEPS:                                          ║
║    • Raw audio or screenshots                                    ║
║    • Cursor positions (no screen tracking)                       ║
║    • Any signal beyond its detection window                      ║
║                                                                  ║
║  Everything runs locally. Signals are discarded as soon as       ║
║  their detection window passes; only counts are retained.        ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
