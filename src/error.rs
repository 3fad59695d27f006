//! Error types for the pattern engine.

use thiserror::Error;

/// Errors that can occur inside the engine.
///
/// Only `InvalidConfig` is fatal, and only at construction time. Everything
/// else is absorbed at the point it occurs: malformed events and queue
/// overflows are counted, detector failures are contained per detector, and
/// budget overruns feed the adaptive batch pacer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("detector '{detector}' failed: {reason}")]
    DetectorFailed { detector: String, reason: String },

    #[error("input queue full, oldest event dropped")]
    QueueOverflow,

    #[error("batch evaluation took {elapsed_ms}ms, budget is {budget_ms}ms")]
    BatchBudgetExceeded { elapsed_ms: u64, budget_ms: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown detector: {0}")]
    UnknownDetector(String),

    #[error("unknown feature instance: {0}")]
    UnknownFeature(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}
