//! Error types
//!
//! Every failure in this crate is locally recoverable. Nothing here is meant
//! to reach the host as a panic; callers either get a value back or the error
//! is logged and the subsystem degrades.

use thiserror::Error;

/// A render sample that could not be recorded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentationError {
    /// The sample carried an empty component name.
    #[error("render sample has an empty component name")]
    EmptyComponent,

    /// The duration was negative or not a finite number.
    #[error("invalid render duration {duration_ms}ms for component `{component}`")]
    InvalidDuration { component: String, duration_ms: f64 },
}

impl InstrumentationError {
    /// Key used to throttle repeated logs for the same component.
    pub fn component(&self) -> &str {
        match self {
            InstrumentationError::EmptyComponent => "",
            InstrumentationError::InvalidDuration { component, .. } => component,
        }
    }
}

/// Hardware signals needed for classification were missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device signals unavailable: {}", .missing.join(", "))]
pub struct ClassificationUnavailable {
    pub missing: Vec<&'static str>,
}

/// What went wrong inside a scheduled work callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickFailure {
    /// The callback returned an error.
    Failed(String),
    /// The callback panicked.
    Panicked(String),
}

/// A work callback failed during one tick. The loop keeps running.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("work callback failed at t={timestamp_ms:.1}ms: {}", .failure.message())]
pub struct SchedulerTickError {
    pub timestamp_ms: f64,
    pub failure: TickFailure,
}

impl TickFailure {
    pub fn message(&self) -> &str {
        match self {
            TickFailure::Failed(msg) => msg,
            TickFailure::Panicked(msg) => msg,
        }
    }
}

/// A config recompute produced an unusable result.
///
/// The store keeps the last-known-good config and retries at the next window
/// boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigRecomputeError {
    #[error("target fps {0} outside 1..=240")]
    TargetFpsOutOfRange(u32),

    #[error("particle scale {0} outside 0.0..=1.0")]
    ParticleScaleOutOfRange(f64),

    #[error("sampling rate {0} outside (0.0, 1.0]")]
    SamplingRateOutOfRange(f64),

    #[error("throttle interval {0}ms is not a positive finite number")]
    InvalidThrottleInterval(f64),
}
