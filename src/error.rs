//! Error taxonomy for the track manager.

use thiserror::Error;

/// Errors that can occur while constructing or driving a [`crate::manager::TrackManager`].
#[derive(Debug, Clone, Error)]
pub enum TrackError {
    /// A cluster or frame-level input failed validation. The current frame is
    /// aborted; track state is left unchanged.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The innovation covariance for a single track's update was singular.
    /// Recovered locally: only that track's update is skipped and it takes a
    /// miss. Never propagated out of `process_frame`.
    #[error("numerical degeneracy updating track")]
    NumericalDegeneracy,

    /// A `TrackingConfig` value was out of range at construction time.
    #[error("config out of range: {0}")]
    ConfigOutOfRange(String),

    /// An internal invariant was violated. Fatal: the manager is marked
    /// poisoned and refuses further frames.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}
