//! Error taxonomy for Engram (spec.md §7).

use thiserror::Error;

/// Unified error type returned by every `engram-core` component.
///
/// Transient per-title failures are not represented here — they are
/// recorded as title state plus a message (see [`crate::models::title`]).
/// This enum is reserved for job-scope and component-scope failures that
/// the job manager turns into a `FAILED` transition or that a caller
/// (e.g. `engram-server`) must surface as a distinct HTTP status.
#[derive(Debug, Error)]
pub enum EngramError {
    /// The rip tool or ffmpeg failed: non-zero exit, missing binary, or a
    /// parse failure on its output.
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// The fingerprint/vote pipeline could not produce a decision.
    #[error("matching error: {0}")]
    Matching(String),

    /// A required setting is missing or invalid (e.g. an unwritable
    /// library path).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A filesystem move into the library failed.
    #[error("organization error: {0}")]
    Organization(String),

    /// A subtitle provider, parser, or cache operation failed.
    #[error("subtitle error: {0}")]
    Subtitle(String),

    /// The settings/job store failed to persist or read state.
    #[error("store error: {0}")]
    Store(String),

    /// The operation was cooperatively cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An invariant that should be unreachable was violated.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for EngramError {
    fn from(err: sqlx::Error) -> Self {
        EngramError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngramError>;
