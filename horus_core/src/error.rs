//! Error types for the HORUS substrate engine.

use thiserror::Error;

/// Errors surfaced by the table, state engine, permission protocol, routing
/// manager, and scheduler.
///
/// Per the error-handling design, most rejected operations (an illegal SPS
/// transition, a history list at its cap) are *not* represented here — they
/// are logged and silently dropped, returning a successful empty batch.
/// `HorusError` is reserved for structural failures, cancellation, and
/// permission gating where the caller genuinely has nothing to act on.
#[derive(Debug, Error)]
pub enum HorusError {
    /// Invalid id, non-substrate id, or a required link is missing.
    #[error("structural error: {0}")]
    Structural(String),

    /// A live-SPS transition was denied by the transition table.
    #[error("transition denied: {from} -> {to}")]
    TransitionDenied { from: String, to: String },

    /// A history list reached `MaximumSPSListLength`.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A transfer-permission action could not be satisfied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A sequence or action was cancelled or the owning part was stopped.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Programmer error: null/empty batch, wrong object type, duplicate add.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout `horus_core`.
pub type HorusResult<T> = Result<T, HorusError>;
