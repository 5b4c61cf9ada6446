//! # Playback Error Types
//!
//! Error taxonomy for the queue, prefetch and cache components.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback coordination.
#[derive(Error, Debug, Clone)]
pub enum PlaybackError {
    // ========================================================================
    // Resolution Errors
    // ========================================================================
    /// The resolver returned nothing playable for the requested quality.
    #[error("No playable URL for track {0}")]
    ResolutionFailure(String),

    /// The service confirmed the track has no stream. Eligible for automatic
    /// skip, never for removal from user-visible lists.
    #[error("Track permanently unavailable: {0}")]
    PermanentUnavailable(String),

    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Cache manager or decode stream could not be set up.
    #[error("Initialization failed for track {track_id}: {reason}")]
    InitializationFailure { track_id: String, reason: String },

    /// Retryable transport problem.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    // ========================================================================
    // Control Errors
    // ========================================================================
    /// Superseded or explicitly stopped.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    pub fn initialization(track_id: impl Into<String>, reason: impl Into<String>) -> Self {
        PlaybackError::InitializationFailure {
            track_id: track_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the operation can be retried as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::TransientNetwork(_) => true,
            PlaybackError::Bridge(inner) => inner.is_transient(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PlaybackError::Cancelled | PlaybackError::Bridge(BridgeError::Cancelled)
        )
    }

    /// Only a confirmed empty resolution may flag a track unavailable.
    pub fn marks_unavailable(&self) -> bool {
        matches!(self, PlaybackError::PermanentUnavailable(_))
    }
}

impl From<core_async::Cancelled> for PlaybackError {
    fn from(_: core_async::Cancelled) -> Self {
        PlaybackError::Cancelled
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_permanent_unavailable_marks_track() {
        assert!(PlaybackError::PermanentUnavailable("1".into()).marks_unavailable());
        assert!(!PlaybackError::ResolutionFailure("1".into()).marks_unavailable());
        assert!(!PlaybackError::initialization("1", "no chunk 0").marks_unavailable());
        assert!(!PlaybackError::Cancelled.marks_unavailable());
        assert!(!PlaybackError::TransientNetwork("timeout".into()).marks_unavailable());
    }

    #[test]
    fn test_bridge_errors_keep_their_classification() {
        let network: PlaybackError = BridgeError::Network("reset".into()).into();
        assert!(network.is_transient());

        let cancelled: PlaybackError = BridgeError::Cancelled.into();
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_transient());

        let from_scope: PlaybackError = core_async::Cancelled.into();
        assert!(from_scope.is_cancelled());
    }
}
