//! Classification of resolver answers.

use crate::error::PlaybackError;
use bridge_traits::{BridgeError, ResolvedUrl, UrlAvailability};

/// Outcome of resolving one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Success,
    NotAvailable,
    PaidContentNotPurchased,
    Cancelled,
    Failed(String),
}

impl ResolveOutcome {
    /// Classifies the resolver entry for one track. `None` means the
    /// resolver returned nothing for it, which is a definitive "no stream".
    pub fn from_entry(entry: Option<&ResolvedUrl>) -> Self {
        match entry {
            None => ResolveOutcome::NotAvailable,
            Some(resolved) => match resolved.availability {
                UrlAvailability::PaidContentNotPurchased => ResolveOutcome::PaidContentNotPurchased,
                UrlAvailability::NotAvailable => ResolveOutcome::NotAvailable,
                UrlAvailability::Playable if resolved.is_playable() => ResolveOutcome::Success,
                UrlAvailability::Playable => ResolveOutcome::NotAvailable,
            },
        }
    }

    pub fn from_error(error: &BridgeError) -> Self {
        match error {
            BridgeError::Cancelled => ResolveOutcome::Cancelled,
            other => ResolveOutcome::Failed(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResolveOutcome::Success)
    }

    /// True only when the service said the track has no stream for this
    /// account. Transport errors and cancellation never qualify.
    pub fn is_confirmed_missing(&self) -> bool {
        matches!(
            self,
            ResolveOutcome::NotAvailable | ResolveOutcome::PaidContentNotPurchased
        )
    }

    /// Error for a non-success outcome.
    pub fn into_error(self, track_id: &str) -> Option<PlaybackError> {
        match self {
            ResolveOutcome::Success => None,
            ResolveOutcome::NotAvailable | ResolveOutcome::PaidContentNotPurchased => {
                Some(PlaybackError::PermanentUnavailable(track_id.to_string()))
            }
            ResolveOutcome::Cancelled => Some(PlaybackError::Cancelled),
            ResolveOutcome::Failed(message) => Some(PlaybackError::TransientNetwork(message)),
        }
    }
}
