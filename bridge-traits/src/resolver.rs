//! URL resolution contract.
//!
//! The resolver turns track ids into playable, usually short-lived, stream
//! URLs for a requested quality. The host owns the HTTP client and the
//! credential flow; the core only cares about the outcome per track.

use crate::{error::Result, platform::PlatformSendSync, quality::Quality};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Portion of a track the service lets an unentitled user hear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// What the resolver concluded about a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlAvailability {
    /// A usable URL was returned.
    Playable,
    /// The service reports no stream for this track.
    NotAvailable,
    /// The track belongs to paid content the account has not bought.
    PaidContentNotPurchased,
}

/// Per-track resolver result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUrl {
    pub url: String,
    /// Quality actually granted, which may be lower than the one requested.
    pub quality: Quality,
    pub size: u64,
    pub availability: UrlAvailability,
    pub trial: Option<TrialWindow>,
}

impl ResolvedUrl {
    pub fn playable(url: impl Into<String>, quality: Quality, size: u64) -> Self {
        Self {
            url: url.into(),
            quality,
            size,
            availability: UrlAvailability::Playable,
            trial: None,
        }
    }

    pub fn with_trial(mut self, trial: TrialWindow) -> Self {
        self.trial = Some(trial);
        self
    }

    /// A result only counts as playable when it carries a non-empty URL.
    pub fn is_playable(&self) -> bool {
        self.availability == UrlAvailability::Playable && !self.url.trim().is_empty()
    }
}

/// Resolves playable URLs for tracks.
///
/// Implementations return one entry per track they could say something
/// about. A track missing from the map, or present with an empty URL, is a
/// definitive "nothing playable" answer. Transport problems must surface as
/// `Err(BridgeError::Network(..))` instead so the caller can retry later.
#[async_trait::async_trait]
pub trait TrackResolver: PlatformSendSync {
    async fn resolve(
        &self,
        track_ids: Vec<String>,
        quality: Quality,
        skip_availability_check: bool,
    ) -> Result<HashMap<String, ResolvedUrl>>;
}
