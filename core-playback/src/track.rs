//! Track model.
//!
//! A [`Track`] pairs an immutable identity with resolved stream state that
//! the prefetch pipeline fills in. The queue, the cache coordinator and the
//! pipeline all hold the same `Arc<Track>`, so resolution done ahead of time
//! is visible to whoever plays the track.

use bridge_traits::{Quality, ResolvedUrl, TrialWindow};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type SharedTrack = Arc<Track>;

/// What is known about whether a track can be streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Availability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

/// Cached URL for one quality tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityUrl {
    pub url: String,
    pub size: u64,
    pub trial: Option<TrialWindow>,
}

/// Copy of a track's resolved state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedState {
    pub url: Option<String>,
    pub quality: Option<Quality>,
    pub size: u64,
    pub availability: Availability,
    /// Set only when the service answered "no stream" or "not purchased".
    pub confirmed_missing: bool,
    pub trial: Option<TrialWindow>,
    pub quality_urls: HashMap<Quality, QualityUrl>,
}

impl ResolvedState {
    /// Current URL together with the quality it was resolved for.
    pub fn current(&self) -> Option<(&str, Quality, u64)> {
        match (&self.url, self.quality) {
            (Some(url), Some(quality)) if !url.is_empty() => Some((url.as_str(), quality, self.size)),
            _ => None,
        }
    }
}

pub struct Track {
    id: String,
    name: String,
    artist: String,
    album: String,
    duration: Option<Duration>,
    state: RwLock<ResolvedState>,
}

impl Track {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            artist: String::new(),
            album: String::new(),
            duration: None,
            state: RwLock::new(ResolvedState::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn shared(self) -> SharedTrack {
        Arc::new(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn resolved(&self) -> ResolvedState {
        self.state.read().clone()
    }

    pub fn availability(&self) -> Availability {
        self.state.read().availability
    }

    pub fn is_confirmed_missing(&self) -> bool {
        self.state.read().confirmed_missing
    }

    pub fn quality_url(&self, quality: Quality) -> Option<QualityUrl> {
        self.state.read().quality_urls.get(&quality).cloned()
    }

    /// Records a resolver answer.
    ///
    /// A playable result becomes the current URL and is cached under the
    /// quality the service actually granted. A non-playable result only
    /// flips availability; callers decide whether it is confirmed missing.
    pub fn apply_resolution(&self, resolved: &ResolvedUrl) {
        let mut state = self.state.write();
        if !resolved.is_playable() {
            state.availability = Availability::Unavailable;
            return;
        }

        state.url = Some(resolved.url.clone());
        state.quality = Some(resolved.quality);
        state.size = resolved.size;
        state.availability = Availability::Available;
        state.confirmed_missing = false;
        state.trial = resolved.trial;
        state.quality_urls.insert(
            resolved.quality,
            QualityUrl {
                url: resolved.url.clone(),
                size: resolved.size,
                trial: resolved.trial,
            },
        );
    }

    /// Promotes a per-quality cache hit to the current URL.
    pub(crate) fn use_cached_quality(&self, quality: Quality) -> bool {
        let mut state = self.state.write();
        let Some(cached) = state.quality_urls.get(&quality).cloned() else {
            return false;
        };
        state.url = Some(cached.url);
        state.quality = Some(quality);
        state.size = cached.size;
        state.trial = cached.trial;
        true
    }

    pub fn mark_unavailable(&self) {
        self.state.write().availability = Availability::Unavailable;
    }

    /// The service definitively has no stream for this track.
    pub fn mark_confirmed_missing(&self) {
        let mut state = self.state.write();
        state.availability = Availability::Unavailable;
        state.confirmed_missing = true;
    }

    /// Drops the current URL. The per-quality cache and availability stay.
    pub fn clear_resolution(&self) {
        let mut state = self.state.write();
        state.url = None;
        state.quality = None;
        state.size = 0;
        state.trial = None;
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("availability", &self.availability())
            .finish()
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}
