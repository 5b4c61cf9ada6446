//! # Playback Configuration
//!
//! Tunables for the cache coordinator, prefetch pipeline and command queue.

use bridge_traits::Quality;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback core configuration.
///
/// Every field has a serde default so partial configuration files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Upper bound on cache entries kept by the coordinator.
    ///
    /// Default: 5.
    #[serde(default = "default_max_cached_tracks")]
    pub max_cached_tracks: usize,

    /// Quality variants one cache entry may hold at once.
    ///
    /// Default: 3.
    #[serde(default = "default_max_qualities_per_track")]
    pub max_qualities_per_track: usize,

    /// Qualities tried, in order, when the preferred one is not granted.
    ///
    /// Default: `[exhigh, standard]`.
    #[serde(default = "default_fallback_qualities")]
    pub fallback_qualities: Vec<Quality>,

    /// Preload candidates in Random mode, where the next index is unknown.
    ///
    /// Default: 3.
    #[serde(default = "default_random_candidate_count")]
    pub random_candidate_count: usize,

    /// Preload candidates in Sequential and Loop mode.
    ///
    /// Default: 2.
    #[serde(default = "default_ordered_candidate_count")]
    pub ordered_candidate_count: usize,

    /// Candidate score at or above which an entry gets `High` priority.
    #[serde(default = "default_high_priority_score")]
    pub high_priority_score: u32,

    /// Candidate score at or above which an entry gets `Medium` priority.
    #[serde(default = "default_medium_priority_score")]
    pub medium_priority_score: u32,

    /// Period of the stale-entry sweep.
    ///
    /// Default: 60 seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// Bytes at the end of the container fetched ahead of time so duration
    /// queries and seek-to-end do not stall.
    ///
    /// Default: 256 KiB.
    #[serde(default = "default_tail_prefetch_bytes")]
    pub tail_prefetch_bytes: u64,

    /// Fade applied to pause/resume/seek issued through the command queue.
    #[serde(default = "default_command_fade_ms")]
    pub command_fade_ms: u32,

    /// Queue slots `predict_next_available` may inspect.
    #[serde(default = "default_predict_max_attempts")]
    pub predict_max_attempts: usize,

    /// Quality requested for prefetches until changed at runtime.
    #[serde(default)]
    pub preferred_quality: Quality,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_cached_tracks: default_max_cached_tracks(),
            max_qualities_per_track: default_max_qualities_per_track(),
            fallback_qualities: default_fallback_qualities(),
            random_candidate_count: default_random_candidate_count(),
            ordered_candidate_count: default_ordered_candidate_count(),
            high_priority_score: default_high_priority_score(),
            medium_priority_score: default_medium_priority_score(),
            sweep_interval: default_sweep_interval(),
            tail_prefetch_bytes: default_tail_prefetch_bytes(),
            command_fade_ms: default_command_fade_ms(),
            predict_max_attempts: default_predict_max_attempts(),
            preferred_quality: Quality::default(),
        }
    }
}

impl PlaybackConfig {
    pub fn with_max_cached_tracks(mut self, count: usize) -> Self {
        self.max_cached_tracks = count;
        self
    }

    pub fn with_max_qualities_per_track(mut self, count: usize) -> Self {
        self.max_qualities_per_track = count;
        self
    }

    pub fn with_fallback_qualities(mut self, qualities: Vec<Quality>) -> Self {
        self.fallback_qualities = qualities;
        self
    }

    pub fn with_random_candidate_count(mut self, count: usize) -> Self {
        self.random_candidate_count = count;
        self
    }

    pub fn with_ordered_candidate_count(mut self, count: usize) -> Self {
        self.ordered_candidate_count = count;
        self
    }

    /// Sets the score thresholds for `High` and `Medium` priority.
    pub fn with_priority_scores(mut self, high: u32, medium: u32) -> Self {
        self.high_priority_score = high;
        self.medium_priority_score = medium;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_tail_prefetch_bytes(mut self, bytes: u64) -> Self {
        self.tail_prefetch_bytes = bytes;
        self
    }

    pub fn with_command_fade_ms(mut self, fade_ms: u32) -> Self {
        self.command_fade_ms = fade_ms;
        self
    }

    pub fn with_preferred_quality(mut self, quality: Quality) -> Self {
        self.preferred_quality = quality;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cached_tracks == 0 {
            return Err("max_cached_tracks must be > 0".to_string());
        }

        if self.max_qualities_per_track == 0 {
            return Err("max_qualities_per_track must be > 0".to_string());
        }

        if self.fallback_qualities.is_empty() {
            return Err("fallback_qualities cannot be empty".to_string());
        }

        if self.medium_priority_score > self.high_priority_score {
            return Err("medium_priority_score cannot exceed high_priority_score".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_max_cached_tracks() -> usize {
    5
}

fn default_max_qualities_per_track() -> usize {
    3
}

fn default_fallback_qualities() -> Vec<Quality> {
    vec![Quality::ExHigh, Quality::Standard]
}

fn default_random_candidate_count() -> usize {
    3
}

fn default_ordered_candidate_count() -> usize {
    2
}

fn default_high_priority_score() -> u32 {
    80
}

fn default_medium_priority_score() -> u32 {
    50
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_tail_prefetch_bytes() -> u64 {
    256 * 1024
}

fn default_command_fade_ms() -> u32 {
    15
}

fn default_predict_max_attempts() -> usize {
    10
}
