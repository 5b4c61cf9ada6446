//! Value types returned by the queue model.

use crate::track::SharedTrack;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How the queue advances past its current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayMode {
    #[default]
    Sequential,
    Loop,
    /// Navigation behaves like `Loop`; the engine repeats the track itself.
    LoopOne,
    Random,
}

impl PlayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayMode::Sequential => "sequential",
            PlayMode::Loop => "loop",
            PlayMode::LoopOne => "loop_one",
            PlayMode::Random => "random",
        }
    }
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(PlayMode::Sequential),
            "loop" => Ok(PlayMode::Loop),
            "loop_one" | "loopone" => Ok(PlayMode::LoopOne),
            "random" | "shuffle" => Ok(PlayMode::Random),
            other => Err(format!("unknown play mode: {}", other)),
        }
    }
}

/// Which part of the queue model produced a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackRoute {
    None,
    Queue,
    Injection,
    PendingInjection,
    /// Stepped back out of the injection chain onto the saved queue slot.
    ReturnToQueue,
}

/// Result of [`QueueManager::manual_select`](super::QueueManager::manual_select).
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub route: PlaybackRoute,
    pub track: Option<SharedTrack>,
    pub queue_index: Option<usize>,
    pub injection_index: Option<usize>,
    /// The queue was rebuilt from the view.
    pub queue_changed: bool,
    pub cleared_injection: bool,
}

impl SelectionResult {
    pub(crate) fn for_queue(
        track: SharedTrack,
        queue_index: usize,
        queue_changed: bool,
        cleared_injection: bool,
    ) -> Self {
        Self {
            route: PlaybackRoute::Queue,
            track: Some(track),
            queue_index: Some(queue_index),
            injection_index: None,
            queue_changed,
            cleared_injection,
        }
    }

    pub(crate) fn for_injection(track: SharedTrack, injection_index: usize) -> Self {
        Self {
            route: PlaybackRoute::Injection,
            track: Some(track),
            queue_index: None,
            injection_index: Some(injection_index),
            queue_changed: false,
            cleared_injection: false,
        }
    }
}

/// Result of a next/previous move or a playback reconciliation.
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub route: PlaybackRoute,
    pub track: Option<SharedTrack>,
    pub queue_index: Option<usize>,
    pub injection_index: Option<usize>,
    pub wrapped: bool,
    pub reached_boundary: bool,
    pub queue_empty: bool,
    pub cleared_injection: bool,
}

impl MoveResult {
    pub(crate) fn for_queue(
        track: SharedTrack,
        queue_index: usize,
        wrapped: bool,
        cleared_injection: bool,
    ) -> Self {
        Self {
            route: PlaybackRoute::Queue,
            track: Some(track),
            queue_index: Some(queue_index),
            wrapped,
            cleared_injection,
            ..Self::none()
        }
    }

    pub(crate) fn return_to_queue(track: SharedTrack, queue_index: usize) -> Self {
        Self {
            route: PlaybackRoute::ReturnToQueue,
            track: Some(track),
            queue_index: Some(queue_index),
            cleared_injection: true,
            ..Self::none()
        }
    }

    pub(crate) fn for_injection(
        track: SharedTrack,
        injection_index: usize,
        route: PlaybackRoute,
    ) -> Self {
        Self {
            route,
            track: Some(track),
            injection_index: Some(injection_index),
            ..Self::none()
        }
    }

    pub(crate) fn boundary(queue_empty: bool) -> Self {
        Self {
            reached_boundary: true,
            queue_empty,
            ..Self::none()
        }
    }

    pub(crate) fn none() -> Self {
        Self {
            route: PlaybackRoute::None,
            track: None,
            queue_index: None,
            injection_index: None,
            wrapped: false,
            reached_boundary: false,
            queue_empty: false,
            cleared_injection: false,
        }
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.id())
    }
}

/// Copy-out view of the whole queue model.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub queue: Vec<SharedTrack>,
    pub queue_index: Option<usize>,
    pub queue_source: String,
    pub injection_chain: Vec<SharedTrack>,
    pub injection_index: Option<usize>,
    pub injection_sources: HashMap<String, String>,
    pub pending_injection: Option<SharedTrack>,
}

impl QueueSnapshot {
    pub fn has_queue(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn is_in_injection(&self) -> bool {
        matches!(self.injection_index, Some(i) if i < self.injection_chain.len())
    }

    /// Track under the playhead: the injection slot while injecting,
    /// otherwise the queue slot.
    pub fn current_track(&self) -> Option<&SharedTrack> {
        if self.is_in_injection() {
            return self.injection_index.and_then(|i| self.injection_chain.get(i));
        }
        self.queue_index.and_then(|i| self.queue.get(i))
    }

    /// The track a plain "next" would reach before consulting the queue.
    pub fn next_injected(&self) -> Option<&SharedTrack> {
        if let Some(pending) = &self.pending_injection {
            return Some(pending);
        }
        self.injection_index
            .and_then(|i| self.injection_chain.get(i + 1))
    }
}
