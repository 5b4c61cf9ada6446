//! # Event Bus System
//!
//! Typed, broadcast-based signalling between the playback components.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain (playback lifecycle, cache, command queue)
//! - **EventBus**: cloneable broadcast sender shared by every emitter
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌───────────────────┐
//! │ EngineOrchestrator├───────>│           ├────────────>│ CacheCoordinator  │
//! └──────────────────┘         │ EventBus  │             └───────────────────┘
//! ┌──────────────────┐  emit   │ (broadcast│  subscribe  ┌───────────────────┐
//! │ CommandQueue     ├────────>│  channel) ├────────────>│ host UI / logging │
//! └──────────────────┘         └───────────┘             └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Started {
//!     track_id: "track-1".to_string(),
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed. Emitters ignore that with
//! `.ok()`: an unobserved signal is not an error.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Playback(PlaybackEvent),
    Cache(CacheEvent),
    Command(CommandEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Command(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::PreloadFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Command(CommandEvent::StateChanged { state, .. }) if state == "Failed" => {
                EventSeverity::Warning
            }
            CoreEvent::Playback(PlaybackEvent::Started { .. })
            | CoreEvent::Playback(PlaybackEvent::Ended { .. })
            | CoreEvent::Cache(CacheEvent::PreloadReady { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Playback lifecycle signals.
///
/// The cache coordinator listens to `Started`, `Ended`, `StateChanged` and
/// `Error`; hosts typically listen to all of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A track actually began playing.
    Started { track_id: String },
    /// A track played to its natural end.
    Ended { track_id: String },
    /// Committed playback state transition. States use their `as_str` names.
    StateChanged { from: String, to: String },
    BufferingStarted { track_id: Option<String> },
    BufferingCompleted { track_id: Option<String> },
    SeekCompleted {
        track_id: Option<String>,
        position_ms: u64,
    },
    Error {
        track_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Playback started",
            PlaybackEvent::Ended { .. } => "Track ended",
            PlaybackEvent::StateChanged { .. } => "Playback state changed",
            PlaybackEvent::BufferingStarted { .. } => "Buffering started",
            PlaybackEvent::BufferingCompleted { .. } => "Buffering completed",
            PlaybackEvent::SeekCompleted { .. } => "Seek completed",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A preloaded bundle is stored and ready to be claimed.
    PreloadReady { track_id: String, quality: String },
    PreloadFailed {
        track_id: String,
        message: String,
        /// True when the failure marked the track unavailable.
        unavailable: bool,
    },
    /// The periodic sweep disposed entries.
    EntriesSwept { removed: usize },
    /// Non-critical entries were marked stale.
    Invalidated { reason: String, affected: usize },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::PreloadReady { .. } => "Preload ready",
            CacheEvent::PreloadFailed { .. } => "Preload failed",
            CacheEvent::EntriesSwept { .. } => "Cache entries swept",
            CacheEvent::Invalidated { .. } => "Cache entries invalidated",
        }
    }
}

// ============================================================================
// Command Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CommandEvent {
    StateChanged {
        command_id: u64,
        command: String,
        state: String,
        message: Option<String>,
    },
}

impl CommandEvent {
    fn description(&self) -> &str {
        match self {
            CommandEvent::StateChanged { .. } => "Command state changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus. Clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus whose subscribers may fall `capacity` events behind
    /// before they see `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event. Returns the number of receivers it reached.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates an independent receiver for all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map(|f| f(event)).unwrap_or(true)
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` means nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::Started {
            track_id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(8);
        assert!(bus.emit(started("a")).is_err());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.emit(started("a")).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), started("a"));
        assert_eq!(second.recv().await.unwrap(), started("a"));
    }

    #[tokio::test]
    async fn test_stream_filter_skips_other_domains() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Cache(_)));

        bus.emit(started("a")).ok();
        let swept = CoreEvent::Cache(CacheEvent::EntriesSwept { removed: 3 });
        bus.emit(swept.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), swept);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit(started(&format!("t{}", i))).ok();
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_severity_mapping() {
        let error = CoreEvent::Playback(PlaybackEvent::Error {
            track_id: None,
            message: "device lost".to_string(),
            recoverable: false,
        });
        assert_eq!(error.severity(), EventSeverity::Error);

        let failed = CoreEvent::Command(CommandEvent::StateChanged {
            command_id: 1,
            command: "Seek".to_string(),
            state: "Failed".to_string(),
            message: Some("engine refused".to_string()),
        });
        assert_eq!(failed.severity(), EventSeverity::Warning);

        assert_eq!(started("a").severity(), EventSeverity::Info);
        let transition = CoreEvent::Playback(PlaybackEvent::StateChanged {
            from: "Idle".to_string(),
            to: "Loading".to_string(),
        });
        assert_eq!(transition.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CoreEvent::Cache(CacheEvent::PreloadReady {
            track_id: "t1".to_string(),
            quality: "lossless".to_string(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Cache\""));
        assert!(json.contains("\"event\":\"PreloadReady\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
