//! Audio engine bridge.
//!
//! The host owns decoding and output. The core drives it through
//! [`AudioEngine`] and listens to the [`EngineEvent`] stream it publishes.

use crate::{
    cache::ChunkedCacheManager, error::Result, platform::PlatformSendSync, quality::Quality,
    stream::StreamHandle,
};
use core_async::sync::{broadcast, CancellationToken};
use std::fmt;
use std::sync::Arc;

/// A cache manager plus a ready decode stream, produced ahead of time.
#[derive(Clone)]
pub struct PreparedStream {
    pub cache_manager: Arc<dyn ChunkedCacheManager>,
    pub stream: Arc<dyn StreamHandle>,
}

impl fmt::Debug for PreparedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStream")
            .field("stream", &self.stream.id())
            .finish()
    }
}

/// Request to start playing one track.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub track_id: String,
    /// Resolved URL when the core already knows it.
    pub url: Option<String>,
    pub quality: Option<Quality>,
    pub size: u64,
    /// Preloaded stream handed over by the prefetch pipeline. The engine
    /// takes ownership and is responsible for releasing it.
    pub prepared: Option<PreparedStream>,
}

impl EngineRequest {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            url: None,
            quality: None,
            size: 0,
            prepared: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>, quality: Option<Quality>, size: u64) -> Self {
        self.url = Some(url.into());
        self.quality = quality;
        self.size = size;
        self
    }

    pub fn with_prepared(mut self, prepared: PreparedStream) -> Self {
        self.prepared = Some(prepared);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingState {
    Buffering,
    Ready,
    Playing,
}

/// Signals published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    BufferingStateChanged(BufferingState),
    /// Playback was torn down (explicit stop or device loss).
    PlaybackStopped,
    /// The track played to its end.
    PlaybackEnded { track_id: String },
    PlaybackError { track_id: Option<String>, message: String },
}

/// Command surface of the host audio engine.
///
/// Every method returns `Ok(false)` when the engine declined the command
/// (nothing loaded, already in that state) and `Err` when it failed.
#[async_trait::async_trait]
pub trait AudioEngine: PlatformSendSync {
    async fn play(&self, request: EngineRequest, token: CancellationToken) -> Result<bool>;

    async fn pause_with_fade(&self, fade_ms: u32, token: CancellationToken) -> Result<bool>;

    async fn resume_with_fade(&self, fade_ms: u32, token: CancellationToken) -> Result<bool>;

    async fn set_position_with_fade(
        &self,
        seconds: f64,
        fade_ms: u32,
        token: CancellationToken,
    ) -> Result<bool>;

    fn stop(&self) -> Result<bool>;

    /// Byte offset of `seconds` in the current stream, if known.
    fn bytes_for_position(&self, seconds: f64) -> Option<u64>;

    /// Cache manager feeding the current stream.
    fn current_cache_manager(&self) -> Option<Arc<dyn ChunkedCacheManager>>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
