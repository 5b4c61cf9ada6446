//! # Core Playback Traits
//!
//! The command queue never talks to the audio engine directly. It drives a
//! [`PlaybackControl`] implementation, which in production is the
//! [`EngineOrchestrator`](crate::orchestrator::EngineOrchestrator) and in
//! tests is usually a mock.
//!
//! ## Cancellation
//!
//! Every call receives the token of the command that issued it. When a newer
//! command is admitted, that token is cancelled and the implementation is
//! expected to return promptly, either with `Err(PlaybackError::Cancelled)`
//! or with whatever partial result it has.

use crate::error::Result;
use crate::track::SharedTrack;
use async_trait::async_trait;
use core_async::sync::CancellationToken;

/// Audio-facing operations issued by the command queue.
///
/// Each method returns `Ok(true)` when the engine accepted the request and
/// `Ok(false)` when it declined without an error (for example, pausing when
/// nothing is loaded).
#[async_trait]
pub trait PlaybackControl: Send + Sync {
    /// Starts `track` from the beginning, replacing whatever was playing.
    async fn play(&self, track: SharedTrack, token: CancellationToken) -> Result<bool>;

    async fn pause(&self, fade_ms: u32, token: CancellationToken) -> Result<bool>;

    async fn resume(&self, fade_ms: u32, token: CancellationToken) -> Result<bool>;

    /// Moves the playhead to `seconds`, waiting for the data at that offset
    /// when the engine can tell where it lives.
    async fn seek(&self, seconds: f64, fade_ms: u32, token: CancellationToken) -> Result<bool>;

    /// Stops immediately.
    async fn stop(&self) -> Result<bool>;
}
