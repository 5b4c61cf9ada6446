//! # Engine Orchestrator
//!
//! Session management over the host [`AudioEngine`].
//!
//! A *session* spans one `play` call until the next `play` or `stop`. Seeks
//! run in their own scope inside the session and are cancelled by the next
//! seek or by the end of the session. Engine events are translated into
//! state machine transitions and [`PlaybackEvent`]s by
//! [`EngineOrchestrator::spawn_engine_listener`].

use crate::error::{PlaybackError, Result};
use crate::position::PositionCoordinator;
use crate::prefetch::PrefetchPipeline;
use crate::state_machine::{PlaybackState, PlaybackStateMachine};
use crate::traits::PlaybackControl;
use crate::track::SharedTrack;
use async_trait::async_trait;
use bridge_traits::{AudioEngine, BridgeError, BufferingState, EngineEvent, EngineRequest};
use core_async::sync::broadcast::error::RecvError;
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_async::{run_until_cancelled, CancellationSlot};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Drives the audio engine on behalf of the command queue.
pub struct EngineOrchestrator {
    engine: Arc<dyn AudioEngine>,
    state: Arc<PlaybackStateMachine>,
    position: Arc<PositionCoordinator>,
    pipeline: Option<Arc<PrefetchPipeline>>,
    session: CancellationSlot,
    seek: CancellationSlot,
    current_track: Mutex<Option<SharedTrack>>,
    root: CancellationToken,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    event_bus: Option<EventBus>,
}

impl EngineOrchestrator {
    pub fn new(
        engine: Arc<dyn AudioEngine>,
        state: Arc<PlaybackStateMachine>,
        position: Arc<PositionCoordinator>,
    ) -> Self {
        Self {
            engine,
            state,
            position,
            pipeline: None,
            session: CancellationSlot::new(),
            seek: CancellationSlot::new(),
            current_track: Mutex::new(None),
            root: CancellationToken::new(),
            listener_task: Mutex::new(None),
            event_bus: None,
        }
    }

    /// Preloaded bundles from `pipeline` are handed to the engine on play.
    pub fn with_pipeline(mut self, pipeline: Arc<PrefetchPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state.current()
    }

    pub fn position(&self) -> &Arc<PositionCoordinator> {
        &self.position
    }

    pub fn current_track(&self) -> Option<SharedTrack> {
        self.current_track.lock().clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.current().is_some()
    }

    /// Position to display for a raw engine reading.
    pub fn effective_position(&self, raw_seconds: f64, is_playing: bool) -> f64 {
        let duration = self
            .current_track()
            .and_then(|t| t.duration())
            .map(|d| d.as_secs_f64())
            .unwrap_or(f64::MAX);
        self.position
            .effective_position(raw_seconds, duration, is_playing)
    }

    fn cancel_session(&self) {
        self.seek.cancel();
        self.session.cancel();
    }

    fn current_track_id(&self) -> Option<String> {
        self.current_track.lock().as_ref().map(|t| t.id().to_string())
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Playback(event));
        }
    }

    fn engine_request(&self, track: &SharedTrack) -> EngineRequest {
        let mut request = EngineRequest::new(track.id());

        let bundle = self.pipeline.as_ref().and_then(|p| p.try_get(track.id()));
        if let Some(bundle) = bundle {
            debug!(track_id = %track.id(), quality = %bundle.quality, "Using preloaded stream");
            request = request.with_url(bundle.url.clone(), Some(bundle.quality), bundle.size);
            return request.with_prepared(bundle.into_prepared());
        }

        let resolved = track.resolved();
        if let Some((url, quality, size)) = resolved.current() {
            request = request.with_url(url, Some(quality), size);
        }
        request
    }

    /// Starts translating engine events. Replaces a previous listener.
    pub fn spawn_engine_listener(self: &Arc<Self>) {
        let mut receiver = self.engine.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        let root = self.root.clone();

        let handle = core_async::spawn(async move {
            while let Ok(event) = run_until_cancelled(&root, receiver.recv()).await {
                match event {
                    Ok(event) => {
                        let Some(orchestrator) = weak.upgrade() else { break };
                        orchestrator.handle_engine_event(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Engine listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Engine listener stopped");
        });

        if let Some(previous) = self.listener_task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::BufferingStateChanged(BufferingState::Buffering) => {
                self.state.transition_to(PlaybackState::Buffering);
                self.emit(PlaybackEvent::BufferingStarted {
                    track_id: self.current_track_id(),
                });
            }
            EngineEvent::BufferingStateChanged(BufferingState::Ready)
            | EngineEvent::BufferingStateChanged(BufferingState::Playing) => {
                self.state.transition_to(PlaybackState::Playing);
                self.emit(PlaybackEvent::BufferingCompleted {
                    track_id: self.current_track_id(),
                });
            }
            EngineEvent::PlaybackEnded { track_id } => {
                info!(track_id = %track_id, "Track ended");
                self.emit(PlaybackEvent::Ended { track_id });
            }
            EngineEvent::PlaybackStopped => {
                self.cancel_session();
                self.state.transition_to(PlaybackState::Stopped);
            }
            EngineEvent::PlaybackError { track_id, message } => {
                warn!(error = %message, "Engine reported an error");
                self.emit(PlaybackEvent::Error {
                    track_id: track_id.or_else(|| self.current_track_id()),
                    message,
                    recoverable: false,
                });
            }
        }
    }

    /// Cancels the session and stops the engine listener.
    pub async fn shutdown(&self) {
        self.root.cancel();
        self.cancel_session();
        let listener = self.listener_task.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl PlaybackControl for EngineOrchestrator {
    #[instrument(skip(self, track, token), fields(track_id = %track.id()))]
    async fn play(&self, track: SharedTrack, token: CancellationToken) -> Result<bool> {
        self.seek.cancel();
        let scope = self.session.replace(&token);
        let session = scope.token().clone();

        self.state.transition_to(PlaybackState::Loading);
        *self.current_track.lock() = Some(track.clone());
        self.emit(PlaybackEvent::BufferingStarted {
            track_id: Some(track.id().to_string()),
        });

        let request = self.engine_request(&track);
        let result = self.engine.play(request, session.clone()).await;

        match result {
            Ok(true) if !session.is_cancelled() => {
                self.state.transition_to(PlaybackState::Playing);
                self.position.reset_for_track(Some(track.id()));
                self.emit(PlaybackEvent::BufferingCompleted {
                    track_id: Some(track.id().to_string()),
                });
                self.emit(PlaybackEvent::Started {
                    track_id: track.id().to_string(),
                });
                info!("Playback started");
                Ok(true)
            }
            Ok(true) | Err(BridgeError::Cancelled) => {
                // when a newer play owns the slot it has already moved to Loading
                if self.session.release(&scope) {
                    self.state.transition_to(PlaybackState::Idle);
                    *self.current_track.lock() = None;
                    self.emit(PlaybackEvent::BufferingCompleted {
                        track_id: Some(track.id().to_string()),
                    });
                }
                debug!("Play cancelled");
                Err(PlaybackError::Cancelled)
            }
            Ok(false) => {
                self.state.transition_to(PlaybackState::Idle);
                self.emit(PlaybackEvent::BufferingCompleted {
                    track_id: Some(track.id().to_string()),
                });
                Ok(false)
            }
            Err(error) => {
                self.state.transition_to(PlaybackState::Idle);
                self.emit(PlaybackEvent::Error {
                    track_id: Some(track.id().to_string()),
                    message: error.to_string(),
                    recoverable: error.is_transient(),
                });
                Err(error.into())
            }
        }
    }

    async fn pause(&self, fade_ms: u32, token: CancellationToken) -> Result<bool> {
        let paused = self.engine.pause_with_fade(fade_ms, token).await?;
        if paused {
            self.state.transition_to(PlaybackState::Paused);
        }
        Ok(paused)
    }

    async fn resume(&self, fade_ms: u32, token: CancellationToken) -> Result<bool> {
        let resumed = self.engine.resume_with_fade(fade_ms, token).await?;
        if resumed {
            self.state.transition_to(PlaybackState::Playing);
        }
        Ok(resumed)
    }

    #[instrument(skip(self, token))]
    async fn seek(&self, seconds: f64, fade_ms: u32, token: CancellationToken) -> Result<bool> {
        if !self.has_session() {
            debug!("Seek without an active session");
            return Ok(false);
        }

        let scope = self.seek.replace(&token);
        let seek_token = scope.token().clone();
        let version = self.position.on_seek_requested(seconds, false);

        let cache_manager = self.engine.current_cache_manager();
        let offset = self.engine.bytes_for_position(seconds);
        if let (Some(cache_manager), Some(offset)) = (cache_manager, offset) {
            let wait = cache_manager.wait_for_ready(offset, true, seek_token.clone());
            match run_until_cancelled(&seek_token, wait).await {
                Ok(Ok(())) => {}
                Ok(Err(BridgeError::Cancelled)) | Err(_) => {
                    self.position.on_seek_executed(seconds, false, version);
                    return Err(PlaybackError::Cancelled);
                }
                Ok(Err(error)) => {
                    self.position.on_seek_executed(seconds, false, version);
                    self.seek.release(&scope);
                    return Err(error.into());
                }
            }
        }

        let result = self
            .engine
            .set_position_with_fade(seconds, fade_ms, seek_token.clone())
            .await;
        let success = matches!(result, Ok(true)) && !seek_token.is_cancelled();
        self.position.on_seek_executed(seconds, success, version);
        self.seek.release(&scope);

        if success {
            self.emit(PlaybackEvent::SeekCompleted {
                track_id: self.current_track_id(),
                position_ms: (seconds.max(0.0) * 1000.0) as u64,
            });
        }
        Ok(result?)
    }

    async fn stop(&self) -> Result<bool> {
        self.cancel_session();
        let stopped = self.engine.stop()?;
        self.state.transition_to(PlaybackState::Stopped);
        *self.current_track.lock() = None;
        self.position.reset_for_track(None);
        Ok(stopped)
    }
}

impl fmt::Debug for EngineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOrchestrator")
            .field("state", &self.state.current())
            .field("track", &self.current_track_id())
            .field("session", &self.has_session())
            .finish()
    }
}
