//! # Prefetch Pipeline
//!
//! Prepares the next track so a switch can start without waiting on the
//! network. One attempt runs at a time: starting a new request cancels the
//! previous attempt, and the cancelled attempt disposes whatever it had
//! already acquired before returning.
//!
//! Per request:
//! 1. Resolve a URL for the requested quality, trying fallbacks in order.
//! 2. Start a best-effort prefetch of the tail of the file.
//! 3. Initialize a chunked cache manager and wait for its first chunk.
//! 4. Create a decode stream bound to the cache manager.
//! 5. Store the finished [`PreloadedBundle`] under the track id.
//!
//! Bundles are claimed with [`PrefetchPipeline::try_get`], which removes them,
//! so exactly one consumer owns a given stream handle.

use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};
use crate::resolve::ResolveOutcome;
use crate::track::{Availability, SharedTrack};
use bridge_traits::{
    BridgeError, CacheManagerFactory, CacheManagerRequest, ChunkedCacheManager, PreparedStream,
    Quality, StreamFactory, StreamHandle, TrackResolver,
};
use chrono::{DateTime, Utc};
use core_async::cancel::{check, run_until_cancelled};
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_async::CancellationSlot;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::redact_if_sensitive;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A prefetch target plus the qualities to fall back to.
#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    pub track: SharedTrack,
    pub quality: Quality,
    pub fallbacks: Vec<Quality>,
}

impl PrefetchRequest {
    pub fn new(track: SharedTrack, quality: Quality) -> Self {
        Self {
            track,
            quality,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<Quality>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Requested quality first, then each fallback once.
    pub fn qualities(&self) -> Vec<Quality> {
        let mut ordered = vec![self.quality];
        for quality in &self.fallbacks {
            if !ordered.contains(quality) {
                ordered.push(*quality);
            }
        }
        ordered
    }
}

/// How a prefetch attempt ended.
#[derive(Debug, Clone)]
pub enum PrefetchOutcome {
    Ready,
    /// Every quality came back definitively empty.
    Unavailable,
    /// Superseded or shut down.
    Cancelled,
    Failed(PlaybackError),
}

impl PrefetchOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PrefetchOutcome::Ready)
    }

    fn from_error(error: PlaybackError) -> Self {
        if error.is_cancelled() {
            PrefetchOutcome::Cancelled
        } else if error.marks_unavailable() {
            PrefetchOutcome::Unavailable
        } else {
            PrefetchOutcome::Failed(error)
        }
    }
}

/// Finished prefetch output for one track.
pub struct PreloadedBundle {
    pub track_id: String,
    pub url: String,
    pub quality: Quality,
    pub size: u64,
    pub cache_manager: Arc<dyn ChunkedCacheManager>,
    pub stream: Arc<dyn StreamHandle>,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
    tail_task: Option<JoinHandle<()>>,
}

impl PreloadedBundle {
    /// Converts the bundle into what the audio engine consumes. The tail
    /// prefetch keeps running for the new owner.
    pub fn into_prepared(mut self) -> PreparedStream {
        drop(self.tail_task.take());
        PreparedStream {
            cache_manager: self.cache_manager,
            stream: self.stream,
        }
    }

    /// Stops the tail prefetch, then releases the stream and the cache.
    pub fn dispose(mut self) {
        if let Some(task) = self.tail_task.take() {
            task.abort();
        }
        self.stream.release();
        self.cache_manager.dispose();
    }
}

impl fmt::Debug for PreloadedBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadedBundle")
            .field("track_id", &self.track_id)
            .field("quality", &self.quality)
            .field("size", &self.size)
            .field("stream", &self.stream.id())
            .field("ready", &self.ready)
            .finish()
    }
}

/// URL chosen for one attempt.
struct ResolvedTarget {
    url: String,
    quality: Quality,
    size: u64,
}

/// Resolution result for a single quality.
enum QualityResolution {
    Found(ResolvedTarget),
    Missing,
}

/// Resources acquired by an attempt that has not finished yet.
struct PartialResources {
    cache_manager: Arc<dyn ChunkedCacheManager>,
    tail_task: Option<JoinHandle<()>>,
}

impl PartialResources {
    fn discard(self) {
        if let Some(task) = self.tail_task {
            task.abort();
        }
        self.cache_manager.dispose();
    }
}

/// Single-flight preloader for upcoming tracks.
pub struct PrefetchPipeline {
    resolver: Arc<dyn TrackResolver>,
    cache_factory: Arc<dyn CacheManagerFactory>,
    stream_factory: Arc<dyn StreamFactory>,
    tail_prefetch_bytes: u64,
    root: CancellationToken,
    slot: CancellationSlot,
    bundles: Mutex<HashMap<String, PreloadedBundle>>,
    event_bus: Option<EventBus>,
}

impl PrefetchPipeline {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        cache_factory: Arc<dyn CacheManagerFactory>,
        stream_factory: Arc<dyn StreamFactory>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            resolver,
            cache_factory,
            stream_factory,
            tail_prefetch_bytes: config.tail_prefetch_bytes,
            root: CancellationToken::new(),
            slot: CancellationSlot::new(),
            bundles: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Prepares `request.track`, cancelling any attempt still running.
    #[instrument(skip(self, request), fields(track_id = %request.track.id(), quality = %request.quality))]
    pub async fn prefetch(&self, request: PrefetchRequest) -> PrefetchOutcome {
        let scope = self.slot.replace(&self.root);
        let track_id = request.track.id().to_string();

        if self.has_bundle_for(&track_id, &request.qualities()) {
            debug!("Bundle already prepared");
            self.slot.release(&scope);
            return PrefetchOutcome::Ready;
        }

        let result = self.run(&request, scope.token()).await;
        self.slot.release(&scope);

        match result {
            Ok(bundle) => {
                let quality = bundle.quality;
                let replaced = self.bundles.lock().insert(track_id.clone(), bundle);
                if let Some(old) = replaced {
                    old.dispose();
                }
                info!(quality = %quality, "Preload ready");
                self.emit(CacheEvent::PreloadReady {
                    track_id,
                    quality: quality.to_string(),
                });
                PrefetchOutcome::Ready
            }
            Err(error) => {
                let outcome = PrefetchOutcome::from_error(error.clone());
                match &outcome {
                    PrefetchOutcome::Cancelled => debug!("Preload cancelled"),
                    PrefetchOutcome::Unavailable => {
                        warn!("Track has no stream in any requested quality");
                        self.emit(CacheEvent::PreloadFailed {
                            track_id,
                            message: error.to_string(),
                            unavailable: true,
                        });
                    }
                    _ => {
                        warn!(error = %error, "Preload failed");
                        self.emit(CacheEvent::PreloadFailed {
                            track_id,
                            message: error.to_string(),
                            unavailable: false,
                        });
                    }
                }
                outcome
            }
        }
    }

    async fn run(
        &self,
        request: &PrefetchRequest,
        token: &CancellationToken,
    ) -> Result<PreloadedBundle> {
        let track = &request.track;

        for quality in request.qualities() {
            check(token)?;
            match self.resolve(track, quality, token).await? {
                QualityResolution::Found(target) => return self.prepare(track, target, token).await,
                QualityResolution::Missing => {
                    debug!(quality = %quality, "No stream at this quality, trying next");
                }
            }
        }

        track.mark_confirmed_missing();
        Err(PlaybackError::PermanentUnavailable(track.id().to_string()))
    }

    /// Finds a URL for one quality, reusing what the track already knows.
    async fn resolve(
        &self,
        track: &SharedTrack,
        quality: Quality,
        token: &CancellationToken,
    ) -> Result<QualityResolution> {
        let state = track.resolved();
        if let Some((url, current_quality, size)) = state.current() {
            if current_quality == quality && state.availability == Availability::Available {
                return Ok(QualityResolution::Found(ResolvedTarget {
                    url: url.to_string(),
                    quality,
                    size,
                }));
            }
            if current_quality != quality {
                track.clear_resolution();
            }
        }

        let confirmed = state.availability == Availability::Available;
        if confirmed && track.use_cached_quality(quality) {
            if let Some(cached) = track.quality_url(quality) {
                debug!(quality = %quality, "Using cached quality URL");
                return Ok(QualityResolution::Found(ResolvedTarget {
                    url: cached.url,
                    quality,
                    size: cached.size,
                }));
            }
        }

        let response = run_until_cancelled(
            token,
            self.resolver
                .resolve(vec![track.id().to_string()], quality, confirmed),
        )
        .await?;

        let entries = match response {
            Ok(entries) => entries,
            Err(BridgeError::Cancelled) => return Err(PlaybackError::Cancelled),
            Err(error) => {
                let outcome = ResolveOutcome::from_error(&error);
                return Err(outcome
                    .into_error(track.id())
                    .unwrap_or(PlaybackError::Bridge(error)));
            }
        };

        let entry = entries.get(track.id());
        let outcome = ResolveOutcome::from_entry(entry);
        match (outcome, entry) {
            (ResolveOutcome::Success, Some(resolved)) => {
                track.apply_resolution(resolved);
                Ok(QualityResolution::Found(ResolvedTarget {
                    url: resolved.url.clone(),
                    quality: resolved.quality,
                    size: resolved.size,
                }))
            }
            (outcome, _) if outcome.is_confirmed_missing() => Ok(QualityResolution::Missing),
            (outcome, _) => Err(outcome
                .into_error(track.id())
                .unwrap_or_else(|| PlaybackError::ResolutionFailure(track.id().to_string()))),
        }
    }

    async fn prepare(
        &self,
        track: &SharedTrack,
        target: ResolvedTarget,
        token: &CancellationToken,
    ) -> Result<PreloadedBundle> {
        let track_id = track.id().to_string();
        debug!(
            quality = %target.quality,
            size = target.size,
            url = %redact_if_sensitive("url", &target.url),
            "Opening chunked cache"
        );
        let cache_manager = self
            .cache_factory
            .create(CacheManagerRequest {
                track_id: track_id.clone(),
                url: target.url.clone(),
                size: target.size,
                quality: target.quality,
            })
            .map_err(|e| PlaybackError::initialization(&track_id, e.to_string()))?;

        let partial = PartialResources {
            tail_task: self.spawn_tail_prefetch(&cache_manager, target.size, token),
            cache_manager,
        };

        let initialized = run_until_cancelled(
            token,
            partial.cache_manager.initialize(token.clone(), true),
        )
        .await;
        match initialized {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                partial.discard();
                return Err(PlaybackError::initialization(&track_id, "first chunk not ready"));
            }
            Ok(Err(BridgeError::Cancelled)) | Err(_) => {
                partial.discard();
                return Err(PlaybackError::Cancelled);
            }
            Ok(Err(error)) => {
                partial.discard();
                return Err(PlaybackError::initialization(&track_id, error.to_string()));
            }
        }

        if token.is_cancelled() {
            partial.discard();
            return Err(PlaybackError::Cancelled);
        }

        let stream = match self.stream_factory.create_stream(partial.cache_manager.clone()) {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                partial.discard();
                return Err(PlaybackError::initialization(&track_id, "decoder returned no stream"));
            }
            Err(error) => {
                partial.discard();
                return Err(PlaybackError::initialization(&track_id, error.to_string()));
            }
        };

        if token.is_cancelled() {
            stream.release();
            partial.discard();
            return Err(PlaybackError::Cancelled);
        }

        Ok(PreloadedBundle {
            track_id,
            url: target.url,
            quality: target.quality,
            size: target.size,
            cache_manager: partial.cache_manager,
            stream,
            ready: true,
            created_at: Utc::now(),
            tail_task: partial.tail_task,
        })
    }

    fn spawn_tail_prefetch(
        &self,
        cache_manager: &Arc<dyn ChunkedCacheManager>,
        size: u64,
        token: &CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.tail_prefetch_bytes == 0 || size <= self.tail_prefetch_bytes {
            return None;
        }

        let offset = size - self.tail_prefetch_bytes;
        let cache_manager = cache_manager.clone();
        let child = token.child_token();
        Some(core_async::spawn(async move {
            let wait = cache_manager.wait_for_ready(offset, false, child.clone());
            if let Ok(Err(error)) = run_until_cancelled(&child, wait).await {
                debug!(offset, error = %error, "Tail prefetch failed");
            }
        }))
    }

    fn has_bundle_for(&self, track_id: &str, qualities: &[Quality]) -> bool {
        self.bundles
            .lock()
            .get(track_id)
            .map(|bundle| bundle.ready && qualities.first() == Some(&bundle.quality))
            .unwrap_or(false)
    }

    /// Claims the bundle for `track_id`. A second call returns `None`.
    pub fn try_get(&self, track_id: &str) -> Option<PreloadedBundle> {
        self.bundles.lock().remove(track_id)
    }

    /// Non-consuming check.
    pub fn is_preloaded(&self, track_id: &str) -> bool {
        self.bundles.lock().contains_key(track_id)
    }

    pub fn preloaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bundles.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether an attempt is running right now.
    pub fn is_busy(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Disposes every stored bundle whose id is not in `keep`.
    pub fn cleanup_stale_data(&self, keep: &HashSet<String>) -> usize {
        let stale: Vec<PreloadedBundle> = {
            let mut bundles = self.bundles.lock();
            let ids: Vec<String> = bundles
                .keys()
                .filter(|id| !keep.contains(*id))
                .cloned()
                .collect();
            ids.iter().filter_map(|id| bundles.remove(id)).collect()
        };

        let removed = stale.len();
        for bundle in stale {
            debug!(track_id = %bundle.track_id, "Disposing stale preload");
            bundle.dispose();
        }
        removed
    }

    pub fn cancel_current(&self) {
        self.slot.cancel();
    }

    /// Cancels the running attempt and disposes every stored bundle.
    pub fn clear(&self) {
        self.cancel_current();
        let drained: Vec<PreloadedBundle> = self.bundles.lock().drain().map(|(_, b)| b).collect();
        for bundle in drained {
            bundle.dispose();
        }
    }

    /// Like [`clear`](Self::clear), and no later request will run.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.clear();
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}

impl fmt::Debug for PrefetchPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchPipeline")
            .field("preloaded", &self.preloaded_ids())
            .field("busy", &self.is_busy())
            .finish()
    }
}
