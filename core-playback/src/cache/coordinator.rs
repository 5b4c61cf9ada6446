//! # Cache Coordinator
//!
//! Decides which tracks are worth preparing and keeps their cache entries
//! alive while they are useful.
//!
//! ## Reference accounting
//!
//! - Every current preload candidate holds one reference on its entry.
//!   Candidates that drop out of the set on a later refresh give theirs back.
//! - The playing track holds one reference from `started` until `ended`
//!   (or until another track starts).
//! - Entries whose count reaches zero go Stale; the background sweep removes
//!   them.

use super::entry::{CacheEntry, CacheEntrySnapshot, CachePriority, CacheStatus, QualityCacheData};
use super::strategy::{PreloadCandidate, PreloadContext, StrategySet};
use crate::config::PlaybackConfig;
use crate::prefetch::{PrefetchOutcome, PrefetchPipeline, PrefetchRequest};
use crate::queue::{PlayMode, QueueManager};
use crate::state_machine::PlaybackState;
use crate::track::{SharedTrack, Track};
use bridge_traits::Quality;
use core_async::runtime::Handle;
use core_async::sync::broadcast::error::RecvError;
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_async::time::{interval, MissedTickBehavior};
use core_async::{run_until_cancelled, CancellationSlot};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EventStream, PlaybackEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Summary of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub candidates: Vec<String>,
    pub ready: Vec<String>,
    pub unavailable: Vec<String>,
    pub failed: Vec<String>,
    /// A newer refresh or shutdown interrupted this one.
    pub cancelled: bool,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub total_entries: usize,
    pub pending: usize,
    pub loading: usize,
    pub ready: usize,
    pub playing: usize,
    pub stale: usize,
    pub total_refs: usize,
    pub preloaded_bundles: usize,
}

struct CoordinatorInner {
    queue: Arc<QueueManager>,
    pipeline: Arc<PrefetchPipeline>,
    strategies: Mutex<StrategySet>,
    config: PlaybackConfig,
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
    /// Candidate ids that currently hold a reference.
    held: Mutex<HashSet<String>>,
    playing: Mutex<Option<String>>,
    play_mode: Mutex<PlayMode>,
    quality: Mutex<Quality>,
    refresh_slot: CancellationSlot,
    root: CancellationToken,
    refresh_task: Mutex<Option<JoinHandle<RefreshReport>>>,
    event_bus: Mutex<Option<EventBus>>,
}

/// Owns cache entries and drives the prefetch pipeline.
pub struct CacheCoordinator {
    inner: Arc<CoordinatorInner>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheCoordinator {
    pub fn new(
        queue: Arc<QueueManager>,
        pipeline: Arc<PrefetchPipeline>,
        config: PlaybackConfig,
    ) -> Self {
        let quality = config.preferred_quality;
        Self {
            inner: Arc::new(CoordinatorInner {
                queue,
                pipeline,
                strategies: Mutex::new(StrategySet::new()),
                config,
                entries: Mutex::new(HashMap::new()),
                held: Mutex::new(HashSet::new()),
                playing: Mutex::new(None),
                play_mode: Mutex::new(PlayMode::default()),
                quality: Mutex::new(quality),
                refresh_slot: CancellationSlot::new(),
                root: CancellationToken::new(),
                refresh_task: Mutex::new(None),
                event_bus: Mutex::new(None),
            }),
            sweep_task: Mutex::new(None),
            listener_task: Mutex::new(None),
        }
    }

    pub fn with_event_bus(self, bus: EventBus) -> Self {
        *self.inner.event_bus.lock() = Some(bus);
        self
    }

    pub fn with_strategies(self, strategies: StrategySet) -> Self {
        *self.inner.strategies.lock() = strategies;
        self
    }

    pub fn with_play_mode(self, mode: PlayMode) -> Self {
        *self.inner.play_mode.lock() = mode;
        self
    }

    /// Starts the periodic sweep. Needs a running runtime.
    pub fn start(&self) {
        let mut slot = self.sweep_task.lock();
        if slot.is_some() {
            return;
        }

        let inner = self.inner.clone();
        let period = inner.config.sweep_interval;
        *slot = Some(core_async::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            while run_until_cancelled(&inner.root, ticker.tick()).await.is_ok() {
                inner.sweep();
            }
            debug!("Cache sweep stopped");
        }));
    }

    pub fn play_mode(&self) -> PlayMode {
        *self.inner.play_mode.lock()
    }

    pub fn quality(&self) -> Quality {
        *self.inner.quality.lock()
    }

    // ========================================================================
    // Lifecycle signals
    // ========================================================================

    /// Promotes the track to Critical/Playing and refreshes candidates.
    #[instrument(skip(self, track), fields(track_id = %track.id()))]
    pub fn on_track_started(&self, track: &SharedTrack) {
        self.inner.track_started(track);
        self.trigger_refresh();
    }

    /// Demotes the track and drops the playing reference.
    #[instrument(skip(self))]
    pub fn on_track_ended(&self, track_id: &str) {
        self.inner.track_ended(track_id);
    }

    pub fn on_state_changed(&self, state: PlaybackState) {
        if state == PlaybackState::Stopped {
            self.inner.invalidate_non_critical("stopped");
        }
    }

    pub fn on_playback_error(&self) {
        self.inner.invalidate_non_critical("error");
    }

    pub fn on_play_mode_changed(&self, mode: PlayMode) {
        let previous = std::mem::replace(&mut *self.inner.play_mode.lock(), mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Play mode changed");
        }
        self.inner.invalidate_non_critical("play_mode_changed");
        self.trigger_refresh();
    }

    pub fn on_queue_changed(&self) {
        self.inner.invalidate_non_critical("queue_changed");
        self.trigger_refresh();
    }

    pub fn on_quality_changed(&self, quality: Quality) {
        *self.inner.quality.lock() = quality;
        self.inner.invalidate_non_critical("quality_changed");
        self.trigger_refresh();
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Runs a refresh pass to completion. A newer refresh cancels this one.
    pub async fn refresh_preload(&self) -> RefreshReport {
        self.inner.clone().refresh_preload().await
    }

    /// Starts a refresh in the background. Without a runtime this is a no-op.
    pub fn trigger_refresh(&self) {
        self.inner.trigger_refresh();
    }

    /// Waits for the most recently triggered refresh.
    pub async fn wait_for_refresh(&self) -> Option<RefreshReport> {
        let handle = self.inner.refresh_task.lock().take()?;
        handle.await.ok()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Removes and disposes entries that are Stale with no references.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.stats()
    }

    pub fn entry(&self, track_id: &str) -> Option<CacheEntrySnapshot> {
        self.inner
            .entries
            .lock()
            .get(track_id)
            .map(|entry| entry.snapshot())
    }

    pub fn entry_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the entry for `track`, creating it if needed, with one extra
    /// reference the caller must give back with [`release`](Self::release).
    pub fn acquire(&self, track: &SharedTrack) -> Arc<CacheEntry> {
        let entry = self.inner.entry_for(track, CachePriority::Low);
        entry.add_ref();
        entry
    }

    pub fn release(&self, track_id: &str) {
        let entry = self.inner.entries.lock().get(track_id).cloned();
        if let Some(entry) = entry {
            entry.release();
        }
    }

    /// Maps playback events on `bus` onto the lifecycle handlers.
    pub fn spawn_event_listener(&self, bus: &EventBus) {
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)));
        let inner = self.inner.clone();
        let handle = core_async::spawn(async move {
            while let Ok(event) = run_until_cancelled(&inner.root, stream.recv()).await {
                match event {
                    Ok(CoreEvent::Playback(event)) => inner.handle_playback_event(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cache coordinator lagged behind playback events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Cache event listener stopped");
        });
        if let Some(previous) = self.listener_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops background work and disposes every entry.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.refresh_slot.cancel();
        self.inner.pipeline.cancel_current();

        let sweep = self.sweep_task.lock().take();
        if let Some(handle) = sweep {
            let _ = handle.await;
        }
        let refresh = self.inner.refresh_task.lock().take();
        if let Some(handle) = refresh {
            let _ = handle.await;
        }
        let listener = self.listener_task.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }

        let drained: Vec<Arc<CacheEntry>> =
            self.inner.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.dispose();
        }
        self.inner.held.lock().clear();
        *self.inner.playing.lock() = None;
        self.inner.pipeline.clear();
        info!(disposed = drained.len(), "Cache coordinator shut down");
    }
}

impl fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("stats", &self.stats())
            .finish()
    }
}

impl CoordinatorInner {
    fn handle_playback_event(self: &Arc<Self>, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started { track_id } => {
                let track = self.find_track(&track_id);
                self.track_started(&track);
                self.trigger_refresh();
            }
            PlaybackEvent::Ended { track_id } => self.track_ended(&track_id),
            PlaybackEvent::StateChanged { to, .. } => {
                if PlaybackState::from_name(&to) == Some(PlaybackState::Stopped) {
                    self.invalidate_non_critical("stopped");
                }
            }
            PlaybackEvent::Error { .. } => {
                self.invalidate_non_critical("error");
            }
            _ => {}
        }
    }

    fn trigger_refresh(self: &Arc<Self>) {
        if Handle::try_current().is_err() {
            warn!("No runtime available, skipping preload refresh");
            return;
        }
        let handle = core_async::spawn(self.clone().refresh_preload());
        *self.refresh_task.lock() = Some(handle);
    }

    fn candidate_cap(&self, mode: PlayMode) -> usize {
        match mode {
            PlayMode::LoopOne => 0,
            PlayMode::Random => self.config.random_candidate_count,
            PlayMode::Sequential | PlayMode::Loop => self.config.ordered_candidate_count,
        }
    }

    /// Configured fallbacks strictly below `quality`.
    fn fallbacks_for(&self, quality: Quality) -> Vec<Quality> {
        self.config
            .fallback_qualities
            .iter()
            .copied()
            .filter(|q| *q < quality)
            .collect()
    }

    fn entry_for(&self, track: &SharedTrack, priority: CachePriority) -> Arc<CacheEntry> {
        self.entries
            .lock()
            .entry(track.id().to_string())
            .or_insert_with(|| {
                Arc::new(CacheEntry::new(
                    track.clone(),
                    priority,
                    self.config.max_qualities_per_track,
                ))
            })
            .clone()
    }

    fn find_track(&self, track_id: &str) -> SharedTrack {
        if let Some(entry) = self.entries.lock().get(track_id) {
            return entry.track().clone();
        }
        let snapshot = self.queue.capture_snapshot();
        snapshot
            .queue
            .iter()
            .chain(snapshot.injection_chain.iter())
            .chain(snapshot.pending_injection.iter())
            .find(|t| t.id() == track_id)
            .cloned()
            .unwrap_or_else(|| Track::new(track_id).shared())
    }

    fn track_started(&self, track: &SharedTrack) {
        let track_id = track.id().to_string();
        let previous = self.playing.lock().replace(track_id.clone());

        if let Some(previous) = previous.filter(|p| *p != track_id) {
            self.demote(&previous, true);
        }

        let was_candidate = self.held.lock().remove(&track_id);
        let entry = self.entry_for(track, CachePriority::Critical);
        let already_playing = entry.status() == CacheStatus::Playing;
        if !was_candidate && !already_playing {
            entry.add_ref();
        }
        entry.set_priority(CachePriority::Critical);
        entry.set_status(CacheStatus::Playing);
        debug!(track_id = %track_id, refs = entry.ref_count(), "Entry promoted to playing");
    }

    fn track_ended(&self, track_id: &str) {
        let owned = {
            let mut playing = self.playing.lock();
            if playing.as_deref() == Some(track_id) {
                playing.take();
                true
            } else {
                false
            }
        };
        self.demote(track_id, owned);
    }

    fn demote(&self, track_id: &str, release: bool) {
        let entry = self.entries.lock().get(track_id).cloned();
        let Some(entry) = entry else { return };
        entry.set_priority(CachePriority::Low);
        if entry.status() == CacheStatus::Playing {
            entry.set_status(CacheStatus::Ready);
        }
        if release {
            entry.release();
        }
    }

    fn invalidate_non_critical(&self, reason: &str) -> usize {
        let entries: Vec<Arc<CacheEntry>> = self.entries.lock().values().cloned().collect();
        let mut affected = 0;
        for entry in entries {
            if entry.priority() != CachePriority::Critical {
                entry.set_status(CacheStatus::Stale);
                affected += 1;
            }
        }
        if affected > 0 {
            debug!(reason, affected, "Invalidated cache entries");
            self.emit(CacheEvent::Invalidated {
                reason: reason.to_string(),
                affected,
            });
        }
        affected
    }

    /// Gives back references of candidates that left the set and takes
    /// references for new ones. The whole diff runs under the `held` lock so
    /// concurrent refreshes never count a candidate twice.
    fn reconcile_held(&self, candidates: &[PreloadCandidate]) {
        let mut held = self.held.lock();

        let wanted: HashSet<&str> = candidates.iter().map(|c| c.track_id()).collect();
        let released: Vec<String> = held
            .iter()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for id in released {
            held.remove(&id);
            let entry = self.entries.lock().get(&id).cloned();
            if let Some(entry) = entry {
                entry.release();
            }
        }

        for candidate in candidates {
            let priority = CachePriority::from_score(
                candidate.score,
                self.config.high_priority_score,
                self.config.medium_priority_score,
            );
            let entry = self.entry_for(&candidate.track, priority);
            if held.insert(candidate.track_id().to_string()) {
                entry.add_ref();
            }
            if entry.priority() != CachePriority::Critical {
                entry.set_priority(priority);
            }
        }
    }

    async fn refresh_preload(self: Arc<Self>) -> RefreshReport {
        let scope = self.refresh_slot.replace(&self.root);
        let token = scope.token().clone();
        let mut report = RefreshReport::default();

        let mode = *self.play_mode.lock();
        let mut context = PreloadContext::from_snapshot(self.queue.capture_snapshot(), mode);
        if mode == PlayMode::Random {
            context = context.with_random_state(self.queue.random_state());
        }
        let strategy = self.strategies.lock().select(mode);
        let candidates = strategy.select_candidates(&context, self.candidate_cap(mode));
        report.candidates = candidates.iter().map(|c| c.track_id().to_string()).collect();

        self.reconcile_held(&candidates);

        debug!(mode = %mode, candidates = ?report.candidates, "Refreshing preloads");

        let quality = *self.quality.lock();
        for candidate in &candidates {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.preload_candidate(candidate, quality, &mut report).await {
                report.cancelled = true;
                break;
            }
        }
        self.refresh_slot.release(&scope);

        if !report.cancelled {
            self.enforce_capacity();
            let mut keep: HashSet<String> = report.candidates.iter().cloned().collect();
            if let Some(playing) = self.playing.lock().clone() {
                keep.insert(playing);
            }
            self.pipeline.cleanup_stale_data(&keep);
        }

        report
    }

    /// Returns true when the pass was cancelled.
    async fn preload_candidate(
        &self,
        candidate: &PreloadCandidate,
        quality: Quality,
        report: &mut RefreshReport,
    ) -> bool {
        let track_id = candidate.track_id().to_string();
        let entry = self.entry_for(&candidate.track, CachePriority::Low);
        if entry.status() != CacheStatus::Playing {
            entry.set_status(CacheStatus::Loading);
        }

        let request = PrefetchRequest::new(candidate.track.clone(), quality)
            .with_fallbacks(self.fallbacks_for(quality));
        match self.pipeline.prefetch(request).await {
            PrefetchOutcome::Ready => {
                if let Some((url, granted, size)) = candidate
                    .track
                    .resolved()
                    .current()
                    .map(|(u, q, s)| (u.to_string(), q, s))
                {
                    entry.set_quality_cache(granted, QualityCacheData::new(granted, url, size).mark_ready());
                }
                if entry.status() != CacheStatus::Playing {
                    entry.set_status(CacheStatus::Ready);
                }
                report.ready.push(track_id);
                false
            }
            PrefetchOutcome::Unavailable => {
                report.unavailable.push(track_id);
                false
            }
            PrefetchOutcome::Cancelled => true,
            PrefetchOutcome::Failed(error) => {
                warn!(track_id = %track_id, error = %error, "Preload candidate failed");
                entry.update_quality_cache(quality, |q| q.mark_failed(error.to_string()));
                report.failed.push(track_id);
                false
            }
        }
    }

    fn sweep(&self) -> usize {
        let removed: Vec<Arc<CacheEntry>> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.is_evictable())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        for entry in &removed {
            entry.dispose();
        }
        if !removed.is_empty() {
            debug!(removed = removed.len(), "Swept stale cache entries");
            self.emit(CacheEvent::EntriesSwept {
                removed: removed.len(),
            });
        }
        removed.len()
    }

    /// Disposes unreferenced Stale entries, least valuable first, until the
    /// entry count fits `max_cached_tracks`.
    fn enforce_capacity(&self) -> usize {
        let evicted: Vec<Arc<CacheEntry>> = {
            let mut entries = self.entries.lock();
            let excess = entries.len().saturating_sub(self.config.max_cached_tracks);
            if excess == 0 {
                return 0;
            }

            let mut victims: Vec<(u8, chrono::DateTime<chrono::Utc>, String)> = entries
                .iter()
                .filter(|(_, e)| e.is_evictable())
                .map(|(id, e)| (e.priority().retention_rank(), e.last_access(), id.clone()))
                .collect();
            victims.sort();
            victims
                .into_iter()
                .take(excess)
                .filter_map(|(_, _, id)| entries.remove(&id))
                .collect()
        };

        for entry in &evicted {
            entry.dispose();
        }
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Trimmed cache to capacity");
        }
        evicted.len()
    }

    fn stats(&self) -> CoordinatorStats {
        let entries: Vec<Arc<CacheEntry>> = self.entries.lock().values().cloned().collect();
        let mut stats = CoordinatorStats {
            total_entries: entries.len(),
            preloaded_bundles: self.pipeline.preloaded_ids().len(),
            ..CoordinatorStats::default()
        };
        for entry in entries {
            stats.total_refs += entry.ref_count();
            match entry.status() {
                CacheStatus::Pending => stats.pending += 1,
                CacheStatus::Loading => stats.loading += 1,
                CacheStatus::Ready => stats.ready += 1,
                CacheStatus::Playing => stats.playing += 1,
                CacheStatus::Stale => stats.stale += 1,
            }
        }
        stats
    }

    fn emit(&self, event: CacheEvent) {
        let bus = self.event_bus.lock().clone();
        if let Some(bus) = bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}
