//! Per-track cache entry.
//!
//! A [`CacheEntry`] owns the prepared resources for every quality variant of
//! one track. Variants live in independent slots, so replacing one quality
//! never invalidates another and fallback chains survive a quality switch.

use crate::track::SharedTrack;
use bridge_traits::{ChunkedCacheManager, Quality, StreamHandle};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Eviction and scheduling tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CachePriority {
    /// The track that is playing right now. Never invalidated.
    Critical,
    High,
    Medium,
    Low,
}

impl CachePriority {
    /// Maps a strategy score onto a tier.
    pub fn from_score(score: u32, high_threshold: u32, medium_threshold: u32) -> Self {
        if score >= high_threshold {
            CachePriority::High
        } else if score >= medium_threshold {
            CachePriority::Medium
        } else {
            CachePriority::Low
        }
    }

    /// Lower ranks are evicted first.
    pub fn retention_rank(&self) -> u8 {
        match self {
            CachePriority::Critical => 3,
            CachePriority::High => 2,
            CachePriority::Medium => 1,
            CachePriority::Low => 0,
        }
    }
}

/// Lifecycle status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheStatus {
    Pending,
    Loading,
    Ready,
    Playing,
    /// Eligible for removal once nobody holds a reference.
    Stale,
}

/// Download progress of one quality variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    NotStarted,
    Initializing,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

/// Resources prepared for one quality of one track.
pub struct QualityCacheData {
    pub quality: Quality,
    pub url: String,
    pub size: u64,
    pub cache_manager: Option<Arc<dyn ChunkedCacheManager>>,
    pub stream: Option<Arc<dyn StreamHandle>>,
    pub ready: bool,
    pub download_status: DownloadStatus,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl QualityCacheData {
    pub fn new(quality: Quality, url: impl Into<String>, size: u64) -> Self {
        Self {
            quality,
            url: url.into(),
            size,
            cache_manager: None,
            stream: None,
            ready: false,
            download_status: DownloadStatus::NotStarted,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn with_resources(
        mut self,
        cache_manager: Arc<dyn ChunkedCacheManager>,
        stream: Option<Arc<dyn StreamHandle>>,
    ) -> Self {
        self.cache_manager = Some(cache_manager);
        self.stream = stream;
        self
    }

    pub fn mark_ready(mut self) -> Self {
        self.ready = true;
        self.download_status = DownloadStatus::Completed;
        self
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.ready = false;
        self.download_status = DownloadStatus::Failed;
        self.last_error = Some(error.into());
    }

    /// Releases the stream handle, then the cache manager. Calling this again
    /// is a no-op.
    pub fn dispose(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.release();
        }
        if let Some(cache_manager) = self.cache_manager.take() {
            cache_manager.dispose();
        }
        self.ready = false;
    }

    pub fn info(&self) -> QualityInfo {
        QualityInfo {
            quality: self.quality,
            url: self.url.clone(),
            size: self.size,
            ready: self.ready,
            download_status: self.download_status,
            has_stream: self.stream.is_some(),
            has_cache_manager: self.cache_manager.is_some(),
            created_at: self.created_at,
            last_error: self.last_error.clone(),
        }
    }
}

impl fmt::Debug for QualityCacheData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualityCacheData")
            .field("quality", &self.quality)
            .field("size", &self.size)
            .field("ready", &self.ready)
            .field("download_status", &self.download_status)
            .field("stream", &self.stream.as_ref().map(|s| s.id()))
            .finish()
    }
}

/// Read-only view of a quality slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityInfo {
    pub quality: Quality,
    pub url: String,
    pub size: u64,
    pub ready: bool,
    pub download_status: DownloadStatus,
    pub has_stream: bool,
    pub has_cache_manager: bool,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Read-only view of a whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntrySnapshot {
    pub track_id: String,
    pub status: CacheStatus,
    pub priority: CachePriority,
    pub ref_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub qualities: Vec<QualityInfo>,
}

struct EntryInner {
    status: CacheStatus,
    priority: CachePriority,
    ref_count: usize,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
    qualities: HashMap<Quality, QualityCacheData>,
    /// Qualities in the order they were last set, oldest first.
    set_order: Vec<Quality>,
    max_qualities: usize,
}

/// Cache state for one track.
pub struct CacheEntry {
    track_id: String,
    track: SharedTrack,
    inner: Mutex<EntryInner>,
}

impl CacheEntry {
    pub fn new(track: SharedTrack, priority: CachePriority, max_qualities: usize) -> Self {
        let now = Utc::now();
        Self {
            track_id: track.id().to_string(),
            track,
            inner: Mutex::new(EntryInner {
                status: CacheStatus::Pending,
                priority,
                ref_count: 0,
                created_at: now,
                last_access: now,
                qualities: HashMap::new(),
                set_order: Vec::new(),
                max_qualities: max_qualities.max(1),
            }),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn track(&self) -> &SharedTrack {
        &self.track
    }

    pub fn status(&self) -> CacheStatus {
        self.inner.lock().status
    }

    pub fn set_status(&self, status: CacheStatus) {
        self.inner.lock().status = status;
    }

    pub fn priority(&self) -> CachePriority {
        self.inner.lock().priority
    }

    pub fn set_priority(&self, priority: CachePriority) {
        self.inner.lock().priority = priority;
    }

    pub fn ref_count(&self) -> usize {
        self.inner.lock().ref_count
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.inner.lock().last_access
    }

    /// Marks the entry as in use and returns the new count.
    pub fn add_ref(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.ref_count += 1;
        inner.last_access = Utc::now();
        inner.ref_count
    }

    /// Drops one reference. At zero the entry goes Stale unless it is
    /// playing; the sweep decides when it actually leaves.
    pub fn release(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.ref_count = inner.ref_count.saturating_sub(1);
        if inner.ref_count == 0 && inner.status != CacheStatus::Playing {
            inner.status = CacheStatus::Stale;
        }
        inner.ref_count
    }

    /// Whether the sweep may remove this entry.
    pub fn is_evictable(&self) -> bool {
        let inner = self.inner.lock();
        inner.status == CacheStatus::Stale && inner.ref_count == 0
    }

    /// Stores resources for `quality`, replacing only that slot.
    ///
    /// When the slot count would exceed the per-track cap, the quality set
    /// longest ago is dropped. The incoming quality and the quality the track
    /// currently resolves to are never the ones dropped.
    pub fn set_quality_cache(&self, quality: Quality, data: QualityCacheData) {
        let current_quality = self.track.resolved().quality;
        let mut dropped = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(previous) = inner.qualities.insert(quality, data) {
                dropped.push(previous);
            }
            inner.set_order.retain(|q| *q != quality);
            inner.set_order.push(quality);

            while inner.qualities.len() > inner.max_qualities {
                let victim = inner
                    .set_order
                    .iter()
                    .copied()
                    .find(|q| *q != quality && Some(*q) != current_quality);
                let Some(victim) = victim else { break };
                inner.set_order.retain(|q| *q != victim);
                if let Some(evicted) = inner.qualities.remove(&victim) {
                    debug!(track_id = %self.track_id, quality = %victim, "Evicting quality slot");
                    dropped.push(evicted);
                }
            }

            inner.last_access = Utc::now();
            if inner.qualities.values().any(|q| q.ready) && inner.status != CacheStatus::Playing
            {
                inner.status = CacheStatus::Ready;
            }
        }

        for mut data in dropped {
            data.dispose();
        }
    }

    pub fn quality_info(&self, quality: Quality) -> Option<QualityInfo> {
        self.inner.lock().qualities.get(&quality).map(|q| q.info())
    }

    /// Takes the slot out of the entry. The caller owns its resources.
    pub fn take_quality_cache(&self, quality: Quality) -> Option<QualityCacheData> {
        let mut inner = self.inner.lock();
        inner.set_order.retain(|q| *q != quality);
        inner.qualities.remove(&quality)
    }

    /// Applies `update` to an existing slot. Returns false if there is none.
    pub fn update_quality_cache<F>(&self, quality: Quality, update: F) -> bool
    where
        F: FnOnce(&mut QualityCacheData),
    {
        let mut inner = self.inner.lock();
        match inner.qualities.get_mut(&quality) {
            Some(data) => {
                update(data);
                true
            }
            None => false,
        }
    }

    pub fn has_ready_quality(&self) -> bool {
        self.inner.lock().qualities.values().any(|q| q.ready)
    }

    pub fn ready_qualities(&self) -> Vec<Quality> {
        let mut ready: Vec<Quality> = self
            .inner
            .lock()
            .qualities
            .values()
            .filter(|q| q.ready)
            .map(|q| q.quality)
            .collect();
        ready.sort();
        ready
    }

    pub fn quality_count(&self) -> usize {
        self.inner.lock().qualities.len()
    }

    /// Releases every slot's resources and forces the entry Stale.
    /// Repeated calls leave the same state behind.
    pub fn dispose(&self) {
        let drained: Vec<QualityCacheData> = {
            let mut inner = self.inner.lock();
            inner.status = CacheStatus::Stale;
            inner.set_order.clear();
            inner.qualities.drain().map(|(_, data)| data).collect()
        };

        for mut data in drained {
            data.dispose();
        }
    }

    pub fn snapshot(&self) -> CacheEntrySnapshot {
        let inner = self.inner.lock();
        let mut qualities: Vec<QualityInfo> = inner.qualities.values().map(|q| q.info()).collect();
        qualities.sort_by_key(|q| q.quality);
        CacheEntrySnapshot {
            track_id: self.track_id.clone(),
            status: inner.status,
            priority: inner.priority,
            ref_count: inner.ref_count,
            created_at: inner.created_at,
            last_access: inner.last_access,
            qualities,
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CacheEntry")
            .field("track_id", &self.track_id)
            .field("status", &inner.status)
            .field("priority", &inner.priority)
            .field("ref_count", &inner.ref_count)
            .field("qualities", &inner.qualities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::ResolvedUrl;
    use core_async::sync::CancellationToken;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCache {
        disposed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChunkedCacheManager for CountingCache {
        async fn initialize(&self, _token: CancellationToken, _is_preload: bool) -> BridgeResult<bool> {
            Ok(true)
        }

        async fn wait_for_ready(
            &self,
            _byte_offset: u64,
            _high_priority: bool,
            _token: CancellationToken,
        ) -> BridgeResult<()> {
            Ok(())
        }

        fn total_size(&self) -> u64 {
            0
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Default)]
    struct CountingStream {
        released: AtomicUsize,
    }

    impl StreamHandle for CountingStream {
        fn id(&self) -> u64 {
            1
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entry(max_qualities: usize) -> CacheEntry {
        CacheEntry::new(Track::new("t1").shared(), CachePriority::Medium, max_qualities)
    }

    fn slot(
        quality: Quality,
        cache: &Arc<CountingCache>,
        stream: &Arc<CountingStream>,
    ) -> QualityCacheData {
        QualityCacheData::new(quality, "https://cdn/t1", 100)
            .with_resources(cache.clone(), Some(stream.clone() as Arc<dyn StreamHandle>))
            .mark_ready()
    }

    #[test]
    fn test_priority_from_score() {
        assert_eq!(CachePriority::from_score(90, 80, 50), CachePriority::High);
        assert_eq!(CachePriority::from_score(80, 80, 50), CachePriority::High);
        assert_eq!(CachePriority::from_score(50, 80, 50), CachePriority::Medium);
        assert_eq!(CachePriority::from_score(49, 80, 50), CachePriority::Low);
    }

    #[test]
    fn test_release_to_zero_marks_stale() {
        let entry = entry(2);
        entry.add_ref();
        entry.add_ref();
        assert_eq!(entry.release(), 1);
        assert_eq!(entry.status(), CacheStatus::Pending);
        assert_eq!(entry.release(), 0);
        assert_eq!(entry.status(), CacheStatus::Stale);
        assert!(entry.is_evictable());
    }

    #[test]
    fn test_release_keeps_playing_entry() {
        let entry = entry(2);
        entry.add_ref();
        entry.set_status(CacheStatus::Playing);
        entry.release();
        assert_eq!(entry.status(), CacheStatus::Playing);
        assert!(!entry.is_evictable());
    }

    #[test]
    fn test_release_never_underflows() {
        let entry = entry(2);
        assert_eq!(entry.release(), 0);
        assert_eq!(entry.ref_count(), 0);
    }

    #[test]
    fn test_quality_slots_are_independent() {
        let entry = entry(3);
        let cache = Arc::new(CountingCache::default());
        let stream = Arc::new(CountingStream::default());

        entry.set_quality_cache(Quality::Lossless, slot(Quality::Lossless, &cache, &stream));
        entry.set_quality_cache(Quality::ExHigh, slot(Quality::ExHigh, &cache, &stream));

        assert_eq!(entry.ready_qualities(), vec![Quality::ExHigh, Quality::Lossless]);
        assert_eq!(entry.status(), CacheStatus::Ready);
        assert_eq!(cache.disposed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_replacing_slot_disposes_previous() {
        let entry = entry(3);
        let cache = Arc::new(CountingCache::default());
        let stream = Arc::new(CountingStream::default());

        entry.set_quality_cache(Quality::Lossless, slot(Quality::Lossless, &cache, &stream));
        entry.set_quality_cache(Quality::Lossless, slot(Quality::Lossless, &cache, &stream));

        assert_eq!(entry.quality_count(), 1);
        assert_eq!(cache.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(stream.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_quality_cap_evicts_oldest_non_current() {
        let track = Track::new("t1").shared();
        track.apply_resolution(&ResolvedUrl::playable("https://cdn/hq", Quality::Lossless, 10));
        let entry = CacheEntry::new(track, CachePriority::High, 2);
        let cache = Arc::new(CountingCache::default());
        let stream = Arc::new(CountingStream::default());

        entry.set_quality_cache(Quality::Lossless, slot(Quality::Lossless, &cache, &stream));
        entry.set_quality_cache(Quality::ExHigh, slot(Quality::ExHigh, &cache, &stream));
        entry.set_quality_cache(Quality::Standard, slot(Quality::Standard, &cache, &stream));

        assert_eq!(entry.quality_count(), 2);
        assert!(entry.quality_info(Quality::Lossless).is_some());
        assert!(entry.quality_info(Quality::ExHigh).is_none());
        assert!(entry.quality_info(Quality::Standard).is_some());
        assert_eq!(cache.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_twice_is_idempotent() {
        let entry = entry(2);
        let cache = Arc::new(CountingCache::default());
        let stream = Arc::new(CountingStream::default());
        entry.set_quality_cache(Quality::Lossless, slot(Quality::Lossless, &cache, &stream));

        entry.dispose();
        let first = entry.snapshot();
        entry.dispose();
        let second = entry.snapshot();

        assert_eq!(first.status, CacheStatus::Stale);
        assert_eq!(first.status, second.status);
        assert_eq!(first.qualities, second.qualities);
        assert!(second.qualities.is_empty());
        assert_eq!(cache.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(stream.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_quality_cache_hands_over_ownership() {
        let entry = entry(2);
        let cache = Arc::new(CountingCache::default());
        let stream = Arc::new(CountingStream::default());
        entry.set_quality_cache(Quality::Lossless, slot(Quality::Lossless, &cache, &stream));

        let taken = entry.take_quality_cache(Quality::Lossless);
        assert!(taken.is_some());
        entry.dispose();
        assert_eq!(cache.disposed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_quality_cache() {
        let entry = entry(2);
        entry.set_quality_cache(
            Quality::Standard,
            QualityCacheData::new(Quality::Standard, "https://cdn/t1", 10),
        );

        assert!(entry.update_quality_cache(Quality::Standard, |q| q.mark_failed("boom")));
        assert!(!entry.update_quality_cache(Quality::HiRes, |q| q.mark_failed("boom")));

        let info = entry.quality_info(Quality::Standard).unwrap();
        assert_eq!(info.download_status, DownloadStatus::Failed);
        assert_eq!(info.last_error.as_deref(), Some("boom"));
    }
}
