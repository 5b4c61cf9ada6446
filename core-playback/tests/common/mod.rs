//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::{
    AudioEngine, BridgeError, CacheManagerFactory, CacheManagerRequest, ChunkedCacheManager,
    EngineEvent, EngineRequest, Quality, ResolvedUrl, StreamFactory, StreamHandle, TrackResolver,
};
use core_async::sync::{broadcast, CancellationToken, Notify};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

mock! {
    pub Resolver {}

    #[async_trait]
    impl TrackResolver for Resolver {
        async fn resolve(
            &self,
            track_ids: Vec<String>,
            quality: Quality,
            skip_availability_check: bool,
        ) -> Result<HashMap<String, ResolvedUrl>>;
    }
}

mock! {
    pub Engine {}

    #[async_trait]
    impl AudioEngine for Engine {
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
        fn bytes_for_position(&self, seconds: f64) -> Option<u64>;
        fn current_cache_manager(&self) -> Option<Arc<dyn ChunkedCacheManager>>;
        fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
    }
}

pub const TRACK_SIZE: u64 = 4096;

pub fn playable(id: &str, quality: Quality) -> ResolvedUrl {
    ResolvedUrl::playable(format!("https://cdn.example/{}/{}", quality, id), quality, TRACK_SIZE)
}

/// Resolver that returns a playable URL for every requested id.
pub fn playable_resolver() -> MockResolver {
    let mut resolver = MockResolver::new();
    resolver.expect_resolve().returning(|ids, quality, _| {
        Ok(ids
            .iter()
            .map(|id| (id.clone(), playable(id, quality)))
            .collect())
    });
    resolver
}

// ============================================================================
// Cache manager
// ============================================================================

/// Chunked cache manager whose first chunk can be held back.
pub struct FakeCacheManager {
    pub request: CacheManagerRequest,
    pub initialize_result: bool,
    pub gated: bool,
    pub started: Notify,
    pub release: Notify,
    pub disposed: AtomicUsize,
    pub waited_offsets: Mutex<Vec<(u64, bool)>>,
}

impl FakeCacheManager {
    pub fn new(request: CacheManagerRequest) -> Self {
        Self {
            request,
            initialize_result: true,
            gated: false,
            started: Notify::new(),
            release: Notify::new(),
            disposed: AtomicUsize::new(0),
            waited_offsets: Mutex::new(Vec::new()),
        }
    }

    pub fn disposed_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkedCacheManager for FakeCacheManager {
    async fn initialize(&self, token: CancellationToken, _is_preload: bool) -> Result<bool> {
        self.started.notify_one();
        if self.gated {
            tokio::select! {
                _ = token.cancelled() => return Err(BridgeError::Cancelled),
                _ = self.release.notified() => {}
            }
        }
        Ok(self.initialize_result)
    }

    async fn wait_for_ready(
        &self,
        byte_offset: u64,
        high_priority: bool,
        _token: CancellationToken,
    ) -> Result<()> {
        self.waited_offsets.lock().push((byte_offset, high_priority));
        Ok(())
    }

    fn total_size(&self) -> u64 {
        self.request.size
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds [`FakeCacheManager`]s and remembers them by track id.
#[derive(Default)]
pub struct FakeCacheFactory {
    pub gated: Mutex<HashSet<String>>,
    pub failing_init: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<Arc<FakeCacheManager>>>,
}

impl FakeCacheFactory {
    pub fn gate(&self, track_id: &str) {
        self.gated.lock().insert(track_id.to_string());
    }

    pub fn fail_init(&self, track_id: &str) {
        self.failing_init.lock().insert(track_id.to_string());
    }

    pub fn managers_for(&self, track_id: &str) -> Vec<Arc<FakeCacheManager>> {
        self.created
            .lock()
            .iter()
            .filter(|m| m.request.track_id == track_id)
            .cloned()
            .collect()
    }

    pub fn latest_for(&self, track_id: &str) -> Option<Arc<FakeCacheManager>> {
        self.managers_for(track_id).pop()
    }

    /// Waits until a manager for `track_id` has entered `initialize`.
    pub async fn wait_started(&self, track_id: &str) -> Arc<FakeCacheManager> {
        loop {
            if let Some(manager) = self.latest_for(track_id) {
                manager.started.notified().await;
                return manager;
            }
            tokio::task::yield_now().await;
        }
    }
}

impl CacheManagerFactory for FakeCacheFactory {
    fn create(&self, request: CacheManagerRequest) -> Result<Arc<dyn ChunkedCacheManager>> {
        let mut manager = FakeCacheManager::new(request.clone());
        manager.gated = self.gated.lock().contains(&request.track_id);
        manager.initialize_result = !self.failing_init.lock().contains(&request.track_id);
        let manager = Arc::new(manager);
        self.created.lock().push(manager.clone());
        Ok(manager)
    }
}

// ============================================================================
// Streams
// ============================================================================

#[derive(Debug)]
pub struct FakeStream {
    pub id: u64,
    pub released: AtomicBool,
}

impl StreamHandle for FakeStream {
    fn id(&self) -> u64 {
        self.id
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeStreamFactory {
    pub refuse: AtomicBool,
    next_id: AtomicU64,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeStreamFactory {
    pub fn refusing() -> Self {
        let factory = Self::default();
        factory.refuse.store(true, Ordering::SeqCst);
        factory
    }

    pub fn released_count(&self) -> usize {
        self.streams
            .lock()
            .iter()
            .filter(|s| s.released.load(Ordering::SeqCst))
            .count()
    }
}

impl StreamFactory for FakeStreamFactory {
    fn create_stream(
        &self,
        _cache_manager: Arc<dyn ChunkedCacheManager>,
    ) -> Result<Option<Arc<dyn StreamHandle>>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let stream = Arc::new(FakeStream {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            released: AtomicBool::new(false),
        });
        self.streams.lock().push(stream.clone());
        Ok(Some(stream))
    }
}
