//! Chunked cache manager contract.
//!
//! A chunked cache manager downloads one remote track in fixed-size chunks
//! and serves reads out of them. The network transport is entirely the
//! host's business; the core only needs to know when chunk 0 is present and
//! to ask for readiness at a byte offset before seeking.

use crate::{error::Result, platform::PlatformSendSync, quality::Quality};
use core_async::sync::CancellationToken;
use std::sync::Arc;

/// Parameters for a new chunked cache manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheManagerRequest {
    pub track_id: String,
    pub url: String,
    pub size: u64,
    pub quality: Quality,
}

#[async_trait::async_trait]
pub trait ChunkedCacheManager: PlatformSendSync {
    /// Starts the download and waits for chunk 0.
    ///
    /// Returns `Ok(true)` once chunk 0 is readable. `is_preload` hints that
    /// nobody is listening yet, so the manager may skip work that only
    /// matters for live playback (for example fetching the last chunk).
    async fn initialize(&self, token: CancellationToken, is_preload: bool) -> Result<bool>;

    /// Waits until the chunk containing `byte_offset` is readable.
    async fn wait_for_ready(
        &self,
        byte_offset: u64,
        high_priority: bool,
        token: CancellationToken,
    ) -> Result<()>;

    /// Total size in bytes of the remote resource.
    fn total_size(&self) -> u64;

    /// Stops downloads and releases buffers. Must be idempotent.
    fn dispose(&self);
}

/// Creates chunked cache managers bound to a resolved URL.
pub trait CacheManagerFactory: PlatformSendSync {
    fn create(&self, request: CacheManagerRequest) -> Result<Arc<dyn ChunkedCacheManager>>;
}
