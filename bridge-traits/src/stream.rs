//! Decoder stream contract.

use crate::{cache::ChunkedCacheManager, error::Result, platform::PlatformSendSync};
use std::fmt;
use std::sync::Arc;

/// A decode stream bound to one chunked cache manager.
pub trait StreamHandle: PlatformSendSync + fmt::Debug {
    /// Host-side identifier (for example a native stream handle).
    fn id(&self) -> u64;

    /// Frees the native stream. Must be idempotent.
    fn release(&self);
}

/// Builds decode streams over cached data.
pub trait StreamFactory: PlatformSendSync {
    /// Returns `Ok(None)` when the decoder refused the data (the host's
    /// equivalent of a null handle).
    fn create_stream(
        &self,
        cache_manager: Arc<dyn ChunkedCacheManager>,
    ) -> Result<Option<Arc<dyn StreamHandle>>>;
}
