//! # Host Bridge Traits
//!
//! Contracts between the stream queue core and the host application.
//!
//! ## Overview
//!
//! The core decides *what* to fetch and *when*; everything that touches the
//! network, the decoder or the audio device lives behind these traits and is
//! implemented by the host:
//!
//! - [`TrackResolver`](resolver::TrackResolver) - turns track ids into stream URLs
//! - [`ChunkedCacheManager`](cache::ChunkedCacheManager) - chunked download of one track
//! - [`CacheManagerFactory`](cache::CacheManagerFactory) - builds cache managers for URLs
//! - [`StreamFactory`](stream::StreamFactory) - decode streams over cached data
//! - [`AudioEngine`](playback::AudioEngine) - playback commands and engine events
//! - [`Clock`](time::Clock) - time source for deterministic tests
//! - [`LoggerSink`](time::LoggerSink) - forwards structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! A missing collaborator is a configuration error reported at construction
//! time, never a panic halfway through playback:
//!
//! ```ignore
//! let resolver = resolver.ok_or_else(|| PlaybackError::InvalidConfig(
//!     "TrackResolver implementation required".to_string(),
//! ))?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Transport
//! problems should map to `BridgeError::Network` so the core can tell a
//! retryable failure from a definitive "not available" answer.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`; adapters are shared as `Arc<dyn _>`.

pub mod cache;
pub mod error;
pub mod platform;
pub mod playback;
pub mod quality;
pub mod resolver;
pub mod stream;
pub mod time;

pub use error::BridgeError;

pub use cache::{CacheManagerFactory, CacheManagerRequest, ChunkedCacheManager};
pub use playback::{AudioEngine, BufferingState, EngineEvent, EngineRequest, PreparedStream};
pub use quality::{Quality, UnknownQuality};
pub use resolver::{ResolvedUrl, TrackResolver, TrialWindow, UrlAvailability};
pub use stream::{StreamFactory, StreamHandle};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
