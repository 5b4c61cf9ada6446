//! # Track Cache
//!
//! In-memory cache of prepared tracks.
//!
//! - [`entry`]: per-track entry with independent quality slots and a
//!   reference count.
//! - [`strategy`]: per-play-mode candidate ranking.
//! - [`coordinator`]: reacts to playback lifecycle signals, keeps entries
//!   alive while useful and feeds the prefetch pipeline.

pub mod coordinator;
pub mod entry;
pub mod strategy;

pub use coordinator::{CacheCoordinator, CoordinatorStats, RefreshReport};
pub use entry::{
    CacheEntry, CacheEntrySnapshot, CachePriority, CacheStatus, DownloadStatus, QualityCacheData,
    QualityInfo,
};
pub use strategy::{
    LoopOneStrategy, LoopStrategy, PreloadCandidate, PreloadContext, PreloadStrategy,
    RandomStrategy, SequentialStrategy, StrategySet,
};
