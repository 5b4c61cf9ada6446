//! # Playback Queue & Cache Core
//!
//! Queue navigation, preloading and playback coordination for a streaming
//! player.
//!
//! ## Overview
//!
//! This crate handles:
//! - Queue navigation with injections and history-preserving shuffle
//! - Per-track cache entries with independent quality slots
//! - Candidate selection and background preloading of upcoming tracks
//! - A serialized, preempting command queue over the audio engine
//! - Playback state and seek-aware position tracking
//!
//! ## Architecture
//!
//! ```text
//!  host UI ──> CommandQueue ──> EngineOrchestrator ──> AudioEngine (host)
//!                                     │    ▲
//!                          PlaybackEvent   └── PrefetchPipeline::try_get
//!                                     ▼
//!                  EventBus ──> CacheCoordinator ──> PrefetchPipeline
//!                                     │                  │
//!                                QueueManager      TrackResolver,
//!                                                  CacheManagerFactory,
//!                                                  StreamFactory (host)
//! ```

pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod position;
pub mod prefetch;
pub mod queue;
pub mod resolve;
pub mod state_machine;
pub mod track;
pub mod traits;

pub use cache::{
    CacheCoordinator, CacheEntry, CachePriority, CacheStatus, CoordinatorStats, PreloadCandidate,
    PreloadContext, PreloadStrategy, QualityCacheData, RefreshReport, StrategySet,
};
pub use command::{
    CommandKind, CommandQueue, CommandResult, CommandState, CommandStateChanged,
    NavigationHandler, PlaybackCommand,
};
pub use config::PlaybackConfig;
pub use error::{PlaybackError, Result};
pub use orchestrator::EngineOrchestrator;
pub use position::PositionCoordinator;
pub use prefetch::{PrefetchOutcome, PrefetchPipeline, PrefetchRequest, PreloadedBundle};
pub use queue::{
    MoveResult, PlayMode, PlaybackRoute, QueueManager, QueueSnapshot, RandomState,
    SelectionResult,
};
pub use resolve::ResolveOutcome;
pub use state_machine::{PlaybackState, PlaybackStateMachine, StateTransition};
pub use track::{Availability, SharedTrack, Track};
pub use traits::PlaybackControl;
