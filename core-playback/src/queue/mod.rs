//! # Playback Queue Model
//!
//! Ordered queue, one-shot injection chain and shuffle navigation.

mod manager;
mod random;
mod types;

pub use manager::QueueManager;
pub use random::RandomState;
pub use types::{MoveResult, PlayMode, PlaybackRoute, QueueSnapshot, SelectionResult};
