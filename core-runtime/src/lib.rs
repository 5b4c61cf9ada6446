//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the stream queue crates:
//! - Logging and tracing bootstrap
//! - Typed event bus for playback, cache and command signals
//!
//! ## Overview
//!
//! Components never call each other through callbacks registered on one
//! another. Anything that needs to react to playback lifecycle changes
//! subscribes to the [`EventBus`](events::EventBus) instead, which keeps
//! observers off the emitter's call stack.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
