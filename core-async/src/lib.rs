//! Async runtime facade for the stream queue core.
//!
//! Every other crate in the workspace reaches tokio through this crate so the
//! runtime choice lives in one place. On top of the plain re-exports it adds
//! the cancellation helpers the playback core relies on: every long operation
//! runs inside a [`CancellationToken`] scope that can be derived from a parent
//! and cancelled independently.
//!
//! # Modules
//!
//! - `task`: task spawning and join handles
//! - `time`: sleep, timeout, interval
//! - `sync`: locks, channels, semaphores and cancellation tokens
//! - `cancel`: helpers for racing futures against a token
//!
//! # Examples
//!
//! ```rust
//! use core_async::cancel::run_until_cancelled;
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let token = CancellationToken::new();
//!     let child = token.child_token();
//!     token.cancel();
//!
//!     let outcome = run_until_cancelled(&child, sleep(Duration::from_secs(5))).await;
//!     assert!(outcome.is_err());
//! }
//! ```

pub mod cancel;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use cancel::{run_until_cancelled, CancellationSlot, Cancelled, Scope};
pub use sync::CancellationToken;
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
