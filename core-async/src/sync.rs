//! Synchronization primitives.
//!
//! Async-aware locks and channels come from `tokio::sync`; the cancellation
//! token comes from `tokio-util`. Short critical sections that never cross an
//! `.await` should use `parking_lot` in the calling crate instead.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Semaphore};
//!
//! async fn example() {
//!     let gate = Semaphore::new(1);
//!     let _permit = gate.acquire().await.unwrap();
//!
//!     let parent = CancellationToken::new();
//!     let scope = parent.child_token();
//!     parent.cancel();
//!     assert!(scope.is_cancelled());
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    Semaphore, SemaphorePermit, TryAcquireError,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
