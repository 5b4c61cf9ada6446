//! Cancellation scopes.
//!
//! A superseding operation must cancel its predecessor before it starts, and
//! the cancelled path must observe that at every suspension point. These
//! helpers make that pattern short to write:
//!
//! - [`run_until_cancelled`] races a future against a token.
//! - [`CancellationSlot`] holds the scope of the one operation that is
//!   currently allowed to run and hands out a fresh child scope for the next
//!   one, cancelling the old scope first.

use crate::sync::CancellationToken;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;

/// Marker error returned when a scope was cancelled before the work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Drives `future` until it completes or `token` is cancelled.
///
/// Cancellation wins ties: a token that is already cancelled never polls the
/// future.
pub async fn run_until_cancelled<F>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    if token.is_cancelled() {
        return Err(Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled),
        output = future => Ok(output),
    }
}

/// Returns `Err(Cancelled)` if the token has been cancelled.
pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// A cancellation scope issued by a [`CancellationSlot`].
#[derive(Debug, Clone)]
pub struct Scope {
    token: CancellationToken,
    generation: u64,
}

impl Scope {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Default)]
struct SlotState {
    active: Option<Scope>,
    next_generation: u64,
}

/// Single-occupancy cancellation holder.
///
/// Each call to [`CancellationSlot::replace`] cancels the previously issued
/// scope and returns a new one derived from `parent`. The new scope is then
/// cancelled by the next `replace`, by [`CancellationSlot::cancel`], or by
/// the parent.
#[derive(Default)]
pub struct CancellationSlot {
    state: Mutex<SlotState>,
}

impl CancellationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the active scope (if any) and installs a child of `parent`.
    pub fn replace(&self, parent: &CancellationToken) -> Scope {
        let (next, previous) = {
            let mut state = self.state.lock();
            state.next_generation += 1;
            let next = Scope {
                token: parent.child_token(),
                generation: state.next_generation,
            };
            let previous = state.active.replace(next.clone());
            (next, previous)
        };
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        next
    }

    /// Cancels the active scope and leaves the slot empty.
    pub fn cancel(&self) {
        let previous = self.state.lock().active.take();
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    /// Token of the active scope, if one is installed.
    pub fn current(&self) -> Option<CancellationToken> {
        self.state.lock().active.as_ref().map(|s| s.token.clone())
    }

    /// Clears the slot only if it still holds `scope`.
    ///
    /// An operation that finished normally calls this so it does not clobber
    /// a newer scope installed while it was running.
    pub fn release(&self, scope: &Scope) -> bool {
        let mut state = self.state.lock();
        let owns = state
            .active
            .as_ref()
            .map(|active| active.generation == scope.generation)
            .unwrap_or(false);
        if owns {
            state.active = None;
        }
        owns
    }

    /// Whether `scope` is still the one installed in the slot.
    pub fn is_current(&self, scope: &Scope) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|active| active.generation == scope.generation)
            .unwrap_or(false)
    }
}

impl fmt::Debug for CancellationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CancellationSlot")
            .field("generation", &state.active.as_ref().map(|s| s.generation))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn replace_cancels_previous_scope() {
        let root = CancellationToken::new();
        let slot = CancellationSlot::new();

        let first = slot.replace(&root);
        let second = slot.replace(&root);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(slot.is_current(&second));
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_scope() {
        let root = CancellationToken::new();
        let slot = CancellationSlot::new();
        let scope = slot.replace(&root);

        root.cancel();
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn release_ignores_stale_scope() {
        let root = CancellationToken::new();
        let slot = CancellationSlot::new();
        let stale = slot.replace(&root);
        let fresh = slot.replace(&root);

        assert!(!slot.release(&stale));
        assert!(slot.current().is_some());
        assert!(slot.release(&fresh));
        assert!(slot.current().is_none());
    }

    #[tokio::test]
    async fn run_until_cancelled_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_until_cancelled(&token, async { 7 }).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn run_until_cancelled_interrupts_pending_work() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = run_until_cancelled(&token, tokio::time::sleep(Duration::from_secs(30))).await;
        assert_eq!(result, Err(Cancelled));
    }
}
