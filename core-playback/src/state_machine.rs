//! Playback lifecycle state machine.
//!
//! Transitions are checked against a fixed table. Observers are notified
//! over a broadcast channel after the lock is released, so a subscriber that
//! reacts by calling back into the machine cannot deadlock it.

use core_async::runtime::Handle;
use core_async::sync::broadcast;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const TRANSITION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Buffering,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "Idle",
            PlaybackState::Loading => "Loading",
            PlaybackState::Buffering => "Buffering",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Stopped => "Stopped",
        }
    }

    /// Parses the names produced by [`as_str`](Self::as_str).
    pub fn from_name(name: &str) -> Option<Self> {
        [
            PlaybackState::Idle,
            PlaybackState::Loading,
            PlaybackState::Buffering,
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Stopped,
        ]
        .into_iter()
        .find(|state| state.as_str() == name)
    }

    /// States reachable from `self` through `transition_to`.
    pub fn allowed_targets(&self) -> &'static [PlaybackState] {
        use PlaybackState::*;
        match self {
            Idle => &[Loading],
            Loading => &[Buffering, Playing, Idle, Stopped],
            Buffering => &[Playing, Idle, Stopped, Loading],
            Playing => &[Paused, Stopped, Buffering, Idle, Loading],
            Paused => &[Playing, Stopped, Idle, Loading],
            Stopped => &[Idle, Loading],
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: PlaybackState,
    pub to: PlaybackState,
}

pub struct PlaybackStateMachine {
    state: Mutex<PlaybackState>,
    notifier: broadcast::Sender<StateTransition>,
    event_bus: Option<EventBus>,
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackStateMachine {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            state: Mutex::new(PlaybackState::Idle),
            notifier,
            event_bus: None,
        }
    }

    /// Also publish committed transitions as `PlaybackEvent::StateChanged`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn current(&self) -> PlaybackState {
        *self.state.lock()
    }

    pub fn can_transition(&self, target: PlaybackState) -> bool {
        let current = self.current();
        current == target || current.allowed_targets().contains(&target)
    }

    /// Moves to `target` if the table allows it.
    ///
    /// Returns `true` without notifying when already in `target`, and
    /// `false` with the state unchanged when the move is not allowed.
    pub fn transition_to(&self, target: PlaybackState) -> bool {
        let transition = {
            let mut state = self.state.lock();
            let from = *state;
            if from == target {
                return true;
            }
            if !from.allowed_targets().contains(&target) {
                warn!(from = from.as_str(), to = target.as_str(), "rejected state transition");
                return false;
            }
            *state = target;
            StateTransition { from, to: target }
        };

        debug!(from = transition.from.as_str(), to = transition.to.as_str(), "state transition");
        self.notify(transition);
        true
    }

    /// Sets the state without consulting the table. Error recovery only.
    pub fn force_set_state(&self, target: PlaybackState) {
        let from = std::mem::replace(&mut *self.state.lock(), target);
        warn!(from = from.as_str(), to = target.as_str(), "forced state change");
        self.notify(StateTransition { from, to: target });
    }

    /// Returns to `Idle` through the table.
    pub fn reset(&self) -> bool {
        self.transition_to(PlaybackState::Idle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.notifier.subscribe()
    }

    fn notify(&self, transition: StateTransition) {
        // no subscribers is fine
        let _ = self.notifier.send(transition);

        let Some(bus) = self.event_bus.clone() else {
            return;
        };
        let event = CoreEvent::Playback(PlaybackEvent::StateChanged {
            from: transition.from.as_str().to_string(),
            to: transition.to.as_str().to_string(),
        });
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    bus.emit(event).ok();
                });
            }
            Err(_) => {
                bus.emit(event).ok();
            }
        }
    }
}
