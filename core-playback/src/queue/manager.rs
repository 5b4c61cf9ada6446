//! The queue model.
//!
//! One coarse lock guards the whole state: the primary queue, the one-shot
//! injection chain, the pending injection and the shuffle history. Every
//! public method takes the lock once, so callers only ever observe complete
//! updates, and reads hand out copies.

use super::random::{RandomNavigator, RandomState};
use super::types::{MoveResult, PlayMode, PlaybackRoute, QueueSnapshot, SelectionResult};
use crate::track::SharedTrack;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct PendingInjection {
    track: SharedTrack,
    source: String,
}

struct QueueState {
    queue: Vec<SharedTrack>,
    queue_index: Option<usize>,
    queue_source: String,
    injection_chain: Vec<SharedTrack>,
    injection_index: Option<usize>,
    injection_sources: HashMap<String, String>,
    pending: Option<PendingInjection>,
    random: RandomNavigator,
    rng: StdRng,
}

/// Playback queue with injection support and replayable shuffle.
pub struct QueueManager {
    state: Mutex<QueueState>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic shuffle, for tests and reproducible sessions.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: Vec::new(),
                queue_index: None,
                queue_source: String::new(),
                injection_chain: Vec::new(),
                injection_index: None,
                injection_sources: HashMap::new(),
                pending: None,
                random: RandomNavigator::default(),
                rng,
            }),
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Handles a user picking `track` from a list view.
    ///
    /// - found in `view`: the queue is rebuilt from the view at that position
    /// - found in the current queue: jump there and drop the injection chain
    /// - otherwise: play it as a one-off injection
    pub fn manual_select(
        &self,
        track: &SharedTrack,
        view: &[SharedTrack],
        view_source: &str,
    ) -> SelectionResult {
        let mut state = self.state.lock();

        if let Some(index) = find_index(view, track.id()) {
            state.rebuild_from_view(view, view_source, index);
            let index = state.queue_index.unwrap_or(0);
            debug!(track_id = track.id(), index, source = view_source, "queue rebuilt from view");
            return SelectionResult::for_queue(track.clone(), index, true, true);
        }

        if let Some(index) = find_index(&state.queue, track.id()) {
            state.queue_index = Some(index);
            let len = state.queue.len();
            state.random.visit(index, len);
            let cleared = state.clear_injection();
            debug!(track_id = track.id(), index, "jumped within queue");
            return SelectionResult::for_queue(track.clone(), index, false, cleared);
        }

        let injection_index = state.append_injection(track.clone(), view_source);
        debug!(track_id = track.id(), injection_index, "selection played as injection");
        SelectionResult::for_injection(track.clone(), injection_index)
    }

    /// Replaces the queue with `view`, positioned at `index`.
    pub fn rebuild_queue_from_view(&self, view: &[SharedTrack], view_source: &str, index: usize) {
        self.state.lock().rebuild_from_view(view, view_source, index);
    }

    /// Stages a track for the next advance only. `None` clears it.
    pub fn set_pending_injection(&self, track: Option<SharedTrack>, source: &str) {
        let mut state = self.state.lock();
        state.pending = track.map(|track| PendingInjection {
            track,
            source: source.to_string(),
        });
    }

    pub fn has_pending_injection(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    pub fn pending_injection(&self) -> Option<SharedTrack> {
        self.state.lock().pending.as_ref().map(|p| p.track.clone())
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Advances: pending injection, then the injection chain, then the queue.
    ///
    /// Sequential mode stops at the end of the queue. Loop mode wraps to the
    /// start for manual and automatic advances alike: a manual "next" past
    /// the last track lands on the first one. Only [`move_previous`] refuses
    /// a manual wrap.
    ///
    /// [`move_previous`]: Self::move_previous
    pub fn move_next(&self, mode: PlayMode, is_manual: bool, view_source: &str) -> MoveResult {
        let mut state = self.state.lock();

        if let Some(pending) = state.pending.take() {
            let source = if pending.source.is_empty() {
                view_source
            } else {
                pending.source.as_str()
            };
            let index = state.append_injection(pending.track.clone(), source);
            debug!(track_id = pending.track.id(), index, "consumed pending injection");
            return MoveResult::for_injection(pending.track, index, PlaybackRoute::PendingInjection);
        }

        if let Some(current) = state.injection_index {
            let next = current + 1;
            if let Some(track) = state.injection_chain.get(next).cloned() {
                state.injection_index = Some(next);
                return MoveResult::for_injection(track, next, PlaybackRoute::Injection);
            }
            // chain exhausted, fall through to the queue
            state.clear_injection();
        }

        if state.queue.is_empty() {
            return MoveResult::boundary(true);
        }

        let Some(current) = state.queue_index else {
            state.queue_index = Some(0);
            let len = state.queue.len();
            state.random.sync(Some(0), len);
            return MoveResult::for_queue(state.queue[0].clone(), 0, false, false);
        };

        let len = state.queue.len();
        let (next, wrapped) = match mode {
            PlayMode::Sequential => {
                if current + 1 >= len {
                    debug!(index = current, "sequential queue reached its end");
                    return MoveResult::boundary(false);
                }
                (current + 1, false)
            }
            PlayMode::Loop | PlayMode::LoopOne => {
                if current + 1 >= len {
                    (0, true)
                } else {
                    (current + 1, false)
                }
            }
            PlayMode::Random => {
                let QueueState { random, rng, .. } = &mut *state;
                match random.next(current, len, rng) {
                    Some(index) => (index, false),
                    None => return MoveResult::boundary(false),
                }
            }
        };

        state.queue_index = Some(next);
        if mode != PlayMode::Random {
            state.random.visit(next, len);
        }
        trace!(
            from = current,
            to = next,
            wrapped,
            manual = is_manual,
            mode = mode.as_str(),
            "queue advanced"
        );
        MoveResult::for_queue(state.queue[next].clone(), next, wrapped, false)
    }

    /// Steps back: through the injection chain first, then back onto the
    /// saved queue slot, then through the queue.
    ///
    /// Loop mode refuses to wrap on manual presses. Random mode only invents
    /// new history on manual presses.
    pub fn move_previous(&self, mode: PlayMode, is_manual: bool, _view_source: &str) -> MoveResult {
        let mut state = self.state.lock();

        if let Some(current) = state.injection_index {
            if current > 0 {
                let prev = current - 1;
                if let Some(track) = state.injection_chain.get(prev).cloned() {
                    state.injection_index = Some(prev);
                    return MoveResult::for_injection(track, prev, PlaybackRoute::Injection);
                }
            }

            state.clear_injection();
            if let Some(index) = state.queue_index {
                if let Some(track) = state.queue.get(index).cloned() {
                    return MoveResult::return_to_queue(track, index);
                }
            }
            return MoveResult::boundary(state.queue.is_empty());
        }

        if state.queue.is_empty() {
            return MoveResult::boundary(true);
        }

        let current = *state.queue_index.get_or_insert(0);
        let len = state.queue.len();

        let (prev, wrapped) = match mode {
            PlayMode::Sequential => {
                if current == 0 {
                    return MoveResult::boundary(false);
                }
                (current - 1, false)
            }
            PlayMode::Loop | PlayMode::LoopOne => {
                if current == 0 {
                    if is_manual {
                        return MoveResult::boundary(false);
                    }
                    (len - 1, true)
                } else {
                    (current - 1, false)
                }
            }
            PlayMode::Random => {
                let QueueState { random, rng, .. } = &mut *state;
                match random.previous(current, len, rng, is_manual) {
                    Some(index) => (index, false),
                    None => return MoveResult::boundary(false),
                }
            }
        };

        state.queue_index = Some(prev);
        if mode != PlayMode::Random {
            state.random.visit(prev, len);
        }
        MoveResult::for_queue(state.queue[prev].clone(), prev, wrapped, false)
    }

    // ========================================================================
    // Prediction
    // ========================================================================

    /// Read-only preview of the next track. Random previews sample and are
    /// not guaranteed to match the eventual `move_next`.
    pub fn predict_next(&self, mode: PlayMode) -> Option<SharedTrack> {
        let mut state = self.state.lock();
        if let Some(track) = state.next_injected() {
            return Some(track);
        }
        state.predict_from_queue(mode)
    }

    /// Preview that only looks at the queue, ignoring injections.
    pub fn predict_from_queue(&self, mode: PlayMode) -> Option<SharedTrack> {
        self.state.lock().predict_from_queue(mode)
    }

    /// Like [`predict_next`](Self::predict_next), but walks past tracks the
    /// service confirmed as missing.
    ///
    /// Tracks that are merely flagged unavailable are still returned so a
    /// higher layer can try to recover them. The walk stops after
    /// `max_attempts` slots or when it comes back around to the start.
    pub fn predict_next_available(&self, mode: PlayMode, max_attempts: usize) -> Option<SharedTrack> {
        let mut state = self.state.lock();
        if let Some(track) = state.next_injected() {
            return Some(track);
        }
        if state.queue.is_empty() {
            return None;
        }
        if mode == PlayMode::Random {
            return state.predict_from_queue(mode);
        }

        let len = state.queue.len();
        let start = state.queue_index;
        let mut checked = start;
        let mut attempts = 0;

        while attempts < max_attempts && attempts < len {
            attempts += 1;

            let next = match checked {
                None => 0,
                Some(i) if i + 1 < len => i + 1,
                Some(_) if mode == PlayMode::Sequential => return None,
                Some(_) => 0,
            };

            if Some(next) == start {
                trace!("prediction walked back to the start index");
                break;
            }

            let track = &state.queue[next];
            if track.is_confirmed_missing() {
                debug!(track_id = track.id(), index = next, "skipping confirmed-missing track");
                checked = Some(next);
                continue;
            }
            return Some(track.clone());
        }

        debug!(attempts, "no available track ahead");
        None
    }

    /// Reconciles the model with the track that actually started playing.
    ///
    /// Checked in order: the pending injection, the next injection slot, the
    /// current injection slot, the queue. Anything else becomes a new
    /// injection entry.
    pub fn advance_for_playback(&self, actual: &SharedTrack, view_source: &str) -> MoveResult {
        let mut state = self.state.lock();
        let id = actual.id();

        if state.pending.as_ref().is_some_and(|p| p.track.id() == id) {
            state.pending = None;
            let index = state.append_injection(actual.clone(), view_source);
            return MoveResult::for_injection(actual.clone(), index, PlaybackRoute::PendingInjection);
        }

        if let Some(current) = state.injection_index {
            let next = current + 1;
            if state.injection_chain.get(next).is_some_and(|t| t.id() == id) {
                state.injection_index = Some(next);
                state.set_injection_source(id, view_source);
                return MoveResult::for_injection(actual.clone(), next, PlaybackRoute::Injection);
            }
            if state.injection_chain.get(current).is_some_and(|t| t.id() == id) {
                state.set_injection_source(id, view_source);
                return MoveResult::for_injection(actual.clone(), current, PlaybackRoute::Injection);
            }
            state.clear_injection();
        }

        if let Some(index) = find_index(&state.queue, id) {
            state.queue_index = Some(index);
            let len = state.queue.len();
            state.random.visit(index, len);
            return MoveResult::for_queue(actual.clone(), index, false, false);
        }

        let index = state.append_injection(actual.clone(), view_source);
        debug!(track_id = id, index, "unexpected track recorded as injection");
        MoveResult::for_injection(actual.clone(), index, PlaybackRoute::Injection)
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Purges every occurrence of `id`. Returns whether anything was removed.
    ///
    /// Shuffle history is restarted because indices have shifted.
    pub fn remove_track_by_id(&self, id: &str) -> bool {
        if id.trim().is_empty() {
            return false;
        }

        let mut state = self.state.lock();
        let mut removed = false;

        if state.pending.as_ref().is_some_and(|p| p.track.id() == id) {
            state.pending = None;
            removed = true;
        }

        let before = state.injection_chain.len();
        state.injection_chain.retain(|t| t.id() != id);
        state.injection_sources.remove(id);
        if state.injection_chain.len() != before {
            state.clear_injection();
            removed = true;
        }

        let mut index = 0;
        while index < state.queue.len() {
            if state.queue[index].id() == id {
                state.queue.remove(index);
                removed = true;
                state.queue_index = match state.queue_index {
                    Some(current) if current >= index => current.checked_sub(1),
                    other => other,
                };
            } else {
                index += 1;
            }
        }

        if state.queue.is_empty() {
            state.queue_index = None;
            state.queue_source.clear();
        } else {
            let last = state.queue.len() - 1;
            state.queue_index = Some(state.queue_index.unwrap_or(0).min(last));
        }

        if removed {
            let (current, len) = (state.queue_index, state.queue.len());
            state.random.sync(current, len);
            debug!(track_id = id, queue_index = ?current, "track removed from queue model");
        }
        removed
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn capture_snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            queue: state.queue.clone(),
            queue_index: state.queue_index,
            queue_source: state.queue_source.clone(),
            injection_chain: state.injection_chain.clone(),
            injection_index: state.injection_index,
            injection_sources: state.injection_sources.clone(),
            pending_injection: state.pending.as_ref().map(|p| p.track.clone()),
        }
    }

    pub fn queue_source(&self) -> String {
        self.state.lock().queue_source.clone()
    }

    pub fn queue_index(&self) -> Option<usize> {
        self.state.lock().queue_index
    }

    pub fn current_queue(&self) -> Vec<SharedTrack> {
        self.state.lock().queue.clone()
    }

    pub fn injection_chain(&self) -> Vec<SharedTrack> {
        self.state.lock().injection_chain.clone()
    }

    pub fn injection_source(&self, id: &str) -> Option<String> {
        self.state.lock().injection_sources.get(id).cloned()
    }

    pub fn is_in_injection(&self) -> bool {
        let state = self.state.lock();
        matches!(state.injection_index, Some(i) if i < state.injection_chain.len())
    }

    /// Shuffle history, for diagnostics.
    pub fn random_state(&self) -> RandomState {
        self.state.lock().random.state()
    }
}

impl QueueState {
    fn rebuild_from_view(&mut self, view: &[SharedTrack], view_source: &str, index: usize) {
        self.queue = view.to_vec();
        self.queue_source = view_source.to_string();
        self.queue_index = if self.queue.is_empty() {
            None
        } else {
            Some(index.min(self.queue.len() - 1))
        };
        self.clear_injection();
        let (current, len) = (self.queue_index, self.queue.len());
        self.random.sync(current, len);
    }

    /// Appends to the chain. When already inside the chain, everything after
    /// the current slot is dropped first; otherwise the chain starts over.
    fn append_injection(&mut self, track: SharedTrack, source: &str) -> usize {
        match self.injection_index {
            Some(current) => {
                for dropped in self.injection_chain.split_off(current + 1) {
                    self.injection_sources.remove(dropped.id());
                }
            }
            None => {
                self.injection_chain.clear();
                self.injection_sources.clear();
            }
        }

        let id = track.id().to_string();
        self.injection_chain.push(track);
        let index = self.injection_chain.len() - 1;
        self.injection_index = Some(index);
        self.set_injection_source(&id, source);
        index
    }

    fn set_injection_source(&mut self, id: &str, source: &str) {
        if !id.is_empty() {
            self.injection_sources.insert(id.to_string(), source.to_string());
        }
    }

    fn clear_injection(&mut self) -> bool {
        if self.injection_chain.is_empty()
            && self.injection_index.is_none()
            && self.injection_sources.is_empty()
        {
            return false;
        }
        self.injection_chain.clear();
        self.injection_index = None;
        self.injection_sources.clear();
        true
    }

    fn next_injected(&self) -> Option<SharedTrack> {
        if let Some(pending) = &self.pending {
            return Some(pending.track.clone());
        }
        self.injection_index
            .and_then(|i| self.injection_chain.get(i + 1))
            .cloned()
    }

    fn predict_from_queue(&mut self, mode: PlayMode) -> Option<SharedTrack> {
        let len = self.queue.len();
        if len == 0 {
            return None;
        }

        let next = match (mode, self.queue_index) {
            (_, None) => 0,
            (PlayMode::Sequential, Some(i)) => {
                if i + 1 >= len {
                    return None;
                }
                i + 1
            }
            (PlayMode::Loop | PlayMode::LoopOne, Some(i)) => (i + 1) % len,
            (PlayMode::Random, Some(i)) => {
                let QueueState { random, rng, .. } = self;
                random.peek_next(i, len, rng)?
            }
        };
        self.queue.get(next).cloned()
    }
}

fn find_index(list: &[SharedTrack], id: &str) -> Option<usize> {
    if id.is_empty() {
        return None;
    }
    list.iter().position(|t| t.id() == id)
}
