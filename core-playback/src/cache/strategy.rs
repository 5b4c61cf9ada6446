//! Preload candidate selection.
//!
//! Each play mode has a [`PreloadStrategy`] that ranks the tracks worth
//! preparing ahead of time. Strategies work on a copied-out
//! [`PreloadContext`] and never touch the queue manager directly.

use crate::queue::{PlayMode, QueueSnapshot, RandomState};
use crate::track::SharedTrack;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;

/// Score given to the track a plain "next" would reach through injection.
pub const INJECTED_NEXT_SCORE: u32 = 95;

/// Score of a random-mode track already fixed by the replay timeline.
pub const REPLAY_NEXT_SCORE: u32 = 90;

const MIN_SCORE: u32 = 30;

/// Everything a strategy needs to rank candidates.
#[derive(Debug, Clone, Default)]
pub struct PreloadContext {
    pub snapshot: QueueSnapshot,
    pub current_track_id: Option<String>,
    pub play_mode: PlayMode,
    pub queue_index: Option<usize>,
    pub queue_source: String,
    /// Shuffle timeline and bag; only read in random mode.
    pub random: RandomState,
}

impl PreloadContext {
    pub fn from_snapshot(snapshot: QueueSnapshot, play_mode: PlayMode) -> Self {
        let current_track_id = snapshot.current_track().map(|t| t.id().to_string());
        Self {
            current_track_id,
            play_mode,
            queue_index: snapshot.queue_index,
            queue_source: snapshot.queue_source.clone(),
            snapshot,
            random: RandomState::default(),
        }
    }

    pub fn with_random_state(mut self, random: RandomState) -> Self {
        self.random = random;
        self
    }

    /// The random state, if it still describes the snapshot's position.
    fn synced_random(&self) -> Option<&RandomState> {
        let cursor = self.random.cursor?;
        let len = self.snapshot.queue.len();
        let in_range = self
            .random
            .timeline
            .iter()
            .chain(self.random.cycle_remaining.iter())
            .all(|&i| i < len);
        let at_current = self.random.timeline.get(cursor).copied() == self.queue_index;
        (in_range && at_current).then_some(&self.random)
    }

    fn is_current(&self, track: &SharedTrack) -> bool {
        self.current_track_id.as_deref() == Some(track.id())
    }
}

/// A ranked preload target.
#[derive(Debug, Clone)]
pub struct PreloadCandidate {
    pub track: SharedTrack,
    /// 0..=100; higher means sooner.
    pub score: u32,
    pub reason: String,
}

impl PreloadCandidate {
    pub fn new(track: SharedTrack, score: u32, reason: impl Into<String>) -> Self {
        Self {
            track,
            score,
            reason: reason.into(),
        }
    }

    pub fn track_id(&self) -> &str {
        self.track.id()
    }
}

/// Ranks preload candidates for one play mode.
pub trait PreloadStrategy: Send + Sync {
    fn mode(&self) -> PlayMode;

    /// At most `limit` candidates, best first, without duplicates and
    /// without the current track.
    fn select_candidates(&self, context: &PreloadContext, limit: usize) -> Vec<PreloadCandidate>;
}

/// Collects candidates while enforcing uniqueness and the cap.
struct CandidateList {
    limit: usize,
    seen: HashSet<String>,
    items: Vec<PreloadCandidate>,
}

impl CandidateList {
    fn new(context: &PreloadContext, limit: usize) -> Self {
        let mut seen = HashSet::new();
        if let Some(current) = &context.current_track_id {
            seen.insert(current.clone());
        }
        Self {
            limit,
            seen,
            items: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.limit
    }

    fn push(&mut self, candidate: PreloadCandidate) -> bool {
        if self.is_full() || !self.seen.insert(candidate.track_id().to_string()) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    fn push_injected(&mut self, context: &PreloadContext) {
        if let Some(next) = context.snapshot.next_injected() {
            if !context.is_current(next) {
                self.push(PreloadCandidate::new(
                    next.clone(),
                    INJECTED_NEXT_SCORE,
                    "InjectedNext",
                ));
            }
        }
    }

    fn into_vec(self) -> Vec<PreloadCandidate> {
        self.items
    }
}

fn ordered_score(position: usize) -> u32 {
    90u32.saturating_sub(position as u32 * 20).max(MIN_SCORE)
}

fn random_score(position: usize) -> u32 {
    80u32.saturating_sub(position as u32 * 10).max(MIN_SCORE)
}

fn first_queue_slot(context: &PreloadContext) -> usize {
    context.queue_index.map(|i| i + 1).unwrap_or(0)
}

/// Next tracks in queue order, no wrap.
#[derive(Debug, Default)]
pub struct SequentialStrategy;

impl PreloadStrategy for SequentialStrategy {
    fn mode(&self) -> PlayMode {
        PlayMode::Sequential
    }

    fn select_candidates(&self, context: &PreloadContext, limit: usize) -> Vec<PreloadCandidate> {
        let mut list = CandidateList::new(context, limit);
        list.push_injected(context);

        let queue = &context.snapshot.queue;
        let mut position = 0;
        for track in queue.iter().skip(first_queue_slot(context)) {
            if list.is_full() {
                break;
            }
            let reason = if position == 0 {
                "NextInSequence".to_string()
            } else {
                format!("SequencePosition{}", position)
            };
            if list.push(PreloadCandidate::new(track.clone(), ordered_score(position), reason)) {
                position += 1;
            }
        }

        list.into_vec()
    }
}

/// Next tracks in queue order, wrapping past the end.
#[derive(Debug, Default)]
pub struct LoopStrategy;

impl PreloadStrategy for LoopStrategy {
    fn mode(&self) -> PlayMode {
        PlayMode::Loop
    }

    fn select_candidates(&self, context: &PreloadContext, limit: usize) -> Vec<PreloadCandidate> {
        let mut list = CandidateList::new(context, limit);
        list.push_injected(context);

        let queue = &context.snapshot.queue;
        if queue.is_empty() {
            return list.into_vec();
        }

        let start = first_queue_slot(context);
        let mut position = 0;
        for offset in 0..queue.len() {
            if list.is_full() {
                break;
            }
            let raw = start + offset;
            let wrapped = raw >= queue.len();
            let track = &queue[raw % queue.len()];
            let mut reason = if position == 0 {
                "NextInLoop".to_string()
            } else {
                format!("LoopPosition{}", position)
            };
            if wrapped {
                reason.push_str("_Wrapped");
            }
            if list.push(PreloadCandidate::new(track.clone(), ordered_score(position), reason)) {
                position += 1;
            }
        }

        list.into_vec()
    }
}

/// The same track repeats; nothing to prepare.
#[derive(Debug, Default)]
pub struct LoopOneStrategy;

impl PreloadStrategy for LoopOneStrategy {
    fn mode(&self) -> PlayMode {
        PlayMode::LoopOne
    }

    fn select_candidates(&self, _context: &PreloadContext, _limit: usize) -> Vec<PreloadCandidate> {
        Vec::new()
    }
}

/// Random picks from the queue. Indices the replay timeline already fixes
/// come first. The rest are drawn from the shuffle bag, since `move_next`
/// can only reach those; the real draw happens only when the queue moves,
/// so this spreads the bet over several tracks.
pub struct RandomStrategy {
    rng: Mutex<StdRng>,
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RandomStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RandomStrategy")
    }
}

impl PreloadStrategy for RandomStrategy {
    fn mode(&self) -> PlayMode {
        PlayMode::Random
    }

    fn select_candidates(&self, context: &PreloadContext, limit: usize) -> Vec<PreloadCandidate> {
        let mut list = CandidateList::new(context, limit);
        list.push_injected(context);

        let queue = &context.snapshot.queue;
        let random = context.synced_random();

        if let Some(state) = random {
            let upcoming = state.cursor.map(|c| c + 1).unwrap_or(0);
            for (step, &index) in state.timeline.iter().skip(upcoming).enumerate() {
                if list.is_full() {
                    break;
                }
                list.push(PreloadCandidate::new(
                    queue[index].clone(),
                    REPLAY_NEXT_SCORE.saturating_sub(step as u32 * 10),
                    format!("ReplayNext{}", step + 1),
                ));
            }
        }

        let mut pool: Vec<usize> = match random {
            Some(state) if !state.cycle_remaining.is_empty() => state.cycle_remaining.clone(),
            _ => (0..queue.len())
                .filter(|i| Some(*i) != context.queue_index)
                .collect(),
        };
        pool.shuffle(&mut *self.rng.lock());

        let mut drawn = 0;
        for index in pool {
            if list.is_full() {
                break;
            }
            let candidate = PreloadCandidate::new(
                queue[index].clone(),
                random_score(drawn),
                format!("RandomCandidate{}", drawn + 1),
            );
            if list.push(candidate) {
                drawn += 1;
            }
        }

        list.into_vec()
    }
}

/// One strategy per play mode.
#[derive(Clone)]
pub struct StrategySet {
    sequential: Arc<dyn PreloadStrategy>,
    looping: Arc<dyn PreloadStrategy>,
    loop_one: Arc<dyn PreloadStrategy>,
    random: Arc<dyn PreloadStrategy>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self {
            sequential: Arc::new(SequentialStrategy),
            looping: Arc::new(LoopStrategy),
            loop_one: Arc::new(LoopOneStrategy),
            random: Arc::new(RandomStrategy::new()),
        }
    }

    pub fn with_random(mut self, random: Arc<dyn PreloadStrategy>) -> Self {
        self.random = random;
        self
    }

    pub fn select(&self, mode: PlayMode) -> Arc<dyn PreloadStrategy> {
        match mode {
            PlayMode::Sequential => self.sequential.clone(),
            PlayMode::Loop => self.looping.clone(),
            PlayMode::LoopOne => self.loop_one.clone(),
            PlayMode::Random => self.random.clone(),
        }
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new()
    }
}
