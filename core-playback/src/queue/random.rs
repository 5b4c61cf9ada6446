//! Replayable shuffle navigation.
//!
//! Random mode keeps a timeline of visited queue indices plus a cursor into
//! it, and a shuffle bag of indices not yet visited in the current lap.
//! Forward moves replay the timeline before drawing anything new, so going
//! back and then forward again reproduces the same sequence. Draws come out
//! of the bag, so no index repeats within a lap.
//!
//! The bag never contains the current index.

use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomState {
    pub timeline: Vec<usize>,
    pub cursor: Option<usize>,
    pub cycle_remaining: Vec<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct RandomNavigator {
    timeline: Vec<usize>,
    cursor: usize,
    cycle_remaining: Vec<usize>,
}

impl RandomNavigator {
    pub(crate) fn reset(&mut self) {
        self.timeline.clear();
        self.cursor = 0;
        self.cycle_remaining.clear();
    }

    /// Restarts history at `current` with a fresh bag.
    pub(crate) fn sync(&mut self, current: Option<usize>, len: usize) {
        self.reset();
        if let Some(index) = current.filter(|&i| i < len) {
            self.timeline.push(index);
            self.refill(index, len);
        }
    }

    fn in_sync(&self, current: Option<usize>, len: usize) -> bool {
        match current {
            Some(index) => {
                self.timeline.get(self.cursor) == Some(&index)
                    && self.timeline.iter().all(|&i| i < len)
            }
            None => self.timeline.is_empty(),
        }
    }

    fn ensure_synced(&mut self, current: Option<usize>, len: usize) {
        if !self.in_sync(current, len) {
            self.sync(current, len);
        }
    }

    fn refill(&mut self, current: usize, len: usize) {
        self.cycle_remaining = (0..len).filter(|&i| i != current).collect();
    }

    fn take_from_bag(&mut self, index: usize) {
        self.cycle_remaining.retain(|&i| i != index);
    }

    fn draw(&mut self, current: usize, len: usize, rng: &mut StdRng) -> Option<usize> {
        if self.cycle_remaining.is_empty() {
            self.refill(current, len);
        }
        if self.cycle_remaining.is_empty() {
            return None;
        }
        let slot = rng.gen_range(0..self.cycle_remaining.len());
        Some(self.cycle_remaining.swap_remove(slot))
    }

    /// Records a jump that did not come from this navigator (manual pick,
    /// reconciliation). Forward history past the cursor is discarded.
    pub(crate) fn visit(&mut self, index: usize, len: usize) {
        if self.timeline.is_empty() {
            self.sync(Some(index), len);
            return;
        }
        if self.timeline.get(self.cursor) == Some(&index) {
            return;
        }
        self.timeline.truncate(self.cursor + 1);
        self.timeline.push(index);
        self.cursor = self.timeline.len() - 1;
        self.take_from_bag(index);
    }

    pub(crate) fn next(&mut self, current: usize, len: usize, rng: &mut StdRng) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if len == 1 {
            return Some(0);
        }
        self.ensure_synced(Some(current), len);

        if self.cursor + 1 < self.timeline.len() {
            self.cursor += 1;
            let index = self.timeline[self.cursor];
            self.take_from_bag(index);
            return Some(index);
        }

        let index = self.draw(current, len, rng)?;
        self.timeline.push(index);
        self.cursor = self.timeline.len() - 1;
        Some(index)
    }

    /// Steps back through history. At the start of history a new index is
    /// drawn and prepended only when `allow_expand` is set.
    pub(crate) fn previous(
        &mut self,
        current: usize,
        len: usize,
        rng: &mut StdRng,
        allow_expand: bool,
    ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        self.ensure_synced(Some(current), len);

        if self.cursor > 0 {
            self.cursor -= 1;
            let index = self.timeline[self.cursor];
            self.take_from_bag(index);
            return Some(index);
        }

        if !allow_expand || len == 1 {
            return None;
        }

        let index = self.draw(current, len, rng)?;
        self.timeline.insert(0, index);
        self.cursor = 0;
        Some(index)
    }

    /// Index a `next` call would land on, without consuming the bag.
    pub(crate) fn peek_next(&self, current: usize, len: usize, rng: &mut StdRng) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if len == 1 {
            return Some(0);
        }
        if self.in_sync(Some(current), len) && self.cursor + 1 < self.timeline.len() {
            return Some(self.timeline[self.cursor + 1]);
        }
        let pool: Vec<usize> = if self.in_sync(Some(current), len) && !self.cycle_remaining.is_empty() {
            self.cycle_remaining.clone()
        } else {
            (0..len).filter(|&i| i != current).collect()
        };
        let slot = rng.gen_range(0..pool.len());
        Some(pool[slot])
    }

    pub(crate) fn state(&self) -> RandomState {
        RandomState {
            timeline: self.timeline.clone(),
            cursor: (!self.timeline.is_empty()).then_some(self.cursor),
            cycle_remaining: self.cycle_remaining.clone(),
        }
    }
}
