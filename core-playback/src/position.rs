//! Seek-aware position reporting.
//!
//! Right after a seek the engine keeps reporting the old position, or zero,
//! for a moment. The coordinator remembers the latest seek request and the
//! latest successful execution and reports the believed position instead of
//! the raw one while those are recent.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_WINDOW: Duration = Duration::from_millis(1200);
const PREVIEW_WINDOW: Duration = Duration::from_millis(350);
const EXECUTE_WINDOW: Duration = Duration::from_millis(1500);
const ENGINE_JUMP_GUARD_SECONDS: f64 = 6.0;
const END_EPSILON_SECONDS: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
struct SeekRequest {
    target: f64,
    at: DateTime<Utc>,
    preview: bool,
    version: u64,
}

#[derive(Debug, Clone, Copy)]
struct SeekExecution {
    target: f64,
    at: DateTime<Utc>,
    success: bool,
    version: u64,
}

#[derive(Debug, Default)]
struct PositionState {
    track_id: Option<String>,
    request: Option<SeekRequest>,
    execution: Option<SeekExecution>,
    next_version: u64,
    last_engine: Option<(f64, DateTime<Utc>)>,
}

pub struct PositionCoordinator {
    clock: Arc<dyn Clock>,
    state: Mutex<PositionState>,
}

impl PositionCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(PositionState::default()),
        }
    }

    /// Clears seek history when the track changes. Same id is a no-op.
    pub fn reset_for_track(&self, track_id: Option<&str>) {
        let mut state = self.state.lock();
        if track_id.is_some() && state.track_id.as_deref() == track_id {
            return;
        }
        *state = PositionState {
            track_id: track_id.map(str::to_string),
            ..PositionState::default()
        };
    }

    pub fn track_id(&self) -> Option<String> {
        self.state.lock().track_id.clone()
    }

    /// Records a seek request and returns its version.
    pub fn on_seek_requested(&self, target_seconds: f64, is_preview: bool) -> u64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.next_version += 1;
        let version = state.next_version;
        state.request = Some(SeekRequest {
            target: target_seconds,
            at: now,
            preview: is_preview,
            version,
        });
        version
    }

    /// Records the outcome of the seek with `version`.
    ///
    /// Results older than the last recorded execution are ignored. A failed
    /// execution keeps the previous successful target.
    pub fn on_seek_executed(&self, target_seconds: f64, success: bool, version: u64) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.execution.is_some_and(|e| e.version > version) {
            return;
        }
        let target = match (success, state.execution) {
            (true, _) => target_seconds,
            (false, Some(previous)) if previous.success => previous.target,
            (false, _) => -1.0,
        };
        state.execution = Some(SeekExecution {
            target,
            at: now,
            success,
            version,
        });
    }

    /// Version of the latest request, if any.
    pub fn latest_request_version(&self) -> Option<u64> {
        self.state.lock().request.map(|r| r.version)
    }

    /// Position a relative seek should start from.
    ///
    /// Prefers a recent request (1.2 s, 0.35 s for scrub previews) or any
    /// request at all when `prefer_seek_target` is set, then a recent
    /// successful execution (1.5 s), then `engine_position`.
    pub fn seek_base_position(
        &self,
        engine_position: f64,
        duration_seconds: f64,
        is_playing: bool,
        prefer_seek_target: bool,
    ) -> f64 {
        let now = self.clock.now();
        let state = self.state.lock();

        let base = match (state.request, recent_execution(&state, now)) {
            (Some(request), _) if prefer_seek_target || is_recent_request(&request, now) => {
                adjust_for_playback(request.target, request.at, now, is_playing)
            }
            (_, Some(execution)) => adjust_for_playback(execution.target, execution.at, now, is_playing),
            _ => engine_position,
        };

        clamp_position(base, duration_seconds)
    }

    /// Position to display.
    ///
    /// Uses the believed position while a seek is recent and the raw value
    /// looks unstable: zero or negative, or at least six seconds away from
    /// what the seek implies.
    pub fn effective_position(
        &self,
        engine_position: f64,
        duration_seconds: f64,
        is_playing: bool,
    ) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let believed = match (state.request, recent_execution(&state, now)) {
            (Some(request), _) if is_recent_request(&request, now) => {
                Some(adjust_for_playback(request.target, request.at, now, is_playing))
            }
            (_, Some(execution)) => Some(adjust_for_playback(
                execution.target,
                execution.at,
                now,
                is_playing,
            )),
            _ => None,
        };

        let position = match believed {
            Some(base) if is_unstable(engine_position, base) => base,
            Some(base) if engine_position <= 0.0 && base > 0.0 => base,
            _ => engine_position,
        };
        let position = clamp_position(position, duration_seconds);

        state.last_engine = Some((position, now));
        position
    }

    /// Last value handed out by [`effective_position`](Self::effective_position).
    pub fn last_reported_position(&self) -> Option<f64> {
        self.state.lock().last_engine.map(|(position, _)| position)
    }
}

fn is_recent_request(request: &SeekRequest, now: DateTime<Utc>) -> bool {
    if request.target < 0.0 {
        return false;
    }
    let window = if request.preview {
        PREVIEW_WINDOW
    } else {
        REQUEST_WINDOW
    };
    elapsed(request.at, now) <= window
}

fn recent_execution(state: &PositionState, now: DateTime<Utc>) -> Option<SeekExecution> {
    state
        .execution
        .filter(|e| e.success && e.target >= 0.0 && elapsed(e.at, now) <= EXECUTE_WINDOW)
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn adjust_for_playback(target: f64, at: DateTime<Utc>, now: DateTime<Utc>, is_playing: bool) -> f64 {
    if is_playing {
        target + elapsed(at, now).as_secs_f64()
    } else {
        target
    }
}

fn is_unstable(engine_position: f64, believed: f64) -> bool {
    if engine_position <= 0.0 || believed <= 0.0 {
        return true;
    }
    (engine_position - believed).abs() >= ENGINE_JUMP_GUARD_SECONDS
}

fn clamp_position(position: f64, duration_seconds: f64) -> f64 {
    if duration_seconds <= 0.0 {
        return position.max(0.0);
    }
    let max_target = (duration_seconds - END_EPSILON_SECONDS).max(0.0);
    position.clamp(0.0, max_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::ManualClock;

    fn coordinator() -> (Arc<ManualClock>, PositionCoordinator) {
        let clock = Arc::new(ManualClock::default());
        let coordinator = PositionCoordinator::new(clock.clone());
        coordinator.reset_for_track(Some("t1"));
        (clock, coordinator)
    }

    #[test]
    fn test_recent_request_wins_and_extrapolates() {
        let (clock, coordinator) = coordinator();
        coordinator.on_seek_requested(60.0, false);
        clock.advance(Duration::from_millis(500));

        let base = coordinator.seek_base_position(12.0, 200.0, true, false);
        assert!((base - 60.5).abs() < 1e-9);

        let paused = coordinator.seek_base_position(12.0, 200.0, false, false);
        assert_eq!(paused, 60.0);
    }

    #[test]
    fn test_preview_window_is_shorter() {
        let (clock, coordinator) = coordinator();
        coordinator.on_seek_requested(30.0, true);
        clock.advance(Duration::from_millis(400));
        assert_eq!(coordinator.seek_base_position(10.0, 200.0, false, false), 10.0);
        assert_eq!(coordinator.seek_base_position(10.0, 200.0, false, true), 30.0);
    }

    #[test]
    fn test_successful_execution_outlives_request() {
        let (clock, coordinator) = coordinator();
        let version = coordinator.on_seek_requested(90.0, false);
        coordinator.on_seek_executed(90.0, true, version);
        clock.advance(Duration::from_millis(1300));
        assert_eq!(coordinator.seek_base_position(0.0, 200.0, false, false), 90.0);

        clock.advance(Duration::from_millis(300));
        assert_eq!(coordinator.seek_base_position(3.0, 200.0, false, false), 3.0);
    }

    #[test]
    fn test_failed_execution_is_not_used() {
        let (clock, coordinator) = coordinator();
        let version = coordinator.on_seek_requested(90.0, false);
        coordinator.on_seek_executed(90.0, false, version);
        clock.advance(Duration::from_millis(1300));
        assert_eq!(coordinator.seek_base_position(4.0, 200.0, false, false), 4.0);
    }

    #[test]
    fn test_effective_position_hides_engine_jumps() {
        let (clock, coordinator) = coordinator();
        coordinator.on_seek_requested(100.0, false);
        clock.advance(Duration::from_millis(200));

        // stale pre-seek position
        assert_eq!(coordinator.effective_position(20.0, 300.0, false), 100.0);
        // engine caught up
        assert_eq!(coordinator.effective_position(101.0, 300.0, false), 101.0);
        // engine reports zero
        assert_eq!(coordinator.effective_position(0.0, 300.0, false), 100.0);
        assert_eq!(coordinator.last_reported_position(), Some(100.0));
    }

    #[test]
    fn test_clamp_to_duration() {
        let (_clock, coordinator) = coordinator();
        coordinator.on_seek_requested(500.0, false);
        let base = coordinator.seek_base_position(0.0, 180.0, false, false);
        assert!((base - 179.95).abs() < 1e-9);
        assert_eq!(coordinator.effective_position(-3.0, 0.0, false), 500.0);
    }

    #[test]
    fn test_reset_for_same_track_keeps_history() {
        let (_clock, coordinator) = coordinator();
        coordinator.on_seek_requested(42.0, false);
        coordinator.reset_for_track(Some("t1"));
        assert_eq!(coordinator.latest_request_version(), Some(1));

        coordinator.reset_for_track(Some("t2"));
        assert_eq!(coordinator.latest_request_version(), None);
        assert_eq!(coordinator.seek_base_position(7.0, 100.0, false, false), 7.0);
    }
}
