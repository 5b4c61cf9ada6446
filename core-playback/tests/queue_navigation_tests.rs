//! Queue navigation tests
//!
//! End-to-end navigation scenarios against the public `QueueManager` API.

use core_playback::{PlayMode, PlaybackRoute, QueueManager, SharedTrack, Track};
use std::collections::HashSet;

fn tracks(ids: &[&str]) -> Vec<SharedTrack> {
    ids.iter().map(|id| Track::new(*id).shared()).collect()
}

fn manager_with(ids: &[&str], index: usize) -> (QueueManager, Vec<SharedTrack>) {
    let manager = QueueManager::with_seed(42);
    let list = tracks(ids);
    manager.rebuild_queue_from_view(&list, "album:1", index);
    (manager, list)
}

fn assert_indices_in_range(manager: &QueueManager) {
    let snapshot = manager.capture_snapshot();
    if let Some(index) = snapshot.queue_index {
        assert!(index < snapshot.queue.len());
    }
    if let Some(index) = snapshot.injection_index {
        assert!(index < snapshot.injection_chain.len());
    }
}

#[test]
fn test_rebuild_then_snapshot_round_trip() {
    let (manager, list) = manager_with(&["a", "b", "c", "d"], 2);
    let snapshot = manager.capture_snapshot();

    let ids: Vec<&str> = snapshot.queue.iter().map(|t| t.id()).collect();
    let expected: Vec<&str> = list.iter().map(|t| t.id()).collect();
    assert_eq!(ids, expected);
    assert_eq!(snapshot.queue_index, Some(2));
    assert_eq!(snapshot.queue_source, "album:1");
    assert!(snapshot.injection_chain.is_empty());
    assert_eq!(snapshot.injection_index, None);
}

#[test]
fn test_sequential_automatic_next_stops_at_end() {
    let (manager, _) = manager_with(&["a", "b", "c"], 2);

    let result = manager.move_next(PlayMode::Sequential, false, "album:1");

    assert!(result.reached_boundary);
    assert!(!result.has_track());
    assert!(!result.wrapped);
    assert_eq!(manager.queue_index(), Some(2));
}

#[test]
fn test_loop_manual_next_wraps_to_start() {
    let (manager, _) = manager_with(&["a", "b", "c"], 2);

    let result = manager.move_next(PlayMode::Loop, true, "album:1");

    assert_eq!(result.route, PlaybackRoute::Queue);
    assert_eq!(result.track_id(), Some("a"));
    assert_eq!(result.queue_index, Some(0));
    assert!(result.wrapped);
}

#[test]
fn test_loop_manual_previous_refuses_to_wrap() {
    let (manager, _) = manager_with(&["a", "b", "c"], 0);

    let manual = manager.move_previous(PlayMode::Loop, true, "album:1");
    assert!(manual.reached_boundary);
    assert_eq!(manager.queue_index(), Some(0));

    let automatic = manager.move_previous(PlayMode::Loop, false, "album:1");
    assert_eq!(automatic.track_id(), Some("c"));
    assert!(automatic.wrapped);
}

#[test]
fn test_sequential_previous_stops_at_start() {
    let (manager, _) = manager_with(&["a", "b"], 0);
    let result = manager.move_previous(PlayMode::Sequential, true, "album:1");
    assert!(result.reached_boundary);
}

#[test]
fn test_random_lap_visits_every_index_once() {
    let ids = ["a", "b", "c", "d", "e", "f"];
    let (manager, _) = manager_with(&ids, 0);

    let mut seen = HashSet::new();
    seen.insert(0usize);
    for _ in 1..ids.len() {
        let result = manager.move_next(PlayMode::Random, false, "album:1");
        let index = result.queue_index.expect("random next returns a queue slot");
        assert!(seen.insert(index), "index {} repeated within one lap", index);
        assert!(!manager.random_state().cycle_remaining.contains(&index));
        assert_indices_in_range(&manager);
    }
    assert_eq!(seen.len(), ids.len());
}

#[test]
fn test_random_next_then_previous_returns_without_new_draw() {
    let (manager, _) = manager_with(&["a", "b", "c", "d", "e"], 0);
    manager.move_next(PlayMode::Random, false, "album:1");
    let before = manager.queue_index();

    let forward = manager.move_next(PlayMode::Random, false, "album:1");
    let bag_after_forward = manager.random_state().cycle_remaining;
    let back = manager.move_previous(PlayMode::Random, false, "album:1");

    assert_ne!(forward.queue_index, before);
    assert_eq!(back.queue_index, before);
    assert_eq!(manager.random_state().cycle_remaining, bag_after_forward);

    let replay = manager.move_next(PlayMode::Random, false, "album:1");
    assert_eq!(replay.queue_index, forward.queue_index);
}

#[test]
fn test_random_single_track_queue() {
    let (manager, _) = manager_with(&["only"], 0);
    let result = manager.move_next(PlayMode::Random, false, "album:1");
    assert_eq!(result.queue_index, Some(0));
}

#[test]
fn test_pending_injection_consumed_exactly_once() {
    let (manager, _) = manager_with(&["a", "b", "c"], 0);
    manager.set_pending_injection(Some(Track::new("x").shared()), "search");

    let first = manager.move_next(PlayMode::Sequential, false, "album:1");
    assert_eq!(first.route, PlaybackRoute::PendingInjection);
    assert_eq!(first.track_id(), Some("x"));
    assert!(!manager.has_pending_injection());
    assert_eq!(manager.injection_source("x").as_deref(), Some("search"));

    let chain: Vec<String> = manager
        .injection_chain()
        .iter()
        .map(|t| t.id().to_string())
        .collect();
    assert_eq!(chain, vec!["x".to_string()]);

    let second = manager.move_next(PlayMode::Sequential, false, "album:1");
    assert_ne!(second.route, PlaybackRoute::PendingInjection);
    assert_eq!(second.track_id(), Some("b"));
    assert_indices_in_range(&manager);
}

#[test]
fn test_manual_select_routes() {
    let manager = QueueManager::with_seed(1);
    let view = tracks(&["a", "b", "c"]);

    let from_view = manager.manual_select(&view[1], &view, "playlist:9");
    assert_eq!(from_view.route, PlaybackRoute::Queue);
    assert!(from_view.queue_changed);
    assert_eq!(manager.queue_index(), Some(1));

    let other_view = tracks(&["z"]);
    let jump = manager.manual_select(&view[2], &other_view, "search");
    assert_eq!(jump.route, PlaybackRoute::Queue);
    assert!(!jump.queue_changed);
    assert_eq!(manager.queue_index(), Some(2));

    let stranger = Track::new("s").shared();
    let injected = manager.manual_select(&stranger, &other_view, "search");
    assert_eq!(injected.route, PlaybackRoute::Injection);
    assert!(manager.is_in_injection());
    assert_eq!(manager.queue_index(), Some(2));
}

#[test]
fn test_advance_for_playback_matches_queue_entry() {
    let (manager, list) = manager_with(&["a", "b", "c", "d"], 0);

    let result = manager.advance_for_playback(&list[3], "album:1");

    assert_eq!(result.route, PlaybackRoute::Queue);
    assert_eq!(result.queue_index, Some(3));
    assert_eq!(manager.queue_index(), Some(3));
}

#[test]
fn test_remove_track_shifts_index_and_keeps_range() {
    let (manager, _) = manager_with(&["a", "b", "c", "d"], 3);

    assert!(manager.remove_track_by_id("b"));
    assert_eq!(manager.queue_index(), Some(2));
    assert_eq!(manager.current_queue().len(), 3);

    assert!(manager.remove_track_by_id("d"));
    assert!(manager.remove_track_by_id("c"));
    assert!(manager.remove_track_by_id("a"));
    assert_eq!(manager.queue_index(), None);
    assert!(!manager.remove_track_by_id("a"));
}

#[test]
fn test_predict_next_available_skips_confirmed_missing_only() {
    let (manager, list) = manager_with(&["a", "b", "c", "d"], 0);
    list[1].mark_confirmed_missing();
    list[2].mark_unavailable();

    let predicted = manager.predict_next_available(PlayMode::Sequential, 5);

    assert_eq!(predicted.map(|t| t.id().to_string()), Some("c".to_string()));
    assert_eq!(manager.queue_index(), Some(0));
}

#[test]
fn test_predict_next_available_gives_up_at_sequential_end() {
    let (manager, list) = manager_with(&["a", "b"], 0);
    list[1].mark_confirmed_missing();

    assert!(manager.predict_next_available(PlayMode::Sequential, 5).is_none());
}

#[test]
fn test_invariants_hold_through_mixed_operations() {
    let (manager, list) = manager_with(&["a", "b", "c", "d", "e"], 1);
    let modes = [PlayMode::Sequential, PlayMode::Loop, PlayMode::Random, PlayMode::LoopOne];

    for step in 0..40 {
        let mode = modes[step % modes.len()];
        match step % 7 {
            0 | 1 | 2 => {
                manager.move_next(mode, step % 2 == 0, "album:1");
            }
            3 | 4 => {
                manager.move_previous(mode, step % 2 == 0, "album:1");
            }
            5 => {
                manager.set_pending_injection(Some(Track::new(format!("x{}", step)).shared()), "search");
            }
            _ => {
                manager.advance_for_playback(&list[step % list.len()], "album:1");
            }
        }
        assert_indices_in_range(&manager);
        let state = manager.random_state();
        if let Some(current) = manager.queue_index() {
            assert!(!state.cycle_remaining.contains(&current));
        }
    }
}
