//! Cache coordinator tests

mod common;

use bridge_traits::Quality;
use common::*;
use core_playback::{
    CacheCoordinator, CachePriority, CacheStatus, PlayMode, PlaybackConfig, PlaybackState,
    PrefetchPipeline, QueueManager, SharedTrack, Track,
};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, PlaybackEvent};
use std::collections::HashMap;
use std::sync::Arc;

struct Harness {
    coordinator: CacheCoordinator,
    queue: Arc<QueueManager>,
    pipeline: Arc<PrefetchPipeline>,
    caches: Arc<FakeCacheFactory>,
    tracks: Vec<SharedTrack>,
}

fn harness_with(
    resolver: MockResolver,
    config: PlaybackConfig,
    ids: &[&str],
    index: usize,
) -> Harness {
    let queue = Arc::new(QueueManager::with_seed(7));
    let tracks: Vec<SharedTrack> = ids.iter().map(|id| Track::new(*id).shared()).collect();
    if !tracks.is_empty() {
        queue.rebuild_queue_from_view(&tracks, "album:1", index);
    }

    let caches = Arc::new(FakeCacheFactory::default());
    let pipeline = Arc::new(PrefetchPipeline::new(
        Arc::new(resolver),
        caches.clone(),
        Arc::new(FakeStreamFactory::default()),
        &config,
    ));
    let coordinator = CacheCoordinator::new(queue.clone(), pipeline.clone(), config);

    Harness {
        coordinator,
        queue,
        pipeline,
        caches,
        tracks,
    }
}

fn harness(ids: &[&str], index: usize) -> Harness {
    harness_with(playable_resolver(), PlaybackConfig::default(), ids, index)
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    assert!(condition(), "condition not reached");
}

#[tokio::test]
async fn test_sequential_refresh_prepares_next_tracks() {
    let h = harness(&["a", "b", "c", "d"], 0);

    let report = h.coordinator.refresh_preload().await;

    assert_eq!(report.candidates, vec!["b", "c"]);
    assert_eq!(report.ready, vec!["b", "c"]);
    assert!(!report.cancelled);
    assert_eq!(h.coordinator.entry_ids(), vec!["b", "c"]);

    let b = h.coordinator.entry("b").expect("entry for b");
    assert_eq!(b.status, CacheStatus::Ready);
    assert_eq!(b.priority, CachePriority::High);
    assert_eq!(b.ref_count, 1);
    assert_eq!(b.qualities.len(), 1);
    assert_eq!(b.qualities[0].quality, Quality::ExHigh);
    assert!(b.qualities[0].ready);

    let c = h.coordinator.entry("c").expect("entry for c");
    assert_eq!(c.priority, CachePriority::Medium);

    let stats = h.coordinator.stats();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.ready, 2);
    assert_eq!(stats.total_refs, 2);
    assert_eq!(stats.preloaded_bundles, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refreshes_hold_one_reference_per_candidate() {
    for _ in 0..50 {
        let h = harness(&["a", "b", "c", "d"], 0);
        let coordinator = Arc::new(h.coordinator);

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_preload().await })
        };
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_preload().await })
        };
        first.await.expect("first refresh panicked");
        second.await.expect("second refresh panicked");

        assert_eq!(coordinator.entry("b").map(|e| e.ref_count), Some(1));
        assert_eq!(coordinator.entry("c").map(|e| e.ref_count), Some(1));
        assert_eq!(coordinator.stats().total_refs, 2);
    }
}

#[tokio::test]
async fn test_loop_one_selects_nothing() {
    let h = harness(&["a", "b", "c"], 0);
    let coordinator = h.coordinator.with_play_mode(PlayMode::LoopOne);

    let report = coordinator.refresh_preload().await;

    assert!(report.candidates.is_empty());
    assert!(coordinator.entry_ids().is_empty());
    assert!(h.caches.created.lock().is_empty());
}

#[tokio::test]
async fn test_random_mode_uses_random_cap() {
    let h = harness(&["a", "b", "c", "d", "e", "f"], 0);
    let coordinator = h.coordinator.with_play_mode(PlayMode::Random);

    let report = coordinator.refresh_preload().await;

    assert_eq!(report.candidates.len(), 3);
    assert!(!report.candidates.contains(&"a".to_string()));
}

#[tokio::test]
async fn test_random_mode_prepares_replayed_track_first() {
    let h = harness(&["a", "b", "c", "d", "e", "f"], 0);
    let forward = h.queue.move_next(PlayMode::Random, true, "album:1");
    let replayed = forward.track.expect("random next returns a track");
    let back = h.queue.move_previous(PlayMode::Random, true, "album:1");
    assert_eq!(back.queue_index, Some(0));

    let coordinator = h.coordinator.with_play_mode(PlayMode::Random);
    let report = coordinator.refresh_preload().await;

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(report.candidates[0], replayed.id());
    assert_eq!(
        coordinator.entry(replayed.id()).map(|e| e.priority),
        Some(CachePriority::High)
    );
}

#[tokio::test]
async fn test_sweep_removes_only_unreferenced_stale_entries() {
    let h = harness(&[], 0);
    let a = Track::new("a").shared();
    let b = Track::new("b").shared();

    h.coordinator.acquire(&a);
    h.coordinator.acquire(&b);
    h.coordinator.on_playback_error();
    h.coordinator.release("a");

    assert_eq!(h.coordinator.entry("a").map(|e| e.ref_count), Some(0));
    assert_eq!(h.coordinator.entry("b").map(|e| e.status), Some(CacheStatus::Stale));

    assert_eq!(h.coordinator.sweep(), 1);
    assert_eq!(h.coordinator.entry_ids(), vec!["b"]);

    h.coordinator.release("b");
    assert_eq!(h.coordinator.sweep(), 1);
    assert!(h.coordinator.entry_ids().is_empty());
}

#[tokio::test]
async fn test_started_and_ended_move_the_playing_reference() {
    let h = harness(&["a", "b", "c", "d"], 0);
    h.coordinator.refresh_preload().await;

    h.queue.move_next(PlayMode::Sequential, false, "album:1");
    h.coordinator.on_track_started(&h.tracks[1]);
    let report = h.coordinator.wait_for_refresh().await.expect("refresh ran");
    assert_eq!(report.candidates, vec!["c", "d"]);

    let b = h.coordinator.entry("b").expect("entry for b");
    assert_eq!(b.status, CacheStatus::Playing);
    assert_eq!(b.priority, CachePriority::Critical);
    assert_eq!(b.ref_count, 1);
    assert_eq!(h.coordinator.entry("c").map(|e| e.ref_count), Some(1));
    assert_eq!(h.coordinator.entry("d").map(|e| e.ref_count), Some(1));

    h.coordinator.on_track_ended("b");
    let b = h.coordinator.entry("b").expect("entry for b");
    assert_eq!(b.ref_count, 0);
    assert_eq!(b.status, CacheStatus::Stale);
    assert_eq!(b.priority, CachePriority::Low);

    assert_eq!(h.coordinator.sweep(), 1);
    assert_eq!(h.coordinator.entry_ids(), vec!["c", "d"]);
}

#[tokio::test]
async fn test_second_start_demotes_previous_track() {
    let h = harness(&[], 0);
    let x = Track::new("x").shared();
    let y = Track::new("y").shared();

    h.coordinator.on_track_started(&x);
    h.coordinator.wait_for_refresh().await;
    h.coordinator.on_track_started(&y);
    h.coordinator.wait_for_refresh().await;

    let x = h.coordinator.entry("x").expect("entry for x");
    assert_eq!(x.ref_count, 0);
    assert_eq!(x.status, CacheStatus::Stale);
    assert_eq!(h.coordinator.entry("y").map(|e| e.status), Some(CacheStatus::Playing));
}

#[tokio::test]
async fn test_stop_invalidates_everything_but_the_playing_track() {
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();
    let h = harness(&[], 0);
    let coordinator = h.coordinator.with_event_bus(bus);

    coordinator.acquire(&Track::new("x").shared());
    coordinator.on_track_started(&Track::new("y").shared());
    coordinator.wait_for_refresh().await;

    coordinator.on_state_changed(PlaybackState::Paused);
    assert_eq!(coordinator.entry("x").map(|e| e.status), Some(CacheStatus::Pending));

    coordinator.on_state_changed(PlaybackState::Stopped);
    assert_eq!(coordinator.entry("x").map(|e| e.status), Some(CacheStatus::Stale));
    assert_eq!(coordinator.entry("y").map(|e| e.status), Some(CacheStatus::Playing));

    let mut invalidated = None;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Cache(CacheEvent::Invalidated { reason, affected }) = event {
            invalidated = Some((reason, affected));
        }
    }
    assert_eq!(invalidated, Some(("stopped".to_string(), 1)));
}

#[tokio::test]
async fn test_capacity_evicts_stale_entries_after_refresh() {
    let config = PlaybackConfig::default().with_max_cached_tracks(2);
    let h = harness_with(playable_resolver(), config, &["a", "b", "c", "d"], 0);

    for id in ["x", "y"] {
        h.coordinator.acquire(&Track::new(id).shared());
        h.coordinator.release(id);
    }
    assert_eq!(h.coordinator.stats().stale, 2);

    h.coordinator.refresh_preload().await;

    assert_eq!(h.coordinator.entry_ids(), vec!["b", "c"]);
}

#[tokio::test]
async fn test_unavailable_candidate_is_reported() {
    let mut resolver = MockResolver::new();
    resolver.expect_resolve().returning(|ids, quality, _| {
        if ids[0] == "b" {
            return Ok(HashMap::new());
        }
        Ok(HashMap::from([(ids[0].clone(), playable(&ids[0], quality))]))
    });
    let h = harness_with(resolver, PlaybackConfig::default(), &["a", "b", "c"], 0);

    let report = h.coordinator.refresh_preload().await;

    assert_eq!(report.unavailable, vec!["b"]);
    assert_eq!(report.ready, vec!["c"]);
    assert!(h.tracks[1].is_confirmed_missing());
    assert!(h.coordinator.entry("b").map(|e| e.qualities.is_empty()).unwrap_or(false));
}

#[tokio::test]
async fn test_quality_change_refreshes_with_fallbacks() {
    let mut resolver = MockResolver::new();
    resolver.expect_resolve().returning(|ids, quality, _| {
        if quality == Quality::Lossless {
            return Ok(HashMap::new());
        }
        Ok(HashMap::from([(ids[0].clone(), playable(&ids[0], quality))]))
    });
    let h = harness_with(resolver, PlaybackConfig::default(), &["a", "b"], 0);

    h.coordinator.on_quality_changed(Quality::Lossless);
    let report = h.coordinator.wait_for_refresh().await.expect("refresh ran");

    assert_eq!(h.coordinator.quality(), Quality::Lossless);
    assert_eq!(report.ready, vec!["b"]);
    let b = h.coordinator.entry("b").expect("entry for b");
    assert_eq!(b.qualities[0].quality, Quality::ExHigh);
}

#[tokio::test]
async fn test_newer_refresh_cancels_running_one() {
    let h = harness(&["a", "b", "c"], 0);
    h.caches.gate("b");

    h.coordinator.trigger_refresh();
    let first_attempt = h.caches.wait_started("b").await;
    h.caches.gated.lock().clear();

    let second = h.coordinator.refresh_preload().await;
    let first = h.coordinator.wait_for_refresh().await.expect("first refresh");

    assert!(first.cancelled);
    assert!(!second.cancelled);
    assert_eq!(second.ready, vec!["b", "c"]);
    assert_eq!(first_attempt.disposed_count(), 1);
    assert_eq!(h.coordinator.entry("b").map(|e| e.ref_count), Some(1));
    assert_eq!(h.coordinator.entry("c").map(|e| e.ref_count), Some(1));
}

#[tokio::test]
async fn test_event_listener_follows_playback_events() {
    let bus = EventBus::new(32);
    let h = harness(&["a", "b", "c"], 0);
    h.coordinator.spawn_event_listener(&bus);

    bus.emit(CoreEvent::Playback(PlaybackEvent::Started {
        track_id: "a".to_string(),
    }))
    .expect("listener subscribed");
    eventually(|| h.coordinator.entry("a").map(|e| e.status) == Some(CacheStatus::Playing)).await;

    bus.emit(CoreEvent::Playback(PlaybackEvent::Ended {
        track_id: "a".to_string(),
    }))
    .expect("listener subscribed");
    eventually(|| h.coordinator.entry("a").map(|e| e.ref_count) == Some(0)).await;

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disposes_entries_and_bundles() {
    let h = harness(&["a", "b", "c"], 0);
    h.coordinator.start();
    h.coordinator.refresh_preload().await;
    assert_eq!(h.pipeline.preloaded_ids().len(), 2);

    h.coordinator.shutdown().await;

    assert!(h.coordinator.entry_ids().is_empty());
    assert!(h.pipeline.preloaded_ids().is_empty());
    for manager in h.caches.created.lock().iter() {
        assert_eq!(manager.disposed_count(), 1);
    }
    assert_eq!(h.coordinator.stats(), Default::default());
}
