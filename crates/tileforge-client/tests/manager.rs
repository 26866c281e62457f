//! Spatial cache behaviour on a paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{at, manager, settle, test_config, MockApi, MockFactory, Reply, FRAME};
use glam::Vec3;
use tileforge_client::{ClientConfig, Zone};
use tileforge_common::ChunkCoord;
use tokio::sync::Semaphore;

const ORIGIN: ChunkCoord = ChunkCoord::new(0, 0);

#[tokio::test(start_paused = true)]
async fn test_center_first_then_surroundings() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let mut manager = manager(&api, &factory, test_config());

    let first = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(first.requested, 1);
    assert!(manager.is_pending(ORIGIN));

    settle().await;
    let second = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(second.applied, 1);
    assert!(manager.chunk(ORIGIN).is_some());
    // Eight neighbours wanted, capped at four pending.
    assert_eq!(second.requested, 4);
    assert_eq!(manager.pending_count(), 4);

    settle().await;
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    let report = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(report.resident, 9);
    assert_eq!(api.requests().len(), 9);
    assert!(api.requests().iter().all(|k| k.prompt == "P"));
}

#[tokio::test(start_paused = true)]
async fn test_new_chunk_fades_in() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let mut manager = manager(&api, &factory, test_config());

    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    let report = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    let chunk = manager.chunk(ORIGIN).expect("resident");
    assert!((chunk.fade - 0.15).abs() < 1e-5);
    assert!(chunk.renderable.visible);
    assert_eq!(report.visible, 1);

    for _ in 0..10 {
        manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    }
    let chunk = manager.chunk(ORIGIN).expect("resident");
    assert!((chunk.fade - 1.0).abs() < f32::EPSILON);
    assert!((chunk.renderable.opacity - 1.0).abs() < f32::EPSILON);
    assert_eq!(chunk.zone, Zone::Active);
}

#[tokio::test(start_paused = true)]
async fn test_cached_ring_hides_then_purges() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let mut manager = manager(&api, &factory, test_config());
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    for _ in 0..10 {
        manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    }

    // Distance 2: resident but hidden.
    for _ in 0..10 {
        manager.update(at(2, 0), Vec3::ZERO, FRAME);
    }
    let chunk = manager.chunk(ORIGIN).expect("still resident");
    assert_eq!(chunk.zone, Zone::Cached);
    assert!(chunk.fade.abs() < f32::EPSILON);
    assert!(!chunk.renderable.visible);
    assert!(factory.released().is_empty());

    // Distance 4: purged on the next update.
    let report = manager.update(at(4, 0), Vec3::ZERO, FRAME);
    assert!(manager.chunk(ORIGIN).is_none());
    assert!(report.purged >= 1);
    assert!(factory.released().contains(&ORIGIN));
}

#[tokio::test(start_paused = true)]
async fn test_failed_coordinate_waits_for_cooldown() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    api.script(ORIGIN, &[Reply::Error]);
    let mut manager = manager(&api, &factory, test_config());

    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    let report = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(report.applied, 0);
    assert_eq!(report.requested, 0);
    assert!(manager.halted().is_none());

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(manager.update(Vec3::ZERO, Vec3::ZERO, FRAME).requested, 0);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(manager.update(Vec3::ZERO, Vec3::ZERO, FRAME).requested, 1);
    settle().await;
    assert_eq!(manager.update(Vec3::ZERO, Vec3::ZERO, FRAME).applied, 1);
    assert_eq!(api.requests_for(ORIGIN), 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_cooldowns_are_pruned() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    api.script(ORIGIN, &[Reply::Error]);
    let mut manager = manager(&api, &factory, test_config());

    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(manager.cooldown_count(), 1);

    // Walked away: the failed coordinate is never requested again.
    manager.update(at(10, 0), Vec3::ZERO, FRAME);
    assert_eq!(manager.cooldown_count(), 1);
    tokio::time::advance(Duration::from_secs(11)).await;
    manager.update(at(10, 0), Vec3::ZERO, FRAME);
    assert_eq!(manager.cooldown_count(), 0);
    assert_eq!(api.requests_for(ORIGIN), 1);
}

#[tokio::test(start_paused = true)]
async fn test_billing_failure_halts_requests() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    api.script(ORIGIN, &[Reply::Billing]);
    let mut manager = manager(&api, &factory, test_config());

    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert!(manager
        .halted()
        .is_some_and(|reason| reason.contains("payment required")));

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(!manager.request_chunk(ChunkCoord::new(7, 7)));
    assert_eq!(manager.update(Vec3::ZERO, Vec3::ZERO, FRAME).requested, 0);
    assert_eq!(api.requests().len(), 1);

    manager.clear_halt().await.expect("clear");
    assert_eq!(api.cleared(), 1);
    assert!(manager.halted().is_none());
    assert_eq!(manager.update(Vec3::ZERO, Vec3::ZERO, FRAME).requested, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_cap() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let gate = Arc::new(Semaphore::new(0));
    api.gate(Arc::clone(&gate));
    let config = ClientConfig {
        max_pending: 2,
        ..test_config()
    };
    let mut manager = manager(&api, &factory, config);

    let dispatched: Vec<bool> = (0..4)
        .map(|x| manager.request_chunk(ChunkCoord::new(x, 0)))
        .collect();
    assert_eq!(dispatched, [true, true, false, false]);
    assert!(!manager.request_chunk(ORIGIN));

    gate.add_permits(2);
    settle().await;
    let report = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(report.applied, 2);
    assert_eq!(manager.pending_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_prompt_switch_discards_late_results() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let gate = Arc::new(Semaphore::new(0));
    api.gate(Arc::clone(&gate));
    let mut manager = manager(&api, &factory, test_config());

    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    manager.set_prompt("Q");
    assert_eq!(manager.prompt(), "Q");
    assert_eq!(manager.pending_count(), 0);

    gate.add_permits(1);
    settle().await;
    let report = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(report.applied, 0);
    assert_eq!(manager.resident_count(), 0);
    assert_eq!(factory.released(), vec![ORIGIN]);
    assert!(manager.is_pending(ORIGIN));

    gate.add_permits(1);
    settle().await;
    assert_eq!(manager.update(Vec3::ZERO, Vec3::ZERO, FRAME).applied, 1);
    let prompts: Vec<_> = api.requests().into_iter().map(|k| k.prompt).collect();
    assert_eq!(prompts, ["P", "Q"]);
}

#[tokio::test(start_paused = true)]
async fn test_same_prompt_keeps_chunks() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let mut manager = manager(&api, &factory, test_config());
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);

    manager.set_prompt("P");
    assert!(manager.chunk(ORIGIN).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reload_keeps_pending_loads() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let mut manager = manager(&api, &factory, test_config());
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    settle().await;
    manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    let pending = manager.pending_count();
    assert!(pending > 0);

    manager.reload_active_chunks();
    assert_eq!(manager.resident_count(), 0);
    assert_eq!(manager.pending_count(), pending);
    assert_eq!(factory.released(), vec![ORIGIN]);

    settle().await;
    let report = manager.update(Vec3::ZERO, Vec3::ZERO, FRAME);
    assert_eq!(report.applied, pending);
    assert!(manager.is_pending(ORIGIN));
}

#[tokio::test(start_paused = true)]
async fn test_moving_viewer_prefetches_ahead() {
    let (api, factory) = (MockApi::new(), MockFactory::default());
    let config = ClientConfig {
        max_pending: 64,
        ..test_config()
    };
    let mut manager = manager(&api, &factory, config);
    let velocity = Vec3::new(1.0, 0.0, 0.0);

    manager.update(Vec3::ZERO, velocity, FRAME);
    settle().await;
    manager.update(Vec3::ZERO, velocity, FRAME);

    // Active square plus three chunks ahead, one wide on each side.
    for x in -1..=3 {
        for y in -1..=1 {
            let coord = ChunkCoord::new(x, y);
            assert!(
                manager.is_pending(coord) || manager.chunk(coord).is_some(),
                "{coord} not requested"
            );
        }
    }
    assert_eq!(api.requests().len(), 1);
    settle().await;
    assert_eq!(api.requests().len(), 15);
}
