//! Membership, leadership and drain behaviour against an in-memory store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::GridConfig;
use crate::store::{open_memory, SqliteStore};

fn coordinator(node: &str, store: &SqliteStore, cfg: &GridConfig) -> HeartbeatCoordinator {
    HeartbeatCoordinator::new(
        node,
        Arc::new(store.clone()),
        Arc::new(NodeControl::new()),
        Arc::new(LivenessTracker::new(&cfg.liveness, unix_timestamp())),
        cfg,
    )
}

#[tokio::test]
async fn exactly_one_node_leads() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig::default();
    let mut a = coordinator("node-a", &store, &cfg);
    let mut b = coordinator("node-b", &store, &cfg);
    let mut c = coordinator("node-c", &store, &cfg);

    a.beat_once(1_000).await;
    b.beat_once(1_000).await;
    c.beat_once(1_000).await;
    // Everyone re-beats so each sees the full membership.
    let ra = a.beat_once(1_010).await;
    let rb = b.beat_once(1_010).await;
    let rc = c.beat_once(1_010).await;

    assert_eq!(ra, BeatResult::Beat(Membership { index: 0, count: 3 }));
    assert_eq!(rb, BeatResult::Beat(Membership { index: 1, count: 3 }));
    assert_eq!(rc, BeatResult::Beat(Membership { index: 2, count: 3 }));
    let leads = [&a, &b, &c]
        .iter()
        .filter(|n| n.control.is_lead())
        .count();
    assert_eq!(leads, 1);
    assert!(a.control.is_lead());
}

#[tokio::test]
async fn leadership_passes_on_when_the_lead_stops_beating() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig::default();
    let mut a = coordinator("node-a", &store, &cfg);
    let mut b = coordinator("node-b", &store, &cfg);

    a.beat_once(1_000).await;
    b.beat_once(1_000).await;
    assert!(a.control.is_lead());
    assert!(!b.control.is_lead());

    // node-a goes silent; past the grace interval node-b takes over and
    // node-a no longer believes it leads.
    let rb = b.beat_once(1_000 + 121).await;
    assert_eq!(rb, BeatResult::Beat(Membership { index: 0, count: 1 }));
    assert!(b.control.is_lead());
    assert!(!a.is_lead_at(1_000 + 121));
}

#[tokio::test]
async fn lead_relinquishes_exactly_at_grace() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig::default();
    let mut a = coordinator("node-a", &store, &cfg);
    a.beat_once(500).await;
    assert!(a.is_lead_at(500 + 119));
    assert!(!a.is_lead_at(500 + 120));
}

#[tokio::test]
async fn draining_node_steps_down_and_skips_beats() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig::default();
    let mut a = coordinator("node-a", &store, &cfg);
    let mut b = coordinator("node-b", &store, &cfg);
    a.beat_once(1_000).await;
    b.beat_once(1_000).await;
    assert!(a.control.is_lead());

    store.set_drain_flag("node-a", true).await.unwrap();
    assert_eq!(a.beat_once(1_005).await, BeatResult::Draining);
    assert!(!a.control.is_lead());
    assert_eq!(a.control.state(), NodeState::Draining);

    let rb = b.beat_once(1_005).await;
    assert_eq!(rb, BeatResult::Beat(Membership { index: 0, count: 1 }));
    assert!(b.control.is_lead());

    store.set_drain_flag("node-a", false).await.unwrap();
    assert!(matches!(a.beat_once(1_010).await, BeatResult::Beat(_)));
    assert_eq!(a.control.state(), NodeState::Active);
}

#[tokio::test]
async fn configured_drain_never_beats() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig {
        drain: true,
        ..GridConfig::default()
    };
    let mut a = coordinator("node-a", &store, &cfg);
    assert_eq!(a.beat_once(1_000).await, BeatResult::Draining);
    assert!(store.heartbeats().await.unwrap().is_empty());
}

#[tokio::test]
async fn stalled_loop_ends_the_heartbeat() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig::default();
    let coordinator = HeartbeatCoordinator::new(
        "node-a",
        Arc::new(store),
        Arc::new(NodeControl::new()),
        Arc::new(LivenessTracker::new(&cfg.liveness, 0)),
        &cfg,
    );
    let control = Arc::clone(&coordinator.control);
    match coordinator.run(CancellationToken::new()).await {
        HeartbeatOutcome::Stalled(stall) => assert_eq!(stall.which, CriticalLoop::Scheduler),
        other => panic!("expected stall, got {other:?}"),
    }
    assert_eq!(control.state(), NodeState::Stopped);
    assert!(!control.is_lead());
}

#[tokio::test]
async fn cancelled_heartbeat_stops() {
    let store = open_memory().await.unwrap();
    let cfg = GridConfig::default();
    let coordinator = coordinator("node-a", &store, &cfg);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(coordinator.run(cancel).await, HeartbeatOutcome::Cancelled);
}
