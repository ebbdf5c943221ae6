//! Full cycles against an in-memory store with a recording dispatcher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::allocator::EndpointLimit;
use crate::config::{LivenessConfig, SchedulerConfig};
use crate::dispatch::{DispatchPlan, Dispatcher};
use crate::fairshare::{FairShareScheduler, WeightedRandom, NO_SHARE_REASON};
use crate::heartbeat::{CriticalLoop, LivenessTracker, NodeControl};
use crate::link::{Endpoint, Link};
use crate::optimizer::{DecisionReason, OptimizerDecision, PairState};
use crate::retry::RetryPolicy;
use crate::store::{
    open_memory, unix_timestamp, DataSource, NewTransfer, QueueActivity, SqliteStore,
    TransferRequest, TransferState,
};

#[derive(Default)]
struct RecordingDispatcher(Mutex<Vec<DispatchPlan>>);

impl RecordingDispatcher {
    fn plans(&self) -> Vec<DispatchPlan> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, plan: DispatchPlan) -> Result<()> {
        self.0.lock().unwrap().push(plan);
        Ok(())
    }
}

const SRC: &str = "gsiftp://src.example.org";
const DST: &str = "gsiftp://dst.example.org";
const DST2: &str = "gsiftp://other.example.org";

fn link(source: &str, dest: &str) -> Link {
    Link::new(Endpoint::new(source), Endpoint::new(dest))
}

async fn submit_many(store: &SqliteStore, dest: &str, vo: &str, activity: &str, n: usize) {
    for i in 0..n {
        store
            .submit(&NewTransfer {
                job_id: format!("{vo}-job"),
                vo: vo.to_string(),
                activity: activity.to_string(),
                source_url: format!("{SRC}/{vo}/{activity}/{i}"),
                dest_url: format!("{dest}/{vo}/{activity}/{i}"),
                file_size: 1_000,
                priority: 3,
            })
            .await
            .unwrap();
    }
}

fn scheduler(
    store: &SqliteStore,
    dispatcher: Arc<RecordingDispatcher>,
    cfg: SchedulerConfig,
    lead: bool,
) -> Scheduler {
    let control = Arc::new(NodeControl::new());
    control.set_lead(lead);
    Scheduler::new(
        "node-a",
        Arc::new(store.clone()),
        dispatcher,
        control,
        Arc::new(LivenessTracker::new(&LivenessConfig::default(), unix_timestamp())),
        cfg,
        RetryPolicy::default(),
    )
}

fn admitted_by_vo(plans: &[DispatchPlan], vo: &str) -> usize {
    plans
        .iter()
        .flat_map(|p| &p.requests)
        .filter(|r| r.vo == vo)
        .count()
}

#[tokio::test]
async fn three_to_one_share_over_ten_slots() {
    let store = open_memory().await.unwrap();
    let l = link(SRC, DST);
    store.set_link_max(&l, 10).await.unwrap();
    store.set_share(&l, "atlas", 3.0).await.unwrap();
    store.set_share(&l, "cms", 1.0).await.unwrap();
    submit_many(&store, DST, "atlas", "default", 20).await;
    submit_many(&store, DST, "cms", "default", 20).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), true);
    let report = s.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.links, 1);
    assert_eq!(report.admitted, 10);
    let plans = dispatcher.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].link, l);
    assert_eq!(plans[0].streams, 1);
    let atlas = admitted_by_vo(&plans, "atlas");
    assert!((7..=8).contains(&atlas), "atlas got {atlas}");
    assert_eq!(atlas + admitted_by_vo(&plans, "cms"), 10);
    assert_eq!(store.active_count("node-a").await.unwrap(), 10);

    // The link is full: nothing more until transfers finish.
    let again = s.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.admitted, 0);
    assert_eq!(dispatcher.plans().len(), 1);
}

#[tokio::test]
async fn organizations_without_share_are_failed() {
    let store = open_memory().await.unwrap();
    let l = link(SRC, DST);
    store.set_share(&l, "atlas", 1.0).await.unwrap();
    submit_many(&store, DST, "atlas", "default", 3).await;
    submit_many(&store, DST, "lhcb", "default", 4).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), true);
    let report = s.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.unschedulable, 4);
    assert_eq!(report.admitted, 3);
    let plans = dispatcher.plans();
    assert_eq!(admitted_by_vo(&plans, "lhcb"), 0);
    for id in 4..=7 {
        assert_eq!(
            store.transfer_state(id).await.unwrap(),
            Some((TransferState::Failed, Some(NO_SHARE_REASON.to_string())))
        );
    }
    // Failed requests are not picked up again.
    assert!(store.queued_links().await.unwrap().is_empty());
}

#[tokio::test]
async fn node_process_budget_caps_admissions_across_links() {
    let store = open_memory().await.unwrap();
    submit_many(&store, DST, "atlas", "default", 5).await;
    submit_many(&store, DST2, "atlas", "default", 5).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let cfg = SchedulerConfig {
        max_url_copy_processes: 3,
        ..SchedulerConfig::default()
    };
    let s = scheduler(&store, Arc::clone(&dispatcher), cfg, true);
    let report = s.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.links, 2);
    assert_eq!(report.admitted, 3);
    assert_eq!(s.budget().available(), 0);
    let plans = dispatcher.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].link, link(SRC, DST));
}

#[tokio::test]
async fn endpoint_limit_bounds_all_links_of_the_endpoint() {
    let store = open_memory().await.unwrap();
    store
        .set_endpoint_limit(&Endpoint::new(SRC), EndpointLimit { egress: 4, ingress: 200 })
        .await
        .unwrap();
    submit_many(&store, DST, "atlas", "default", 5).await;
    submit_many(&store, DST2, "atlas", "default", 5).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), true);
    let report = s.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.admitted, 4);
}

#[tokio::test]
async fn links_with_non_positive_maximum_are_skipped() {
    let store = open_memory().await.unwrap();
    store.set_link_max(&link(SRC, DST), 0).await.unwrap();
    submit_many(&store, DST, "atlas", "default", 2).await;
    submit_many(&store, DST2, "atlas", "default", 2).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), true);
    let report = s.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.skipped_links, 1);
    assert_eq!(report.admitted, 2);
    let plans = dispatcher.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].link, link(SRC, DST2));
}

#[tokio::test]
async fn plans_carry_the_optimizer_stream_count() {
    let store = open_memory().await.unwrap();
    let l = link(SRC, DST);
    store
        .store_decision(&OptimizerDecision {
            link: l.clone(),
            timestamp: unix_timestamp(),
            previous_streams: 2,
            streams: 4,
            reason: DecisionReason::Increase,
            rationale: "success rate 1.00 >= 0.99: 2 -> 4 streams".to_string(),
            ema: 1.0,
            state: PairState::default(),
        })
        .await
        .unwrap();
    submit_many(&store, DST, "atlas", "default", 1).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), true);
    s.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(dispatcher.plans()[0].streams, 4);
}

#[tokio::test]
async fn weighted_random_strategy_can_be_injected() {
    let store = open_memory().await.unwrap();
    submit_many(&store, DST, "atlas", "default", 6).await;
    submit_many(&store, DST, "cms", "default", 6).await;

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let cfg = SchedulerConfig {
        default_link_max_active: 5,
        ..SchedulerConfig::default()
    };
    let s = scheduler(&store, Arc::clone(&dispatcher), cfg, true)
        .with_fairshare(FairShareScheduler::new(Box::new(WeightedRandom::with_seed(7))));
    let report = s.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.admitted, 5);
}

#[tokio::test]
async fn cancelled_cycle_admits_nothing() {
    let store = open_memory().await.unwrap();
    submit_many(&store, DST, "atlas", "default", 2).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), true);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = s.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.admitted, 0);
    assert!(dispatcher.plans().is_empty());
}

#[tokio::test]
async fn non_lead_node_reports_passes_without_admitting() {
    let store = open_memory().await.unwrap();
    submit_many(&store, DST, "atlas", "default", 2).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let s = scheduler(&store, Arc::clone(&dispatcher), SchedulerConfig::default(), false);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(s.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    task.await.unwrap();

    assert!(dispatcher.plans().is_empty());
    assert_eq!(store.active_count("node-a").await.unwrap(), 0);
    let passes = store.last_pass_timestamps("node-a").await.unwrap();
    assert!(passes.contains_key(&CriticalLoop::Scheduler));
}

fn request(id: i64, l: &Link, vo: &str) -> TransferRequest {
    TransferRequest {
        id,
        job_id: "job".to_string(),
        vo: vo.to_string(),
        activity: "default".to_string(),
        link: l.clone(),
        source_url: format!("{}/f{id}", l.source),
        dest_url: format!("{}/f{id}", l.destination),
        file_size: 1,
        priority: 3,
        submitted_at: 0,
    }
}

#[test]
fn workloads_keep_running_only_queues_and_request_order() {
    let l = link(SRC, DST);
    let stray = link(SRC, DST2);
    let activity = vec![
        QueueActivity {
            link: l.clone(),
            vo: "atlas".to_string(),
            activity: "default".to_string(),
            active: 2,
            submitted: 0,
        },
        QueueActivity {
            link: l.clone(),
            vo: "cms".to_string(),
            activity: "default".to_string(),
            active: 1,
            submitted: 2,
        },
    ];
    let requests = vec![request(9, &l, "cms"), request(3, &l, "cms"), request(5, &stray, "cms")];

    let workloads = build_workloads(&[l.clone()], activity, requests, Default::default());
    assert_eq!(workloads.len(), 1);
    let w = &workloads[0];
    assert_eq!(w.active(), 3);
    assert_eq!(w.queues.len(), 2);
    assert_eq!(w.queues[0].key.vo, "atlas");
    assert!(w.queues[0].pending.is_empty());
    let ids: Vec<_> = w.queues[1].pending.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![9, 3]);
    assert!(w.shares.vo_weights.is_empty());
}
