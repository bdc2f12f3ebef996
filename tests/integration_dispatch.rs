//! Integration tests for the dispatch pipeline
//!
//! These exercise the queue, slot pool, dispatcher, reconciler and status
//! sync together through the public API, with the scripted launch service
//! and in-memory record store standing in for the remote systems.

use std::sync::Arc;
use std::time::Duration;

use leaddial::domain::{CompletionNotification, LeadRecord};
use leaddial::launcher::{MockCallLauncher, MockLaunch};
use leaddial::queue::{Admission, DedupLedger, LeadQueue};
use leaddial::reconcile::{Reconciler, ReconcilerConfig};
use leaddial::scheduler::{Dispatcher, DispatcherConfig};
use leaddial::slots::SlotPool;
use leaddial::store::MockLeadStore;
use leaddial::sync::{StatusSync, SyncConfig, SyncReceiver, SyncWorker};

struct Rig {
    dispatcher: Arc<Dispatcher<MockCallLauncher>>,
    reconciler: Arc<Reconciler<MockCallLauncher>>,
    launcher: Arc<MockCallLauncher>,
    rx: SyncReceiver,
}

fn rig(slot_count: usize, launcher: MockCallLauncher) -> Rig {
    let (sync, rx) = StatusSync::channel();
    let slots = Arc::new(SlotPool::new((0..slot_count).map(|i| format!("orig-{}", i))));
    let queue = Arc::new(LeadQueue::new(100, sync.clone()));
    let launcher = Arc::new(launcher);

    let dispatcher = Dispatcher::new(
        queue,
        slots.clone(),
        launcher.clone(),
        sync.clone(),
        DispatcherConfig::default(),
    );
    let reconciler = Reconciler::new(slots, launcher.clone(), sync, ReconcilerConfig::default())
        .with_stats(dispatcher.stats());

    Rig {
        dispatcher: Arc::new(dispatcher),
        reconciler: Arc::new(reconciler),
        launcher,
        rx,
    }
}

fn lead(n: usize) -> LeadRecord {
    LeadRecord::new(format!("lead-{}", n), Some(&format!("41555501{:02}", n)), "1")
}

fn enqueue_all(dispatcher: &Dispatcher<MockCallLauncher>, count: usize) {
    for n in 0..count {
        assert_eq!(dispatcher.enqueue(lead(n)), Admission::Accepted);
    }
}

/// Integration test: more leads than slots fills every slot and leaves the rest queued
#[tokio::test]
async fn test_tick_fills_all_slots() {
    let rig = rig(3, MockCallLauncher::new());
    enqueue_all(&rig.dispatcher, 5);

    let report = rig.dispatcher.tick().await;

    assert_eq!(report.launched, 3);
    let snapshot = rig.dispatcher.snapshot();
    assert_eq!(snapshot.busy_slots, 3);
    assert_eq!(snapshot.free_slots, 0);
    assert_eq!(snapshot.queued, 2);
    assert_eq!(rig.dispatcher.queue().queued_ids(), vec!["lead-3", "lead-4"]);
}

/// Integration test: fewer leads than slots leaves the spare slots free
#[tokio::test]
async fn test_tick_with_spare_slots() {
    let rig = rig(3, MockCallLauncher::new());
    enqueue_all(&rig.dispatcher, 1);

    let report = rig.dispatcher.tick().await;

    assert_eq!(report.launched, 1);
    assert_eq!(report.released_idle, 1);
    let slots = rig.dispatcher.slots();
    assert_eq!(slots.busy_count(), 1);
    assert_eq!(slots.free_count(), 2);
    assert_eq!(slots.claimed_count(), 0);
}

/// Integration test: an accepted launch without a call id puts the lead back at the head
#[tokio::test]
async fn test_launch_without_call_id_requeues_at_head() {
    let rig = rig(1, MockCallLauncher::with_script(vec![MockLaunch::NoCallId]));
    enqueue_all(&rig.dispatcher, 2);

    let report = rig.dispatcher.tick().await;

    assert_eq!(report.soft_failures, 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(rig.dispatcher.slots().free_count(), 1);
    assert_eq!(rig.dispatcher.queue().queued_ids(), vec!["lead-0", "lead-1"]);

    // Next tick retries the same lead first
    let report = rig.dispatcher.tick().await;
    assert_eq!(report.launched, 1);
    let launches = rig.launcher.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].phone, launches[1].phone);
    assert_eq!(rig.dispatcher.queue().queued_ids(), vec!["lead-1"]);
}

/// Integration test: a failed launch frees its slot and requeues the lead
#[tokio::test]
async fn test_failed_launch_releases_slot() {
    let rig = rig(2, MockCallLauncher::with_script(vec![MockLaunch::Fail(500)]));
    enqueue_all(&rig.dispatcher, 2);

    let report = rig.dispatcher.tick().await;

    assert_eq!(report.failures, 1);
    assert_eq!(report.launched, 1);
    let slots = rig.dispatcher.slots();
    assert_eq!(slots.busy_count(), 1);
    assert_eq!(slots.free_count(), 1);
    assert_eq!(rig.dispatcher.queue().len(), 1);
    assert_eq!(rig.dispatcher.snapshot().stats.launch_failures, 1);
}

/// Integration test: claiming one more slot than exists yields nothing
#[test]
fn test_claims_exhaust_pool() {
    let slots = SlotPool::new(["orig-a", "orig-b", "orig-c"]);

    let claims: Vec<_> = (0..3).filter_map(|_| slots.claim_free_slot()).collect();
    assert_eq!(claims.len(), 3);
    assert!(slots.claim_free_slot().is_none());

    assert!(slots.release_claim(&claims[1]));
    assert!(slots.claim_free_slot().is_some());
}

/// Integration test: freeing an unknown call id changes nothing
#[tokio::test]
async fn test_free_unknown_call_is_noop() {
    let rig = rig(2, MockCallLauncher::new());
    enqueue_all(&rig.dispatcher, 1);
    rig.dispatcher.tick().await;

    let slots = rig.dispatcher.slots();
    let before = slots.slots();
    assert!(!slots.free_by_call_id("call-unknown"));
    assert_eq!(slots.slots(), before);
    assert!(!rig.reconciler.on_completion_push(&CompletionNotification::new("call-unknown")));
}

/// Integration test: push and poll racing for the same ended call free it once
#[tokio::test]
async fn test_push_and_poll_free_call_once() {
    let rig = rig(1, MockCallLauncher::new());
    enqueue_all(&rig.dispatcher, 1);
    rig.dispatcher.tick().await;

    rig.launcher.end_call("call-1", "customer-ended-call");
    let push = CompletionNotification::new("call-1");
    let (pushed, polled) = tokio::join!(async { rig.reconciler.on_completion_push(&push) }, rig.reconciler.poll_once());

    assert_eq!(usize::from(pushed) + polled.freed, 1);
    assert_eq!(rig.dispatcher.slots().free_count(), 1);
    assert_eq!(rig.dispatcher.snapshot().stats.completed, 1);

    // A late duplicate push is ignored
    assert!(!rig.reconciler.on_completion_push(&push));
    assert_eq!(rig.reconciler.poll_once().await.freed, 0);
}

/// Integration test: a freed slot is reused by the next tick
#[tokio::test]
async fn test_completed_call_frees_slot_for_next_lead() {
    let rig = rig(1, MockCallLauncher::new());
    enqueue_all(&rig.dispatcher, 2);
    rig.dispatcher.tick().await;
    assert_eq!(rig.dispatcher.tick().await.launched, 0);

    let mut done = CompletionNotification::new("call-1");
    done.ended_reason = Some("assistant-ended-call".to_string());
    assert!(rig.reconciler.on_completion_push(&done));

    assert_eq!(rig.dispatcher.tick().await.launched, 1);
    assert!(rig.dispatcher.queue().is_empty());
    assert_eq!(rig.dispatcher.slots().slot_for_call("call-2"), Some(0));
}

/// Integration test: every lifecycle step reaches the record store in order
#[tokio::test]
async fn test_statuses_reach_record_store() {
    let rig = rig(2, MockCallLauncher::with_script(vec![MockLaunch::Call("call-a".to_string())]));
    let store = Arc::new(MockLeadStore::new());
    let worker = SyncWorker::new(
        rig.rx,
        store.clone(),
        SyncConfig {
            requests_per_second: 1000,
            ..Default::default()
        },
    );
    let worker = tokio::spawn(worker.run());

    enqueue_all(&rig.dispatcher, 1);
    rig.dispatcher.tick().await;

    let mut done = CompletionNotification::new("call-a");
    done.ended_reason = Some("pipeline-error".to_string());
    done.summary = Some("  Line dropped after greeting  ".to_string());
    assert!(rig.reconciler.on_completion_push(&done));

    // Dropping every component closes the channel and lets the worker drain
    drop(rig.dispatcher);
    drop(rig.reconciler);
    tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();

    assert_eq!(
        store.statuses_for("lead-0"),
        vec!["queued", "dispatching", "in-progress", "failed"]
    );
    assert_eq!(
        store.notes(),
        vec![("lead-0".to_string(), "Line dropped after greeting".to_string())]
    );
    let updates = store.updates();
    let (_, terminal) = updates.last().unwrap();
    assert_eq!(terminal.get("call_id").and_then(|v| v.as_str()), Some("call-a"));
    assert_eq!(terminal.get("ended_reason").and_then(|v| v.as_str()), Some("pipeline-error"));
}

/// Integration test: a lead on a live call is refused until the call ends
#[tokio::test]
async fn test_in_flight_lead_rejected() {
    let rig = rig(1, MockCallLauncher::new());
    enqueue_all(&rig.dispatcher, 1);
    rig.dispatcher.tick().await;

    assert_eq!(rig.dispatcher.enqueue(lead(0)), Admission::InFlight);

    assert!(rig.reconciler.on_completion_push(&CompletionNotification::new("call-1")));
    assert_eq!(rig.dispatcher.enqueue(lead(0)), Admission::Accepted);
}

/// Integration test: ledger eviction never drops ids that are still queued
#[test]
fn test_ledger_eviction_spares_queued_ids() {
    let mut ledger = DedupLedger::new(100);
    let queued: Vec<String> = (0..20).map(|n| format!("queued-{}", n)).collect();
    let is_queued = |id: &str| queued.iter().any(|q| q == id);

    for id in &queued {
        assert!(ledger.try_admit(id, is_queued));
    }
    for n in 0..90 {
        assert!(ledger.try_admit(&format!("done-{}", n), is_queued));
    }

    assert!(ledger.len() <= 100);
    for id in &queued {
        assert!(ledger.contains(id), "{} was evicted", id);
        assert!(!ledger.try_admit(id, is_queued));
    }
    assert!(ledger.contains("done-89"));
    assert!(!ledger.contains("done-0"));
}
