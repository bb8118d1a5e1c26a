//! Drain passes: ordering, head-of-line blocking, backoff, and rejection

mod common;

use common::{status, unreachable, Harness};
use field_model::{Action, EntityId, EntityType};
use offline_sync::{EngineState, SyncEvent};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

async fn queue_submissions(h: &Harness, count: usize) -> Vec<EntityId> {
    let dispatcher = h.dispatcher();
    let mut ids = Vec::new();
    for seq in 0..count {
        let entity = dispatcher
            .create(EntityType::Submission, json!({ "seq": seq }))
            .await
            .unwrap();
        ids.push(entity.id);
    }
    ids
}

fn sequence(payloads: &[Value]) -> Vec<u64> {
    payloads.iter().map(|p| p["seq"].as_u64().unwrap()).collect()
}

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|s| Duration::from_secs(*s)).collect()
}

#[tokio::test]
async fn drains_in_enqueue_order() {
    let h = Harness::new(false);
    queue_submissions(&h, 5).await;

    let report = h.engine().drain().await;

    assert_eq!(report.synced, 5);
    assert_eq!(report.remaining, 0);
    assert!(report.is_clean());
    assert_eq!(sequence(&h.server.applied_payloads()), vec![0, 1, 2, 3, 4]);
    assert!(h.store.read_drafts().is_empty());
}

#[tokio::test]
async fn server_error_blocks_the_rest_of_the_queue() {
    let h = Harness::new(false);
    queue_submissions(&h, 2).await;
    h.server.fail_next(status(500));
    let mut engine = h.engine();

    let report = engine.drain().await;

    assert_eq!(h.store.queue_len(), 2);
    assert_eq!(h.server.attempts().len(), 1);
    assert_eq!(h.server.attempts()[0].payload["seq"], 0);
    assert_eq!(engine.backoff_level(), 1);
    assert_eq!(engine.state(), EngineState::BackingOff);
    assert!(engine.timer_armed());
    assert_eq!(report.failure.and_then(|e| e.status()), Some(500));
}

#[tokio::test]
async fn failure_mid_queue_keeps_later_entries_and_their_drafts() {
    let h = Harness::new(false);
    let ids = queue_submissions(&h, 4).await;
    h.server.succeed_next(2);
    h.server.fail_next(unreachable());
    let mut engine = h.engine();

    let report = engine.drain().await;

    assert_eq!(report.synced, 2);
    assert_eq!(report.remaining, 2);
    assert_eq!(h.server.attempts().len(), 3);

    let queued: BTreeSet<_> = h.store.read_queue().into_iter().map(|op| op.id).collect();
    let drafted: BTreeSet<_> = h.store.read_drafts().into_iter().map(|d| d.id).collect();
    assert_eq!(queued, drafted);
    assert_eq!(queued, ids[2..].iter().cloned().collect());

    let report = engine.drain().await;
    assert_eq!(report.synced, 2);
    assert_eq!(sequence(&h.server.applied_payloads()), vec![0, 1, 2, 3]);
    assert_eq!(engine.backoff_level(), 0);
}

#[tokio::test]
async fn successful_pass_emits_one_completion_with_count() {
    let h = Harness::new(false);
    queue_submissions(&h, 2).await;
    let mut engine = h.engine();
    let mut events = engine.subscribe();

    engine.drain().await;

    assert_eq!(events.try_recv().unwrap(), SyncEvent::SyncComplete { count: 2 });
    assert!(events.try_recv().is_err());
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn empty_queue_emits_nothing() {
    let h = Harness::new(true);
    let mut engine = h.engine();
    let mut events = engine.subscribe();

    let report = engine.drain().await;

    assert_eq!(report.attempted, 0);
    assert!(events.try_recv().is_err());
    assert!(engine.timer_armed());
}

#[tokio::test(start_paused = true)]
async fn clean_pass_arms_short_recheck() {
    let h = Harness::new(false);
    queue_submissions(&h, 1).await;
    let mut engine = h.engine();

    engine.drain().await;

    let delay = engine.timer_deadline().unwrap() - Instant::now();
    assert_eq!(delay, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_to_ceiling_and_resets_on_reconnect() {
    let h = Harness::new(false);
    queue_submissions(&h, 1).await;
    h.server.fail_all(Some(status(503)));
    let mut engine = h.engine();

    let mut delays = Vec::new();
    for _ in 0..7 {
        engine.drain().await;
        delays.push(engine.timer_deadline().unwrap() - Instant::now());
    }

    assert_eq!(delays, secs(&[5, 30, 120, 600, 1800, 1800, 1800]));
    assert_eq!(engine.backoff_level(), 7);

    engine.went_online().await;
    assert_eq!(engine.backoff_level(), 1);
    assert_eq!(
        engine.timer_deadline().unwrap() - Instant::now(),
        Duration::from_secs(5)
    );
}

#[tokio::test(start_paused = true)]
async fn going_online_cancels_backoff_and_drains_immediately() {
    let h = Harness::new(false);
    queue_submissions(&h, 1).await;
    h.server.fail_all(Some(unreachable()));
    let mut engine = h.engine();
    for _ in 0..3 {
        engine.drain().await;
    }
    assert_eq!(engine.backoff_level(), 3);
    assert_eq!(
        engine.timer_deadline().unwrap() - Instant::now(),
        Duration::from_secs(120)
    );

    h.server.fail_all(None);
    let started = Instant::now();
    let report = engine.went_online().await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(report.synced, 1);
    assert_eq!(engine.backoff_level(), 0);
    assert_eq!(h.server.attempts().len(), 4);
    assert_eq!(
        engine.timer_deadline().unwrap() - Instant::now(),
        Duration::from_secs(5)
    );
}

#[tokio::test(start_paused = true)]
async fn reset_forgets_backoff_and_rearms_keepalive() {
    let h = Harness::new(false);
    queue_submissions(&h, 1).await;
    h.server.fail_all(Some(status(503)));
    let mut engine = h.engine();
    for _ in 0..3 {
        engine.drain().await;
    }
    assert_eq!(engine.backoff_level(), 3);
    assert_eq!(engine.state(), EngineState::BackingOff);

    engine.reset();

    assert_eq!(engine.backoff_level(), 0);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(
        engine.timer_deadline().unwrap() - Instant::now(),
        Duration::from_secs(60)
    );

    // The next failure starts again at the bottom of the schedule
    engine.drain().await;
    assert_eq!(
        engine.timer_deadline().unwrap() - Instant::now(),
        Duration::from_secs(5)
    );
}

#[tokio::test]
async fn committed_create_without_response_body_is_not_replayed() {
    let h = Harness::new(false);
    queue_submissions(&h, 1).await;
    h.server.respond_without_body(true);
    let mut engine = h.engine();

    let report = engine.drain().await;

    assert!(report.is_clean());
    assert_eq!(report.attempted, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.remaining, 0);
    assert!(h.store.read_drafts().is_empty());
    assert_eq!(engine.backoff_level(), 0);

    engine.drain().await;
    assert_eq!(h.server.attempts().len(), 1);
}

#[tokio::test]
async fn dependent_operations_follow_the_server_id() {
    let h = Harness::new(false);
    let dispatcher = h.dispatcher();
    let draft = dispatcher
        .create(EntityType::Submission, json!({"customer_name": "Müller"}))
        .await
        .unwrap();
    dispatcher
        .update(EntityType::Submission, draft.id.clone(), json!({"status": "signed"}))
        .await
        .unwrap();
    dispatcher
        .delete(EntityType::Submission, draft.id.clone())
        .await
        .unwrap();

    let report = h.engine().drain().await;

    assert_eq!(report.synced, 3);
    let applied = h.server.applied();
    assert_eq!(applied[0].action, Action::Create);
    assert_eq!(applied[1].target, Some(EntityId::new("srv-1")));
    assert_eq!(applied[2].target, Some(EntityId::new("srv-1")));
    assert!(h.store.read_drafts().is_empty());
}

#[tokio::test]
async fn retargeting_is_persisted_when_later_entries_fail() {
    let h = Harness::new(false);
    let dispatcher = h.dispatcher();
    let draft = dispatcher
        .create(EntityType::Submission, json!({"customer_name": "Müller"}))
        .await
        .unwrap();
    let update = dispatcher
        .update(EntityType::Submission, draft.id.clone(), json!({"status": "signed"}))
        .await
        .unwrap();
    h.server.succeed_next(1);
    h.server.fail_next(status(502));

    h.engine().drain().await;

    let queue = h.store.read_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].target, Some(EntityId::new("srv-1")));
    let remaining_draft = h.store.read_drafts();
    assert_eq!(remaining_draft.len(), 1);
    assert_eq!(remaining_draft[0].to_entity().id, EntityId::new("srv-1"));
    assert_eq!(update.id, draft.id);
}

#[tokio::test]
async fn rejected_operation_is_dropped_and_reported() {
    let h = Harness::new(false);
    let ids = queue_submissions(&h, 3).await;
    h.server.fail_next(status(422));
    let mut engine = h.engine();
    let mut events = engine.subscribe();

    let report = engine.drain().await;

    assert_eq!(report.rejected, 1);
    assert_eq!(report.synced, 2);
    assert!(report.is_clean());
    assert_eq!(engine.backoff_level(), 0);
    assert_eq!(h.store.queue_len(), 0);
    assert!(h.store.read_drafts().is_empty());

    match events.try_recv().unwrap() {
        SyncEvent::OperationRejected(rejected) => {
            assert_eq!(rejected.operation.id, ids[0]);
            assert_eq!(rejected.error.status(), Some(422));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(events.try_recv().unwrap(), SyncEvent::SyncComplete { count: 2 });
    assert_eq!(engine.rejected_operations().len(), 1);
}

#[tokio::test]
async fn rejected_create_takes_its_dependents_along() {
    let h = Harness::new(false);
    let dispatcher = h.dispatcher();
    let draft = dispatcher
        .create(EntityType::Submission, json!({}))
        .await
        .unwrap();
    dispatcher
        .update(EntityType::Submission, draft.id.clone(), json!({"status": "x"}))
        .await
        .unwrap();
    h.server.fail_next(status(400));
    let mut engine = h.engine();

    let report = engine.drain().await;

    assert_eq!(report.rejected, 2);
    assert_eq!(h.server.attempts().len(), 1);
    assert_eq!(h.store.queue_len(), 0);
    assert_eq!(engine.rejected_operations().len(), 2);
}

#[tokio::test]
async fn auth_failure_keeps_queue_and_asks_for_credentials() {
    let h = Harness::new(false);
    queue_submissions(&h, 2).await;
    h.server.fail_next(status(401));
    let mut engine = h.engine();
    let mut events = engine.subscribe();

    let report = engine.drain().await;

    assert!(!report.is_clean());
    assert_eq!(h.store.queue_len(), 2);
    assert_eq!(engine.backoff_level(), 1);
    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::AuthenticationRequired { status: 401 }
    );
    assert!(engine.rejected_operations().is_empty());
}

#[tokio::test]
async fn discarded_entries_are_skipped() {
    let h = Harness::new(false);
    let ids = queue_submissions(&h, 3).await;
    h.dispatcher().discard_draft(&ids[1]);

    let report = h.engine().drain().await;

    assert_eq!(report.synced, 2);
    assert_eq!(sequence(&h.server.applied_payloads()), vec![0, 2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// However passes fail, the server sees each write once and in order.
    #[test]
    fn prop_writes_reach_server_in_enqueue_order(
        count in 1usize..8,
        failures in proptest::collection::vec(any::<bool>(), 0..16),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let applied = runtime.block_on(async move {
            let h = Harness::new(false);
            queue_submissions(&h, count).await;
            let mut engine = h.engine();

            let mut script = failures.into_iter();
            while h.store.queue_len() > 0 {
                if script.next().unwrap_or(false) {
                    h.server.fail_next(status(503));
                }
                engine.drain().await;
            }
            h.server.applied_payloads()
        });

        prop_assert_eq!(sequence(&applied), (0..count as u64).collect::<Vec<_>>());
    }
}
