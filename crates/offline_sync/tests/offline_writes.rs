//! Write dispatch: direct writes, offline drafts, and draft management

mod common;

use common::{status, unreachable, Harness};
use field_model::{Action, EntityId, EntityType, ModelError};
use offline_sync::DispatchError;
use serde_json::json;

#[tokio::test]
async fn offline_create_returns_draft_and_queues_it() {
    let h = Harness::new(false);

    let entity = h
        .dispatcher()
        .create(EntityType::Submission, json!({"customer_name": "Müller"}))
        .await
        .unwrap();

    assert!(entity.is_offline);
    assert!(entity.id.is_local());
    assert_eq!(entity.data["customer_name"], "Müller");
    assert_eq!(entity.data["is_offline"], true);

    assert_eq!(h.store.queue_len(), 1);
    let queued = &h.store.read_queue()[0];
    assert_eq!(queued.id, entity.id);
    assert_eq!(queued.action, Action::Create);
    assert_eq!(h.store.draft(&entity.id).map(|d| d.is_offline), Some(true));
    assert!(h.server.attempts().is_empty());
}

#[tokio::test]
async fn online_write_returns_server_entity() {
    let h = Harness::new(true);

    let entity = h
        .dispatcher()
        .create(EntityType::Template, json!({"name": "Boiler inspection"}))
        .await
        .unwrap();

    assert!(!entity.is_offline);
    assert_eq!(entity.id, EntityId::new("srv-1"));
    assert_eq!(h.store.queue_len(), 0);
    assert!(h.store.read_drafts().is_empty());
    assert_eq!(h.server.applied().len(), 1);
}

#[tokio::test]
async fn committed_create_without_response_body_is_confirmed() {
    let h = Harness::new(true);
    h.server.respond_without_body(true);

    let entity = h
        .dispatcher()
        .create(EntityType::Submission, json!({"customer_name": "Müller"}))
        .await
        .unwrap();

    assert!(!entity.is_offline);
    assert_eq!(entity.entity_type, EntityType::Submission);
    assert_eq!(entity.data["customer_name"], "Müller");
    assert_eq!(h.store.queue_len(), 0);
    assert!(h.store.read_drafts().is_empty());
    assert_eq!(h.server.attempts().len(), 1);
    assert_eq!(h.server.applied().len(), 1);
}

#[tokio::test]
async fn committed_update_without_response_body_keeps_target() {
    let h = Harness::new(true);
    h.server.respond_without_body(true);

    let entity = h
        .dispatcher()
        .update(EntityType::Template, EntityId::new("7"), json!({"name": "Heating"}))
        .await
        .unwrap();

    assert_eq!(entity.id, EntityId::new("7"));
    assert_eq!(entity.data["name"], "Heating");
    assert!(!entity.is_offline);
}

#[tokio::test]
async fn online_delete_returns_target() {
    let h = Harness::new(true);

    let entity = h
        .dispatcher()
        .delete(EntityType::Submission, EntityId::new("42"))
        .await
        .unwrap();

    assert_eq!(entity.id, EntityId::new("42"));
    assert!(!entity.is_offline);
}

#[tokio::test]
async fn connectivity_failure_falls_back_to_queue_with_same_key() {
    let h = Harness::new(true);
    h.server.fail_next(unreachable());

    let entity = h
        .dispatcher()
        .update(EntityType::Submission, EntityId::new("7"), json!({"status": "signed"}))
        .await
        .unwrap();

    assert!(entity.is_offline);
    assert_eq!(entity.id, EntityId::new("7"));
    assert_eq!(h.store.queue_len(), 1);

    let attempted_key = h.server.attempts()[0].idempotency_key.clone();
    assert_eq!(attempted_key, Some(h.store.read_queue()[0].idempotency_key.clone()));
}

#[tokio::test]
async fn timeout_falls_back_to_queue() {
    let h = Harness::new(true);
    h.server.fail_next(offline_sync::TransportError::Timeout);

    let entity = h
        .dispatcher()
        .create(EntityType::Submission, json!({"customer_name": "Weber"}))
        .await
        .unwrap();

    assert!(entity.is_offline);
    assert_eq!(h.store.queue_len(), 1);
}

#[tokio::test]
async fn server_rejection_propagates_without_queueing() {
    let h = Harness::new(true);
    h.server.fail_next(status(422));

    let err = h
        .dispatcher()
        .create(EntityType::Submission, json!({}))
        .await
        .unwrap_err();

    assert_eq!(err.transport().and_then(|e| e.status()), Some(422));
    assert_eq!(h.store.queue_len(), 0);
    assert!(h.store.read_drafts().is_empty());
}

#[tokio::test]
async fn server_error_on_direct_write_propagates() {
    let h = Harness::new(true);
    h.server.fail_next(status(500));

    let err = h
        .dispatcher()
        .create(EntityType::Template, json!({"name": "x"}))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Transport(_)));
    assert_eq!(h.store.queue_len(), 0);
}

#[tokio::test]
async fn update_without_target_is_invalid() {
    let h = Harness::new(true);

    let err = h
        .dispatcher()
        .write(EntityType::Submission, Action::Update, None, json!({}))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        DispatchError::Invalid(ModelError::MissingTarget {
            action: Action::Update
        })
    );
    assert!(h.server.attempts().is_empty());
}

#[tokio::test]
async fn write_against_local_draft_is_queued_even_online() {
    let h = Harness::new(false);
    let draft = h
        .dispatcher()
        .create(EntityType::Submission, json!({"customer_name": "Müller"}))
        .await
        .unwrap();

    h.connectivity.set_online(true);
    let updated = h
        .dispatcher()
        .update(EntityType::Submission, draft.id.clone(), json!({"status": "signed"}))
        .await
        .unwrap();

    assert!(updated.is_offline);
    assert_eq!(updated.id, draft.id);
    assert_eq!(h.store.queue_len(), 2);
    assert!(h.server.attempts().is_empty());
}

#[tokio::test]
async fn discard_draft_removes_dependents() {
    let h = Harness::new(false);
    let dispatcher = h.dispatcher();

    let keep = dispatcher
        .create(EntityType::Submission, json!({"customer_name": "Keep"}))
        .await
        .unwrap();
    let draft = dispatcher
        .create(EntityType::Submission, json!({"customer_name": "Drop"}))
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
    assert_eq!(h.store.queue_len(), 4);

    assert_eq!(dispatcher.discard_draft(&draft.id), 3);

    let queue = h.store.read_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, keep.id);
    assert_eq!(h.store.read_drafts().len(), 1);
    assert_eq!(dispatcher.discard_draft(&draft.id), 0);
}

#[tokio::test]
async fn drafts_are_listed_per_entity_type() {
    let h = Harness::new(false);
    let dispatcher = h.dispatcher();

    dispatcher
        .create(EntityType::Submission, json!({"customer_name": "A"}))
        .await
        .unwrap();
    dispatcher
        .create(EntityType::Template, json!({"name": "T"}))
        .await
        .unwrap();

    let submissions = dispatcher.drafts(EntityType::Submission);
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].data["customer_name"], "A");
    assert_eq!(dispatcher.drafts(EntityType::Template).len(), 1);
}
