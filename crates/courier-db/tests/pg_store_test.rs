//! Live-Postgres suite for the transactional store.
//!
//! Requires a running PostgreSQL instance (TEST_DATABASE_URL). Ignored by
//! default so the standard test run stays hermetic; run with `--ignored`.

use courier_core::{ApplyEditRequest, CreateConversationRequest, CreateUserRequest, MessageStore};
use courier_db::test_fixtures::{sample_message, sample_notification, test_database_url};
use courier_db::{create_pool, PgStore};
use uuid::Uuid;

async fn setup_store() -> PgStore {
    let pool = create_pool(&test_database_url())
        .await
        .expect("failed to create test pool");
    let store = PgStore::new(pool);
    store.migrate().await.expect("migrations failed");
    store
}

fn unique_email(prefix: &str) -> String {
    format!("{}+{}@example.com", prefix, Uuid::new_v4().simple())
}

async fn seed_user(store: &PgStore, prefix: &str) -> courier_core::User {
    store
        .create_user(CreateUserRequest {
            email: unique_email(prefix),
            display_name: prefix.to_string(),
        })
        .await
        .expect("failed to create user")
}

#[tokio::test]
#[ignore]
async fn message_and_notifications_commit_together() {
    let store = setup_store().await;
    let a = seed_user(&store, "sender").await;
    let b = seed_user(&store, "recipient").await;
    let conv = store
        .create_conversation(CreateConversationRequest {
            participant_ids: vec![a.id, b.id],
            is_group: false,
            group_name: None,
        })
        .await
        .expect("failed to create conversation");

    let msg = sample_message(conv.id, a.id, "hello over the wire");
    let n = sample_notification(b.id, msg.id);
    store
        .insert_message(&msg, std::slice::from_ref(&n))
        .await
        .expect("insert failed");

    let fetched = store.fetch_message(msg.id).await.expect("fetch failed");
    assert_eq!(fetched.body, "hello over the wire");
    let notifications = store
        .notifications_for_user(b.id)
        .await
        .expect("listing failed");
    assert!(notifications.iter().any(|x| x.id == n.id));

    // Re-inserting a fan-out row for the same (recipient, message) pair is
    // absorbed by the dedup index.
    let again = sample_notification(b.id, msg.id);
    store
        .insert_message(&sample_message(conv.id, a.id, "second"), &[again])
        .await
        .expect("insert failed");
    let per_message: usize = store
        .notifications_for_user(b.id)
        .await
        .expect("listing failed")
        .iter()
        .filter(|x| x.message_id == Some(msg.id))
        .count();
    assert_eq!(per_message, 1);
}

#[tokio::test]
#[ignore]
async fn edit_writes_history_only_on_change() {
    let store = setup_store().await;
    let a = seed_user(&store, "editor").await;
    let b = seed_user(&store, "reader").await;
    let conv = store
        .create_conversation(CreateConversationRequest {
            participant_ids: vec![a.id, b.id],
            is_group: false,
            group_name: None,
        })
        .await
        .expect("failed to create conversation");
    let msg = sample_message(conv.id, a.id, "v1");
    store.insert_message(&msg, &[]).await.expect("insert failed");

    let noop = store
        .apply_edit(ApplyEditRequest {
            message_id: msg.id,
            new_body: "v1".to_string(),
            editor_id: a.id,
            reason: None,
        })
        .await
        .expect("edit failed");
    assert!(noop.history.is_none());

    let edited = store
        .apply_edit(ApplyEditRequest {
            message_id: msg.id,
            new_body: "v2".to_string(),
            editor_id: a.id,
            reason: Some("clarify".to_string()),
        })
        .await
        .expect("edit failed");
    assert_eq!(edited.message.body, "v2");
    assert!(edited.message.edited);

    let history = store
        .history_for_message(msg.id)
        .await
        .expect("history failed");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_body, "v1");
}

#[tokio::test]
#[ignore]
async fn delete_user_cascade_counts_and_purges() {
    let store = setup_store().await;
    let a = seed_user(&store, "leaver").await;
    let b = seed_user(&store, "stayer").await;
    let conv = store
        .create_conversation(CreateConversationRequest {
            participant_ids: vec![a.id, b.id],
            is_group: false,
            group_name: None,
        })
        .await
        .expect("failed to create conversation");

    let from_a = sample_message(conv.id, a.id, "from a");
    store
        .insert_message(&from_a, &[sample_notification(b.id, from_a.id)])
        .await
        .expect("insert failed");
    let mut reply = sample_message(conv.id, b.id, "from b");
    reply.parent_id = Some(from_a.id);
    store
        .insert_message(&reply, &[sample_notification(a.id, reply.id)])
        .await
        .expect("insert failed");

    let summary = store.delete_user(a.id).await.expect("cascade failed");
    assert_eq!(summary.sent_messages, 1);
    assert_eq!(summary.received_messages, 1);
    assert_eq!(summary.notifications, 1);
    assert_eq!(summary.orphaned_notifications, 1);
    assert_eq!(summary.conversations_deleted, 0);
    assert_eq!(summary.conversations_left, 1);

    // The reply survives with its parent link severed.
    let survivor = store.fetch_message(reply.id).await.expect("fetch failed");
    assert_eq!(survivor.parent_id, None);
    assert!(store
        .notifications_for_user(b.id)
        .await
        .expect("listing failed")
        .iter()
        .all(|n| n.message_id != Some(from_a.id)));
    assert!(store.delete_user(a.id).await.is_err());
}
