//! In-memory implementation of the entity store.
//!
//! All state lives behind a single async mutex, so every operation is
//! trivially atomic: a send's message + notifications land together, edits
//! serialize, and the deletion cascade observes a frozen snapshot. Used by
//! the default (non-Postgres) test suites and as an embedding-friendly
//! backend for tools.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use courier_core::defaults::UNREAD_FETCH_LIMIT;
use courier_core::{
    diff_edit, ApplyEditRequest, CleanupSummary, Conversation, CreateConversationRequest,
    CreateUserRequest, EditOutcome, Error, Message, MessageHistory, MessageStore, Notification,
    Result, User,
};

#[derive(Default)]
struct MemState {
    users: HashMap<Uuid, User>,
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    history: HashMap<Uuid, MessageHistory>,
    notifications: HashMap<Uuid, Notification>,
}

impl MemState {
    fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.participant_ids.contains(&user_id))
            .unwrap_or(false)
    }

    fn unread_received(&self, user_id: Uuid) -> Vec<Message> {
        self.messages
            .values()
            .filter(|m| {
                !m.is_read
                    && m.sender_id != user_id
                    && self.is_participant(m.conversation_id, user_id)
            })
            .cloned()
            .collect()
    }
}

/// In-memory [`MessageStore`] backed by a single mutex.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemStore {
    async fn create_user(&self, req: CreateUserRequest) -> Result<User> {
        let mut state = self.state.lock().await;
        let lowered = req.email.to_lowercase();
        if state.users.values().any(|u| u.email.to_lowercase() == lowered) {
            return Err(Error::Validation(format!(
                "email already registered: {}",
                req.email
            )));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: req.email,
            display_name: req.display_name,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn fetch_user(&self, id: Uuid) -> Result<User> {
        let state = self.state.lock().await;
        state.users.get(&id).cloned().ok_or(Error::UserNotFound(id))
    }

    async fn user_exists(&self, id: Uuid) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.users.contains_key(&id))
    }

    async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation> {
        req.validate()?;
        let mut state = self.state.lock().await;
        for &uid in &req.participant_ids {
            if !state.users.contains_key(&uid) {
                return Err(Error::UserNotFound(uid));
            }
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_ids: req.participant_ids,
            is_group: req.is_group,
            group_name: req.group_name,
            created_at: now,
            updated_at: now,
        };
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn fetch_conversation(&self, id: Uuid) -> Result<Conversation> {
        let state = self.state.lock().await;
        state
            .conversations
            .get(&id)
            .cloned()
            .ok_or(Error::ConversationNotFound(id))
    }

    async fn participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.lock().await;
        state
            .conversations
            .get(&conversation_id)
            .map(|c| c.participant_ids.clone())
            .ok_or(Error::ConversationNotFound(conversation_id))
    }

    async fn insert_message(
        &self,
        message: &Message,
        notifications: &[Notification],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(Error::ConversationNotFound(message.conversation_id));
        }
        if !state.users.contains_key(&message.sender_id) {
            return Err(Error::UserNotFound(message.sender_id));
        }
        state.messages.insert(message.id, message.clone());
        for n in notifications {
            // Mirrors the store's dedup law: at most one notification per
            // (recipient, message) pair.
            let duplicate = n.message_id.is_some()
                && state
                    .notifications
                    .values()
                    .any(|e| e.user_id == n.user_id && e.message_id == n.message_id);
            if !duplicate {
                state.notifications.insert(n.id, n.clone());
            }
        }
        Ok(())
    }

    async fn fetch_message(&self, id: Uuid) -> Result<Message> {
        let state = self.state.lock().await;
        state
            .messages
            .get(&id)
            .cloned()
            .ok_or(Error::MessageNotFound(id))
    }

    async fn apply_edit(&self, req: ApplyEditRequest) -> Result<EditOutcome> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let existing = state
            .messages
            .get(&req.message_id)
            .cloned()
            .ok_or(Error::MessageNotFound(req.message_id))?;

        let history = diff_edit(&existing, &req.new_body, req.editor_id, req.reason, now);

        let message = if let Some(ref entry) = history {
            state.history.insert(entry.id, entry.clone());
            let stored = state
                .messages
                .get_mut(&req.message_id)
                .ok_or(Error::MessageNotFound(req.message_id))?;
            courier_core::history::apply_edit_fields(stored, &req.new_body, now);
            stored.clone()
        } else {
            existing
        };

        Ok(EditOutcome { message, history })
    }

    async fn children_of(&self, parent_ids: &[Uuid]) -> Result<Vec<Message>> {
        let state = self.state.lock().await;
        let wanted: HashSet<Uuid> = parent_ids.iter().copied().collect();
        let mut children: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.parent_id.map(|p| wanted.contains(&p)).unwrap_or(false))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(children)
    }

    async fn reply_counts(&self, parent_ids: &[Uuid]) -> Result<HashMap<Uuid, usize>> {
        let state = self.state.lock().await;
        let wanted: HashSet<Uuid> = parent_ids.iter().copied().collect();
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for m in state.messages.values() {
            if let Some(p) = m.parent_id {
                if wanted.contains(&p) {
                    *counts.entry(p).or_default() += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn unread_for_user(&self, user_id: Uuid) -> Result<Vec<Message>> {
        let state = self.state.lock().await;
        let mut unread = state.unread_received(user_id);
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        unread.truncate(UNREAD_FETCH_LIMIT as usize);
        Ok(unread)
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.unread_received(user_id).len() as u64)
    }

    async fn unread_between(&self, user_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        let state = self.state.lock().await;
        let mut unread: Vec<Message> = state
            .messages
            .values()
            .filter(|m| {
                !m.is_read
                    && m.sender_id == partner_id
                    && state.is_participant(m.conversation_id, user_id)
                    && state
                        .conversations
                        .get(&m.conversation_id)
                        .map(|c| !c.is_group)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        unread.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        unread.truncate(UNREAD_FETCH_LIMIT as usize);
        Ok(unread)
    }

    async fn bulk_mark_read(&self, user_id: Uuid, message_ids: Option<&[Uuid]>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let selected: Option<HashSet<Uuid>> =
            message_ids.map(|ids| ids.iter().copied().collect());

        let target_ids: Vec<Uuid> = state
            .messages
            .values()
            .filter(|m| {
                !m.is_read
                    && m.sender_id != user_id
                    && selected.as_ref().map(|s| s.contains(&m.id)).unwrap_or(true)
                    && state.is_participant(m.conversation_id, user_id)
            })
            .map(|m| m.id)
            .collect();

        let now = Utc::now();
        for id in &target_ids {
            if let Some(m) = state.messages.get_mut(id) {
                m.is_read = true;
                m.read_at = Some(now);
            }
        }
        Ok(target_ids.len() as u64)
    }

    async fn notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut out: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let n = state
            .notifications
            .get_mut(&notification_id)
            .ok_or_else(|| Error::NotFound(format!("notification {}", notification_id)))?;
        if !n.is_read {
            n.is_read = true;
            n.read_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn history_for_message(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        let state = self.state.lock().await;
        let mut out: Vec<MessageHistory> = state
            .history
            .values()
            .filter(|h| h.message_id == message_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.edited_at.cmp(&b.edited_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<CleanupSummary> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(Error::UserNotFound(user_id));
        }

        // All counts are captured against the pre-deletion snapshot.
        let sent_messages = state
            .messages
            .values()
            .filter(|m| m.sender_id == user_id)
            .count() as i64;

        let received_messages = state
            .messages
            .values()
            .filter(|m| {
                m.sender_id != user_id && state.is_participant(m.conversation_id, user_id)
            })
            .count() as i64;

        let notifications = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .count() as i64;

        let history_entries = state
            .history
            .values()
            .filter(|h| h.edited_by == user_id)
            .count() as i64;

        let member_of: Vec<Uuid> = state
            .conversations
            .values()
            .filter(|c| c.participant_ids.contains(&user_id))
            .map(|c| c.id)
            .collect();

        let emptied: Vec<Uuid> = state
            .conversations
            .values()
            .filter(|c| c.participant_ids == [user_id])
            .map(|c| c.id)
            .collect();

        let sent_ids: HashSet<Uuid> = state
            .messages
            .values()
            .filter(|m| m.sender_id == user_id)
            .map(|m| m.id)
            .collect();

        let orphaned_notifications = state
            .notifications
            .values()
            .filter(|n| {
                n.user_id != user_id
                    && n.message_id.map(|m| sent_ids.contains(&m)).unwrap_or(false)
            })
            .count() as i64;

        // Mutate: messages sent by the user go away, along with their
        // history rows and the notifications they triggered. Replies to a
        // removed message keep existing with a cleared parent link.
        state.messages.retain(|_, m| m.sender_id != user_id);
        for m in state.messages.values_mut() {
            if m.parent_id.map(|p| sent_ids.contains(&p)).unwrap_or(false) {
                m.parent_id = None;
            }
        }
        state
            .history
            .retain(|_, h| h.edited_by != user_id && !sent_ids.contains(&h.message_id));
        state.notifications.retain(|_, n| {
            n.user_id != user_id
                && !n.message_id.map(|m| sent_ids.contains(&m)).unwrap_or(false)
        });

        for cid in &member_of {
            if let Some(c) = state.conversations.get_mut(cid) {
                c.participant_ids.retain(|&p| p != user_id);
                c.updated_at = Utc::now();
            }
        }
        for cid in &emptied {
            state.conversations.remove(cid);
        }
        state.users.remove(&user_id);

        Ok(CleanupSummary {
            user_id,
            sent_messages,
            received_messages,
            notifications,
            history_entries,
            conversations_left: member_of.len() as i64 - emptied.len() as i64,
            conversations_deleted: emptied.len() as i64,
            orphaned_notifications,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::NotificationKind;

    async fn seed_user(store: &MemStore, email: &str) -> User {
        store
            .create_user(CreateUserRequest {
                email: email.to_string(),
                display_name: email.split('@').next().unwrap().to_string(),
            })
            .await
            .unwrap()
    }

    fn message_in(conversation_id: Uuid, sender_id: Uuid, body: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id,
            sender_id,
            parent_id: None,
            body: body.to_string(),
            is_read: false,
            read_at: None,
            edited: false,
            edited_at: None,
            created_at: Utc::now(),
        }
    }

    fn notification_for(user_id: Uuid, message_id: Uuid) -> Notification {
        Notification {
            id: Uuid::now_v7(),
            user_id,
            message_id: Some(message_id),
            kind: NotificationKind::NewMessage,
            title: "t".to_string(),
            body: "b".to_string(),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    async fn direct_conversation(store: &MemStore, a: Uuid, b: Uuid) -> Conversation {
        store
            .create_conversation(CreateConversationRequest {
                participant_ids: vec![a, b],
                is_group: false,
                group_name: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_email_rejected_case_insensitively() {
        let store = MemStore::new();
        seed_user(&store, "ada@example.com").await;
        let err = store
            .create_user(CreateUserRequest {
                email: "ADA@example.com".to_string(),
                display_name: "Ada".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn insert_message_dedups_notifications_per_recipient() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;

        let msg = message_in(conv.id, a.id, "hello");
        let n1 = notification_for(b.id, msg.id);
        let n2 = notification_for(b.id, msg.id);
        store.insert_message(&msg, &[n1, n2]).await.unwrap();

        let notifications = store.notifications_for_user(b.id).await.unwrap();
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn insert_message_rejects_unknown_conversation() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;

        let msg = message_in(Uuid::now_v7(), a.id, "orphan");
        let err = store.insert_message(&msg, &[]).await.unwrap_err();
        assert!(matches!(err, Error::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn insert_message_rejects_unknown_sender() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;

        let msg = message_in(conv.id, Uuid::now_v7(), "ghost");
        let err = store.insert_message(&msg, &[]).await.unwrap_err();
        assert!(matches!(err, Error::UserNotFound(_)));
    }

    #[tokio::test]
    async fn edit_with_identical_body_writes_no_history() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;
        let msg = message_in(conv.id, a.id, "same");
        store.insert_message(&msg, &[]).await.unwrap();

        let outcome = store
            .apply_edit(ApplyEditRequest {
                message_id: msg.id,
                new_body: "same".to_string(),
                editor_id: a.id,
                reason: None,
            })
            .await
            .unwrap();

        assert!(outcome.history.is_none());
        assert!(!outcome.message.edited);
        assert!(store.history_for_message(msg.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_records_prior_body_and_flags_message() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;
        let msg = message_in(conv.id, a.id, "first");
        store.insert_message(&msg, &[]).await.unwrap();

        let outcome = store
            .apply_edit(ApplyEditRequest {
                message_id: msg.id,
                new_body: "second".to_string(),
                editor_id: a.id,
                reason: Some("typo".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(outcome.message.body, "second");
        assert!(outcome.message.edited);
        let history = store.history_for_message(msg.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_body, "first");
        assert_eq!(history[0].reason.as_deref(), Some("typo"));
    }

    #[tokio::test]
    async fn unread_listing_excludes_own_and_read_messages() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;

        let from_b = message_in(conv.id, b.id, "for a");
        let mut read_from_b = message_in(conv.id, b.id, "already read");
        read_from_b.is_read = true;
        let from_a = message_in(conv.id, a.id, "a's own");
        store.insert_message(&from_b, &[]).await.unwrap();
        store.insert_message(&read_from_b, &[]).await.unwrap();
        store.insert_message(&from_a, &[]).await.unwrap();

        let unread = store.unread_for_user(a.id).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, from_b.id);
        assert_eq!(store.count_unread(a.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_mark_read_scoped_to_selection() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;

        let m1 = message_in(conv.id, b.id, "one");
        let m2 = message_in(conv.id, b.id, "two");
        store.insert_message(&m1, &[]).await.unwrap();
        store.insert_message(&m2, &[]).await.unwrap();

        let marked = store.bulk_mark_read(a.id, Some(&[m1.id])).await.unwrap();
        assert_eq!(marked, 1);
        assert_eq!(store.count_unread(a.id).await.unwrap(), 1);

        let marked = store.bulk_mark_read(a.id, None).await.unwrap();
        assert_eq!(marked, 1);
        assert_eq!(store.count_unread(a.id).await.unwrap(), 0);

        // Idempotent: nothing left to mark.
        assert_eq!(store.bulk_mark_read(a.id, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_user_cascades_and_reports_counts() {
        let store = MemStore::new();
        let a = seed_user(&store, "a@example.com").await;
        let b = seed_user(&store, "b@example.com").await;
        let conv = direct_conversation(&store, a.id, b.id).await;

        let from_a = message_in(conv.id, a.id, "hello b");
        store
            .insert_message(&from_a, &[notification_for(b.id, from_a.id)])
            .await
            .unwrap();
        let mut reply = message_in(conv.id, b.id, "hello a");
        reply.parent_id = Some(from_a.id);
        store
            .insert_message(&reply, &[notification_for(a.id, reply.id)])
            .await
            .unwrap();

        let summary = store.delete_user(a.id).await.unwrap();
        assert_eq!(summary.sent_messages, 1);
        assert_eq!(summary.received_messages, 1);
        assert_eq!(summary.notifications, 1);
        assert_eq!(summary.orphaned_notifications, 1);
        assert_eq!(summary.conversations_left, 1);
        assert_eq!(summary.conversations_deleted, 0);

        // b's reply survives with the parent link cleared, b's notification
        // about a's message is purged.
        let survivor = store.fetch_message(reply.id).await.unwrap();
        assert_eq!(survivor.parent_id, None);
        assert!(store.notifications_for_user(b.id).await.unwrap().is_empty());
        assert!(matches!(
            store.fetch_message(from_a.id).await.unwrap_err(),
            Error::MessageNotFound(_)
        ));
        assert!(matches!(
            store.delete_user(a.id).await.unwrap_err(),
            Error::UserNotFound(_)
        ));
    }

    #[tokio::test]
    async fn deleting_sole_participant_removes_conversation() {
        let store = MemStore::new();
        let a = seed_user(&store, "solo@example.com").await;
        let conv = store
            .create_conversation(CreateConversationRequest {
                participant_ids: vec![a.id],
                is_group: true,
                group_name: Some("notes".to_string()),
            })
            .await
            .unwrap();

        let summary = store.delete_user(a.id).await.unwrap();
        assert_eq!(summary.conversations_deleted, 1);
        assert_eq!(summary.conversations_left, 0);
        assert!(matches!(
            store.fetch_conversation(conv.id).await.unwrap_err(),
            Error::ConversationNotFound(_)
        ));
    }
}
