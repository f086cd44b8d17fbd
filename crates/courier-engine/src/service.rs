//! Message lifecycle orchestration.
//!
//! [`MessagingService`] ties the pieces together in a fixed order: validate,
//! persist atomically through the store, invalidate the unread cache, then
//! emit domain events. Events are post-commit observability; no subscriber
//! can observe a state that was rolled back, and a lagging subscriber never
//! blocks a write.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use courier_core::{
    fan_out, new_v7, ApplyEditRequest, CleanupSummary, Conversation, CreateConversationRequest,
    CreateMessageRequest, CreateUserRequest, DomainEvent, EditOutcome, Error, EventBus, Message,
    MessageHistory, MessageStore, Notification, Result, ThreadNode, User,
};

use crate::thread::ThreadBuilder;
use crate::unread::UnreadIndex;

/// A sent message plus the notification rows that committed with it.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message: Message,
    pub notifications: Vec<Notification>,
}

/// Entry point for the message lifecycle.
#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn MessageStore>,
    cache: UnreadIndex,
    events: EventBus,
}

impl MessagingService {
    pub fn new(store: Arc<dyn MessageStore>, cache: UnreadIndex, events: EventBus) -> Self {
        Self {
            store,
            cache,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub async fn create_user(&self, req: CreateUserRequest) -> Result<User> {
        self.store.create_user(req).await
    }

    pub async fn create_conversation(
        &self,
        req: CreateConversationRequest,
    ) -> Result<Conversation> {
        self.store.create_conversation(req).await
    }

    /// Send a message: persist it with its notification fan-out in one
    /// atomic store operation, then invalidate recipients' unread caches
    /// and emit events.
    #[instrument(skip(self, req), fields(subsystem = "engine", op = "create_message"))]
    pub async fn create_message(&self, req: CreateMessageRequest) -> Result<SendReceipt> {
        let started = Instant::now();

        if req.body.trim().is_empty() {
            return Err(Error::Validation("message body must not be empty".into()));
        }

        let sender = self.store.fetch_user(req.sender_id).await?;
        let conversation = self.store.fetch_conversation(req.conversation_id).await?;
        if !conversation.participant_ids.contains(&req.sender_id) {
            return Err(Error::Validation(format!(
                "user {} is not a participant of conversation {}",
                req.sender_id, req.conversation_id
            )));
        }

        // A reply's parent must live in the same conversation. The parent's
        // author is notified even after leaving the conversation.
        let parent_author = match req.parent_id {
            Some(parent_id) => {
                let parent = self.store.fetch_message(parent_id).await?;
                if parent.conversation_id != req.conversation_id {
                    return Err(Error::Validation(format!(
                        "parent message {} belongs to a different conversation",
                        parent_id
                    )));
                }
                Some(parent.sender_id)
            }
            None => None,
        };

        let now = Utc::now();
        let message = Message {
            id: new_v7(),
            conversation_id: req.conversation_id,
            sender_id: req.sender_id,
            parent_id: req.parent_id,
            body: req.body,
            is_read: false,
            read_at: None,
            edited: false,
            edited_at: None,
            created_at: now,
        };

        let notifications = fan_out(
            &message,
            &conversation.participant_ids,
            parent_author,
            &sender.display_name,
            now,
        );

        self.store.insert_message(&message, &notifications).await?;

        for n in &notifications {
            self.cache.invalidate_user(n.user_id).await;
        }

        self.events.emit(DomainEvent::MessageCreated {
            message_id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            notification_count: notifications.len(),
        });
        for n in &notifications {
            self.events.emit(DomainEvent::NotificationCreated {
                notification_id: n.id,
                user_id: n.user_id,
                message_id: n.message_id,
            });
        }

        info!(
            subsystem = "engine",
            op = "create_message",
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            notification_count = notifications.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "message sent"
        );

        Ok(SendReceipt {
            message,
            notifications,
        })
    }

    /// Edit a message body. Only the original sender may edit; an edit that
    /// changes nothing records nothing.
    #[instrument(skip(self, req), fields(subsystem = "engine", op = "update_message"))]
    pub async fn update_message(&self, req: ApplyEditRequest) -> Result<EditOutcome> {
        let existing = self.store.fetch_message(req.message_id).await?;
        if existing.sender_id != req.editor_id {
            return Err(Error::Validation(format!(
                "user {} is not the sender of message {}",
                req.editor_id, req.message_id
            )));
        }

        let outcome = self.store.apply_edit(req).await?;

        if let Some(ref history) = outcome.history {
            self.events.emit(DomainEvent::MessageEdited {
                message_id: outcome.message.id,
                editor_id: history.edited_by,
                history_id: history.id,
            });
            info!(
                subsystem = "engine",
                op = "update_message",
                message_id = %outcome.message.id,
                history_id = %history.id,
                "message edited"
            );
        } else {
            debug!(
                subsystem = "engine",
                op = "update_message",
                message_id = %outcome.message.id,
                "edit changed nothing, skipped"
            );
        }
        Ok(outcome)
    }

    /// Reconstruct the reply tree rooted at `message_id`.
    pub async fn get_thread(&self, message_id: Uuid) -> Result<ThreadNode> {
        ThreadBuilder::new(self.store.as_ref()).build(message_id).await
    }

    /// Reply tree with explicit depth and node bounds.
    pub async fn get_thread_with_limits(
        &self,
        message_id: Uuid,
        max_depth: usize,
        node_cap: usize,
    ) -> Result<ThreadNode> {
        ThreadBuilder::with_limits(self.store.as_ref(), max_depth, node_cap)
            .build(message_id)
            .await
    }

    /// Unread messages addressed to `user_id`, newest first.
    pub async fn unread_messages(&self, user_id: Uuid) -> Result<Vec<Message>> {
        let key = self.cache.cache_key("list", user_id, None);
        if let Some(cached) = self.cache.get::<Vec<Message>>(&key).await {
            return Ok(cached);
        }
        let generation = self.cache.generation(user_id).await;
        let unread = self.store.unread_for_user(user_id).await?;
        self.cache.set(&key, user_id, generation, &unread).await;
        Ok(unread)
    }

    /// Badge count of unread messages for `user_id`.
    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        let key = self.cache.cache_key("count", user_id, None);
        if let Some(cached) = self.cache.get::<u64>(&key).await {
            return Ok(cached);
        }
        let generation = self.cache.generation(user_id).await;
        let count = self.store.count_unread(user_id).await?;
        self.cache.set(&key, user_id, generation, &count).await;
        Ok(count)
    }

    /// Unread direct messages from `partner_id` to `user_id`, oldest first
    /// (conversation-view order).
    pub async fn unread_between(&self, user_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        let key = self.cache.cache_key("between", user_id, Some(partner_id));
        if let Some(cached) = self.cache.get::<Vec<Message>>(&key).await {
            return Ok(cached);
        }
        let generation = self.cache.generation(user_id).await;
        let unread = self.store.unread_between(user_id, partner_id).await?;
        self.cache.set(&key, user_id, generation, &unread).await;
        Ok(unread)
    }

    /// Mark messages read for `user_id`. With `message_ids` the marking is
    /// scoped to that selection; without, everything unread is marked.
    /// Returns how many rows changed.
    pub async fn mark_read(&self, user_id: Uuid, message_ids: Option<&[Uuid]>) -> Result<u64> {
        let marked = self.store.bulk_mark_read(user_id, message_ids).await?;
        if marked > 0 {
            self.cache.invalidate_user(user_id).await;
        }
        info!(
            subsystem = "engine",
            op = "mark_read",
            user_id = %user_id,
            result_count = marked,
            "messages marked read"
        );
        Ok(marked)
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.store.notifications_for_user(user_id).await
    }

    pub async fn mark_notification_read(&self, notification_id: Uuid) -> Result<()> {
        self.store.mark_notification_read(notification_id).await
    }

    /// Edit history of a message, oldest first.
    pub async fn message_history(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        // Surface MessageNotFound rather than an empty list for a message
        // that never existed.
        self.store.fetch_message(message_id).await?;
        self.store.history_for_message(message_id).await
    }

    /// Delete a user and everything hanging off them. Returns counts
    /// captured before any row was removed.
    #[instrument(skip(self), fields(subsystem = "engine", op = "delete_user"))]
    pub async fn delete_user(&self, user_id: Uuid) -> Result<CleanupSummary> {
        let started = Instant::now();
        let summary = self.store.delete_user(user_id).await?;

        // The cascade can change unread state for any former correspondent,
        // so the whole cache goes.
        self.cache.invalidate_all().await;

        self.events.emit(DomainEvent::UserDeleted {
            user_id,
            sent_messages: summary.sent_messages,
            notifications: summary.notifications,
            history_entries: summary.history_entries,
        });

        info!(
            subsystem = "engine",
            op = "delete_user",
            user_id = %user_id,
            sent_messages = summary.sent_messages,
            conversations_deleted = summary.conversations_deleted,
            duration_ms = started.elapsed().as_millis() as u64,
            "user deleted"
        );
        Ok(summary)
    }
}
