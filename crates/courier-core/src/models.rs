//! Core data models for courier.
//!
//! These types are shared across all courier crates and represent the
//! persisted domain entities plus the read-side projections built from them.
//!
//! The message shape is the conversation-threaded one: every message belongs
//! to a conversation and may reference a parent message in the same
//! conversation, forming a forest of reply threads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::defaults::PREVIEW_LEN;
use crate::error::{Error, Result};

// =============================================================================
// USER
// =============================================================================

/// A registered account. Owns sent messages, conversation memberships,
/// notifications, and edit-history attributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Unique, compared case-insensitively.
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Request for creating a new user.
#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
}

// =============================================================================
// CONVERSATION
// =============================================================================

/// A conversation between two (direct) or more (group) participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_ids: Vec<Uuid>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request for creating a new conversation.
#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<Uuid>,
    pub is_group: bool,
    pub group_name: Option<String>,
}

impl CreateConversationRequest {
    /// Validate participant-set invariants before any persistence.
    ///
    /// A direct (non-group) conversation must have exactly two distinct
    /// participants; a group needs at least one.
    pub fn validate(&self) -> Result<()> {
        let mut distinct = self.participant_ids.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != self.participant_ids.len() {
            return Err(Error::Validation(
                "duplicate participant ids".to_string(),
            ));
        }
        if self.participant_ids.is_empty() {
            return Err(Error::Validation(
                "conversation requires at least one participant".to_string(),
            ));
        }
        if !self.is_group && self.participant_ids.len() != 2 {
            return Err(Error::Validation(format!(
                "direct conversation requires exactly 2 participants, got {}",
                self.participant_ids.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A message in a conversation.
///
/// `id` is a UUIDv7, so sibling ordering by `created_at` is stable under the
/// id as a tiebreaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Parent message for threaded replies. Never cyclic, never `id` itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub body: String,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request for sending a message.
#[derive(Debug, Clone)]
pub struct CreateMessageRequest {
    pub sender_id: Uuid,
    pub conversation_id: Uuid,
    pub body: String,
    /// Set when this message is a threaded reply.
    pub parent_id: Option<Uuid>,
}

// =============================================================================
// MESSAGE HISTORY
// =============================================================================

/// Immutable snapshot of a message body taken before a content-changing edit.
///
/// Append-only: rows are never mutated and only removed by the user-deletion
/// cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHistory {
    pub id: Uuid,
    pub message_id: Uuid,
    pub old_body: String,
    pub edited_by: Uuid,
    pub edited_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// =============================================================================
// NOTIFICATION
// =============================================================================

/// What triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewMessage,
    System,
    Reminder,
}

impl NotificationKind {
    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewMessage => "new_message",
            NotificationKind::System => "system",
            NotificationKind::Reminder => "reminder",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new_message" => Ok(NotificationKind::NewMessage),
            "system" => Ok(NotificationKind::System),
            "reminder" => Ok(NotificationKind::Reminder),
            other => Err(Error::Serialization(format!(
                "unknown notification kind: {}",
                other
            ))),
        }
    }
}

/// A persisted notification record for later client pull.
///
/// Created only by the fan-out engine (kind `new_message`) or by system
/// events; never edited, only marked read. At most one exists per
/// `(user_id, message_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    /// The message that triggered this notification, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// READ-SIDE PROJECTIONS
// =============================================================================

/// A materialized reply-thread node.
///
/// `reply_count` always reflects the true direct-child count, even when the
/// node sits at the depth bound and its `replies` were not expanded
/// (`truncated = true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadNode {
    pub message: Message,
    /// Direct replies, sorted by creation time ascending.
    pub replies: Vec<ThreadNode>,
    pub reply_count: usize,
    pub truncated: bool,
}

/// Deterministic record of what a user-deletion cascade removed.
///
/// All counts reflect the state at the start of the cascade transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub user_id: Uuid,
    pub sent_messages: i64,
    pub received_messages: i64,
    pub notifications: i64,
    pub history_entries: i64,
    /// Conversations the user was detached from (and that survived).
    pub conversations_left: i64,
    /// Conversations deleted because the detachment left them empty.
    pub conversations_deleted: i64,
    /// Notifications purged because their source message no longer exists.
    pub orphaned_notifications: i64,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Truncated message preview for notification bodies.
///
/// First [`PREVIEW_LEN`] characters with a trailing ellipsis when the body is
/// longer. Operates on chars, never splits a multi-byte sequence.
pub fn preview(body: &str) -> String {
    let mut out: String = body.chars().take(PREVIEW_LEN).collect();
    if body.chars().count() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}
