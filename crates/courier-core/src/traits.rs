//! The entity store interface.
//!
//! `MessageStore` is the one seam between the lifecycle pipeline and
//! persistence. Adapters (`courier-db`) implement it over PostgreSQL and
//! over an in-memory state; everything above it is backend-agnostic.
//!
//! The mutation methods are deliberately high-level: each one names an
//! atomic unit. `insert_message` persists the message together with its
//! fan-out rows, `apply_edit` serializes per message and captures at most
//! one history row per actual body transition, `delete_user` runs the whole
//! counts-then-mutate cascade. Keeping the transaction boundary inside the
//! adapter is what lets both backends honor the same guarantees.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Request for applying an edit to an existing message.
///
/// The adapter re-reads the current body under its per-message lock and runs
/// [`crate::history::diff_edit`] there, so two racing editors cannot both
/// snapshot the same old body.
#[derive(Debug, Clone)]
pub struct ApplyEditRequest {
    pub message_id: Uuid,
    pub new_body: String,
    pub editor_id: Uuid,
    pub reason: Option<String>,
}

/// Result of an edit: the stored message and the history row, if the body
/// actually changed. A no-op edit returns the message untouched and
/// `history: None`.
#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub message: Message,
    pub history: Option<MessageHistory>,
}

/// Repository interface over the persisted entities.
///
/// All reads reflect committed state only; no method ever exposes a
/// half-applied mutation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    // ── users ──────────────────────────────────────────────────────────────

    /// Insert a new user. Email uniqueness is case-insensitive.
    async fn create_user(&self, req: CreateUserRequest) -> Result<User>;

    /// Fetch a user by id.
    async fn fetch_user(&self, id: Uuid) -> Result<User>;

    /// Check whether a user exists.
    async fn user_exists(&self, id: Uuid) -> Result<bool>;

    // ── conversations ──────────────────────────────────────────────────────

    /// Create a conversation after validating its participant set.
    async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation>;

    /// Fetch a conversation with its participant ids.
    async fn fetch_conversation(&self, id: Uuid) -> Result<Conversation>;

    /// Participant ids of a conversation.
    async fn participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>>;

    // ── messages ───────────────────────────────────────────────────────────

    /// Persist a message together with its fan-out notifications in one
    /// transaction. If any notification row fails, the message row is rolled
    /// back too. Re-inserting a notification for an existing
    /// `(user_id, message_id)` pair is a silent no-op (dedup law).
    async fn insert_message(&self, message: &Message, notifications: &[Notification])
        -> Result<()>;

    /// Fetch a message by id.
    async fn fetch_message(&self, id: Uuid) -> Result<Message>;

    /// Apply an edit under per-message serialization. Exactly one history
    /// row is appended per actual body transition; identical content is a
    /// no-op. `MessageNotFound` if the row was deleted concurrently.
    async fn apply_edit(&self, req: ApplyEditRequest) -> Result<EditOutcome>;

    /// All direct children of the given parents, sorted by creation time
    /// ascending. One call fetches an entire thread level.
    async fn children_of(&self, parent_ids: &[Uuid]) -> Result<Vec<Message>>;

    /// Direct-reply counts for the given parents. Parents with no replies
    /// are absent from the map.
    async fn reply_counts(&self, parent_ids: &[Uuid]) -> Result<HashMap<Uuid, usize>>;

    // ── unread index backing queries ───────────────────────────────────────

    /// Unread messages for a user: in a conversation they participate in,
    /// not sent by them, not yet read. Most recent first.
    async fn unread_for_user(&self, user_id: Uuid) -> Result<Vec<Message>>;

    /// Count of unread messages for a user.
    async fn count_unread(&self, user_id: Uuid) -> Result<u64>;

    /// Unread messages from `partner_id` to `user_id` in their direct
    /// conversation, chronological (ascending) for conversational display.
    async fn unread_between(&self, user_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>>;

    /// Mark messages read for a user in one atomic update, setting
    /// `read_at`. With `None`, marks all currently-unread messages. Never
    /// touches messages the user sent. Returns the number of rows updated;
    /// repeated calls update nothing further.
    async fn bulk_mark_read(&self, user_id: Uuid, message_ids: Option<&[Uuid]>) -> Result<u64>;

    // ── notifications & history ────────────────────────────────────────────

    /// Notifications for a user, most recent first.
    async fn notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>>;

    /// Mark one notification read (idempotent).
    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<()>;

    /// Edit history for a message, oldest first.
    async fn history_for_message(&self, message_id: Uuid) -> Result<Vec<MessageHistory>>;

    // ── cascade ────────────────────────────────────────────────────────────

    /// Delete a user and cascade: counts are captured before any mutation,
    /// then sent messages, notifications, history entries, and conversation
    /// memberships are removed; conversations left empty are deleted;
    /// orphaned notifications are purged. All in one transaction.
    /// `UserNotFound` with zero side effects when the id does not exist.
    async fn delete_user(&self, user_id: Uuid) -> Result<CleanupSummary>;
}
