//! PostgreSQL implementation of the entity store.
//!
//! Every mutation runs in a single transaction so the lifecycle guarantees
//! hold: message + fan-out rows commit together, edits serialize on a
//! `SELECT … FOR UPDATE` row lock, and the user-deletion cascade captures
//! its counts before touching anything. Read-only queries get a bounded
//! transient-error retry with backoff; mutations never retry.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_core::defaults::{RETRY_BASE_DELAY_MS, RETRY_MAX_ATTEMPTS, UNREAD_FETCH_LIMIT};
use courier_core::{
    diff_edit, ApplyEditRequest, CleanupSummary, Conversation, CreateConversationRequest,
    CreateUserRequest, EditOutcome, Error, Message, MessageHistory, MessageStore, Notification,
    NotificationKind, Result, User,
};

/// PostgreSQL-backed [`MessageStore`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PgStore over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Retry a read-only operation on transient store errors.
///
/// Exponential backoff with jitter, bounded by
/// [`RETRY_MAX_ATTEMPTS`]. Mutations are excluded: they are not safely
/// re-runnable in general and their transactions already roll back cleanly.
async fn retry_read<T, F, Fut>(op: &'static str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Err(e) if e.is_transient() && attempt + 1 < RETRY_MAX_ATTEMPTS => {
                attempt += 1;
                let backoff = RETRY_BASE_DELAY_MS << attempt;
                let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_DELAY_MS);
                warn!(
                    subsystem = "db",
                    op,
                    attempt,
                    backoff_ms = backoff + jitter,
                    error = %e,
                    "transient store error, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
            other => return other,
        }
    }
}

// ── row mapping ─────────────────────────────────────────────────────────────

fn map_user(row: PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
    }
}

fn map_message(row: PgRow) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        parent_id: row.get("parent_id"),
        body: row.get("body"),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        edited: row.get("edited"),
        edited_at: row.get("edited_at"),
        created_at: row.get("created_at"),
    }
}

fn map_history(row: PgRow) -> MessageHistory {
    MessageHistory {
        id: row.get("id"),
        message_id: row.get("message_id"),
        old_body: row.get("old_body"),
        edited_by: row.get("edited_by"),
        edited_at: row.get("edited_at"),
        reason: row.get("reason"),
    }
}

fn map_notification(row: PgRow) -> Result<Notification> {
    let kind: String = row.get("kind");
    Ok(Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        message_id: row.get("message_id"),
        kind: NotificationKind::from_str(&kind)?,
        title: row.get("title"),
        body: row.get("body"),
        is_read: row.get("is_read"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    })
}

const MESSAGE_COLS: &str =
    "id, conversation_id, sender_id, parent_id, body, is_read, read_at, edited, edited_at, created_at";

// Same columns qualified with the `m` alias, for queries that join.
const MESSAGE_COLS_M: &str = "m.id, m.conversation_id, m.sender_id, m.parent_id, m.body, \
     m.is_read, m.read_at, m.edited, m.edited_at, m.created_at";

impl PgStore {
    async fn fetch_message_in(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        for_update: bool,
    ) -> Result<Message> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let query = format!(
            "SELECT {} FROM messages WHERE id = $1{}",
            MESSAGE_COLS, lock
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        row.map(map_message).ok_or(Error::MessageNotFound(id))
    }

    async fn unread_for_user_query(&self, user_id: Uuid) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {} FROM messages m \
             WHERE m.is_read = FALSE AND m.sender_id <> $1 \
               AND EXISTS (SELECT 1 FROM conversation_participants cp \
                           WHERE cp.conversation_id = m.conversation_id AND cp.user_id = $1) \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT $2",
            MESSAGE_COLS_M
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(UNREAD_FETCH_LIMIT)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(map_message).collect())
    }

    async fn unread_between_query(&self, user_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {} FROM messages m \
             JOIN conversations c ON c.id = m.conversation_id \
             WHERE c.is_group = FALSE AND m.is_read = FALSE AND m.sender_id = $2 \
               AND EXISTS (SELECT 1 FROM conversation_participants cp \
                           WHERE cp.conversation_id = m.conversation_id AND cp.user_id = $1) \
             ORDER BY m.created_at ASC, m.id ASC \
             LIMIT $3",
            MESSAGE_COLS_M
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(partner_id)
            .bind(UNREAD_FETCH_LIMIT)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(map_message).collect())
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn create_user(&self, req: CreateUserRequest) -> Result<User> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))",
        )
        .bind(&req.email)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        if taken {
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
        sqlx::query("INSERT INTO users (id, email, display_name, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(user)
    }

    async fn fetch_user(&self, id: Uuid) -> Result<User> {
        let row = sqlx::query("SELECT id, email, display_name, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(map_user).ok_or(Error::UserNotFound(id))
    }

    async fn user_exists(&self, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn create_conversation(&self, req: CreateConversationRequest) -> Result<Conversation> {
        req.validate()?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for &uid in &req.participant_ids {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                    .bind(uid)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
            if !exists {
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

        sqlx::query(
            "INSERT INTO conversations (id, is_group, group_name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(conversation.id)
        .bind(conversation.is_group)
        .bind(&conversation.group_name)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for &uid in &conversation.participant_ids {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2)",
            )
            .bind(conversation.id)
            .bind(uid)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(conversation)
    }

    async fn fetch_conversation(&self, id: Uuid) -> Result<Conversation> {
        let row = sqlx::query(
            "SELECT id, is_group, group_name, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        let row = row.ok_or(Error::ConversationNotFound(id))?;

        let participant_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1 ORDER BY user_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Conversation {
            id: row.get("id"),
            participant_ids,
            is_group: row.get("is_group"),
            group_name: row.get("group_name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM conversations WHERE id = $1)")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        if !exists {
            return Err(Error::ConversationNotFound(conversation_id));
        }

        sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1 ORDER BY user_id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)
    }

    async fn insert_message(
        &self,
        message: &Message,
        notifications: &[Notification],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO messages \
             (id, conversation_id, sender_id, parent_id, body, is_read, read_at, edited, edited_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.parent_id)
        .bind(&message.body)
        .bind(message.is_read)
        .bind(message.read_at)
        .bind(message.edited)
        .bind(message.edited_at)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for n in notifications {
            // Dedup law: the partial unique index on (user_id, message_id)
            // makes a repeated fan-out for the same message a no-op.
            sqlx::query(
                "INSERT INTO notifications \
                 (id, user_id, message_id, kind, title, body, is_read, read_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (user_id, message_id) WHERE message_id IS NOT NULL DO NOTHING",
            )
            .bind(n.id)
            .bind(n.user_id)
            .bind(n.message_id)
            .bind(n.kind.as_str())
            .bind(&n.title)
            .bind(&n.body)
            .bind(n.is_read)
            .bind(n.read_at)
            .bind(n.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            op = "insert_message",
            message_id = %message.id,
            notification_count = notifications.len(),
            "message persisted with fan-out rows"
        );
        Ok(())
    }

    async fn fetch_message(&self, id: Uuid) -> Result<Message> {
        let query = format!("SELECT {} FROM messages WHERE id = $1", MESSAGE_COLS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(map_message).ok_or(Error::MessageNotFound(id))
    }

    async fn apply_edit(&self, req: ApplyEditRequest) -> Result<EditOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // The row lock serializes racing editors: each one re-reads the
        // current body before diffing, so every actual transition captures
        // the body it really replaced.
        let mut existing = Self::fetch_message_in(&mut tx, req.message_id, true).await?;

        let now = Utc::now();
        let history = diff_edit(&existing, &req.new_body, req.editor_id, req.reason, now);

        if let Some(ref entry) = history {
            sqlx::query(
                "INSERT INTO message_history (id, message_id, old_body, edited_by, edited_at, reason) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(entry.id)
            .bind(entry.message_id)
            .bind(&entry.old_body)
            .bind(entry.edited_by)
            .bind(entry.edited_at)
            .bind(&entry.reason)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            sqlx::query(
                "UPDATE messages SET body = $1, edited = TRUE, edited_at = $2 WHERE id = $3",
            )
            .bind(&req.new_body)
            .bind(now)
            .bind(req.message_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            courier_core::history::apply_edit_fields(&mut existing, &req.new_body, now);
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(EditOutcome {
            message: existing,
            history,
        })
    }

    async fn children_of(&self, parent_ids: &[Uuid]) -> Result<Vec<Message>> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {} FROM messages WHERE parent_id = ANY($1) ORDER BY created_at ASC, id ASC",
            MESSAGE_COLS
        );
        let rows = sqlx::query(&query)
            .bind(parent_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.into_iter().map(map_message).collect())
    }

    async fn reply_counts(&self, parent_ids: &[Uuid]) -> Result<HashMap<Uuid, usize>> {
        if parent_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT parent_id, COUNT(*) AS n FROM messages \
             WHERE parent_id = ANY($1) GROUP BY parent_id",
        )
        .bind(parent_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let parent: Uuid = row.get("parent_id");
                let n: i64 = row.get("n");
                (parent, n as usize)
            })
            .collect())
    }

    async fn unread_for_user(&self, user_id: Uuid) -> Result<Vec<Message>> {
        retry_read("unread_for_user", move || self.unread_for_user_query(user_id)).await
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m \
             WHERE m.is_read = FALSE AND m.sender_id <> $1 \
               AND EXISTS (SELECT 1 FROM conversation_participants cp \
                           WHERE cp.conversation_id = m.conversation_id AND cp.user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count as u64)
    }

    async fn unread_between(&self, user_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        retry_read("unread_between", move || {
            self.unread_between_query(user_id, partner_id)
        })
        .await
    }

    async fn bulk_mark_read(&self, user_id: Uuid, message_ids: Option<&[Uuid]>) -> Result<u64> {
        let result = match message_ids {
            Some(ids) => {
                sqlx::query(
                    "UPDATE messages m SET is_read = TRUE, read_at = NOW() \
                     WHERE m.is_read = FALSE AND m.sender_id <> $1 AND m.id = ANY($2) \
                       AND EXISTS (SELECT 1 FROM conversation_participants cp \
                                   WHERE cp.conversation_id = m.conversation_id AND cp.user_id = $1)",
                )
                .bind(user_id)
                .bind(ids)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "UPDATE messages m SET is_read = TRUE, read_at = NOW() \
                     WHERE m.is_read = FALSE AND m.sender_id <> $1 \
                       AND EXISTS (SELECT 1 FROM conversation_participants cp \
                                   WHERE cp.conversation_id = m.conversation_id AND cp.user_id = $1)",
                )
                .bind(user_id)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, user_id, message_id, kind, title, body, is_read, read_at, created_at \
             FROM notifications WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(map_notification).collect()
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = NOW() \
             WHERE id = $1 AND is_read = FALSE",
        )
        .bind(notification_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM notifications WHERE id = $1)")
                    .bind(notification_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(Error::Database)?;
            if !exists {
                return Err(Error::NotFound(format!(
                    "notification {}",
                    notification_id
                )));
            }
        }
        Ok(())
    }

    async fn history_for_message(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        let rows = sqlx::query(
            "SELECT id, message_id, old_body, edited_by, edited_at, reason \
             FROM message_history WHERE message_id = $1 ORDER BY edited_at ASC, id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(map_history).collect())
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<CleanupSummary> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Lock the user row for the whole cascade; concurrent sends keyed on
        // this user either wait behind the lock or see the row gone.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;
        if locked.is_none() {
            return Err(Error::UserNotFound(user_id));
        }

        // Counts reflect the state at the start of the transaction, captured
        // before any mutation.
        let sent_messages: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE sender_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let received_messages: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m \
             WHERE m.sender_id <> $1 \
               AND EXISTS (SELECT 1 FROM conversation_participants cp \
                           WHERE cp.conversation_id = m.conversation_id AND cp.user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let notifications: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let history_entries: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM message_history WHERE edited_by = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let member_of: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let conversations_deleted: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conversation_participants cp \
             WHERE cp.user_id = $1 \
               AND NOT EXISTS (SELECT 1 FROM conversation_participants o \
                               WHERE o.conversation_id = cp.conversation_id AND o.user_id <> $1)",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let orphaned_notifications: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications n \
             JOIN messages m ON m.id = n.message_id \
             WHERE m.sender_id = $1 AND n.user_id <> $1",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        // The FK graph does the heavy lifting: deleting the user takes out
        // sent messages (and, via the message cascade, their history rows
        // and the notifications they triggered for other users), the user's
        // own notifications, their history attributions, and their
        // membership rows.
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        // Conversations left without participants are deleted, explicitly.
        sqlx::query(
            "DELETE FROM conversations c \
             WHERE NOT EXISTS (SELECT 1 FROM conversation_participants cp \
                               WHERE cp.conversation_id = c.id)",
        )
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let summary = CleanupSummary {
            user_id,
            sent_messages,
            received_messages,
            notifications,
            history_entries,
            conversations_left: member_of - conversations_deleted,
            conversations_deleted,
            orphaned_notifications,
        };

        info!(
            subsystem = "db",
            op = "delete_user",
            user_id = %user_id,
            sent_messages = summary.sent_messages,
            notifications = summary.notifications,
            history_entries = summary.history_entries,
            conversations_left = summary.conversations_left,
            conversations_deleted = summary.conversations_deleted,
            "user-deletion cascade completed"
        );
        Ok(summary)
    }
}
