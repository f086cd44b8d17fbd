//! Edit-history capture.
//!
//! The tracker is a pure diff: adapters call [`diff_edit`] while holding
//! their per-message lock, so the old-body snapshot and the body swap are
//! one indivisible transition. Last writer wins on content; every actual
//! transition leaves exactly one history row.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Message, MessageHistory};
use crate::uuid_utils::new_v7;

/// Compare the stored body against the incoming one and produce the history
/// entry for a genuine content change.
///
/// Byte-for-byte comparison: re-saving identical content returns `None` and
/// the caller must leave the message row untouched (idempotent no-op, the
/// `edited` flag stays as it was).
pub fn diff_edit(
    existing: &Message,
    new_body: &str,
    editor_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Option<MessageHistory> {
    if existing.body.as_bytes() == new_body.as_bytes() {
        return None;
    }

    Some(MessageHistory {
        id: new_v7(),
        message_id: existing.id,
        old_body: existing.body.clone(),
        edited_by: editor_id,
        edited_at: now,
        reason,
    })
}

/// Mutate a message in place for a content-changing edit.
///
/// Only valid after [`diff_edit`] returned `Some`; sets the new body and the
/// edited flag/timestamp.
pub fn apply_edit_fields(message: &mut Message, new_body: &str, now: DateTime<Utc>) {
    message.body = new_body.to_string();
    message.edited = true;
    message.edited_at = Some(now);
}
