//! Notification fan-out.
//!
//! Computes the recipient set for a freshly created message and builds one
//! `new_message` notification row per recipient. The function is pure; the
//! store persists the rows in the same transaction as the message, and the
//! `(user_id, message_id)` uniqueness key makes re-running fan-out for a
//! message id produce no extra rows.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{preview, Message, Notification, NotificationKind};
use crate::uuid_utils::new_v7;

/// Build the notification rows for a newly created message.
///
/// Recipients are all conversation participants except the sender. For a
/// threaded reply the parent's author is included as well, even when they
/// have since left the conversation. A message with no eligible recipients
/// (note-to-self) yields an empty vec.
pub fn fan_out(
    message: &Message,
    participant_ids: &[Uuid],
    parent_author: Option<Uuid>,
    sender_display_name: &str,
    now: DateTime<Utc>,
) -> Vec<Notification> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut recipients: Vec<Uuid> = Vec::new();

    for &id in participant_ids {
        if id != message.sender_id && seen.insert(id) {
            recipients.push(id);
        }
    }
    if let Some(author) = parent_author {
        if author != message.sender_id && seen.insert(author) {
            recipients.push(author);
        }
    }

    let title = format!("New message from {}", sender_display_name);
    let body = format!(
        "You have received a new message: \"{}\"",
        preview(&message.body)
    );

    recipients
        .into_iter()
        .map(|user_id| Notification {
            id: new_v7(),
            user_id,
            message_id: Some(message.id),
            kind: NotificationKind::NewMessage,
            title: title.clone(),
            body: body.clone(),
            is_read: false,
            read_at: None,
            created_at: now,
        })
        .collect()
}
