//! Lifecycle event types, envelope schema, and event bus.
//!
//! The mutation pipeline runs synchronously with its ordering declared in
//! code; the bus exists for observability only. After a mutation commits,
//! the engine emits a [`DomainEvent`] wrapped in a versioned
//! [`EventEnvelope`], and downstream consumers (telemetry, audit sinks,
//! test assertions) subscribe independently. No component's correctness
//! depends on a subscriber receiving anything.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Event Envelope
// ============================================================================

/// Actor metadata for event attribution.
#[derive(Debug, Clone, Serialize)]
pub struct EventActor {
    /// Actor type: `"system"` or `"user"`.
    pub kind: String,
    /// Optional actor identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

impl EventActor {
    /// System actor (cascades, internal processes).
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    /// A user acting on their own behalf.
    pub fn user(id: Uuid) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id),
        }
    }
}

/// Versioned event envelope.
///
/// The `event_type` field uses dot-namespaced names (e.g.
/// `"message.created"`). `payload_version` starts at 1 and increments on
/// breaking payload changes; consumers should ignore unknown fields.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"message.created"`).
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Who/what caused this event.
    pub actor: EventActor,
    /// Type of entity this event relates to (e.g., `"message"`).
    pub entity_type: &'static str,
    /// ID of the entity this event relates to.
    pub entity_id: Uuid,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: DomainEvent,
}

impl EventEnvelope {
    /// Create an envelope with a system actor.
    pub fn new(event: DomainEvent) -> Self {
        Self::with_actor(event, EventActor::system())
    }

    /// Create an envelope with an explicit actor.
    pub fn with_actor(event: DomainEvent, actor: EventActor) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            actor,
            entity_type: event.entity_type(),
            entity_id: event.entity_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Domain events
// ============================================================================

/// Lifecycle events emitted after a mutation commits.
///
/// Serialized as JSON with a `type` tag field, e.g.
/// `{"type":"MessageCreated","message_id":"...",...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A message was persisted, together with its fan-out rows.
    MessageCreated {
        message_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        notification_count: usize,
    },
    /// A message body actually changed and a history row was appended.
    MessageEdited {
        message_id: Uuid,
        editor_id: Uuid,
        history_id: Uuid,
    },
    /// A notification row was created by fan-out.
    NotificationCreated {
        notification_id: Uuid,
        user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
    },
    /// A user-deletion cascade completed.
    UserDeleted {
        user_id: Uuid,
        sent_messages: i64,
        notifications: i64,
        history_entries: i64,
    },
}

impl DomainEvent {
    /// Returns the namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            DomainEvent::MessageCreated { .. } => "message.created",
            DomainEvent::MessageEdited { .. } => "message.edited",
            DomainEvent::NotificationCreated { .. } => "notification.created",
            DomainEvent::UserDeleted { .. } => "user.deleted",
        }
    }

    /// Returns the entity type this event relates to.
    pub fn entity_type(&self) -> &'static str {
        match self {
            DomainEvent::MessageCreated { .. } | DomainEvent::MessageEdited { .. } => "message",
            DomainEvent::NotificationCreated { .. } => "notification",
            DomainEvent::UserDeleted { .. } => "user",
        }
    }

    /// Returns the primary entity ID this event relates to.
    pub fn entity_id(&self) -> Uuid {
        match self {
            DomainEvent::MessageCreated { message_id, .. }
            | DomainEvent::MessageEdited { message_id, .. } => *message_id,
            DomainEvent::NotificationCreated {
                notification_id, ..
            } => *notification_id,
            DomainEvent::UserDeleted { user_id, .. } => *user_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing lifecycle events.
///
/// Uses `tokio::sync::broadcast` with a configurable buffer size. Slow
/// receivers that fall behind receive a `Lagged` error and miss events;
/// freshness matters more than completeness on this path.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// See [`crate::defaults::EVENT_BUS_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event with a system actor. If there are no active
    /// subscribers, the event is silently dropped.
    pub fn emit(&self, event: DomainEvent) {
        self.send(EventEnvelope::new(event));
    }

    /// Emit an event attributed to a user.
    pub fn emit_as(&self, event: DomainEvent, actor: EventActor) {
        self.send(EventEnvelope::with_actor(event, actor));
    }

    fn send(&self, envelope: EventEnvelope) {
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "event bus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events. Each subscriber gets its own
    /// independent stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
