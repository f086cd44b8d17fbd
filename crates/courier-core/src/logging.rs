//! Structured logging schema and field name constants for courier.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (thread nodes, cache keys) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "engine", "db", "cache", "events"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "fanout", "thread_builder", "unread_index", "cascade", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create_message", "update_message", "delete_user", "build_thread"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID being operated on.
pub const USER_ID: &str = "user_id";

/// Message UUID being operated on.
pub const MESSAGE_ID: &str = "message_id";

/// Conversation UUID in scope.
pub const CONVERSATION_ID: &str = "conversation_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of notification rows produced by one fan-out.
pub const NOTIFICATION_COUNT: &str = "notification_count";

/// Thread depth reached during reconstruction.
pub const DEPTH: &str = "depth";

/// Messages fetched while building a thread.
pub const NODE_COUNT: &str = "node_count";

/// Whether a read was served from the unread cache.
pub const CACHE_HIT: &str = "cache_hit";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
