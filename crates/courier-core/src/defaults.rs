//! Centralized default constants for courier.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Characters of message body included in a notification preview.
pub const PREVIEW_LEN: usize = 50;

// =============================================================================
// THREADS
// =============================================================================

/// Default reply-tree expansion depth for thread reconstruction.
pub const THREAD_MAX_DEPTH: usize = 10;

/// Hard cap on messages fetched while building one thread. Bounds the work
/// done on pathological (or corrupt, cyclic) reply graphs.
pub const THREAD_NODE_CAP: usize = 1000;

// =============================================================================
// UNREAD INDEX
// =============================================================================

/// How long a cached unread result may be served before it expires.
pub const UNREAD_CACHE_TTL_SECS: u64 = 30;

/// Maximum entries held by the unread cache before oldest-first eviction.
pub const UNREAD_CACHE_CAPACITY: usize = 1024;

/// Upper bound on rows returned by a single unread listing.
pub const UNREAD_FETCH_LIMIT: i64 = 500;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer capacity for the event bus.
/// Recommended: 256 for production, 32 for tests.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Maximum connections held by the Postgres pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Minimum connections the pool keeps warm.
pub const POOL_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a connection before giving up.
pub const POOL_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Seconds an idle connection lives before being closed.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;

/// Seconds before a connection is recycled regardless of use.
pub const POOL_MAX_LIFETIME_SECS: u64 = 1800;

// =============================================================================
// STORE ADAPTER RETRY
// =============================================================================

/// Maximum attempts for transient store errors (first try included).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries; doubled per attempt, with jitter.
pub const RETRY_BASE_DELAY_MS: u64 = 50;
