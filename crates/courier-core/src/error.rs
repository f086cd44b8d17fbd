//! Error types for courier.

use thiserror::Error;

/// Result type alias using courier's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for courier operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(uuid::Uuid),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(uuid::Uuid),

    /// Conversation not found
    #[error("Conversation not found: {0}")]
    ConversationNotFound(uuid::Uuid),

    /// Input rejected before any persistence
    #[error("Validation error: {0}")]
    Validation(String),

    /// Two writers raced and the store could not serialize them
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Connection/lock timeout; eligible for bounded retry at the adapter
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error classification for request-layer status mapping.
///
/// The core knows nothing about HTTP; callers match on the kind (plus the
/// offending id carried by the variant) to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Transient,
    Internal,
}

impl ErrorKind {
    /// Snake_case name for structured logs and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Classify this error for the request layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_)
            | Error::UserNotFound(_)
            | Error::MessageNotFound(_)
            | Error::ConversationNotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Database(e) if is_transient_sqlx(e) => ErrorKind::Transient,
            Error::Database(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the adapter may retry this error with backoff.
    ///
    /// Only connection/lock timeouts qualify; everything else propagates on
    /// the first failure.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

fn is_transient_sqlx(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
    )
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_user_not_found() {
        let id = Uuid::nil();
        let err = Error::UserNotFound(id);
        assert_eq!(err.to_string(), format!("User not found: {}", id));
    }

    #[test]
    fn test_error_display_message_not_found() {
        let id = Uuid::new_v4();
        let err = Error::MessageNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_conversation_not_found() {
        let id = Uuid::nil();
        let err = Error::ConversationNotFound(id);
        assert_eq!(err.to_string(), format!("Conversation not found: {}", id));
    }

    #[test]
    fn test_error_display_validation() {
        let err = Error::Validation("empty body".to_string());
        assert_eq!(err.to_string(), "Validation error: empty body");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("concurrent edit".to_string());
        assert_eq!(err.to_string(), "Conflict: concurrent edit");
    }

    #[test]
    fn test_error_display_transient() {
        let err = Error::Transient("lock timeout".to_string());
        assert_eq!(err.to_string(), "Transient store error: lock timeout");
    }

    #[test]
    fn test_kind_not_found_variants() {
        assert_eq!(
            Error::UserNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::MessageNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::ConversationNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::NotFound("x".to_string()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_kind_as_str() {
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::Validation.as_str(), "validation");
        assert_eq!(ErrorKind::Conflict.as_str(), "conflict");
        assert_eq!(ErrorKind::Transient.as_str(), "transient");
        assert_eq!(ErrorKind::Internal.as_str(), "internal");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("timeout".to_string()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::Validation("bad".to_string()).is_transient());
        assert!(!Error::UserNotFound(Uuid::nil()).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_result_type_ok() {
        fn get_result() -> Result<i32> {
            Ok(42)
        }
        let result = get_result();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_error_debug_format() {
        let err = Error::NotFound("test".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("NotFound"));
    }
}
