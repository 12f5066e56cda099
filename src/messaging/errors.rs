//! # Messaging Error Types
//!
//! Structured error handling for broker operations using thiserror, with
//! constructor helpers so call sites stay short.

use thiserror::Error;

/// Errors surfaced by queue broker implementations
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("broker connection error: {message}")]
    Connection { message: String },

    #[error("internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

impl From<pgmq::errors::PgmqError> for MessagingError {
    fn from(err: pgmq::errors::PgmqError) -> Self {
        MessagingError::queue_operation("unknown", "pgmq", err.to_string())
    }
}

/// Result type alias for broker operations
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_helpers_build_matching_variants() {
        let queue_err = MessagingError::queue_operation("ocr_queue", "send", "boom");
        assert!(matches!(queue_err, MessagingError::QueueOperation { .. }));

        let missing = MessagingError::queue_not_found("nope");
        assert!(matches!(missing, MessagingError::QueueNotFound { .. }));
    }

    #[test]
    fn serde_errors_map_to_deserialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: MessagingError = json_err.into();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }

    #[test]
    fn display_carries_queue_and_operation() {
        let err = MessagingError::queue_operation("pdf_queue", "read", "timeout");
        let rendered = format!("{err}");
        assert!(rendered.contains("pdf_queue"));
        assert!(rendered.contains("read"));
        assert!(rendered.contains("timeout"));
    }
}
