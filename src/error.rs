//! Error types for the tailing engine.

use crate::native::NativeError;
use crate::subscriptions::DropReason;
use crate::types::StatusCode;
use crate::variant::VariantType;
use thiserror::Error;

/// Main error type for tailing operations.
#[derive(Debug, Error)]
pub enum TailError {
    /// Only observable when a render buffer changed size between the probe
    /// and the render call.
    #[error("Buffer too small: {required} bytes required")]
    TransientBufferTooSmall { required: usize },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Resume position was evicted and delivery restarted at the oldest
    /// retained record. Informational.
    #[error("Resume position on channel '{channel}' was truncated; clamped to oldest retained record")]
    TruncatedClamped { channel: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Decode fault: {0}")]
    DecodeFault(String),

    #[error("Type mismatch at ordinal {ordinal}: expected {expected}, found {found:?}")]
    TypeMismatch {
        ordinal: usize,
        expected: &'static str,
        found: VariantType,
    },

    #[error("Ordinal {ordinal} out of range (property count {count})")]
    IndexOutOfRange { ordinal: usize, count: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Subscription dropped: {0:?}")]
    Dropped(DropReason),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Native failure {code} during {context}")]
    Fatal { code: StatusCode, context: String },
}

impl TailError {
    /// Map a native status code onto the error taxonomy.
    pub fn from_status(code: StatusCode, context: impl Into<String>) -> Self {
        let context = context.into();
        match code {
            StatusCode::ACCESS_DENIED => TailError::AccessDenied(context),
            StatusCode::FILE_NOT_FOUND
            | StatusCode::NOT_FOUND
            | StatusCode::EVT_PUBLISHER_METADATA_NOT_FOUND
            | StatusCode::EVT_CHANNEL_NOT_FOUND
            | StatusCode::EVT_MESSAGE_NOT_FOUND
            | StatusCode::EVT_MESSAGE_ID_NOT_FOUND => {
                TailError::ResourceNotFound(format!("{}: {}", context, code))
            }
            StatusCode::CANCELLED | StatusCode::RPC_CALL_CANCELLED => TailError::Cancelled,
            StatusCode::EVT_QUERY_RESULT_STALE => TailError::TruncatedClamped { channel: context },
            StatusCode::INSUFFICIENT_BUFFER => TailError::TransientBufferTooSmall { required: 0 },
            StatusCode::INVALID_DATA => TailError::DecodeFault(format!("{}: {}", context, code)),
            _ => TailError::Fatal { code, context },
        }
    }

    /// Informational conditions that must not be surfaced as failures.
    pub fn is_informational(&self) -> bool {
        matches!(self, TailError::TruncatedClamped { .. })
    }

    /// Errors that fail a single record while the subscription continues.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            TailError::DecodeFault(_)
                | TailError::TypeMismatch { .. }
                | TailError::IndexOutOfRange { .. }
                | TailError::TransientBufferTooSmall { .. }
        )
    }

    /// Errors after which the subscription is dead and must be re-created.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TailError::Fatal { .. } | TailError::Dropped(_))
    }

    pub(crate) fn native(err: NativeError, context: impl Into<String>) -> Self {
        match err {
            NativeError::InsufficientBuffer { required, .. } => {
                TailError::TransientBufferTooSmall { required }
            }
            NativeError::Status(code) => TailError::from_status(code, context),
        }
    }
}

impl From<serde_json::Error> for TailError {
    fn from(e: serde_json::Error) -> Self {
        TailError::Serialization(e.to_string())
    }
}

/// Result type for tailing operations.
pub type Result<T> = std::result::Result<T, TailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            TailError::from_status(StatusCode::ACCESS_DENIED, "subscribe"),
            TailError::AccessDenied(_)
        ));
        assert!(matches!(
            TailError::from_status(StatusCode::EVT_CHANNEL_NOT_FOUND, "subscribe"),
            TailError::ResourceNotFound(_)
        ));
        assert!(matches!(
            TailError::from_status(StatusCode::CANCELLED, "next"),
            TailError::Cancelled
        ));
        assert!(matches!(
            TailError::from_status(StatusCode(1726), "callback"),
            TailError::Fatal { .. }
        ));
    }

    #[test]
    fn test_classification() {
        let stale = TailError::from_status(StatusCode::EVT_QUERY_RESULT_STALE, "Application");
        assert!(stale.is_informational());
        assert!(!stale.is_fatal());

        assert!(TailError::DecodeFault("bad".into()).is_record_scoped());
        assert!(TailError::from_status(StatusCode(1726), "callback").is_fatal());
        assert!(!TailError::AccessDenied("x".into()).is_fatal());
    }

    #[test]
    fn test_native_buffer_too_small() {
        let err = TailError::native(
            NativeError::InsufficientBuffer {
                required: 64,
                property_count: 3,
            },
            "render",
        );
        assert!(matches!(
            err,
            TailError::TransientBufferTooSmall { required: 64 }
        ));
    }
}
