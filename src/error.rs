use std::error::Error;
use std::fmt::{Display, Formatter};

/// Canonical error codes shared by the backend and the client.
///
/// The set mirrors the RPC status codes the DocSync backend attaches to
/// stream-level failures, so classification helpers below can reason about
/// retryability without inspecting messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocSyncErrorCode {
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
}

impl DocSyncErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocSyncErrorCode::Cancelled => "docsync/cancelled",
            DocSyncErrorCode::InvalidArgument => "docsync/invalid-argument",
            DocSyncErrorCode::DeadlineExceeded => "docsync/deadline-exceeded",
            DocSyncErrorCode::NotFound => "docsync/not-found",
            DocSyncErrorCode::AlreadyExists => "docsync/already-exists",
            DocSyncErrorCode::PermissionDenied => "docsync/permission-denied",
            DocSyncErrorCode::ResourceExhausted => "docsync/resource-exhausted",
            DocSyncErrorCode::FailedPrecondition => "docsync/failed-precondition",
            DocSyncErrorCode::Aborted => "docsync/aborted",
            DocSyncErrorCode::OutOfRange => "docsync/out-of-range",
            DocSyncErrorCode::Unimplemented => "docsync/unimplemented",
            DocSyncErrorCode::Internal => "docsync/internal",
            DocSyncErrorCode::Unavailable => "docsync/unavailable",
            DocSyncErrorCode::Unauthenticated => "docsync/unauthenticated",
        }
    }

    /// Whether an error with this code will keep failing if the identical
    /// request is retried.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            DocSyncErrorCode::Cancelled
                | DocSyncErrorCode::DeadlineExceeded
                | DocSyncErrorCode::ResourceExhausted
                | DocSyncErrorCode::Internal
                | DocSyncErrorCode::Unavailable
                | DocSyncErrorCode::Unauthenticated
        )
    }

    /// Like [`is_permanent`](Self::is_permanent), but for write operations.
    /// `Aborted` writes are retried because the commit may apply cleanly on a
    /// fresh stream.
    pub fn is_permanent_write_error(&self) -> bool {
        self.is_permanent() && *self != DocSyncErrorCode::Aborted
    }
}

#[derive(Clone, Debug)]
pub struct DocSyncError {
    pub code: DocSyncErrorCode,
    message: String,
}

impl DocSyncError {
    pub fn new(code: DocSyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for DocSyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for DocSyncError {}

pub type DocSyncResult<T> = Result<T, DocSyncError>;

pub fn cancelled(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::Cancelled, message)
}

pub fn invalid_argument(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::InvalidArgument, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::DeadlineExceeded, message)
}

pub fn not_found(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::NotFound, message)
}

pub fn already_exists(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::AlreadyExists, message)
}

pub fn permission_denied(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::PermissionDenied, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::ResourceExhausted, message)
}

pub fn failed_precondition(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::FailedPrecondition, message)
}

pub fn aborted(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::Aborted, message)
}

pub fn unimplemented(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::Unimplemented, message)
}

pub fn internal_error(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::Internal, message)
}

pub fn unavailable(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::Unavailable, message)
}

pub fn unauthenticated(message: impl Into<String>) -> DocSyncError {
    DocSyncError::new(DocSyncErrorCode::Unauthenticated, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_write_errors() {
        assert!(DocSyncErrorCode::InvalidArgument.is_permanent_write_error());
        assert!(DocSyncErrorCode::PermissionDenied.is_permanent_write_error());
        assert!(!DocSyncErrorCode::Unavailable.is_permanent_write_error());
        assert!(!DocSyncErrorCode::Aborted.is_permanent_write_error());
        assert!(DocSyncErrorCode::Aborted.is_permanent());
    }

    #[test]
    fn renders_code_in_display() {
        let err = unavailable("stream closed");
        assert_eq!(err.to_string(), "stream closed (docsync/unavailable)");
    }
}
