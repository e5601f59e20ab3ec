use thiserror::Error;

/// Upper bound on how much of an upstream error body is kept in [`CoreError::Upstream`].
pub const UPSTREAM_BODY_PREFIX_LIMIT: usize = 512;

/// Error kinds shared by the store, the services and the remote gateway.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid input: {message}")]
    Invalid { message: String },

    #[error("Patient not found: {id}")]
    NotFound { id: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Upstream FHIR server returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream FHIR server unreachable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Malformed upstream response: {message}")]
    MalformedResponse { message: String },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Create a new Invalid error
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a new NotFound error
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a new Storage error
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an Upstream error, keeping only a bounded prefix of the response body
    #[must_use]
    pub fn upstream(status: u16, body: &str) -> Self {
        Self::Upstream {
            status,
            body: truncate_body(body, UPSTREAM_BODY_PREFIX_LIMIT).to_string(),
        }
    }

    /// Create a new UpstreamUnavailable error
    #[must_use]
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    /// Create a new MalformedResponse error
    #[must_use]
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create a new Timeout error
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new Internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Invalid { .. } | Self::NotFound { .. })
    }

    /// Get error category for logging and for the `error` field of API responses
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Invalid { .. } | Self::MalformedResponse { .. } => ErrorCategory::Invalid,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Upstream { .. } | Self::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Invalid,
    NotFound,
    Storage,
    Upstream,
    Timeout,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::NotFound => write!(f, "not_found"),
            Self::Storage => write!(f, "storage"),
            Self::Upstream => write!(f, "upstream"),
            Self::Timeout => write!(f, "timeout"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Cuts `body` to at most `limit` bytes without splitting a UTF-8 character.
fn truncate_body(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = CoreError::not_found("42");
        assert_eq!(err.to_string(), "Patient not found: 42");
        assert!(err.is_not_found());
        assert!(err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_upstream_body_is_bounded() {
        let body = "x".repeat(UPSTREAM_BODY_PREFIX_LIMIT * 3);
        match CoreError::upstream(502, &body) {
            CoreError::Upstream { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), UPSTREAM_BODY_PREFIX_LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // 'é' is two bytes; a limit of 3 must not split the second one
        assert_eq!(truncate_body("éé", 3), "é");
        assert_eq!(truncate_body("abc", 10), "abc");
    }

    #[test]
    fn test_categories() {
        assert_eq!(CoreError::invalid("x").category(), ErrorCategory::Invalid);
        assert_eq!(
            CoreError::malformed_response("x").category(),
            ErrorCategory::Invalid
        );
        assert_eq!(CoreError::storage("x").category(), ErrorCategory::Storage);
        assert_eq!(
            CoreError::upstream_unavailable("x").category(),
            ErrorCategory::Upstream
        );
        assert_eq!(CoreError::timeout("x").category(), ErrorCategory::Timeout);
        assert_eq!(CoreError::internal("x").category(), ErrorCategory::Internal);
        assert!(CoreError::timeout("x").is_timeout());
        assert!(!CoreError::timeout("x").is_client_error());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::NotFound.to_string(), "not_found");
        assert_eq!(ErrorCategory::Upstream.to_string(), "upstream");
        assert_eq!(ErrorCategory::Timeout.to_string(), "timeout");
    }
}
