//! Error classification types for the generation pipeline
//!
//! Every failure that reaches the retry loop or the batch result is reduced to
//! one of three categories. The category decides whether the attempt is
//! retried; the reason is kept for logs and for the per-item result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The primary category of an error, determining the recovery strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary failure; the same request may succeed on another attempt.
    Retryable,
    /// The request itself is malformed or unauthorized. Never retried.
    Validation,
    /// Anything else. Not retried.
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Retryable => write!(f, "retryable"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Fatal => write!(f, "fatal"),
        }
    }
}

/// The specific reason behind a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// Connection reset, refused or closed early.
    ConnectionReset,
    /// A request or attempt exceeded its deadline.
    Timeout,
    /// Generic network failure.
    NetworkError,
    /// HTTP 429 or an explicit throttling message.
    RateLimited,
    /// HTTP 503 or an upstream that reports itself unavailable.
    ServiceUnavailable,
    /// Other 5xx responses.
    ServerError,
    /// The event stream broke mid-flight.
    StreamDisrupted,
    /// HTTP 400 or an "invalid"/"validation" message.
    MalformedRequest,
    /// HTTP 401 or rejected credentials.
    AuthenticationFailed,
    /// HTTP 403.
    PermissionDenied,
    /// The model finished without producing an image, even after recovery.
    NoImage,
    /// No rule matched.
    Unclassified,
}

impl ErrorReason {
    /// Returns the category this reason belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorReason::ConnectionReset
            | ErrorReason::Timeout
            | ErrorReason::NetworkError
            | ErrorReason::RateLimited
            | ErrorReason::ServiceUnavailable
            | ErrorReason::ServerError
            | ErrorReason::StreamDisrupted => ErrorCategory::Retryable,
            ErrorReason::MalformedRequest
            | ErrorReason::AuthenticationFailed
            | ErrorReason::PermissionDenied => ErrorCategory::Validation,
            ErrorReason::NoImage | ErrorReason::Unclassified => ErrorCategory::Fatal,
        }
    }
}

/// A classified error with category, reason, message, and additional context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    /// The category of the error.
    pub category: ErrorCategory,
    /// Why the error landed in that category.
    pub reason: ErrorReason,
    /// Whether the retry loop should attempt the operation again.
    pub should_retry: bool,
    /// The original error message.
    pub message: String,
    /// Additional context as key-value pairs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ClassifiedError {
    /// Creates a classified error; `should_retry` follows the category.
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        let category = reason.category();
        Self {
            category,
            reason,
            should_retry: category == ErrorCategory::Retryable,
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Adds a context key-value pair to the error.
    pub fn add_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Returns true if this error may resolve on retry.
    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Retryable
    }

    /// Returns true if the request was rejected as malformed or unauthorized.
    pub fn is_validation(&self) -> bool {
        self.category == ErrorCategory::Validation
    }

    /// Returns true if this error is fatal.
    pub fn is_fatal(&self) -> bool {
        self.category == ErrorCategory::Fatal
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_categories() {
        assert_eq!(ErrorReason::RateLimited.category(), ErrorCategory::Retryable);
        assert_eq!(ErrorReason::StreamDisrupted.category(), ErrorCategory::Retryable);
        assert_eq!(
            ErrorReason::AuthenticationFailed.category(),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorReason::NoImage.category(), ErrorCategory::Fatal);
        assert_eq!(ErrorReason::Unclassified.category(), ErrorCategory::Fatal);
    }

    #[test]
    fn test_should_retry_follows_category() {
        assert!(ClassifiedError::new(ErrorReason::Timeout, "timed out").should_retry);
        assert!(!ClassifiedError::new(ErrorReason::MalformedRequest, "bad").should_retry);
        assert!(!ClassifiedError::new(ErrorReason::Unclassified, "boom").should_retry);
    }

    #[test]
    fn test_category_predicates() {
        let error = ClassifiedError::new(ErrorReason::PermissionDenied, "403 Forbidden");
        assert!(error.is_validation());
        assert!(!error.is_retryable());
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_add_context() {
        let error = ClassifiedError::new(ErrorReason::RateLimited, "429")
            .add_context("element_id", "hero_image")
            .add_context("attempt", "2");

        assert_eq!(error.context.len(), 2);
        assert_eq!(error.context.get("attempt"), Some(&"2".to_string()));
    }

    #[test]
    fn test_display_includes_category() {
        let error = ClassifiedError::new(ErrorReason::NoImage, "no image in output");
        assert_eq!(error.to_string(), "[fatal] no image in output");
    }

    #[test]
    fn test_serializes_camel_case() {
        let error = ClassifiedError::new(ErrorReason::ServiceUnavailable, "503");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["category"], "retryable");
        assert_eq!(json["reason"], "service_unavailable");
        assert_eq!(json["shouldRetry"], true);
        assert!(json.get("context").is_none());
    }
}
