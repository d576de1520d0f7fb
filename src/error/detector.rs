//! Pattern-based error classifier
//!
//! Error text is matched against an ordered list of case-insensitive regex
//! patterns; the first match decides the category. Text that matches nothing
//! is classified as fatal.

use regex::Regex;
use std::sync::OnceLock;

use super::{ClassifiedError, ErrorReason};

/// A pattern for matching error text.
#[derive(Debug)]
pub struct ErrorPattern {
    regex: Regex,
    reason: ErrorReason,
    description: String,
}

impl ErrorPattern {
    /// Creates a new error pattern.
    ///
    /// # Panics
    /// Panics if the regex pattern is invalid.
    pub fn new(pattern: &str, reason: ErrorReason, description: impl Into<String>) -> Self {
        Self {
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
            reason,
            description: description.into(),
        }
    }

    /// Creates a new error pattern with a pre-compiled regex.
    pub fn with_regex(regex: Regex, reason: ErrorReason, description: impl Into<String>) -> Self {
        Self {
            regex,
            reason,
            description: description.into(),
        }
    }

    /// Returns the reason assigned on match.
    pub fn reason(&self) -> ErrorReason {
        self.reason
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks if this pattern matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Finds the first match in the text and returns the matched string.
    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

/// Errors that know how to classify themselves.
///
/// Typed errors can short-circuit on structured data (status codes, timeout
/// variants) and fall back to [`ErrorDetector::classify_text`] for the rest.
pub trait Classify {
    /// Classifies this error.
    fn classify(&self, detector: &ErrorDetector) -> ClassifiedError;
}

/// Ordered, first-match-wins error classifier.
#[derive(Debug)]
pub struct ErrorDetector {
    patterns: Vec<ErrorPattern>,
}

impl Default for ErrorDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorDetector {
    /// Creates a detector with the default rule set.
    pub fn new() -> Self {
        Self {
            patterns: Self::default_patterns(),
        }
    }

    /// Returns a process-wide detector with the default rule set.
    pub fn shared() -> &'static ErrorDetector {
        static DETECTOR: OnceLock<ErrorDetector> = OnceLock::new();
        DETECTOR.get_or_init(ErrorDetector::new)
    }

    /// Creates an error detector with custom patterns.
    pub fn with_patterns(patterns: Vec<ErrorPattern>) -> Self {
        Self { patterns }
    }

    fn default_patterns() -> Vec<ErrorPattern> {
        vec![
            // Network and timeout signatures
            ErrorPattern::new(
                r"(?i)econnreset|econnrefused|connection\s*(was\s*)?(reset|refused|closed)",
                ErrorReason::ConnectionReset,
                "Connection reset or refused",
            ),
            ErrorPattern::new(
                r"(?i)etimedout|timed?\s*out|\btimeout\b",
                ErrorReason::Timeout,
                "Request timed out",
            ),
            ErrorPattern::new(
                r"(?i)\baborted\b|premature\s*close|socket\s*hang\s*up|broken\s*pipe|network\s*(error|failure)",
                ErrorReason::NetworkError,
                "Network failure",
            ),
            // Rate limiting
            ErrorPattern::new(r"\b429\b", ErrorReason::RateLimited, "HTTP 429"),
            ErrorPattern::new(
                r"(?i)rate[\s_-]?limit|throttl|too\s+many\s+requests",
                ErrorReason::RateLimited,
                "Rate limit or throttling",
            ),
            // Upstream unavailable
            ErrorPattern::new(
                r"(?i)\b503\b|service\s*unavailable|overloaded",
                ErrorReason::ServiceUnavailable,
                "Service unavailable",
            ),
            ErrorPattern::new(
                r"(?i)\b50[0-9]\b|bad\s*gateway|internal\s*server\s*error",
                ErrorReason::ServerError,
                "HTTP 5xx",
            ),
            // Malformed input and auth
            ErrorPattern::new(
                r"(?i)\b401\b|unauthori[sz]ed|incorrect\s*api\s*key",
                ErrorReason::AuthenticationFailed,
                "Authentication failed",
            ),
            ErrorPattern::new(
                r"(?i)\b403\b|forbidden|permission\s*denied",
                ErrorReason::PermissionDenied,
                "Permission denied",
            ),
            ErrorPattern::new(
                r"(?i)\b400\b|invalid|validation|bad\s*request",
                ErrorReason::MalformedRequest,
                "Malformed request",
            ),
            // Stream disruption
            ErrorPattern::new(r"(?i)stream", ErrorReason::StreamDisrupted, "Stream disrupted"),
        ]
    }

    /// Adds a custom pattern; it is consulted after the existing ones.
    pub fn add_pattern(&mut self, pattern: ErrorPattern) {
        self.patterns.push(pattern);
    }

    /// Returns the number of patterns configured.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Classifies error text. Unmatched text is fatal.
    pub fn classify_text(&self, text: &str) -> ClassifiedError {
        for pattern in &self.patterns {
            if let Some(matched) = pattern.find(text) {
                return ClassifiedError::new(pattern.reason, text)
                    .add_context("matched_pattern", matched)
                    .add_context("rule", pattern.description.clone());
            }
        }
        ClassifiedError::new(ErrorReason::Unclassified, text)
    }

    /// Classifies `text`, taking `fallback` when no pattern matches.
    pub fn classify_text_or(&self, text: &str, fallback: ErrorReason) -> ClassifiedError {
        let classified = self.classify_text(text);
        if classified.reason == ErrorReason::Unclassified {
            ClassifiedError::new(fallback, text)
        } else {
            classified
        }
    }

    /// Classifies any displayable error by its message.
    pub fn classify_error<E: std::fmt::Display + ?Sized>(&self, error: &E) -> ClassifiedError {
        self.classify_text(&error.to_string())
    }

    /// Classifies an HTTP failure by status code, falling back to the message
    /// for statuses without a fixed meaning.
    pub fn classify_status(&self, status: u16, message: &str) -> ClassifiedError {
        let reason = match status {
            400 | 404 | 413 | 415 | 422 => Some(ErrorReason::MalformedRequest),
            401 => Some(ErrorReason::AuthenticationFailed),
            403 => Some(ErrorReason::PermissionDenied),
            408 => Some(ErrorReason::Timeout),
            429 => Some(ErrorReason::RateLimited),
            503 => Some(ErrorReason::ServiceUnavailable),
            500..=599 => Some(ErrorReason::ServerError),
            _ => None,
        };
        match reason {
            Some(reason) => ClassifiedError::new(reason, message)
                .add_context("status", status.to_string()),
            None => self
                .classify_text(message)
                .add_context("status", status.to_string()),
        }
    }
}
