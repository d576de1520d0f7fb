//! Error handling and classification module
//!
//! Failures from the model API, downloads and uploads are classified as
//! retryable, validation or fatal. The retry loop consults the verdict before
//! each new attempt, and the batch result records it for failed items.

pub mod classification;
pub mod detector;

pub use classification::{ClassifiedError, ErrorCategory, ErrorReason};
pub use detector::{Classify, ErrorDetector, ErrorPattern};
