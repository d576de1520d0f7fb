//! Rebrand - regenerates a template's images to match a brand guide.
//!
//! Images are regenerated through a streaming image-generation API with
//! bounded concurrency, classified retries, per-attempt deadlines and
//! recovery of results whose stream broke. Token and image spend is tracked
//! in a shared cost ledger.

pub mod batch;
pub mod config;
pub mod cost;
pub mod error;
pub mod generation;
pub mod logging;
pub mod pipeline;
pub mod ports;
pub mod retry;
pub mod template;
pub mod timeout;

pub use batch::{BatchError, BatchOrchestrator, BatchResult, ItemResult};
pub use config::RebrandConfig;
pub use cost::{CostLedger, CostSummary};
pub use error::{ClassifiedError, ErrorCategory, ErrorDetector};
pub use generation::{BrandGuide, BrandProfile, StreamingGenerationClient};
pub use pipeline::{Pipeline, PipelineError, PipelineOutput, PipelineRequest, TemplateSource};
pub use retry::{retry, RetryPolicy};
pub use template::{ImageTask, Template};
pub use timeout::{with_timeout, TimeoutError};
