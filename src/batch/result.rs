//! Per-item and aggregate batch outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorCategory, ErrorReason};

/// The step of item processing that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Generate,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => write!(f, "download"),
            Stage::Generate => write!(f, "generate"),
            Stage::Upload => write!(f, "upload"),
        }
    }
}

/// Milliseconds spent in each stage of one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub download_ms: u64,
    pub generate_ms: u64,
    pub upload_ms: u64,
    pub total_ms: u64,
}

/// Mean stage timings over successful items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageTimings {
    pub download_ms: f64,
    pub generate_ms: f64,
    pub upload_ms: f64,
    pub total_ms: f64,
}

impl AverageTimings {
    /// Averages `timings`; all zero when empty.
    pub fn over<'a>(timings: impl IntoIterator<Item = &'a StageTimings>) -> Self {
        let mut sum = StageTimings::default();
        let mut count = 0u64;
        for t in timings {
            sum.download_ms += t.download_ms;
            sum.generate_ms += t.generate_ms;
            sum.upload_ms += t.upload_ms;
            sum.total_ms += t.total_ms;
            count += 1;
        }
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        Self {
            download_ms: sum.download_ms as f64 / n,
            generate_ms: sum.generate_ms as f64 / n,
            upload_ms: sum.upload_ms as f64 / n,
            total_ms: sum.total_ms as f64 / n,
        }
    }
}

/// Terminal outcome of one image task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub element_id: String,
    pub success: bool,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub timings: StageTimings,
    /// Generation attempts made; zero when the download failed.
    pub attempts: u32,
    /// True when the image was recovered from a stored response.
    #[serde(default)]
    pub recovered: bool,
    /// Hex SHA-256 of the uploaded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
}

/// A regenerated image as handed to the copy rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImage {
    pub original_url: String,
    pub storage_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Aggregated outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// One entry per task, in task order.
    pub items: Vec<ItemResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
    /// Mean total time of successful items.
    pub average_duration_ms: f64,
    pub average_timings: AverageTimings,
}

impl BatchResult {
    /// Aggregates item results.
    pub fn from_items(items: Vec<ItemResult>, total_duration_ms: u64) -> Self {
        let succeeded = items.iter().filter(|item| item.success).count();
        let average_timings = AverageTimings::over(
            items
                .iter()
                .filter(|item| item.success)
                .map(|item| &item.timings),
        );
        Self {
            failed: items.len() - succeeded,
            succeeded,
            total_duration_ms,
            average_duration_ms: average_timings.total_ms,
            average_timings,
            items,
        }
    }

    /// Successful items keyed by element id.
    pub fn processed_images(&self) -> BTreeMap<String, ProcessedImage> {
        self.items
            .iter()
            .filter(|item| item.success)
            .filter_map(|item| {
                let storage_url = item.storage_url.clone()?;
                Some((
                    item.element_id.clone(),
                    ProcessedImage {
                        original_url: item.source_url.clone(),
                        storage_url,
                        width: item.width,
                        height: item.height,
                    },
                ))
            })
            .collect()
    }

    /// Failed items.
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|item| !item.success)
    }

    /// Looks up an item by element id.
    pub fn item(&self, element_id: &str) -> Option<&ItemResult> {
        self.items.iter().find(|item| item.element_id == element_id)
    }
}
