//! Bounded-concurrency batch orchestration.
//!
//! Tasks are split into sequential groups of `concurrency_limit`. Every task
//! in a group runs concurrently and the next group starts once all of them
//! have settled. A failing task never cancels its siblings: each one is
//! reduced to an [`ItemResult`], so the batch always yields exactly one
//! result per task, in task order.

pub mod result;

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::instrument;

use crate::cost::CostLedger;
use crate::error::{ClassifiedError, Classify};
use crate::generation::{BrandProfile, StreamingGenerationClient};
use crate::ports::{AssetStore, ImageSource};
use crate::template::ImageTask;

pub use result::{AverageTimings, BatchResult, ItemResult, ProcessedImage, Stage, StageTimings};

/// Content type of every uploaded image.
pub const OUTPUT_CONTENT_TYPE: &str = "image/png";

/// A batch that cannot be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,
    #[error("duplicate element id in task list: {0}")]
    DuplicateElementId(String),
    #[error("task {0} has an empty element id")]
    EmptyElementId(usize),
}

/// Storage key for a generated image: `YYYYMMDD-<8 hex>.png`.
pub fn object_key(date: NaiveDate) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}.png", date.format("%Y%m%d"), &id[..8])
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Checks a task list before dispatch.
pub fn validate_tasks(tasks: &[ImageTask]) -> Result<(), BatchError> {
    let mut seen = HashSet::new();
    for (index, task) in tasks.iter().enumerate() {
        if task.element_id.trim().is_empty() {
            return Err(BatchError::EmptyElementId(index));
        }
        if !seen.insert(task.element_id.as_str()) {
            return Err(BatchError::DuplicateElementId(task.element_id.clone()));
        }
    }
    Ok(())
}

/// Runs image tasks through download, generation and upload.
#[derive(Clone)]
pub struct BatchOrchestrator {
    generator: StreamingGenerationClient,
    images: Arc<dyn ImageSource>,
    store: Arc<dyn AssetStore>,
    concurrency_limit: usize,
}

impl BatchOrchestrator {
    pub fn new(
        generator: StreamingGenerationClient,
        images: Arc<dyn ImageSource>,
        store: Arc<dyn AssetStore>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            generator,
            images,
            store,
            concurrency_limit,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Processes every task and aggregates the outcomes.
    ///
    /// # Errors
    /// Only setup problems are errors: a zero concurrency limit, or an empty
    /// or repeated element id. Task failures are reported in the result.
    #[instrument(skip_all, fields(tasks = tasks.len(), concurrency_limit = self.concurrency_limit))]
    pub async fn run(
        &self,
        tasks: &[ImageTask],
        profile: &BrandProfile,
        ledger: &CostLedger,
    ) -> Result<BatchResult, BatchError> {
        if self.concurrency_limit == 0 {
            return Err(BatchError::ZeroConcurrency);
        }
        validate_tasks(tasks)?;

        let started = Instant::now();
        let group_count = tasks.len().div_ceil(self.concurrency_limit);
        tracing::info!(
            "Processing {} images in {} groups",
            tasks.len(),
            group_count
        );

        let mut items = Vec::with_capacity(tasks.len());
        for (index, group) in tasks.chunks(self.concurrency_limit).enumerate() {
            tracing::debug!(group = index + 1, size = group.len(), "dispatching group");
            // Wait for the whole group to settle before starting the next one
            let results = join_all(
                group
                    .iter()
                    .map(|task| self.process_item(task, profile, ledger)),
            )
            .await;
            items.extend(results);
        }

        let result = BatchResult::from_items(items, elapsed_ms(started));
        tracing::info!(
            succeeded = result.succeeded,
            failed = result.failed,
            total_ms = result.total_duration_ms,
            "batch complete"
        );
        Ok(result)
    }

    /// Runs one task to a terminal result. Never fails.
    async fn process_item(
        &self,
        task: &ImageTask,
        profile: &BrandProfile,
        ledger: &CostLedger,
    ) -> ItemResult {
        let started = Instant::now();
        let mut item = ItemResult {
            element_id: task.element_id.clone(),
            success: false,
            source_url: task.source_url.clone(),
            storage_url: None,
            object_key: None,
            width: task.width,
            height: task.height,
            timings: StageTimings::default(),
            attempts: 0,
            recovered: false,
            sha256: None,
            error: None,
            category: None,
            reason: None,
            failed_stage: None,
        };
        tracing::info!(element_id = %task.element_id, size = %task.size(), "processing image");

        let stage_start = Instant::now();
        let downloaded = self.images.download(&task.source_url).await;
        item.timings.download_ms = elapsed_ms(stage_start);
        let source = match downloaded {
            Ok(bytes) => bytes,
            Err(error) => {
                let classified = error.classify(self.generator.detector());
                return fail(item, Stage::Download, classified, started);
            }
        };

        let stage_start = Instant::now();
        let generated = self
            .generator
            .generate(task, source, profile, ledger)
            .await;
        item.timings.generate_ms = elapsed_ms(stage_start);
        let image = match generated {
            Ok(image) => image,
            Err(failure) => {
                item.attempts = failure.attempts.len() as u32;
                return fail(item, Stage::Generate, failure.classification, started);
            }
        };
        item.attempts = image.attempts.len() as u32;
        item.recovered = image.recovered;

        let key = object_key(Utc::now().date_naive());
        let stage_start = Instant::now();
        let uploaded = self
            .store
            .upload(&image.bytes, &key, OUTPUT_CONTENT_TYPE)
            .await;
        item.timings.upload_ms = elapsed_ms(stage_start);
        match uploaded {
            Ok(url) => {
                item.timings.total_ms = elapsed_ms(started);
                item.success = true;
                item.sha256 = Some(hex::encode(Sha256::digest(&image.bytes)));
                item.storage_url = Some(url);
                item.object_key = Some(key);
                tracing::info!(
                    element_id = %item.element_id,
                    storage_url = item.storage_url.as_deref().unwrap_or_default(),
                    total_ms = item.timings.total_ms,
                    "image processed"
                );
                item
            }
            Err(error) => {
                let classified = error.classify(self.generator.detector());
                fail(item, Stage::Upload, classified, started)
            }
        }
    }
}

fn fail(
    mut item: ItemResult,
    stage: Stage,
    classified: ClassifiedError,
    started: Instant,
) -> ItemResult {
    item.timings.total_ms = elapsed_ms(started);
    tracing::error!(
        element_id = %item.element_id,
        stage = %stage,
        category = %classified.category,
        "image failed: {}",
        classified.message
    );
    item.failed_stage = Some(stage);
    item.category = Some(classified.category);
    item.reason = Some(classified.reason);
    item.error = Some(classified.message);
    item
}
