//! End-to-end regeneration run.
//!
//! A [`Pipeline`] is what the surrounding orchestration layer calls: it
//! regenerates a template's images, hands the processed image map to the
//! copy-rewriting agent, and returns both with the run's cost snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::batch::{BatchError, BatchOrchestrator, BatchResult, ProcessedImage};
use crate::config::RebrandConfig;
use crate::cost::{CostLedger, CostSummary, PriceTable};
use crate::generation::{BrandGuide, ResponsesApi, StreamingGenerationClient, TokenUsage};
use crate::ports::{AssetStore, ImageSource, PortError};
use crate::template::{ImageTask, Template, TemplateError};

/// Setup-level failures. Per-image failures are reported in the batch result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Where a run's image tasks come from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    /// Template element JSON, parsed into tasks.
    Json(String),
    /// Tasks declared by the caller.
    Tasks(Vec<ImageTask>),
}

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub template_id: String,
    pub brand_guide: BrandGuide,
    pub template: TemplateSource,
    /// Free-form instructions for the copy rewriter.
    pub instructions: Option<String>,
}

/// What the copy rewriter receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRewriteInput {
    pub instructions: String,
    pub brand_guide: String,
    pub template_json: String,
    /// Element ids whose images were regenerated, in template order.
    pub image_url_keys: Vec<String>,
    pub image_map: BTreeMap<String, ProcessedImage>,
}

impl CopyRewriteInput {
    /// Renders the combined text prompt for the agent.
    pub fn render(&self) -> String {
        let mut text = String::new();
        if !self.instructions.trim().is_empty() {
            text.push_str(self.instructions.trim_end());
            text.push_str("\n\n");
        }
        text.push_str("=== BRAND STYLE GUIDE & AVATAR ===\n");
        text.push_str(&self.brand_guide);
        text.push_str("\n\n=== TEMPLATE FUNNEL JSON ===\n");
        text.push_str(&self.template_json);

        if !self.image_url_keys.is_empty() {
            let keys = serde_json::to_string_pretty(&self.image_url_keys).unwrap_or_default();
            let map = serde_json::to_string_pretty(&self.image_map).unwrap_or_default();
            text.push_str("\n\n=== IMAGE URL KEYS ===\n");
            text.push_str(&keys);
            text.push_str("\n\n=== PROCESSED IMAGE MAP ===\n");
            text.push_str(&map);
            text.push_str(
                "\n\nIMPORTANT: The images listed under IMAGE URL KEYS have already been \
                 redesigned to match the brand guidelines and uploaded to storage. Use the \
                 storageUrl values from the PROCESSED IMAGE MAP in your output instead of the \
                 original URLs.",
            );
        }
        text
    }
}

/// The rewritten copy and the tokens spent producing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRewrite {
    pub output_text: String,
    pub model: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// The copy-rewriting agent.
#[async_trait]
pub trait CopyRewriter: Send + Sync {
    async fn rewrite(&self, input: &CopyRewriteInput) -> Result<CopyRewrite, PortError>;
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub template_id: String,
    pub batch: BatchResult,
    pub processed_images: BTreeMap<String, ProcessedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<CopyRewrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_error: Option<String>,
    pub cost: CostSummary,
}

/// Image regeneration followed by copy rewriting.
#[derive(Clone)]
pub struct Pipeline {
    orchestrator: BatchOrchestrator,
    rewriter: Option<Arc<dyn CopyRewriter>>,
    prices: PriceTable,
}

impl Pipeline {
    pub fn new(orchestrator: BatchOrchestrator, prices: PriceTable) -> Self {
        Self {
            orchestrator,
            rewriter: None,
            prices,
        }
    }

    /// Wires the collaborators together according to `config`.
    pub fn from_config(
        config: &RebrandConfig,
        api: Arc<dyn ResponsesApi>,
        images: Arc<dyn ImageSource>,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        let generator = StreamingGenerationClient::new(
            api,
            Arc::clone(&images),
            config.generation.clone(),
            config.retry.clone(),
        );
        let orchestrator =
            BatchOrchestrator::new(generator, images, store, config.batch.concurrency_limit);
        Self::new(orchestrator, config.pricing.clone())
    }

    /// Adds a copy rewriter, run after the images.
    pub fn with_rewriter(mut self, rewriter: Arc<dyn CopyRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    /// Runs the pipeline with a fresh cost ledger.
    ///
    /// # Errors
    /// Returns [`PipelineError`] when the template cannot be parsed or the
    /// batch cannot be started. Image and copy failures are reported in the
    /// output.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineOutput, PipelineError> {
        let (tasks, template_json) = match &request.template {
            TemplateSource::Json(json) => (Template::parse(json)?.image_tasks(), json.clone()),
            TemplateSource::Tasks(tasks) => (
                tasks.clone(),
                serde_json::to_string_pretty(tasks).unwrap_or_default(),
            ),
        };
        tracing::info!(
            template_id = %request.template_id,
            images = tasks.len(),
            "starting pipeline run"
        );

        let ledger = CostLedger::new(self.prices.clone());
        let profile = request.brand_guide.profile();
        let batch = self.orchestrator.run(&tasks, &profile, &ledger).await?;
        let processed_images = batch.processed_images();

        let (copy, copy_error) = match &self.rewriter {
            Some(rewriter) => {
                let input = CopyRewriteInput {
                    instructions: request.instructions.clone().unwrap_or_default(),
                    brand_guide: request.brand_guide.to_text(),
                    template_json,
                    image_url_keys: batch
                        .items
                        .iter()
                        .filter(|item| item.success)
                        .map(|item| item.element_id.clone())
                        .collect(),
                    image_map: processed_images.clone(),
                };
                match rewriter.rewrite(&input).await {
                    Ok(copy) => {
                        ledger.add_text_generation(
                            &copy.model,
                            copy.usage.input_tokens,
                            copy.usage.visible_output_tokens(),
                            copy.usage.reasoning_tokens(),
                        );
                        (Some(copy), None)
                    }
                    Err(error) => {
                        tracing::warn!(template_id = %request.template_id, "copy rewrite failed: {}", error);
                        (None, Some(error.to_string()))
                    }
                }
            }
            None => (None, None),
        };

        let cost = ledger.summary();
        tracing::info!(
            template_id = %request.template_id,
            succeeded = batch.succeeded,
            failed = batch.failed,
            total_cost = cost.total,
            "pipeline run complete"
        );

        Ok(PipelineOutput {
            template_id: request.template_id,
            batch,
            processed_images,
            copy,
            copy_error,
            cost,
        })
    }
}
