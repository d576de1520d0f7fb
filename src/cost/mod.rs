//! Run-level cost accounting.
//!
//! A [`CostLedger`] is created once per pipeline run and shared by every task
//! of that run. Each successful model call adds to it; [`CostLedger::summary`]
//! takes an immutable snapshot. Totals only ever grow.

pub mod pricing;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

pub use pricing::{PriceTable, TokenPrice, DEFAULT_IMAGE_PRICE, DEFAULT_TOKEN_PRICE};

/// Running totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostLedgerEntry {
    /// Number of text-generation calls recorded.
    pub agent_calls: u64,
    /// Input tokens across all text-generation calls.
    pub input_tokens: u64,
    /// Output tokens across all text-generation calls.
    pub output_tokens: u64,
    /// Reasoning tokens across all text-generation calls.
    pub reasoning_tokens: u64,
    /// USD spent on text generation.
    pub agent_cost: f64,
    /// Number of image-generation calls recorded.
    pub image_calls: u64,
    /// Images produced across all image-generation calls.
    pub images_generated: u64,
    /// USD spent on image generation.
    pub image_cost: f64,
}

/// Token counts in a cost snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub total: u64,
}

/// Text-generation portion of a cost snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCost {
    pub calls: u64,
    pub tokens: TokenTotals,
    pub cost: f64,
}

/// Image-generation portion of a cost snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCost {
    pub calls: u64,
    pub images_generated: u64,
    pub cost: f64,
}

/// Point-in-time snapshot of a ledger. Costs are unrounded USD.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total: f64,
    pub agent: AgentCost,
    pub images: ImageCost,
}

impl From<&CostLedgerEntry> for CostSummary {
    fn from(entry: &CostLedgerEntry) -> Self {
        Self {
            total: entry.agent_cost + entry.image_cost,
            agent: AgentCost {
                calls: entry.agent_calls,
                tokens: TokenTotals {
                    input: entry.input_tokens,
                    output: entry.output_tokens,
                    reasoning: entry.reasoning_tokens,
                    total: entry.input_tokens + entry.output_tokens + entry.reasoning_tokens,
                },
                cost: entry.agent_cost,
            },
            images: ImageCost {
                calls: entry.image_calls,
                images_generated: entry.images_generated,
                cost: entry.image_cost,
            },
        }
    }
}

/// Thread-safe cost accumulator shared across the tasks of one run.
///
/// Cloning yields another handle to the same totals.
#[derive(Debug, Clone)]
pub struct CostLedger {
    prices: Arc<PriceTable>,
    inner: Arc<Mutex<CostLedgerEntry>>,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(PriceTable::default())
    }
}

impl CostLedger {
    /// Creates an empty ledger priced by `prices`.
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices: Arc::new(prices),
            inner: Arc::new(Mutex::new(CostLedgerEntry::default())),
        }
    }

    /// The price table this ledger charges against.
    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Records one text-generation call and returns its cost.
    ///
    /// Unknown models are charged at the table's default price.
    pub fn add_text_generation(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        reasoning_tokens: u64,
    ) -> f64 {
        let price = self.prices.text_price(model).unwrap_or_else(|| {
            tracing::warn!(model, "no text price for model, using default price table");
            self.prices.default_text
        });
        let cost = price.cost(input_tokens, output_tokens, reasoning_tokens);

        let mut entry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entry.agent_calls += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.reasoning_tokens += reasoning_tokens;
        entry.agent_cost += cost;
        tracing::debug!(
            model,
            input_tokens,
            output_tokens,
            reasoning_tokens,
            cost,
            "recorded text generation"
        );
        cost
    }

    /// Records one image-generation call producing `count` images and returns its cost.
    ///
    /// Unknown models or qualities are charged at the table's default price.
    pub fn add_image_generation(&self, model: &str, quality: &str, count: u64) -> f64 {
        let unit = self.prices.image_price(model, quality).unwrap_or_else(|| {
            tracing::warn!(
                model,
                quality,
                "no image price for model/quality, using default price"
            );
            self.prices.default_image
        });
        let cost = unit * count as f64;

        let mut entry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        entry.image_calls += 1;
        entry.images_generated += count;
        entry.image_cost += cost;
        tracing::debug!(model, quality, count, cost, "recorded image generation");
        cost
    }

    /// Current running totals.
    pub fn entry(&self) -> CostLedgerEntry {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Immutable snapshot of the current totals.
    pub fn summary(&self) -> CostSummary {
        CostSummary::from(&self.entry())
    }
}
