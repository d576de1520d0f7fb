//! Model price tables.
//!
//! Text models are priced per million tokens; image models at a flat price
//! per generated image, keyed by quality. Lookups for unknown models or
//! qualities return `None`; the ledger then charges the table's defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// USD price per million tokens for a text model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    /// Price per million input tokens.
    pub input: f64,
    /// Price per million output tokens.
    pub output: f64,
    /// Price per million reasoning tokens.
    pub reasoning: f64,
}

impl TokenPrice {
    /// Creates a token price.
    pub const fn new(input: f64, output: f64, reasoning: f64) -> Self {
        Self {
            input,
            output,
            reasoning,
        }
    }

    /// Cost in USD of the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64, reasoning_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input
            + output_tokens as f64 * self.output
            + reasoning_tokens as f64 * self.reasoning)
            / 1_000_000.0
    }
}

/// Fallback text price: the orchestrating model's list price.
pub const DEFAULT_TOKEN_PRICE: TokenPrice = TokenPrice::new(1.25, 10.0, 10.0);

/// Fallback price for one image of unknown model or quality.
pub const DEFAULT_IMAGE_PRICE: f64 = 0.042;

/// Price lookup tables for text and image generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceTable {
    /// Text model name to token price.
    pub text: HashMap<String, TokenPrice>,
    /// Image model name to quality to price per image.
    pub images: HashMap<String, HashMap<String, f64>>,
    /// Used for text models missing from `text`.
    pub default_text: TokenPrice,
    /// Used for image models or qualities missing from `images`.
    pub default_image: f64,
}

impl Default for PriceTable {
    fn default() -> Self {
        let text = HashMap::from([
            ("gpt-5".to_string(), TokenPrice::new(1.25, 10.0, 10.0)),
            ("gpt-5-mini".to_string(), TokenPrice::new(0.25, 2.0, 2.0)),
            ("gpt-4.1".to_string(), TokenPrice::new(2.0, 8.0, 8.0)),
            ("gpt-4o".to_string(), TokenPrice::new(2.5, 10.0, 10.0)),
        ]);
        let gpt_image_1 = HashMap::from([
            ("low".to_string(), 0.011),
            ("medium".to_string(), 0.042),
            ("high".to_string(), 0.167),
            ("auto".to_string(), 0.042),
        ]);
        let images = HashMap::from([("gpt-image-1".to_string(), gpt_image_1)]);

        Self {
            text,
            images,
            default_text: DEFAULT_TOKEN_PRICE,
            default_image: DEFAULT_IMAGE_PRICE,
        }
    }
}

impl PriceTable {
    /// An empty table that prices everything at the defaults.
    pub fn empty() -> Self {
        Self {
            text: HashMap::new(),
            images: HashMap::new(),
            default_text: DEFAULT_TOKEN_PRICE,
            default_image: DEFAULT_IMAGE_PRICE,
        }
    }

    /// Adds or replaces a text model price.
    pub fn with_text_price(mut self, model: impl Into<String>, price: TokenPrice) -> Self {
        self.text.insert(model.into(), price);
        self
    }

    /// Adds or replaces an image model price for one quality.
    pub fn with_image_price(
        mut self,
        model: impl Into<String>,
        quality: impl Into<String>,
        price: f64,
    ) -> Self {
        self.images
            .entry(model.into())
            .or_default()
            .insert(quality.into(), price);
        self
    }

    /// Looks up a text model's price.
    pub fn text_price(&self, model: &str) -> Option<TokenPrice> {
        self.text.get(model).copied()
    }

    /// Looks up the price of one image for a model and quality.
    pub fn image_price(&self, model: &str, quality: &str) -> Option<f64> {
        self.images
            .get(model)
            .and_then(|qualities| qualities.get(quality))
            .copied()
    }
}
