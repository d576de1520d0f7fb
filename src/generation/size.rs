//! Output size buckets supported by the image model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aspect ratios within this band of 1.0 map to a square canvas.
const SQUARE_LOWER: f64 = 0.9;
const SQUARE_UPPER: f64 = 1.1;

/// One of the canvas sizes the image model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1536x1024")]
    Landscape,
    #[serde(rename = "1024x1536")]
    Portrait,
    #[default]
    #[serde(rename = "auto")]
    Auto,
}

impl ImageSize {
    /// Picks the bucket closest to the source aspect ratio.
    ///
    /// Missing or zero dimensions yield [`ImageSize::Auto`].
    pub fn from_dimensions(width: Option<u32>, height: Option<u32>) -> Self {
        match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => {
                let ratio = f64::from(w) / f64::from(h);
                if (SQUARE_LOWER..=SQUARE_UPPER).contains(&ratio) {
                    ImageSize::Square
                } else if ratio > SQUARE_UPPER {
                    ImageSize::Landscape
                } else {
                    ImageSize::Portrait
                }
            }
            _ => ImageSize::Auto,
        }
    }

    /// The value sent as the tool's `size` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Square => "1024x1024",
            ImageSize::Landscape => "1536x1024",
            ImageSize::Portrait => "1024x1536",
            ImageSize::Auto => "auto",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
