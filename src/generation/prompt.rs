//! Brand-aware prompt construction.
//!
//! A brand guide arrives either as a structured JSON document or as free text
//! (a style guide written by a person). Free text is mined for colors,
//! typography and a few known style phrases. Everything here is pure.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Used when the guide names no primary color.
pub const DEFAULT_PRIMARY_HEX: &str = "#F6C1C0";
/// Used when the guide names no secondary color.
pub const DEFAULT_SECONDARY_HEX: &str = "#F59E0B";
/// Used when the guide names no accent color.
pub const DEFAULT_ACCENT_HEX: &str = "#10B981";
/// Used when the guide mentions none of the known style phrases.
pub const DEFAULT_VISUAL_STYLE: &str = "Premium minimalism style with clean backgrounds";

/// Style phrases recognized in free-text guides, in output order.
const KNOWN_STYLE_PHRASES: [&str; 3] = [
    "Premium minimalism",
    "clean backgrounds",
    "data visualization",
];

/// A named brand color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandColor {
    pub name: String,
    /// Uppercase hex with a leading `#`.
    pub hex: String,
}

impl BrandColor {
    /// Creates a color, normalizing the hex code.
    pub fn new(name: impl Into<String>, hex: &str) -> Self {
        Self {
            name: name.into(),
            hex: normalize_hex(hex),
        }
    }

    fn label(&self) -> String {
        format!("{} ({})", self.name, self.hex)
    }
}

fn normalize_hex(hex: &str) -> String {
    format!("#{}", hex.trim().trim_start_matches('#').to_uppercase())
}

/// The brand attributes a prompt draws from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrandProfile {
    pub primary: Option<BrandColor>,
    pub secondary: Option<BrandColor>,
    pub accent: Option<BrandColor>,
    pub heading_font: Option<String>,
    pub body_font: Option<String>,
    pub visual_style: Vec<String>,
}

/// A brand guide as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrandGuide {
    Structured(BrandProfile),
    FreeText(String),
}

impl BrandGuide {
    /// Interprets raw guide contents: a JSON object with at least one brand
    /// field is structured, anything else is treated as free text.
    pub fn from_contents(contents: &str) -> Self {
        match serde_json::from_str::<BrandProfile>(contents) {
            Ok(profile)
                if contents.trim_start().starts_with('{') && profile != BrandProfile::default() =>
            {
                BrandGuide::Structured(profile)
            }
            _ => BrandGuide::FreeText(contents.to_string()),
        }
    }

    /// Resolves the guide into a profile.
    pub fn profile(&self) -> BrandProfile {
        match self {
            BrandGuide::Structured(profile) => profile.clone(),
            BrandGuide::FreeText(text) => BrandProfile::from_text(text),
        }
    }

    /// The guide as text, for handing to the copy-rewriting agent.
    pub fn to_text(&self) -> String {
        match self {
            BrandGuide::FreeText(text) => text.clone(),
            BrandGuide::Structured(profile) => {
                serde_json::to_string_pretty(profile).unwrap_or_default()
            }
        }
    }
}

struct GuidePatterns {
    primary: Regex,
    secondary: Regex,
    accent: Regex,
    headings: Regex,
    body: Regex,
}

fn guide_patterns() -> &'static GuidePatterns {
    static PATTERNS: OnceLock<GuidePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let color = |label: &str| {
            Regex::new(&format!(r"(?i){}:\s*([^(\n]+?)\s*\(#([A-F0-9]+)\)", label))
                .expect("Invalid color pattern")
        };
        GuidePatterns {
            primary: color("Primary"),
            secondary: color("Secondary"),
            accent: color("Accent"),
            headings: Regex::new(r"(?i)Headings:\s*([^\n]+)").expect("Invalid headings pattern"),
            body: Regex::new(r"(?i)Body:\s*([^\n]+)").expect("Invalid body pattern"),
        }
    })
}

impl BrandProfile {
    /// Extracts brand attributes from a free-text guide.
    ///
    /// Colors are read from `Primary: Name (#HEX)` style lines, fonts from
    /// `Headings:` and `Body:` lines. Anything not found stays unset.
    pub fn from_text(text: &str) -> Self {
        let patterns = guide_patterns();
        let color = |re: &Regex| {
            re.captures(text)
                .map(|caps| BrandColor::new(caps[1].trim(), &caps[2]))
        };
        let line = |re: &Regex| {
            re.captures(text)
                .map(|caps| caps[1].trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            primary: color(&patterns.primary),
            secondary: color(&patterns.secondary),
            accent: color(&patterns.accent),
            heading_font: line(&patterns.headings),
            body_font: line(&patterns.body),
            visual_style: KNOWN_STYLE_PHRASES
                .iter()
                .filter(|phrase| text.contains(*phrase))
                .map(|phrase| phrase.to_string())
                .collect(),
        }
    }

    fn visual_style_text(&self) -> String {
        if self.visual_style.is_empty() {
            DEFAULT_VISUAL_STYLE.to_string()
        } else {
            self.visual_style.join(", ")
        }
    }

    fn color_guidelines(&self) -> String {
        [
            (self.primary.as_ref(), "for primary elements"),
            (self.secondary.as_ref(), "for accents"),
            (self.accent.as_ref(), "for success indicators"),
        ]
        .into_iter()
        .filter_map(|(color, role)| color.map(|c| format!("{} {}", c.label(), role)))
        .collect::<Vec<_>>()
        .join(", ")
    }

    fn typography_guidelines(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.heading_font.as_ref().map(|f| format!("{} font for headings", f)),
            self.body_font.as_ref().map(|f| format!("{} for body text", f)),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    fn color_or_default(color: &Option<BrandColor>, fallback_name: &str, fallback_hex: &str) -> String {
        match color {
            Some(c) => c.label(),
            None => format!("{} ({})", fallback_name, fallback_hex),
        }
    }
}

/// Which prompt template an element gets, decided by its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Logo,
    Hero,
    Generic,
}

impl ImageKind {
    /// Classifies an element id.
    pub fn from_element_id(element_id: &str) -> Self {
        if element_id.contains("logo") {
            ImageKind::Logo
        } else if ["hero", "cta_image", "image_url"]
            .iter()
            .any(|marker| element_id.contains(marker))
        {
            ImageKind::Hero
        } else {
            ImageKind::Generic
        }
    }
}

/// Per-element inputs to [`build_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub element_id: &'a str,
    pub transparent_background: bool,
    pub alt_text: Option<&'a str>,
}

/// Builds the regeneration prompt for one element.
pub fn build_prompt(brand_name: &str, profile: &BrandProfile, context: PromptContext<'_>) -> String {
    let style = profile.visual_style_text();
    let typography = profile.typography_guidelines();
    let colors = profile.color_guidelines();

    let mut base = format!("{} brand guidelines: ", brand_name);
    if !colors.is_empty() {
        base.push_str(&colors);
        base.push_str(". ");
    }
    base.push_str(&style);
    base.push('.');
    if let Some(typography) = &typography {
        base.push_str(&format!(" Typography: {}.", typography));
    }

    let background = if context.transparent_background {
        " Use transparent background."
    } else {
        " Use white/opaque background."
    };
    let depiction = context
        .alt_text
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .map(|alt| format!(" The image should depict: {}.", alt))
        .unwrap_or_default();

    let primary =
        BrandProfile::color_or_default(&profile.primary, "primary brand color", DEFAULT_PRIMARY_HEX);

    match ImageKind::from_element_id(context.element_id) {
        ImageKind::Logo => format!(
            "Redesign this logo to match {brand} brand. Use {primary} wordmark.{background} \
             Maintain generous clear space around the wordmark. No shadows or effects. \
             {style}.{depiction} {base}",
            brand = brand_name,
        ),
        ImageKind::Hero => {
            let secondary = BrandProfile::color_or_default(
                &profile.secondary,
                "secondary color",
                DEFAULT_SECONDARY_HEX,
            );
            let accent =
                BrandProfile::color_or_default(&profile.accent, "accent color", DEFAULT_ACCENT_HEX);
            let typography_note = typography
                .map(|t| format!(" Typography: {} for any text included.", t))
                .unwrap_or_default();
            format!(
                "Redesign this hero/CTA image with {style}.{background} Use {primary} for primary \
                 elements, {secondary} for accents, {accent} for success indicators. Include clean \
                 data visualization elements if appropriate.{typography_note}{depiction} {base}"
            )
        }
        ImageKind::Generic => format!(
            "Redesign this image to match {brand} brand guidelines.{background}{depiction} {base}",
            brand = brand_name,
        ),
    }
}
