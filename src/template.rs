//! Template element parsing.
//!
//! A template is a JSON array of page elements. Image elements with a source
//! URL become [`ImageTask`]s; everything else is left to the copy rewriter.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use crate::generation::ImageSize;

/// A template could not be turned into image tasks.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("template must be a JSON array of elements or an object with an `elements` array")]
    NotAnElementList,
}

/// One template image to regenerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTask {
    pub element_id: String,
    pub source_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub transparent_background: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

impl ImageTask {
    /// Creates a task with no dimensions, an opaque background and no alt text.
    pub fn new(element_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            source_url: source_url.into(),
            width: None,
            height: None,
            transparent_background: false,
            alt_text: None,
        }
    }

    /// Sets the source dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Requests a transparent background.
    pub fn with_transparent_background(mut self, transparent: bool) -> Self {
        self.transparent_background = transparent;
        self
    }

    /// Sets the alt text describing what the image depicts.
    pub fn with_alt_text(mut self, alt_text: impl Into<String>) -> Self {
        self.alt_text = Some(alt_text.into());
        self
    }

    /// The output size bucket for this task.
    pub fn size(&self) -> ImageSize {
        ImageSize::from_dimensions(self.width, self.height)
    }
}

/// A raw template element as stored in the template JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateElement {
    pub element_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "lenient_dimension")]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub transparent_bg: bool,
    #[serde(default)]
    pub alt_text: Option<String>,
}

/// Accepts `true` or the string `"true"`.
fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Accepts numbers or numeric strings; anything else is treated as missing.
fn lenient_dimension<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
            .and_then(|v| u32::try_from(v).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub elements: Vec<TemplateElement>,
}

impl Template {
    /// Parses template JSON: either an element array or an object with an
    /// `elements` array.
    pub fn parse(json: &str) -> Result<Self, TemplateError> {
        let value: Value = serde_json::from_str(json)?;
        let elements = match value {
            Value::Array(_) => value,
            Value::Object(mut obj) => obj
                .remove("elements")
                .filter(Value::is_array)
                .ok_or(TemplateError::NotAnElementList)?,
            _ => return Err(TemplateError::NotAnElementList),
        };
        Ok(Self {
            elements: serde_json::from_value(elements)?,
        })
    }

    /// Image elements with a source URL, in template order.
    ///
    /// Repeated element ids keep their first occurrence.
    pub fn image_tasks(&self) -> Vec<ImageTask> {
        let mut seen = HashSet::new();
        self.elements
            .iter()
            .filter(|element| element.kind == "image")
            .filter_map(|element| {
                let url = element.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
                if !seen.insert(element.element_id.as_str()) {
                    tracing::warn!(element_id = %element.element_id, "skipping repeated template element");
                    return None;
                }
                Some(ImageTask {
                    element_id: element.element_id.clone(),
                    source_url: url.to_string(),
                    width: element.width,
                    height: element.height,
                    transparent_background: element.transparent_bg,
                    alt_text: element.alt_text.clone().filter(|alt| !alt.trim().is_empty()),
                })
            })
            .collect()
    }

    /// Element ids of the image elements, for the copy rewriter.
    pub fn image_element_ids(&self) -> Vec<String> {
        self.image_tasks()
            .into_iter()
            .map(|task| task.element_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"[
        {"element_id": "headline", "type": "text", "content": "Welcome"},
        {"element_id": "site_logo", "type": "image", "url": "https://cdn.example.com/logo.png",
         "width": 400, "height": 120, "transparent_bg": "true"},
        {"element_id": "hero", "type": "image", "url": "https://cdn.example.com/hero.jpg",
         "width": 1600, "height": 900, "alt_text": "Students collaborating"},
        {"element_id": "placeholder", "type": "image"},
        {"element_id": "badge", "type": "image", "url": "https://cdn.example.com/badge.png",
         "transparent_bg": true, "width": "512", "height": 512.0}
    ]"#;

    #[test]
    fn test_extracts_image_elements_in_order() {
        let tasks = Template::parse(TEMPLATE).unwrap().image_tasks();
        let ids: Vec<&str> = tasks.iter().map(|t| t.element_id.as_str()).collect();
        assert_eq!(ids, vec!["site_logo", "hero", "badge"]);
    }

    #[test]
    fn test_transparent_flag_accepts_bool_or_string() {
        let tasks = Template::parse(TEMPLATE).unwrap().image_tasks();
        assert!(tasks[0].transparent_background);
        assert!(!tasks[1].transparent_background);
        assert!(tasks[2].transparent_background);
    }

    #[test]
    fn test_dimensions_and_context() {
        let tasks = Template::parse(TEMPLATE).unwrap().image_tasks();
        assert_eq!(tasks[1].size(), ImageSize::Landscape);
        assert_eq!(tasks[1].alt_text.as_deref(), Some("Students collaborating"));
        assert_eq!(tasks[2].width, Some(512));
        assert_eq!(tasks[2].height, Some(512));
        assert_eq!(tasks[2].size(), ImageSize::Square);
    }

    #[test]
    fn test_object_with_elements() {
        let template = Template::parse(
            r#"{"name": "landing", "elements": [{"element_id": "hero", "type": "image", "url": "a.png"}]}"#,
        )
        .unwrap();
        assert_eq!(template.image_element_ids(), vec!["hero".to_string()]);
    }

    #[test]
    fn test_repeated_ids_keep_first() {
        let template = Template::parse(
            r#"[{"element_id": "hero", "type": "image", "url": "a.png"},
                {"element_id": "hero", "type": "image", "url": "b.png"}]"#,
        )
        .unwrap();
        let tasks = template.image_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source_url, "a.png");
    }

    #[test]
    fn test_malformed_templates() {
        assert!(matches!(Template::parse("not json"), Err(TemplateError::Json(_))));
        assert!(matches!(
            Template::parse(r#"{"title": "x"}"#),
            Err(TemplateError::NotAnElementList)
        ));
        assert!(matches!(Template::parse("42"), Err(TemplateError::NotAnElementList)));
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let task = ImageTask::new("hero", "https://x.test/h.png")
            .with_dimensions(10, 20)
            .with_transparent_background(true);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["elementId"], "hero");
        assert_eq!(json["sourceUrl"], "https://x.test/h.png");
        assert_eq!(json["transparentBackground"], true);
        assert!(json.get("altText").is_none());
    }
}
