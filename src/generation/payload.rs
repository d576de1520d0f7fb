//! Wire types for the Responses API event stream and stored responses.
//!
//! Output items and image payloads come in several shapes depending on how
//! the model chose to return the image. They are modelled as closed enums so
//! every shape is handled explicitly; anything unrecognized lands in an
//! `Other`/`Unknown` variant instead of failing the parse.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// An inline payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("invalid data URL image payload")]
    MalformedDataUrl,
    #[error("image payload base64 decode failed: {0}")]
    Base64(String),
    #[error("image payload decoded to zero bytes")]
    Empty,
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Where the bytes of a generated image can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    /// Raw base64 without a data URL prefix.
    InlineBase64(String),
    /// A `data:image/...;base64,` URL.
    DataUrl { mime_type: String, data: String },
    /// An HTTP(S) URL the image must be fetched from.
    RemoteUrl(String),
    /// A shape that carries no usable image.
    Unknown,
}

impl ImagePayload {
    /// Classifies a string payload.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ImagePayload::Unknown;
        }
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("data:image/") {
            return match trimmed.split_once(',') {
                Some((meta, data)) => ImagePayload::DataUrl {
                    mime_type: meta
                        .trim_start_matches("data:")
                        .split(';')
                        .next()
                        .map(str::trim)
                        .filter(|mime| !mime.is_empty())
                        .unwrap_or("image/png")
                        .to_string(),
                    data: data.trim().to_string(),
                },
                None => ImagePayload::Unknown,
            };
        }
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return ImagePayload::RemoteUrl(trimmed.to_string());
        }
        ImagePayload::InlineBase64(trimmed.to_string())
    }

    /// Classifies a JSON payload: a string, or an object carrying the image
    /// under `url`, `data` or `image_url`.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(raw) => Self::from_text(raw),
            Value::Object(obj) => ["url", "data", "image_url", "result", "b64_json"]
                .iter()
                .filter_map(|key| obj.get(*key))
                .map(Self::from_value)
                .find(|payload| !payload.is_unknown())
                .unwrap_or(ImagePayload::Unknown),
            _ => ImagePayload::Unknown,
        }
    }

    /// Returns true for [`ImagePayload::Unknown`].
    pub fn is_unknown(&self) -> bool {
        matches!(self, ImagePayload::Unknown)
    }

    /// Decodes inline payloads.
    ///
    /// Returns `Ok(None)` for remote and unknown payloads; remote URLs have
    /// to be fetched by the caller.
    pub fn decode_inline(&self) -> Result<Option<Vec<u8>>, PayloadError> {
        let encoded = match self {
            ImagePayload::InlineBase64(data) => data,
            ImagePayload::DataUrl { data, .. } => {
                if data.is_empty() {
                    return Err(PayloadError::MalformedDataUrl);
                }
                data
            }
            ImagePayload::RemoteUrl(_) | ImagePayload::Unknown => return Ok(None),
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| PayloadError::Base64(e.to_string()))?;
        if bytes.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(Some(bytes))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ImagePayload::InlineBase64(_) => "inline_base64",
            ImagePayload::DataUrl { .. } => "data_url",
            ImagePayload::RemoteUrl(_) => "remote_url",
            ImagePayload::Unknown => "unknown",
        }
    }
}

/// A content part inside a message output item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<Value>,
}

impl ContentPart {
    fn image_payload(&self) -> Option<ImagePayload> {
        if self.kind != "image" && self.kind != "image_url" {
            return None;
        }
        image_reference(self.image_url.as_ref(), self.url.as_deref())
    }
}

fn image_reference(image_url: Option<&Value>, url: Option<&str>) -> Option<ImagePayload> {
    let payload = match (image_url, url) {
        (Some(value), _) => ImagePayload::from_value(value),
        (None, Some(url)) => ImagePayload::from_text(url),
        (None, None) => ImagePayload::Unknown,
    };
    (!payload.is_unknown()).then_some(payload)
}

/// One item of a response's output, or an item/part carried by a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// The hosted image tool's call; `result` holds base64 once complete.
    ImageGenerationCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        result: Option<String>,
    },
    /// A tool invocation whose output may carry the image.
    ToolUse {
        #[serde(default, deserialize_with = "null_as_default")]
        name: String,
        #[serde(default)]
        output: Option<Value>,
    },
    Image {
        #[serde(default)]
        image_url: Option<Value>,
        #[serde(default)]
        url: Option<String>,
    },
    ImageUrl {
        #[serde(default)]
        image_url: Option<Value>,
        #[serde(default)]
        url: Option<String>,
    },
    Message {
        #[serde(default, deserialize_with = "null_as_default")]
        content: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

impl OutputItem {
    /// The image payload this item carries, if any.
    pub fn image_payload(&self) -> Option<ImagePayload> {
        match self {
            OutputItem::ImageGenerationCall { result, .. } => result
                .as_deref()
                .map(str::trim)
                .filter(|data| !data.is_empty())
                .map(|data| ImagePayload::InlineBase64(data.to_string())),
            OutputItem::ToolUse { name, output } => {
                if name != "image_generation" && name != "image" {
                    return None;
                }
                output
                    .as_ref()
                    .map(ImagePayload::from_value)
                    .filter(|payload| !payload.is_unknown())
            }
            OutputItem::Image { image_url, url } | OutputItem::ImageUrl { image_url, url } => {
                image_reference(image_url.as_ref(), url.as_deref())
            }
            OutputItem::Message { content } => content.iter().find_map(ContentPart::image_payload),
            OutputItem::Other => None,
        }
    }
}

/// Reasoning token details reported with output usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokenDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Token usage of a completed response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    /// Includes reasoning tokens.
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub output_tokens_details: Option<OutputTokenDetails>,
}

impl TokenUsage {
    /// Reasoning tokens reported within `output_tokens`.
    pub fn reasoning_tokens(&self) -> u64 {
        self.output_tokens_details
            .map(|details| details.reasoning_tokens)
            .unwrap_or(0)
    }

    /// Visible output tokens, excluding reasoning.
    pub fn visible_output_tokens(&self) -> u64 {
        self.output_tokens.saturating_sub(self.reasoning_tokens())
    }
}

/// Error details attached to a failed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// A response as returned by retrieval or carried by lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

impl ResponseBody {
    /// The first image payload in the output.
    pub fn image_payload(&self) -> Option<ImagePayload> {
        self.output.iter().find_map(OutputItem::image_payload)
    }
}

/// One server-sent event of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "response.created", alias = "response.in_progress")]
    Created { response: ResponseBody },
    #[serde(
        rename = "response.output_item.done",
        alias = "response.output_item.added"
    )]
    OutputItem { item: OutputItem },
    #[serde(
        rename = "response.content_part.done",
        alias = "response.content_part.added"
    )]
    ContentPart { part: OutputItem },
    /// A low-fidelity preview; never treated as the final image.
    #[serde(rename = "response.image_generation_call.partial_image")]
    PartialImage {
        #[serde(default)]
        partial_image_index: Option<u32>,
    },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseBody },
    #[serde(rename = "response.failed", alias = "response.incomplete")]
    Failed { response: ResponseBody },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

impl StreamEvent {
    /// Parses one event's JSON data.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// The response id carried by lifecycle events.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Created { response }
            | StreamEvent::Completed { response }
            | StreamEvent::Failed { response } => {
                Some(response.id.as_str()).filter(|id| !id.is_empty())
            }
            _ => None,
        }
    }

    /// The image payload carried by this event, if any.
    pub fn image_payload(&self) -> Option<ImagePayload> {
        match self {
            StreamEvent::OutputItem { item } => item.image_payload(),
            StreamEvent::ContentPart { part } => part.image_payload(),
            StreamEvent::Completed { response } => response.image_payload(),
            _ => None,
        }
    }
}
