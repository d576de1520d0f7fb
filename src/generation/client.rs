//! The streaming image-generation client.
//!
//! One call to [`StreamingGenerationClient::generate`] turns a source image
//! into a brand-aligned replacement. Each attempt opens a fresh event stream
//! and stops at the first usable image payload. When the stream breaks or
//! ends without an image but a response id was seen, the stored response is
//! retrieved and scanned instead. Attempts run under a deadline and are
//! retried with backoff while the classifier says the failure is transient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::cost::CostLedger;
use crate::error::{ClassifiedError, Classify, ErrorDetector, ErrorReason};
use crate::ports::ImageSource;
use crate::retry::{retry, RetryPolicy};
use crate::template::ImageTask;
use crate::timeout::{with_timeout, TimeoutError};

use super::payload::{ImagePayload, PayloadError, ResponseBody, StreamEvent, TokenUsage};
use super::prompt::{build_prompt, BrandProfile, PromptContext};
use super::size::ImageSize;

/// Events of one streaming response.
pub type EventStream = BoxStream<'static, Result<StreamEvent, GenerationError>>;

/// Failure of a single generation attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// The API answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// The request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The event stream broke mid-flight.
    #[error("stream disrupted: {0}")]
    Stream(String),
    /// The API reported an error inside the stream or a failed response.
    #[error("API error{}: {message}", code_suffix(.code))]
    Api {
        code: Option<String>,
        message: String,
    },
    /// The attempt exceeded its deadline.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// A payload was found but could not be decoded.
    #[error(transparent)]
    Payload(#[from] PayloadError),
    /// A remote image payload could not be fetched.
    #[error("failed to fetch generated image: {0}")]
    Fetch(String),
    /// Neither the stream nor the stored response contained an image.
    #[error("no image found in response stream for {element_id}")]
    NoImage { element_id: String },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|code| format!(" ({})", code))
        .unwrap_or_default()
}

impl Classify for GenerationError {
    fn classify(&self, detector: &ErrorDetector) -> ClassifiedError {
        let message = self.to_string();
        match self {
            GenerationError::Http { status, .. } => detector.classify_status(*status, &message),
            GenerationError::Timeout(_) => ClassifiedError::new(ErrorReason::Timeout, message),
            // No response means a network failure unless the text says otherwise.
            GenerationError::Transport(_) => {
                detector.classify_text_or(&message, ErrorReason::NetworkError)
            }
            GenerationError::Stream(_) => {
                detector.classify_text_or(&message, ErrorReason::StreamDisrupted)
            }
            GenerationError::Payload(_) | GenerationError::NoImage { .. } => {
                ClassifiedError::new(ErrorReason::NoImage, message)
            }
            GenerationError::Api {
                code: Some(code), ..
            } if code == "server_error" => ClassifiedError::new(ErrorReason::ServerError, message),
            _ => detector.classify_text(&message),
        }
    }
}

/// Everything needed to open one streaming generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub element_id: String,
    pub orchestrator_model: String,
    pub image_model: String,
    pub prompt: String,
    pub source_image: Vec<u8>,
    pub size: ImageSize,
    pub transparent_background: bool,
    pub partial_images: u8,
}

impl GenerationRequest {
    /// Tool quality: transparency renders best at medium.
    pub fn quality(&self) -> &'static str {
        if self.transparent_background {
            "medium"
        } else {
            "auto"
        }
    }

    /// Tool background setting.
    pub fn background(&self) -> &'static str {
        if self.transparent_background {
            "transparent"
        } else {
            "opaque"
        }
    }

    /// The source image as a base64 data URL.
    pub fn source_data_url(&self) -> String {
        use base64::Engine as _;
        format!(
            "data:{};base64,{}",
            sniff_mime(&self.source_image),
            base64::engine::general_purpose::STANDARD.encode(&self.source_image)
        )
    }
}

/// Best-effort MIME type from magic bytes; PNG when unknown.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

/// The model API: open a response stream, or fetch a stored response.
#[async_trait]
pub trait ResponsesApi: Send + Sync {
    /// Opens a streaming response for `request`.
    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError>;

    /// Retrieves a stored response by id.
    async fn retrieve(&self, response_id: &str) -> Result<ResponseBody, GenerationError>;
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Produced an image of `bytes` length.
    Success { bytes: usize, recovered: bool },
    RetryableFailure { reason: ErrorReason, message: String },
    FatalFailure { reason: ErrorReason, message: String },
}

/// Record of one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationAttempt {
    pub element_id: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// A successfully generated image.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub response_id: Option<String>,
    /// True when the image came from the stored response, not the stream.
    pub recovered: bool,
    pub usage: Option<TokenUsage>,
    pub attempts: Vec<GenerationAttempt>,
}

/// A generation that failed after all permitted attempts.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct GenerationFailure {
    pub error: GenerationError,
    pub classification: ClassifiedError,
    pub attempts: Vec<GenerationAttempt>,
}

/// The result of one attempt before bookkeeping.
struct AttemptImage {
    bytes: Vec<u8>,
    response_id: Option<String>,
    recovered: bool,
    usage: Option<TokenUsage>,
}

#[derive(Default)]
struct StreamState {
    response_id: Option<String>,
    usage: Option<TokenUsage>,
    payload_error: Option<GenerationError>,
}

/// Generates replacement images through a [`ResponsesApi`].
#[derive(Clone)]
pub struct StreamingGenerationClient {
    api: Arc<dyn ResponsesApi>,
    images: Arc<dyn ImageSource>,
    settings: GenerationConfig,
    retry_policy: RetryPolicy,
    detector: Arc<ErrorDetector>,
}

impl StreamingGenerationClient {
    /// Creates a client. `images` fetches payloads returned as remote URLs.
    pub fn new(
        api: Arc<dyn ResponsesApi>,
        images: Arc<dyn ImageSource>,
        settings: GenerationConfig,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            images,
            settings,
            retry_policy,
            detector: Arc::new(ErrorDetector::new()),
        }
    }

    /// Replaces the error detector used to decide on retries.
    pub fn with_detector(mut self, detector: ErrorDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn settings(&self) -> &GenerationConfig {
        &self.settings
    }

    pub fn detector(&self) -> &ErrorDetector {
        &self.detector
    }

    /// Builds the request for `task`.
    pub fn build_request(
        &self,
        task: &ImageTask,
        source_image: Vec<u8>,
        profile: &BrandProfile,
    ) -> GenerationRequest {
        let prompt = build_prompt(
            &self.settings.brand_name,
            profile,
            PromptContext {
                element_id: &task.element_id,
                transparent_background: task.transparent_background,
                alt_text: task.alt_text.as_deref(),
            },
        );
        GenerationRequest {
            element_id: task.element_id.clone(),
            orchestrator_model: self.settings.orchestrator_model.clone(),
            image_model: self.settings.image_model.clone(),
            prompt,
            source_image,
            size: task.size(),
            transparent_background: task.transparent_background,
            partial_images: self.settings.partial_images,
        }
    }

    /// Generates a replacement for `task` from its downloaded source bytes.
    ///
    /// A successful generation records one image, plus the orchestrating
    /// model's token usage when reported, in `ledger`.
    ///
    /// # Errors
    /// Returns the last attempt's error, its classification and the attempt
    /// log once retries are exhausted or a non-retryable failure occurs.
    pub async fn generate(
        &self,
        task: &ImageTask,
        source_image: Vec<u8>,
        profile: &BrandProfile,
        ledger: &CostLedger,
    ) -> Result<GeneratedImage, GenerationFailure> {
        let request = self.build_request(task, source_image, profile);
        tracing::debug!(
            element_id = %request.element_id,
            size = %request.size,
            quality = request.quality(),
            prompt = %request.prompt,
            "starting image generation"
        );

        let attempts: Mutex<Vec<GenerationAttempt>> = Mutex::new(Vec::new());
        let request_ref = &request;
        let attempts_ref = &attempts;
        let deadline = self.settings.timeout();

        let result = retry(
            &self.retry_policy,
            move |attempt_number| async move {
                let started_at = Utc::now();
                let outcome = with_timeout(
                    format!("image generation for {}", request_ref.element_id),
                    deadline,
                    self.attempt(request_ref),
                )
                .await
                .map_err(GenerationError::from)
                .and_then(|inner| inner);

                let recorded = match &outcome {
                    Ok(image) => AttemptOutcome::Success {
                        bytes: image.bytes.len(),
                        recovered: image.recovered,
                    },
                    Err(error) => {
                        let classified = error.classify(&self.detector);
                        if classified.should_retry {
                            AttemptOutcome::RetryableFailure {
                                reason: classified.reason,
                                message: classified.message,
                            }
                        } else {
                            AttemptOutcome::FatalFailure {
                                reason: classified.reason,
                                message: classified.message,
                            }
                        }
                    }
                };
                attempts_ref
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(GenerationAttempt {
                        element_id: request_ref.element_id.clone(),
                        attempt_number,
                        started_at,
                        outcome: recorded,
                    });
                outcome
            },
            |error: &GenerationError| error.classify(&self.detector).should_retry,
        )
        .await;

        let attempts = attempts.into_inner().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(image) => {
                ledger.add_image_generation(&request.image_model, request.quality(), 1);
                if let Some(usage) = image.usage {
                    ledger.add_text_generation(
                        &request.orchestrator_model,
                        usage.input_tokens,
                        usage.visible_output_tokens(),
                        usage.reasoning_tokens(),
                    );
                }
                tracing::debug!(
                    element_id = %request.element_id,
                    bytes = image.bytes.len(),
                    recovered = image.recovered,
                    attempts = attempts.len(),
                    "image generated"
                );
                Ok(GeneratedImage {
                    bytes: image.bytes,
                    response_id: image.response_id,
                    recovered: image.recovered,
                    usage: image.usage,
                    attempts,
                })
            }
            Err(error) => {
                let classification = error.classify(&self.detector);
                Err(GenerationFailure {
                    error,
                    classification,
                    attempts,
                })
            }
        }
    }

    /// One attempt: stream, then fall back to the stored response.
    async fn attempt(&self, request: &GenerationRequest) -> Result<AttemptImage, GenerationError> {
        let mut state = StreamState::default();
        let streamed = self.consume_stream(request, &mut state).await;

        let stream_error = match streamed {
            Ok(Some(bytes)) => {
                return Ok(AttemptImage {
                    bytes,
                    response_id: state.response_id,
                    recovered: false,
                    usage: state.usage,
                })
            }
            Ok(None) => None,
            Err(error) => Some(error),
        };

        if let Some(response_id) = state.response_id.clone() {
            tracing::warn!(
                element_id = %request.element_id,
                response_id = %response_id,
                stream_error = %stream_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "no image from stream, retrieving stored response"
            );
            match self.recover(&response_id).await {
                Ok(Some((bytes, usage))) => {
                    tracing::info!(
                        element_id = %request.element_id,
                        response_id = %response_id,
                        "recovered image from stored response"
                    );
                    return Ok(AttemptImage {
                        bytes,
                        response_id: Some(response_id),
                        recovered: true,
                        usage: usage.or(state.usage),
                    });
                }
                Ok(None) => {
                    tracing::warn!(response_id = %response_id, "stored response contains no image");
                }
                Err(error) => {
                    tracing::warn!(response_id = %response_id, "could not retrieve stored response: {}", error);
                }
            }
        }

        Err(stream_error
            .or(state.payload_error)
            .unwrap_or_else(|| GenerationError::NoImage {
                element_id: request.element_id.clone(),
            }))
    }

    /// Reads events until the first decodable image.
    async fn consume_stream(
        &self,
        request: &GenerationRequest,
        state: &mut StreamState,
    ) -> Result<Option<Vec<u8>>, GenerationError> {
        let mut events = self.api.stream(request).await?;

        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(id) = event.response_id() {
                state.response_id = Some(id.to_string());
            }

            match &event {
                StreamEvent::Completed { response } => state.usage = response.usage,
                StreamEvent::Failed { response } => {
                    let error = response.error.clone().unwrap_or_default();
                    return Err(GenerationError::Api {
                        code: error.code,
                        message: if error.message.is_empty() {
                            format!("response {} failed", response.id)
                        } else {
                            error.message
                        },
                    });
                }
                StreamEvent::Error { code, message } => {
                    return Err(GenerationError::Api {
                        code: code.clone(),
                        message: message.clone(),
                    });
                }
                StreamEvent::PartialImage {
                    partial_image_index,
                } => {
                    tracing::debug!(
                        element_id = %request.element_id,
                        index = partial_image_index.unwrap_or_default(),
                        "partial image received"
                    );
                }
                _ => {}
            }

            if let Some(payload) = event.image_payload() {
                tracing::debug!(element_id = %request.element_id, kind = payload.kind(), "image payload in stream");
                match self.resolve(&payload).await {
                    Ok(bytes) => return Ok(Some(bytes)),
                    Err(error) => {
                        tracing::warn!(element_id = %request.element_id, "unusable image payload: {}", error);
                        state.payload_error = Some(error);
                    }
                }
            }
        }

        Ok(None)
    }

    /// Retrieves a stored response and extracts its image.
    async fn recover(
        &self,
        response_id: &str,
    ) -> Result<Option<(Vec<u8>, Option<TokenUsage>)>, GenerationError> {
        let response = self.api.retrieve(response_id).await?;
        for payload in response.output.iter().filter_map(|item| item.image_payload()) {
            match self.resolve(&payload).await {
                Ok(bytes) => return Ok(Some((bytes, response.usage))),
                Err(error) => {
                    tracing::warn!(response_id, "unusable image payload in stored response: {}", error)
                }
            }
        }
        Ok(None)
    }

    async fn resolve(&self, payload: &ImagePayload) -> Result<Vec<u8>, GenerationError> {
        if let Some(bytes) = payload.decode_inline()? {
            return Ok(bytes);
        }
        match payload {
            ImagePayload::RemoteUrl(url) => {
                let bytes = self
                    .images
                    .download(url)
                    .await
                    .map_err(|e| GenerationError::Fetch(e.to_string()))?;
                if bytes.is_empty() {
                    return Err(PayloadError::Empty.into());
                }
                Ok(bytes)
            }
            _ => Err(PayloadError::Empty.into()),
        }
    }
}
