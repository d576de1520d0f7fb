//! OpenAI Responses API over reqwest, with a server-sent-events decoder.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use crate::ports::error_chain;

use super::client::{EventStream, GenerationError, GenerationRequest, ResponsesApi};
use super::payload::{ResponseBody, StreamEvent};

/// Default Responses API base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Accumulates raw bytes and yields the `data` of each complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to contain no newline.
    scanned: usize,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the data of every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            self.scanned = 0;
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            self.process_line(line, &mut events);
        }
        self.scanned = self.buffer.len();
        events
    }

    /// Flushes a trailing event not followed by a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            self.scanned = 0;
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            self.process_line(&line, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(events);
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // `event:`, `id:`, `retry:` and comment lines carry nothing we need;
        // the event type is repeated inside the JSON data.
    }

    fn dispatch(&mut self, events: &mut Vec<String>) {
        if !self.data_lines.is_empty() {
            events.push(self.data_lines.join("\n"));
            self.data_lines.clear();
        }
    }
}

fn parse_event_data(data: &str) -> Option<StreamEvent> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return None;
    }
    match StreamEvent::parse(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            let event_type = serde_json::from_str::<Value>(trimmed)
                .ok()
                .and_then(|value| value.get("type")?.as_str().map(str::to_string));
            tracing::warn!(
                event_type = event_type.as_deref().unwrap_or("unknown"),
                "skipping malformed stream event: {}",
                e
            );
            None
        }
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, GenerationError>>,
    finished: bool,
}

/// Turns a byte stream of server-sent events into [`StreamEvent`]s.
///
/// A transport error ends the stream with [`GenerationError::Stream`].
pub fn decode_event_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    let state = DecodeState {
        inner: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state
                        .pending
                        .extend(events.iter().filter_map(|d| parse_event_data(d)).map(Ok));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(GenerationError::Stream(error_chain(&e))));
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state
                        .pending
                        .extend(events.iter().filter_map(|d| parse_event_data(d)).map(Ok));
                }
            }
        }
    })
    .boxed()
}

/// [`ResponsesApi`] backed by the OpenAI HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiResponsesApi {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiResponsesApi {
    /// Creates a client for `base_url` (e.g. [`OPENAI_API_BASE`]).
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GenerationError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The JSON body of a streaming image-regeneration request.
    pub fn request_body(request: &GenerationRequest) -> Value {
        json!({
            "model": request.orchestrator_model,
            "input": [{
                "role": "user",
                "content": [
                    {"type": "input_image", "image_url": request.source_data_url()},
                    {"type": "input_text", "text": request.prompt}
                ]
            }],
            "text": {"format": {"type": "text"}, "verbosity": "medium"},
            "reasoning": {"effort": "medium", "summary": "auto"},
            "tools": [{
                "type": "image_generation",
                "model": request.image_model,
                "size": request.size.as_str(),
                "quality": request.quality(),
                "output_format": "png",
                "background": request.background(),
                "moderation": "auto",
                "partial_images": request.partial_images
            }],
            "store": true,
            "stream": true
        })
    }

    async fn error_from_response(response: reqwest::Response) -> GenerationError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        GenerationError::Http {
            status: status.as_u16(),
            message: format!(
                "{} {}",
                status.canonical_reason().unwrap_or("error"),
                message
            ),
        }
    }
}

#[async_trait]
impl ResponsesApi for OpenAiResponsesApi {
    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError> {
        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| GenerationError::Transport(error_chain(&e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        Ok(decode_event_stream(response.bytes_stream()))
    }

    async fn retrieve(&self, response_id: &str) -> Result<ResponseBody, GenerationError> {
        let response = self
            .client
            .get(format!("{}/responses/{}", self.base_url, response_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(error_chain(&e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("Failed to parse response: {}", e)))
    }
}
