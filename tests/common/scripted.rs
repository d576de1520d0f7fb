//! A scripted [`ResponsesApi`] double.
//!
//! [`ScriptedResponsesApi`] replays per-element event scripts and records how
//! many streams were open at once.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rebrand::generation::{
    EventStream, GenerationError, GenerationRequest, OutputItem, ResponseBody, ResponsesApi,
    StreamEvent, TokenUsage,
};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(StreamEvent),
    Error(GenerationError),
    Delay(Duration),
}

/// What a scripted stream call does.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Opening the stream fails.
    Reject(GenerationError),
    /// The stream yields these steps, then ends.
    Steps(Vec<ScriptStep>),
}

impl StreamScript {
    /// A stream that announces `response_id` and delivers `image` inline.
    pub fn image(response_id: &str, image: &[u8]) -> Self {
        StreamScript::Steps(vec![
            ScriptStep::Event(created(response_id)),
            ScriptStep::Event(StreamEvent::OutputItem {
                item: image_call(image),
            }),
            ScriptStep::Event(StreamEvent::Completed {
                response: ResponseBody {
                    id: response_id.to_string(),
                    status: Some("completed".to_string()),
                    ..ResponseBody::default()
                },
            }),
        ])
    }

    /// A stream that announces `response_id` and then breaks with `error`.
    pub fn disconnect_after_created(response_id: &str, error: GenerationError) -> Self {
        StreamScript::Steps(vec![
            ScriptStep::Event(created(response_id)),
            ScriptStep::Error(error),
        ])
    }

    /// Opening the stream fails with `error`.
    pub fn reject(error: GenerationError) -> Self {
        StreamScript::Reject(error)
    }

    /// Delays the stream's first step.
    pub fn delayed(self, delay: Duration) -> Self {
        match self {
            StreamScript::Steps(mut steps) => {
                steps.insert(0, ScriptStep::Delay(delay));
                StreamScript::Steps(steps)
            }
            StreamScript::Reject(error) => {
                StreamScript::Steps(vec![ScriptStep::Delay(delay), ScriptStep::Error(error)])
            }
        }
    }
}

/// A `response.created` event for `response_id`.
pub fn created(response_id: &str) -> StreamEvent {
    StreamEvent::Created {
        response: ResponseBody {
            id: response_id.to_string(),
            status: Some("in_progress".to_string()),
            ..ResponseBody::default()
        },
    }
}

/// A completed image-generation call carrying `image` as base64.
pub fn image_call(image: &[u8]) -> OutputItem {
    OutputItem::ImageGenerationCall {
        id: None,
        status: Some("completed".to_string()),
        result: Some(BASE64.encode(image)),
    }
}

/// A stored response whose output holds `image`.
pub fn stored_response(response_id: &str, image: &[u8], usage: Option<TokenUsage>) -> ResponseBody {
    ResponseBody {
        id: response_id.to_string(),
        status: Some("completed".to_string()),
        output: vec![image_call(image)],
        usage,
        error: None,
    }
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    stream_calls: AtomicUsize,
    retrieve_calls: AtomicUsize,
}

struct InFlightGuard(Arc<Counters>);

impl InFlightGuard {
    fn enter(counters: Arc<Counters>) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Replays queued scripts per element id.
///
/// Each stream call takes the next script queued for the request's element;
/// the last script repeats once the queue is down to one.
#[derive(Default)]
pub struct ScriptedResponsesApi {
    scripts: Mutex<HashMap<String, VecDeque<StreamScript>>>,
    stored: Mutex<HashMap<String, Result<ResponseBody, GenerationError>>>,
    counters: Arc<Counters>,
}

impl ScriptedResponsesApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a script for `element_id`.
    pub fn on_stream(self, element_id: impl Into<String>, script: StreamScript) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(element_id.into())
            .or_default()
            .push_back(script);
        self
    }

    /// Registers what retrieving `response_id` returns.
    pub fn on_retrieve(
        self,
        response_id: impl Into<String>,
        response: Result<ResponseBody, GenerationError>,
    ) -> Self {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(response_id.into(), response);
        self
    }

    /// Most streams that were open at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total stream calls made.
    pub fn stream_calls(&self) -> usize {
        self.counters.stream_calls.load(Ordering::SeqCst)
    }

    /// Total retrieve calls made.
    pub fn retrieve_calls(&self) -> usize {
        self.counters.retrieve_calls.load(Ordering::SeqCst)
    }

    fn next_script(&self, element_id: &str) -> Option<StreamScript> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = scripts.get_mut(element_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl ResponsesApi for ScriptedResponsesApi {
    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError> {
        self.counters.stream_calls.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard::enter(Arc::clone(&self.counters));

        let steps = match self.next_script(&request.element_id) {
            Some(StreamScript::Steps(steps)) => steps,
            Some(StreamScript::Reject(error)) => return Err(error),
            None => {
                return Err(GenerationError::Api {
                    code: None,
                    message: format!("no script for element {}", request.element_id),
                })
            }
        };

        let stream = futures::stream::unfold(
            (VecDeque::from(steps), guard),
            |(mut steps, guard)| async move {
                loop {
                    match steps.pop_front() {
                        None => return None,
                        Some(ScriptStep::Delay(delay)) => tokio::time::sleep(delay).await,
                        Some(ScriptStep::Event(event)) => {
                            return Some((Ok(event), (steps, guard)))
                        }
                        Some(ScriptStep::Error(error)) => {
                            steps.clear();
                            return Some((Err(error), (steps, guard)));
                        }
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn retrieve(&self, response_id: &str) -> Result<ResponseBody, GenerationError> {
        self.counters.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(response_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(GenerationError::Http {
                    status: 404,
                    message: format!("No response found with id '{}'", response_id),
                })
            })
    }
}
