//! An offline [`ResponsesApi`] that answers every request with the source
//! image, which lets the full pipeline run without the model API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::client::{EventStream, GenerationError, GenerationRequest, ResponsesApi};
use super::payload::{OutputItem, ResponseBody, StreamEvent};

/// Answers every request with its own source image.
#[derive(Debug, Default, Clone)]
pub struct EchoResponsesApi {
    counter: Arc<AtomicUsize>,
}

impl EchoResponsesApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponsesApi for EchoResponsesApi {
    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, GenerationError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let events: Vec<Result<StreamEvent, GenerationError>> = vec![
            Ok(StreamEvent::Created {
                response: ResponseBody {
                    id: format!("resp_echo_{}", n),
                    status: Some("in_progress".to_string()),
                    ..ResponseBody::default()
                },
            }),
            Ok(StreamEvent::OutputItem {
                item: OutputItem::ImageGenerationCall {
                    id: None,
                    status: Some("completed".to_string()),
                    result: Some(BASE64.encode(&request.source_image)),
                },
            }),
        ];
        Ok(futures::stream::iter(events).boxed())
    }

    async fn retrieve(&self, response_id: &str) -> Result<ResponseBody, GenerationError> {
        Err(GenerationError::Http {
            status: 404,
            message: format!("No response found with id '{}'", response_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ImageSize;

    fn request() -> GenerationRequest {
        GenerationRequest {
            element_id: "a".to_string(),
            orchestrator_model: "gpt-5".to_string(),
            image_model: "gpt-image-1".to_string(),
            prompt: "p".to_string(),
            source_image: b"source".to_vec(),
            size: ImageSize::Auto,
            transparent_background: false,
            partial_images: 0,
        }
    }

    #[tokio::test]
    async fn test_echo_returns_source() {
        let api = EchoResponsesApi::new();
        let events: Vec<_> = api.stream(&request()).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().response_id(), Some("resp_echo_0"));
        let payload = events[1].as_ref().unwrap().image_payload().unwrap();
        assert_eq!(payload.decode_inline().unwrap(), Some(b"source".to_vec()));
    }

    #[tokio::test]
    async fn test_echo_has_nothing_to_retrieve() {
        let api = EchoResponsesApi::new();
        assert!(matches!(
            api.retrieve("resp_echo_0").await,
            Err(GenerationError::Http { status: 404, .. })
        ));
    }
}
