//! Streaming image generation.
//!
//! Prompt and size selection are pure functions of the brand profile and the
//! template element. [`StreamingGenerationClient`] drives one regeneration
//! through a [`ResponsesApi`], with per-attempt deadlines, classified retries
//! and recovery of results whose stream broke.

pub mod client;
pub mod echo;
pub mod openai;
pub mod payload;
pub mod prompt;
pub mod size;

pub use client::{
    AttemptOutcome, EventStream, GeneratedImage, GenerationAttempt, GenerationError,
    GenerationFailure, GenerationRequest, ResponsesApi, StreamingGenerationClient,
};
pub use echo::EchoResponsesApi;
pub use openai::{OpenAiResponsesApi, SseDecoder, OPENAI_API_BASE};
pub use payload::{ImagePayload, OutputItem, ResponseBody, StreamEvent, TokenUsage};
pub use prompt::{build_prompt, BrandColor, BrandGuide, BrandProfile, ImageKind, PromptContext};
pub use size::ImageSize;
