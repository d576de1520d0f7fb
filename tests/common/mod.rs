//! Shared fixtures for the integration tests.
#![allow(dead_code)]

pub mod scripted;

pub use scripted::{created, stored_response, ScriptStep, ScriptedResponsesApi, StreamScript};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rebrand::config::GenerationConfig;
use rebrand::generation::{BrandProfile, ResponsesApi, StreamingGenerationClient};
use rebrand::ports::{ImageSource, StaticImageSource};
use rebrand::retry::RetryPolicy;
use rebrand::template::ImageTask;

/// Bytes standing in for a generated PNG.
pub const GENERATED: &[u8] = b"\x89PNG\r\n\x1a\ngenerated";

/// Bytes standing in for a downloaded source image.
pub const SOURCE: &[u8] = b"\x89PNG\r\n\x1a\nsource";

pub fn source_url(element_id: &str) -> String {
    format!("https://cdn.example.com/{}.png", element_id)
}

pub fn task(element_id: &str) -> ImageTask {
    ImageTask::new(element_id, source_url(element_id)).with_dimensions(1024, 1024)
}

pub fn tasks(ids: &[&str]) -> Vec<ImageTask> {
    ids.iter().map(|id| task(id)).collect()
}

/// An image source that serves [`SOURCE`] for every task plus `extra`.
pub fn images_for(tasks: &[ImageTask], extra: &[(&str, &[u8])]) -> Arc<StaticImageSource> {
    let mut images: HashMap<String, Vec<u8>> = tasks
        .iter()
        .map(|task| (task.source_url.clone(), SOURCE.to_vec()))
        .collect();
    for (url, bytes) in extra {
        images.insert(url.to_string(), bytes.to_vec());
    }
    Arc::new(StaticImageSource::new(images))
}

/// Two retries with short backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(100), 2.0)
}

pub fn generator(
    api: Arc<dyn ResponsesApi>,
    images: Arc<dyn ImageSource>,
    retry_policy: RetryPolicy,
) -> StreamingGenerationClient {
    StreamingGenerationClient::new(api, images, GenerationConfig::default(), retry_policy)
}

pub fn profile() -> BrandProfile {
    BrandProfile::default()
}
