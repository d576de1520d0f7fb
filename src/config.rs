//! Layered configuration for rebrand.
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration. A TOML file can override any subset, and environment
//! variables override the file.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cost::PriceTable;
use crate::generation::OPENAI_API_BASE;
use crate::retry::RetryPolicy;
use crate::timeout::DEFAULT_GENERATION_TIMEOUT;

/// Default number of images generated at the same time.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// A setting holds a value outside its allowed range.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Settings for the streaming image-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Model that orchestrates the call and invokes the image tool.
    pub orchestrator_model: String,
    /// Model behind the hosted image-generation tool.
    pub image_model: String,
    /// Brand name written into prompts.
    pub brand_name: String,
    /// Deadline for one streaming attempt, in seconds.
    pub timeout_secs: u64,
    /// Base URL of the Responses API.
    pub api_base_url: String,
    /// Number of preview frames the tool streams before the final image.
    pub partial_images: u8,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            orchestrator_model: "gpt-5".to_string(),
            image_model: "gpt-image-1".to_string(),
            brand_name: "CourseCreator360".to_string(),
            timeout_secs: DEFAULT_GENERATION_TIMEOUT.as_secs(),
            api_base_url: OPENAI_API_BASE.to_string(),
            partial_images: 3,
        }
    }
}

impl GenerationConfig {
    /// The per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for batch dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum simultaneous in-flight generations. Zero is rejected at run time.
    pub concurrency_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebrandConfig {
    pub generation: GenerationConfig,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    pub pricing: PriceTable,
}

impl RebrandConfig {
    /// Load configuration from an optional TOML file plus the environment.
    ///
    /// Environment variables override file values using the format
    /// `REBRAND__<SECTION>__<KEY>` (e.g. `REBRAND__BATCH__CONCURRENCY_LIMIT=5`).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A path is given but the file does not exist
    /// - The path is not valid UTF-8
    /// - The file or an override cannot be parsed
    /// - `retry.backoff_multiplier` is below 1
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rebrand::config::RebrandConfig;
    ///
    /// let config = RebrandConfig::load(Some("rebrand.toml".as_ref()))?;
    /// # Ok::<(), rebrand::config::ConfigError>(())
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let path_str = path
                .to_str()
                .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path_str.to_string()));
            }
            builder = builder.add_source(File::with_name(path_str));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("REBRAND")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let multiplier = self.retry.backoff_multiplier;
        if !(multiplier >= 1.0 && multiplier.is_finite()) {
            return Err(ConfigError::InvalidValue {
                key: "retry.backoff_multiplier".to_string(),
                message: format!("must be a finite number of at least 1, got {}", multiplier),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RebrandConfig::default();
        assert_eq!(config.generation.orchestrator_model, "gpt-5");
        assert_eq!(config.generation.image_model, "gpt-image-1");
        assert_eq!(config.generation.timeout(), Duration::from_secs(300));
        assert_eq!(config.batch.concurrency_limit, 3);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [generation]
            brand_name = "Acme"

            [retry]
            max_attempts = 5
            initial_delay_ms = 250

            [pricing.text.model-x]
            input = 30.0
            output = 120.0
            reasoning = 0.0
        "#;

        let config: RebrandConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.generation.brand_name, "Acme");
        assert_eq!(config.generation.image_model, "gpt-image-1");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert_eq!(
            config.pricing.text_price("model-x").map(|p| p.output),
            Some(120.0)
        );
        assert_eq!(config.batch.concurrency_limit, 3);
    }

    #[test]
    fn test_load_file_not_found() {
        let result = RebrandConfig::load(Some(Path::new("/nonexistent/rebrand.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Failed to create temp file");
        writeln!(
            file,
            "[batch]\nconcurrency_limit = 7\n\n[generation]\ntimeout_secs = 60"
        )
        .unwrap();

        let config = RebrandConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.batch.concurrency_limit, 7);
        assert_eq!(config.generation.timeout(), Duration::from_secs(60));
        assert_eq!(config.generation.orchestrator_model, "gpt-5");
    }

    #[test]
    fn test_load_rejects_shrinking_backoff() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Failed to create temp file");
        writeln!(file, "[retry]\nbackoff_multiplier = 0.5").unwrap();

        let error = RebrandConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidValue { ref key, .. } if key == "retry.backoff_multiplier"
        ));
        assert!(RebrandConfig::default().validate().is_ok());
    }

    #[test]
    fn test_error_display() {
        let error = ConfigError::FileNotFound("missing.toml".to_string());
        assert_eq!(error.to_string(), "configuration file not found: missing.toml");
    }
}
