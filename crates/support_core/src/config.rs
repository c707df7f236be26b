use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{AgentError, Result};
use crate::nli_classifier::DEFAULT_HYPOTHESIS_TEMPLATE;

pub const DEFAULT_KEYWORD_THRESHOLD: f32 = 0.60;
pub const DEFAULT_EMBEDDING_THRESHOLD: f32 = 0.65;
pub const DEFAULT_CLASSIFIER_THRESHOLD: f32 = 0.60;
pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm your Thoughtful AI support agent. You can ask me about our automation tools like EVA, CAM, or PHIL.";
pub const DEFAULT_ERROR_NOTICE: &str = "Sorry, something went wrong while answering your question.";
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_QUERY_CHARS: usize = 1000;

/// Accept thresholds for each cascade tier.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Cosine score among keyword-matched entries.
    pub keyword: f32,
    /// Cosine score over the whole KB.
    pub embedding: f32,
    /// Top zero-shot label score.
    pub classifier: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_KEYWORD_THRESHOLD,
            embedding: DEFAULT_EMBEDDING_THRESHOLD,
            classifier: DEFAULT_CLASSIFIER_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub thresholds: Thresholds,
    pub fallback_message: String,
    /// Shown by the front end when a query fails unexpectedly.
    pub error_notice: String,
    /// `"0s"` waits indefinitely.
    #[serde(deserialize_with = "human_duration")]
    pub classifier_timeout: Duration,
    pub max_query_chars: usize,
    pub hypothesis_template: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            error_notice: DEFAULT_ERROR_NOTICE.to_string(),
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
            hypothesis_template: DEFAULT_HYPOTHESIS_TEMPLATE.to_string(),
        }
    }
}

fn human_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl AgentConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, value) in [("keyword", t.keyword), ("embedding", t.embedding)] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(AgentError::InvalidConfig(format!(
                    "{name} threshold {value} outside [-1, 1]"
                )));
            }
        }
        if !(0.0..=1.0).contains(&t.classifier) {
            return Err(AgentError::InvalidConfig(format!(
                "classifier threshold {} outside [0, 1]",
                t.classifier
            )));
        }
        if self.fallback_message.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "fallback_message must not be empty".to_string(),
            ));
        }
        if self.error_notice.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "error_notice must not be empty".to_string(),
            ));
        }
        if self.max_query_chars == 0 {
            return Err(AgentError::InvalidConfig(
                "max_query_chars must be > 0".to_string(),
            ));
        }
        if !self.hypothesis_template.contains("{}") {
            return Err(AgentError::InvalidConfig(
                "hypothesis_template must contain {}".to_string(),
            ));
        }
        Ok(())
    }
}
