//! Per-session generation settings.

use std::ops::RangeInclusive;

use parley_daemon::GenerateOptions;
use thiserror::Error;

use crate::catalog::Model;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Accepted temperatures. Values outside are rejected, never clamped.
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;

/// Settings of one conversation.
///
/// Fields are private so a config can only hold validated values; change
/// them through [`SessionConfig::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    model_id: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    streaming_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            streaming_enabled: true,
        }
    }
}

impl SessionConfig {
    /// Defaults with `model_id` selected. The id is not checked against a
    /// catalog here.
    pub fn with_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    /// Selected model id; empty when none has been chosen yet.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled
    }

    /// Sampling options for a generate request.
    pub fn options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            num_predict: self.max_tokens,
        }
    }

    /// Apply a partial update.
    ///
    /// Every field present in `update` is validated first; if any fails,
    /// nothing is applied. `catalog` is the model snapshot the new model id
    /// must belong to.
    pub fn update(&mut self, update: &ConfigUpdate, catalog: &[Model]) -> Result<(), ConfigError> {
        if let Some(model_id) = &update.model_id {
            if !catalog.iter().any(|m| m.matches(model_id)) {
                return Err(ConfigError::UnknownModel(model_id.clone()));
            }
        }

        if let Some(temperature) = update.temperature {
            validate_temperature(temperature)?;
        }

        let max_tokens = update.max_tokens.map(validate_max_tokens).transpose()?;

        if let Some(model_id) = &update.model_id {
            self.model_id = model_id.clone();
        }
        if let Some(temperature) = update.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(system_prompt) = &update.system_prompt {
            self.system_prompt = system_prompt.clone();
        }
        if let Some(streaming) = update.streaming_enabled {
            self.streaming_enabled = streaming;
        }

        Ok(())
    }
}

fn validate_temperature(temperature: f32) -> Result<(), ConfigError> {
    if TEMPERATURE_RANGE.contains(&temperature) {
        Ok(())
    } else {
        Err(ConfigError::InvalidField {
            name: "temperature",
            reason: format!(
                "{} is outside {}..={}",
                temperature,
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end()
            ),
        })
    }
}

fn validate_max_tokens(max_tokens: i64) -> Result<u32, ConfigError> {
    if max_tokens <= 0 {
        return Err(ConfigError::InvalidField {
            name: "max_tokens",
            reason: format!("{} is not a positive integer", max_tokens),
        });
    }
    u32::try_from(max_tokens).map_err(|_| ConfigError::InvalidField {
        name: "max_tokens",
        reason: format!("{} is too large", max_tokens),
    })
}

/// A partial settings change. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    /// Signed so that non-positive input from a user can be rejected
    /// explicitly.
    pub max_tokens: Option<i64>,
    pub system_prompt: Option<String>,
    pub streaming_enabled: Option<bool>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: i64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming_enabled = Some(enabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Settings rejected before any request is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    InvalidField { name: &'static str, reason: String },
    #[error("Unknown model '{0}'. Choose an installed model or pull it with: ollama pull {0}")]
    UnknownModel(String),
}
