//! Provider-agnostic request, response and stream chunk types.
//!
//! These types normalize vendor payloads so application code never sees an
//! OpenAI- or Anthropic-specific shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AIClientError;

/// Sampling temperature applied when the caller does not pick one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Characters per token assumed by the length-based estimate.
const CHARS_PER_TOKEN: u64 = 4;

/// A single completion request.
///
/// # Examples
///
/// ```
/// use proposal_ai_client::types::AIRequest;
///
/// let request = AIRequest::new("Summarize the proposal", "gpt-4o")
///     .with_system_prompt("You are a procurement analyst.")
///     .with_max_tokens(100);
/// assert_eq!(request.temperature, 0.7);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIRequest {
    /// User prompt. Must not be empty.
    pub prompt: String,
    /// Optional system instructions.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Vendor model identifier. Must not be empty.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion budget; must be positive when present.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl AIRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Rejects requests that must never reach the network.
    ///
    /// # Errors
    ///
    /// Returns [`AIClientError::InvalidRequest`] when the prompt or model is blank,
    /// the temperature is outside `0.0..=2.0`, or `max_tokens` is zero.
    pub fn validate(&self) -> Result<(), AIClientError> {
        if self.prompt.trim().is_empty() {
            return Err(AIClientError::validation("prompt must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(AIClientError::validation("model is required"));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(AIClientError::validation(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.max_tokens == Some(0) {
            return Err(AIClientError::validation("max_tokens must be positive"));
        }
        Ok(())
    }

    /// Length-based estimate of the prompt tokens (system prompt included).
    pub fn estimated_prompt_tokens(&self) -> u64 {
        let system = self.system_prompt.as_deref().map_or(0, char_count);
        estimate_tokens_from_chars(char_count(&self.prompt) + system)
    }

    /// Tokens reserved with the rate limiter before dispatch.
    ///
    /// Prompt estimate plus the declared completion budget. Without a declared
    /// budget only the `prompt chars / 4` heuristic is charged.
    pub fn admission_estimate(&self) -> u64 {
        self.estimated_prompt_tokens() + self.max_tokens.map_or(0, u64::from)
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

/// Where a [`TokenUsage`] figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    /// Numbers reported by the vendor.
    #[default]
    Reported,
    /// `chars / 4` approximation used when the vendor omitted usage.
    Estimated,
}

/// Token accounting for one request.
///
/// `total_tokens` always equals `prompt_tokens + completion_tokens`; build values
/// through [`TokenUsage::reported`] or [`TokenUsage::estimated`] to keep it so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub source: UsageSource,
}

impl TokenUsage {
    /// Vendor-reported usage. Any vendor `total` is recomputed from its parts.
    pub fn reported(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            source: UsageSource::Reported,
        }
    }

    /// Approximated usage derived from prompt and response lengths.
    pub fn estimated(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            source: UsageSource::Estimated,
            ..Self::reported(prompt_tokens, completion_tokens)
        }
    }

    /// Estimates usage from the request and the generated text.
    pub fn estimate_for(request: &AIRequest, completion: &str) -> Self {
        Self::estimated(
            request.estimated_prompt_tokens(),
            estimate_tokens_from_chars(char_count(completion)),
        )
    }

    pub fn is_estimated(&self) -> bool {
        self.source == UsageSource::Estimated
    }
}

/// Normalized synchronous completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    /// Cost in USD derived from the pricing table. Never negative.
    pub cost: f64,
    pub finish_reason: FinishReason,
    /// Opaque extras: provider name, endpoint, vendor finish reason, ...
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// One incremental piece of a streamed completion.
///
/// Only the terminal chunk (`is_complete == true`) carries usage, cost and the
/// finish reason. Nothing follows a terminal chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIStreamChunk {
    pub id: String,
    pub delta: String,
    pub is_complete: bool,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl AIStreamChunk {
    pub(crate) fn delta(id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delta: delta.into(),
            is_complete: false,
            usage: None,
            cost: None,
            finish_reason: None,
        }
    }
}

/// Entry of a provider's model catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub provider: String,
    /// Context window in tokens, when known.
    pub context_window: Option<u32>,
    /// Largest completion the model accepts, when known.
    pub max_output_tokens: Option<u32>,
    pub supports_streaming: bool,
    /// Key into [`crate::pricing::PricingTable`], if the model is priced.
    pub pricing_key: Option<String>,
}

fn char_count(text: &str) -> u64 {
    text.chars().count() as u64
}

/// `ceil(chars / 4)`.
pub(crate) fn estimate_tokens_from_chars(chars: u64) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN)
}
