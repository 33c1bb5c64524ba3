//! Per-model token prices and cost computation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::TokenUsage;

/// USD prices per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input_price_per_k_tokens: f64,
    pub output_price_per_k_tokens: f64,
}

impl ModelPricing {
    pub const fn new(input_price_per_k_tokens: f64, output_price_per_k_tokens: f64) -> Self {
        Self {
            input_price_per_k_tokens,
            output_price_per_k_tokens,
        }
    }

    /// `prompt/1000 × input + completion/1000 × output`, clamped at zero.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let input = usage.prompt_tokens as f64 / 1000.0 * self.input_price_per_k_tokens;
        let output = usage.completion_tokens as f64 / 1000.0 * self.output_price_per_k_tokens;
        (input + output).max(0.0)
    }
}

const DEFAULT_PRICES: &[(&str, ModelPricing)] = &[
    ("gpt-4o", ModelPricing::new(0.0025, 0.01)),
    ("gpt-4o-mini", ModelPricing::new(0.00015, 0.0006)),
    ("gpt-4-turbo", ModelPricing::new(0.01, 0.03)),
    ("gpt-4", ModelPricing::new(0.03, 0.06)),
    ("gpt-3.5-turbo", ModelPricing::new(0.0005, 0.0015)),
    ("claude-3-5-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-5-haiku", ModelPricing::new(0.0008, 0.004)),
    ("claude-3-opus", ModelPricing::new(0.015, 0.075)),
    ("claude-3-sonnet", ModelPricing::new(0.003, 0.015)),
    ("claude-3-haiku", ModelPricing::new(0.00025, 0.00125)),
];

/// Immutable model → price map shared by all providers.
///
/// Lookups try the exact model id first, then the longest catalogued id that
/// prefixes it, so dated snapshots such as `gpt-4o-2024-08-06` or
/// `claude-3-5-sonnet-20241022` resolve to their family entry.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new(entries: HashMap<String, ModelPricing>) -> Self {
        Self { entries }
    }

    /// Resolves the catalogue key used for `model`.
    pub fn resolve_key(&self, model: &str) -> Option<&str> {
        if let Some((key, _)) = self.entries.get_key_value(model) {
            return Some(key.as_str());
        }
        self.entries
            .keys()
            .filter(|key| model.starts_with(key.as_str()))
            .max_by_key(|key| key.len())
            .map(String::as_str)
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.resolve_key(model)
            .and_then(|key| self.entries.get(key))
            .copied()
    }

    /// Cost of `usage` for `model`. Models missing from the table cost nothing.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        match self.get(model) {
            Some(pricing) => pricing.cost(usage),
            None => {
                warn!(model, "no pricing entry for model, recording zero cost");
                0.0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_PRICES
                .iter()
                .map(|(model, pricing)| (model.to_string(), *pricing))
                .collect(),
        )
    }
}
