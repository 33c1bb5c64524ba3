use std::collections::HashMap;

use serde_json::Value;

use crate::provider::shared::MappedCompletion;
use crate::types::{AIRequest, FinishReason, TokenUsage};

use super::types::{AnthropicMessageResponse, AnthropicUsage};

pub(crate) fn map_response(resp: AnthropicMessageResponse, request: &AIRequest) -> MappedCompletion {
    let content: String = resp
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();
    let usage = resp
        .usage
        .map(convert_usage)
        .unwrap_or_else(|| TokenUsage::estimate_for(request, &content));
    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(convert_finish_reason)
        .unwrap_or(FinishReason::Stop);

    let mut extra = HashMap::new();
    if let Some(reason) = resp.stop_reason {
        extra.insert("vendor_finish_reason".to_string(), Value::String(reason));
    }
    if let Some(sequence) = resp.stop_sequence {
        extra.insert("stop_sequence".to_string(), Value::String(sequence));
    }

    MappedCompletion {
        id: resp.id.unwrap_or_default(),
        model: resp.model.unwrap_or_else(|| request.model.clone()),
        content,
        usage,
        finish_reason,
        extra,
    }
}

pub(crate) fn convert_usage(usage: AnthropicUsage) -> TokenUsage {
    TokenUsage::reported(
        usage.input_tokens.unwrap_or(0),
        usage.output_tokens.unwrap_or(0),
    )
}

/// `end_turn`, `stop_sequence`, `tool_use` and unknown values collapse to `stop`.
pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}
