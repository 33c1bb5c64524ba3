use std::collections::HashMap;

use serde_json::Value;

use crate::error::{AIClientError, PARSE_ERROR};
use crate::provider::shared::MappedCompletion;
use crate::types::{AIRequest, FinishReason, TokenUsage};

use super::types::{OpenAiChatResponse, OpenAiUsage};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    request: &AIRequest,
) -> Result<MappedCompletion, AIClientError> {
    let choice = resp.choices.into_iter().next().ok_or_else(|| {
        AIClientError::server(PARSE_ERROR, "OpenAI response contained no choices")
    })?;
    let content = choice
        .message
        .and_then(|message| message.content)
        .unwrap_or_default();
    let usage = resp
        .usage
        .map(convert_usage)
        .unwrap_or_else(|| TokenUsage::estimate_for(request, &content));
    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(convert_finish_reason)
        .unwrap_or(FinishReason::Stop);

    let mut extra = HashMap::new();
    if let Some(reason) = choice.finish_reason {
        extra.insert("vendor_finish_reason".to_string(), Value::String(reason));
    }
    if let Some(fingerprint) = resp.system_fingerprint {
        extra.insert("system_fingerprint".to_string(), Value::String(fingerprint));
    }

    Ok(MappedCompletion {
        id: resp.id,
        model: resp.model.unwrap_or_else(|| request.model.clone()),
        content,
        usage,
        finish_reason,
        extra,
    })
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> TokenUsage {
    TokenUsage::reported(usage.prompt_tokens, usage.completion_tokens)
}

/// `tool_calls`, `function_call` and unknown values collapse to `stop`.
pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}
