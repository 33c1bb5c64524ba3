use crate::types::AIRequest;

use super::types::{AnthropicMessage, AnthropicMessageRequest};

/// Completion budget sent when the request declares none; the API requires one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn build_anthropic_body(request: &AIRequest, stream: bool) -> AnthropicMessageRequest<'_> {
    AnthropicMessageRequest {
        model: &request.model,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages: vec![AnthropicMessage {
            role: "user",
            content: &request.prompt,
        }],
        system: request
            .system_prompt
            .as_deref()
            .filter(|system| !system.trim().is_empty()),
        temperature: request.temperature,
        stream,
    }
}
