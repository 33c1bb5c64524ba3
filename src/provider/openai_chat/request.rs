use crate::types::AIRequest;

use super::types::{OpenAiChatRequest, OpenAiMessage, OpenAiStreamOptions};

pub(crate) fn build_openai_body(request: &AIRequest, stream: bool) -> OpenAiChatRequest<'_> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request
        .system_prompt
        .as_deref()
        .filter(|system| !system.trim().is_empty())
    {
        messages.push(OpenAiMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(OpenAiMessage {
        role: "user",
        content: &request.prompt,
    });

    OpenAiChatRequest {
        model: &request.model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream,
        // 流式时让最后一个 chunk 带上官方 usage
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
    }
}
