use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::provider::shared::ProviderServices;
use crate::stream::{ChunkStream, StreamEventParser, StreamStep};
use crate::types::{AIRequest, FinishReason, TokenUsage};

use super::error::stream_error;
use super::response::{convert_finish_reason, convert_usage};
use super::types::OpenAiStreamChunk;

pub(crate) fn create_stream(
    body: HttpBodyStream,
    provider: &'static str,
    request: AIRequest,
    services: ProviderServices,
) -> ChatStream {
    Box::pin(ChunkStream::new(
        body,
        OpenAiStreamParser::default(),
        provider,
        request,
        services,
    ))
}

/// Chat Completions chunk interpreter.
///
/// The finish reason arrives on the last content chunk, usage on a separate
/// trailing chunk with no choices, so completion is only declared on `[DONE]`
/// (or end of body once a finish reason was seen).
#[derive(Debug, Default)]
pub(crate) struct OpenAiStreamParser {
    id: String,
    model: Option<String>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
}

impl StreamEventParser for OpenAiStreamParser {
    fn parse(&mut self, data: &str) -> Result<StreamStep, serde_json::Error> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(data)?;
        if let Some(error) = chunk.error {
            return Ok(StreamStep::Failed(stream_error(error)));
        }
        if let Some(id) = chunk.id.filter(|id| !id.is_empty()) {
            self.id = id;
        }
        if chunk.model.is_some() {
            self.model = chunk.model;
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(convert_usage(usage));
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.and_then(|delta| delta.content) {
                text.push_str(&content);
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(convert_finish_reason(&reason));
            }
        }
        Ok(StreamStep::Delta(text))
    }

    fn message_id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    fn reported_usage(&self) -> Option<TokenUsage> {
        self.usage
    }
}
