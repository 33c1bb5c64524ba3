use crate::http::HttpBodyStream;
use crate::provider::ChatStream;
use crate::provider::shared::ProviderServices;
use crate::stream::{ChunkStream, StreamEventParser, StreamStep};
use crate::types::{AIRequest, FinishReason, TokenUsage};

use super::error::stream_error;
use super::response::convert_finish_reason;
use super::types::AnthropicStreamEvent;

pub(crate) fn create_stream(
    body: HttpBodyStream,
    provider: &'static str,
    request: AIRequest,
    services: ProviderServices,
) -> ChatStream {
    Box::pin(ChunkStream::new(
        body,
        AnthropicStreamParser::default(),
        provider,
        request,
        services,
    ))
}

/// Messages API event interpreter.
///
/// Input tokens arrive with `message_start`, output tokens with `message_delta`;
/// `message_stop` ends the stream.
#[derive(Debug, Default)]
pub(crate) struct AnthropicStreamParser {
    id: String,
    model: Option<String>,
    finish_reason: Option<FinishReason>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl StreamEventParser for AnthropicStreamParser {
    fn parse(&mut self, data: &str) -> Result<StreamStep, serde_json::Error> {
        let event: AnthropicStreamEvent = serde_json::from_str(data)?;
        let step = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(id) = message.id {
                    self.id = id;
                }
                if message.model.is_some() {
                    self.model = message.model;
                }
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens.or(self.input_tokens);
                    self.output_tokens = usage.output_tokens.or(self.output_tokens);
                }
                StreamStep::Ignore
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                StreamStep::Delta(delta.text.unwrap_or_default())
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish_reason = Some(convert_finish_reason(&reason));
                }
                if let Some(usage) = usage {
                    self.input_tokens = usage.input_tokens.or(self.input_tokens);
                    self.output_tokens = usage.output_tokens.or(self.output_tokens);
                }
                StreamStep::Ignore
            }
            AnthropicStreamEvent::MessageStop => StreamStep::Finished,
            AnthropicStreamEvent::Error { error } => {
                StreamStep::Failed(stream_error(error.kind.as_deref(), error.message))
            }
            AnthropicStreamEvent::Ping | AnthropicStreamEvent::Other => StreamStep::Ignore,
        };
        Ok(step)
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
        if self.input_tokens.is_none() && self.output_tokens.is_none() {
            return None;
        }
        Some(TokenUsage::reported(
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(0),
        ))
    }
}
