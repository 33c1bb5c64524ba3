use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_core::Stream;
use tracing::{debug, warn};

use crate::error::{AIClientError, PARSE_ERROR, STREAM_CLOSED};
use crate::http::HttpBodyStream;
use crate::provider::shared::ProviderServices;
use crate::types::{AIRequest, AIStreamChunk, FinishReason, TokenUsage};

/// Longest line the decoder buffers while waiting for a newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Standardized SSE event yielded by [`SseDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of one `data:` line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Splits a chunked HTTP body into SSE `data:` events.
///
/// Bytes are buffered across reads and only complete lines are interpreted, so a
/// read ending mid-line (or mid-UTF-8 sequence, or mid-JSON object) is harmless.
/// Blank lines, comments and non-`data:` fields (`event:`, `id:`, ...) are
/// skipped. Lines that are not valid UTF-8 are logged and dropped. A partial
/// line longer than [`MAX_LINE_BYTES`] fails the stream with `PARSE_ERROR`.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    pending: VecDeque<SseEvent>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl SseDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, mut line: Vec<u8>) {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if self.done_received || !line.starts_with(b"data:") {
            return;
        }
        let mut data = &line[5..];
        if data.first() == Some(&b' ') {
            data = &data[1..];
        }
        let text = match std::str::from_utf8(data) {
            Ok(text) => text,
            Err(err) => {
                warn!(provider = self.provider, error = %err, "skipping non UTF-8 stream line");
                return;
            }
        };
        if text.trim().is_empty() {
            return;
        }
        if text.trim() == "[DONE]" {
            self.done_received = true;
            self.pending.push_back(SseEvent::Done);
        } else {
            self.pending.push_back(SseEvent::Data(text.to_string()));
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            line
        })
    }
}

impl Stream for SseDecoder {
    type Item = Result<SseEvent, AIClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done_received || this.stream_closed {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        this.handle_line(line);
                    }
                    if this.buffer.len() > MAX_LINE_BYTES {
                        this.buffer = Vec::new();
                        this.stream_closed = true;
                        return Poll::Ready(Some(Err(AIClientError::server(
                            PARSE_ERROR,
                            format!("stream line exceeds {MAX_LINE_BYTES} bytes without a newline"),
                        ))));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.stream_closed = true;
                    if !this.buffer.is_empty() {
                        let line = std::mem::take(&mut this.buffer);
                        this.handle_line(line);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Outcome of interpreting one vendor stream event.
#[derive(Debug)]
pub(crate) enum StreamStep {
    /// Generated text, possibly empty.
    Delta(String),
    /// Bookkeeping event with nothing to surface.
    Ignore,
    /// Explicit vendor completion signal.
    Finished,
    /// Vendor reported an error inside the stream.
    Failed(AIClientError),
}

/// Vendor-specific interpretation of SSE payloads.
pub(crate) trait StreamEventParser: Send + Unpin {
    /// Parses one `data:` payload. A JSON error marks the event as malformed.
    fn parse(&mut self, data: &str) -> Result<StreamStep, serde_json::Error>;
    /// Response id seen so far.
    fn message_id(&self) -> &str;
    /// Model reported by the vendor, if any.
    fn model(&self) -> Option<&str>;
    /// Finish reason seen so far.
    fn finish_reason(&self) -> Option<FinishReason>;
    /// Usage reported by the vendor, if it sent any.
    fn reported_usage(&self) -> Option<TokenUsage>;
}

/// Lazy, forward-only chunk sequence over a vendor SSE body.
///
/// Chunks are surfaced in delivery order. The terminal chunk carries usage and
/// cost and is recorded with the shared usage tracker. The body (and with it the
/// connection) is dropped as soon as the stream completes or fails, and
/// otherwise when the caller drops this value.
pub(crate) struct ChunkStream<P> {
    decoder: Option<SseDecoder>,
    parser: P,
    provider: &'static str,
    request: AIRequest,
    services: ProviderServices,
    completion: String,
}

impl<P: StreamEventParser> ChunkStream<P> {
    pub(crate) fn new(
        body: HttpBodyStream,
        parser: P,
        provider: &'static str,
        request: AIRequest,
        services: ProviderServices,
    ) -> Self {
        Self {
            decoder: Some(SseDecoder::new(body, provider)),
            parser,
            provider,
            request,
            services,
            completion: String::new(),
        }
    }

    fn finish(&mut self) -> AIStreamChunk {
        self.decoder = None;

        let usage = self.parser.reported_usage().unwrap_or_else(|| {
            debug!(provider = self.provider, "stream ended without usage, estimating");
            TokenUsage::estimate_for(&self.request, &self.completion)
        });
        let model = self
            .parser
            .model()
            .unwrap_or(self.request.model.as_str())
            .to_string();
        let cost = self.services.settle(self.provider, &model, usage);

        AIStreamChunk {
            id: self.parser.message_id().to_string(),
            delta: String::new(),
            is_complete: true,
            usage: Some(usage),
            cost: Some(cost),
            finish_reason: Some(self.parser.finish_reason().unwrap_or(FinishReason::Stop)),
        }
    }

    fn fail(&mut self, err: AIClientError) -> Poll<Option<Result<AIStreamChunk, AIClientError>>> {
        self.decoder = None;
        Poll::Ready(Some(Err(err)))
    }
}

impl<P: StreamEventParser> Stream for ChunkStream<P> {
    type Item = Result<AIStreamChunk, AIClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(Pin::new(decoder).poll_next(cx)) {
                Some(Ok(SseEvent::Data(data))) => match this.parser.parse(&data) {
                    Ok(StreamStep::Delta(text)) => {
                        if text.is_empty() {
                            continue;
                        }
                        this.completion.push_str(&text);
                        let chunk = AIStreamChunk::delta(this.parser.message_id(), text);
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Ok(StreamStep::Ignore) => continue,
                    Ok(StreamStep::Finished) => return Poll::Ready(Some(Ok(this.finish()))),
                    Ok(StreamStep::Failed(err)) => return this.fail(err),
                    Err(err) => {
                        warn!(
                            provider = this.provider,
                            error = %err,
                            "skipping malformed stream event"
                        );
                        continue;
                    }
                },
                Some(Ok(SseEvent::Done)) => return Poll::Ready(Some(Ok(this.finish()))),
                Some(Err(err)) => return this.fail(err),
                None => {
                    if this.parser.finish_reason().is_some() {
                        return Poll::Ready(Some(Ok(this.finish())));
                    }
                    return this.fail(AIClientError::network(
                        STREAM_CLOSED,
                        "stream ended before the provider signalled completion",
                    ));
                }
            }
        }
    }
}
