//! Plumbing shared by the vendor adapters: injected services, admission and
//! retry-wrapped dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{AIClientError, PARSE_ERROR};
use crate::http::{HttpBodyStream, HttpRequest, HttpTransport, collect_body_text};
use crate::pricing::PricingTable;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryConfig, RetryHandler};
use crate::types::{AIRequest, AIResponse, FinishReason, TokenUsage};
use crate::usage::UsageTracker;

/// Per-call network timeout used when a provider is not configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Vendor error body parser: `(status, headers, body) -> error`.
pub(crate) type ErrorParser = fn(u16, &HashMap<String, String>, &str) -> AIClientError;

/// Process-wide collaborators injected into every provider.
///
/// Built once at startup and cloned into each provider; clones share the same
/// limiter, tracker and pricing table.
#[derive(Debug, Clone)]
pub struct ProviderServices {
    pub rate_limiter: Arc<RateLimiter>,
    pub usage: Arc<UsageTracker>,
    pub pricing: Arc<PricingTable>,
    pub retry: RetryConfig,
}

impl ProviderServices {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
        pricing: Arc<PricingTable>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            rate_limiter,
            usage,
            pricing,
            retry,
        }
    }

    pub fn retry_handler(&self) -> RetryHandler {
        RetryHandler::new(self.retry.clone())
    }

    /// Validates `request` and waits for rate-limit admission.
    ///
    /// Validation runs first so a rejected request never consumes admission.
    pub(crate) async fn admit(
        &self,
        provider: &'static str,
        request: &AIRequest,
    ) -> Result<(), AIClientError> {
        request.validate()?;
        let estimate = request.admission_estimate();
        self.rate_limiter.acquire(provider, estimate).await;
        debug!(provider, model = %request.model, estimate, "dispatching request");
        Ok(())
    }

    /// Prices `usage` and appends it to the ledger. Returns the cost.
    pub(crate) fn settle(&self, provider: &str, model: &str, usage: TokenUsage) -> f64 {
        let cost = self.pricing.cost(model, &usage);
        self.usage.record(provider, model, usage, cost);
        cost
    }

    /// Sends a buffered request under the retry policy and returns the 2xx body.
    ///
    /// `build` is called once per attempt. Non-2xx responses go through
    /// `parse_error` before the retry predicate sees them.
    pub(crate) async fn send_with_retry<B>(
        &self,
        transport: &dyn HttpTransport,
        build: B,
        parse_error: ErrorParser,
    ) -> Result<String, AIClientError>
    where
        B: Fn() -> HttpRequest,
    {
        let build = &build;
        self.retry_handler()
            .execute_default(move || async move {
                let response = transport.send(build()).await?;
                if response.is_success() {
                    response.text()
                } else {
                    let body = String::from_utf8_lossy(&response.body);
                    Err(parse_error(response.status, &response.headers, &body))
                }
            })
            .await
    }

    /// Opens a streaming response, retrying only the connection attempt.
    ///
    /// Once a 2xx head has arrived the body is handed back untouched; failures
    /// while reading it are never retried.
    pub(crate) async fn open_stream_with_retry<B>(
        &self,
        transport: &dyn HttpTransport,
        build: B,
        parse_error: ErrorParser,
    ) -> Result<HttpBodyStream, AIClientError>
    where
        B: Fn() -> HttpRequest,
    {
        let build = &build;
        self.retry_handler()
            .execute_default(move || async move {
                let response = transport.send_stream(build()).await?;
                if response.is_success() {
                    return Ok(response.body);
                }
                let status = response.status;
                let headers = response.headers;
                let body = collect_body_text(response.body).await.unwrap_or_default();
                Err(parse_error(status, &headers, &body))
            })
            .await
    }
}

impl Default for ProviderServices {
    fn default() -> Self {
        Self::new(
            Arc::new(RateLimiter::default()),
            Arc::new(UsageTracker::new()),
            Arc::new(PricingTable::default()),
            RetryConfig::default(),
        )
    }
}

/// Decodes a vendor JSON payload, mapping failures to `server_error` / `PARSE_ERROR`.
pub(crate) fn parse_json<T: DeserializeOwned>(
    provider: &'static str,
    text: &str,
) -> Result<T, AIClientError> {
    serde_json::from_str(text).map_err(|err| {
        AIClientError::server(
            PARSE_ERROR,
            format!("failed to parse {provider} response: {err}"),
        )
    })
}

/// Vendor-neutral view of a parsed synchronous completion, before pricing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MappedCompletion {
    pub(crate) id: String,
    pub(crate) model: String,
    pub(crate) content: String,
    pub(crate) usage: TokenUsage,
    pub(crate) finish_reason: FinishReason,
    /// Vendor extras merged into the response metadata.
    pub(crate) extra: HashMap<String, Value>,
}

impl MappedCompletion {
    /// Prices and records the completion, then builds the public response.
    pub(crate) fn into_response(
        self,
        services: &ProviderServices,
        provider: &'static str,
        endpoint: String,
    ) -> AIResponse {
        let cost = services.settle(provider, &self.model, self.usage);
        let mut metadata = self.extra;
        metadata.insert("provider".to_string(), Value::String(provider.to_string()));
        metadata.insert("endpoint".to_string(), Value::String(endpoint));
        AIResponse {
            id: self.id,
            model: self.model,
            content: self.content,
            usage: self.usage,
            cost,
            finish_reason: self.finish_reason,
            metadata,
        }
    }
}

/// Joins `base` and `path` with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use futures_util::stream;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::{ErrorKind, classify_status};
    use crate::http::{HttpResponse, HttpStreamResponse};
    use crate::rate_limit::RateLimitConfig;

    struct ScriptedTransport {
        statuses: Mutex<Vec<u16>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(statuses: Vec<u16>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                calls: AtomicU32::new(0),
            }
        }

        fn next_status(&self) -> u16 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock();
            if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            }
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, AIClientError> {
            let status = self.next_status();
            Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: b"ok".to_vec(),
            })
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, AIClientError> {
            let status = self.next_status();
            Ok(HttpStreamResponse {
                status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(vec![Ok(b"boom".to_vec())])),
            })
        }
    }

    fn plain_error(status: u16, headers: &HashMap<String, String>, body: &str) -> AIClientError {
        classify_status(status, headers, body.to_string(), None)
    }

    fn services() -> ProviderServices {
        ProviderServices {
            retry: RetryConfig {
                base_delay_ms: 10,
                ..RetryConfig::default()
            },
            ..ProviderServices::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_are_retried_until_success() {
        let transport = ScriptedTransport::new(vec![500, 503, 200]);
        let body = services()
            .send_with_retry(&transport, || HttpRequest::get("http://test"), plain_error)
            .await
            .expect("third attempt succeeds");
        assert_eq!(body, "ok");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_not_retried() {
        let transport = ScriptedTransport::new(vec![401]);
        let err = services()
            .send_with_retry(&transport, || HttpRequest::get("http://test"), plain_error)
            .await
            .expect_err("401 is terminal");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_connection_error_reads_body_for_message() {
        let transport = ScriptedTransport::new(vec![400]);
        let err = services()
            .open_stream_with_retry(&transport, || HttpRequest::get("http://test"), plain_error)
            .await
            .err()
            .expect("400 is terminal");
        assert_eq!(err.message(), "boom");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_limiter() {
        let services = ProviderServices {
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig {
                requests_per_minute: 1,
                tokens_per_minute: 1_000,
            })),
            ..ProviderServices::default()
        };
        let err = services
            .admit("p", &AIRequest::new("   ", "gpt-4o"))
            .await
            .expect_err("blank prompt");
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(services.rate_limiter.snapshot("p").is_none());
    }

    #[test]
    fn settle_records_priced_usage() {
        let services = ProviderServices::default();
        let cost = services.settle("openai_chat", "gpt-4o", TokenUsage::reported(1000, 1000));
        assert!((cost - 0.0125).abs() < 1e-12);
        assert_eq!(services.usage.len(), 1);
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://a/v1/", "/models"), "https://a/v1/models");
        assert_eq!(join_url("https://a/v1", "models"), "https://a/v1/models");
    }
}
