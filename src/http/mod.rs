use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;

use crate::error::{AIClientError, PARSE_ERROR};

/// HTTP methods used by the vendor adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange, body included. Expiry aborts the connection.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use proposal_ai_client::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// Builds a body-less GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Merges `headers` into the request, replacing duplicates.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns a `server_error` with code `PARSE_ERROR` when the body is not UTF-8.
    pub fn text(&self) -> Result<String, AIClientError> {
        String::from_utf8(self.body.clone())
            .map_err(|err| AIClientError::server(PARSE_ERROR, format!("response body is not UTF-8: {err}")))
    }
}

/// HTTP response whose body is consumed incrementally.
///
/// Dropping the value drops the body stream, which releases the underlying
/// connection.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, AIClientError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// Implementations map connection failures to `network_error` and timeouts to
/// `server_error` / `TIMEOUT`. Non-2xx statuses are *not* errors at this layer;
/// providers classify them.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves once the full body has been read.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIClientError>;

    /// Sends a request and resolves as soon as the response head arrives.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_trait::async_trait;
    /// # use proposal_ai_client::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
    /// # use proposal_ai_client::error::AIClientError;
    /// # use futures_util::{stream, StreamExt};
    /// struct EchoTransport;
    ///
    /// #[async_trait]
    /// impl HttpTransport for EchoTransport {
    ///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIClientError> {
    ///         Ok(HttpResponse { status: 200, headers: request.headers, body: request.body.unwrap_or_default() })
    ///     }
    ///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIClientError> {
    ///         let stream = stream::once(async move { Ok(request.body.unwrap_or_default()) });
    ///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream) })
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let response = EchoTransport
    ///     .send_stream(HttpRequest::post_json("https://example.com", br"{}".to_vec()))
    ///     .await
    ///     .unwrap();
    /// let chunks: Vec<_> = response.body.collect::<Vec<_>>().await;
    /// assert_eq!(chunks.len(), 1);
    /// # });
    /// ```
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIClientError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Serializes `body` to JSON and builds a POST request with `headers` and `timeout`.
///
/// # Errors
///
/// Returns an `invalid_request` error if serialization fails.
pub fn json_request<T: Serialize>(
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Duration,
) -> Result<HttpRequest, AIClientError> {
    let payload = serde_json::to_vec(body)
        .map_err(|err| AIClientError::validation(format!("failed to serialize request: {err}")))?;
    Ok(HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout))
}

/// Drains a streaming body, used to read error payloads of failed stream calls.
pub(crate) async fn collect_body_text(mut body: HttpBodyStream) -> Result<String, AIClientError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub mod reqwest;
