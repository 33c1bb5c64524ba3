use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};

use crate::error::{AIClientError, NETWORK_ERROR};

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default [`HttpTransport`] backed by `reqwest`.
///
/// The per-request deadline comes from [`HttpRequest::timeout`] and covers the
/// whole exchange, streamed body included; the client itself only bounds the
/// connect phase.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a caller-configured `reqwest::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client with the crate user agent and a 10 s connect timeout.
    pub fn default_client() -> Result<Self, AIClientError> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map(Self::new)
            .map_err(|err| {
                AIClientError::network(NETWORK_ERROR, format!("failed to create reqwest client: {err}"))
            })
    }

    fn prepare(&self, request: HttpRequest) -> Result<RequestBuilder, AIClientError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(to_header_map(request.headers)?);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        Ok(builder)
    }

    async fn dispatch(&self, request: HttpRequest) -> Result<reqwest::Response, AIClientError> {
        self.prepare(request)?
            .send()
            .await
            .map_err(map_reqwest_error)
    }
}

fn to_header_map(headers: HashMap<String, String>) -> Result<HeaderMap, AIClientError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| AIClientError::validation(format!("invalid header name {name:?}: {err}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|err| AIClientError::validation(format!("invalid value for header {name}: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Lower-cased names; non-visible-ASCII values are dropped.
fn from_header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// Maps a reqwest failure onto the error taxonomy.
pub(crate) fn map_reqwest_error(err: reqwest::Error) -> AIClientError {
    if err.is_timeout() {
        AIClientError::timeout(format!("request timed out: {err}"))
    } else {
        AIClientError::network(NETWORK_ERROR, err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AIClientError> {
        let response = self.dispatch(request).await?;
        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AIClientError> {
        let response = self.dispatch(request).await?;
        let status = response.status().as_u16();
        let headers = from_header_map(response.headers());
        let body: HttpBodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error)),
        );

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Shared transport over [`ReqwestTransport::default_client`].
pub fn default_dyn_transport() -> Result<DynHttpTransport, AIClientError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
