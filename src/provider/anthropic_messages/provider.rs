use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AIClientError;
use crate::http::{DynHttpTransport, json_request};
use crate::provider::shared::{DEFAULT_TIMEOUT, ProviderServices, join_url, parse_json};
use crate::provider::{AIProvider, ChatStream};
use crate::types::{AIRequest, AIResponse, ModelDescriptor};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_VERSION: &str = "2023-06-01";

/// 内置模型目录 `(id, 展示名, 上下文窗口, 最大输出)`
const MODEL_CATALOG: &[(&str, &str, u32, u32)] = &[
    ("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet", 200_000, 8_192),
    ("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", 200_000, 8_192),
    ("claude-3-opus-20240229", "Claude 3 Opus", 200_000, 4_096),
    ("claude-3-sonnet-20240229", "Claude 3 Sonnet", 200_000, 4_096),
    ("claude-3-haiku-20240307", "Claude 3 Haiku", 200_000, 4_096),
];

/// 可用性探测使用的模型 取目录中最便宜的一项
const PROBE_MODEL: &str = "claude-3-haiku-20240307";

/// Anthropic Messages Provider（兼容 Claude 3.x Messages API）
pub struct AnthropicMessagesProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) services: ProviderServices,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) version: String,
    pub(crate) timeout: Duration,
}

impl AnthropicMessagesProvider {
    /// 使用默认 base_url 与 anthropic-version 创建 Provider
    pub fn new(
        transport: DynHttpTransport,
        api_key: impl Into<String>,
        services: ProviderServices,
    ) -> Self {
        Self {
            transport,
            services,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 自定义 base_url，便于接入代理或兼容层
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 自定义 Anthropic API 版本（anthropic-version）
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 单次网络调用的超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        join_url(&self.base_url, "messages")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        headers
    }

    fn catalog(&self) -> Vec<ModelDescriptor> {
        MODEL_CATALOG
            .iter()
            .map(|(id, display_name, context_window, max_output)| ModelDescriptor {
                id: id.to_string(),
                display_name: display_name.to_string(),
                provider: self.name().to_string(),
                context_window: Some(*context_window),
                max_output_tokens: Some(*max_output),
                supports_streaming: true,
                pricing_key: self.services.pricing.resolve_key(id).map(str::to_string),
            })
            .collect()
    }
}

#[async_trait]
impl AIProvider for AnthropicMessagesProvider {
    fn name(&self) -> &'static str {
        "anthropic_messages"
    }

    async fn is_available(&self) -> bool {
        let probe = AIRequest::new("ping", PROBE_MODEL).with_max_tokens(1);
        let request = match json_request(
            self.endpoint(),
            self.build_headers(),
            &build_anthropic_body(&probe, false),
            self.timeout,
        ) {
            Ok(request) => request,
            Err(err) => {
                debug!(provider = self.name(), error = %err, "availability probe failed");
                return false;
            }
        };
        match self.transport.send(request).await {
            Ok(response) => response.is_success(),
            Err(err) => {
                debug!(provider = self.name(), error = %err, "availability probe failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, AIClientError> {
        Ok(self.catalog())
    }

    async fn chat(&self, request: AIRequest) -> Result<AIResponse, AIClientError> {
        self.services.admit(self.name(), &request).await?;

        let endpoint = self.endpoint();
        let http_request = json_request(
            endpoint.clone(),
            self.build_headers(),
            &build_anthropic_body(&request, false),
            self.timeout,
        )?;
        let text = self
            .services
            .send_with_retry(
                self.transport.as_ref(),
                || http_request.clone(),
                parse_anthropic_error,
            )
            .await?;

        let parsed: AnthropicMessageResponse = parse_json(self.name(), &text)?;
        let mapped = map_response(parsed, &request);
        Ok(mapped.into_response(&self.services, self.name(), endpoint))
    }

    async fn stream(&self, request: AIRequest) -> Result<ChatStream, AIClientError> {
        self.services.admit(self.name(), &request).await?;

        let http_request = json_request(
            self.endpoint(),
            self.build_headers(),
            &build_anthropic_body(&request, true),
            self.timeout,
        )?;
        let body = self
            .services
            .open_stream_with_retry(
                self.transport.as_ref(),
                || http_request.clone(),
                parse_anthropic_error,
            )
            .await?;

        Ok(create_stream(
            body,
            self.name(),
            request,
            self.services.clone(),
        ))
    }
}
