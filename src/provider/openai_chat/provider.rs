use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AIClientError;
use crate::http::{DynHttpTransport, HttpRequest, json_request};
use crate::provider::shared::{DEFAULT_TIMEOUT, ProviderServices, join_url, parse_json};
use crate::provider::{AIProvider, ChatStream};
use crate::types::{AIRequest, AIResponse, ModelDescriptor};

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::{OpenAiChatResponse, OpenAiModelList};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions Provider
pub struct OpenAiChatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) services: ProviderServices,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) organization: Option<String>,
    pub(crate) timeout: Duration,
}

impl OpenAiChatProvider {
    /// 创建带默认 base_url 的 Provider
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
            organization: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// 自定义 base_url 需包含版本前缀 例如 `https://host/v1`
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 配置组织 ID
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// 单次网络调用的超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        join_url(&self.base_url, "chat/completions")
    }

    fn models_endpoint(&self) -> String {
        join_url(&self.base_url, "models")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers.insert("Accept".to_string(), "application/json".to_string());
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), org.clone());
        }
        headers
    }

    fn models_request(&self) -> HttpRequest {
        HttpRequest::get(self.models_endpoint())
            .with_headers(self.build_headers())
            .with_timeout(self.timeout)
    }

    fn describe(&self, id: String) -> ModelDescriptor {
        ModelDescriptor {
            display_name: id.clone(),
            provider: self.name().to_string(),
            context_window: None,
            max_output_tokens: None,
            supports_streaming: true,
            pricing_key: self.services.pricing.resolve_key(&id).map(str::to_string),
            id,
        }
    }
}

#[async_trait]
impl AIProvider for OpenAiChatProvider {
    fn name(&self) -> &'static str {
        "openai_chat"
    }

    async fn is_available(&self) -> bool {
        match self.transport.send(self.models_request()).await {
            Ok(response) => response.is_success(),
            Err(err) => {
                debug!(provider = self.name(), error = %err, "availability probe failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, AIClientError> {
        let text = self
            .services
            .send_with_retry(
                self.transport.as_ref(),
                || self.models_request(),
                parse_openai_error,
            )
            .await?;
        let list: OpenAiModelList = parse_json(self.name(), &text)?;
        let mut models: Vec<ModelDescriptor> = list
            .data
            .into_iter()
            .map(|model| self.describe(model.id))
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn chat(&self, request: AIRequest) -> Result<AIResponse, AIClientError> {
        self.services.admit(self.name(), &request).await?;

        let endpoint = self.endpoint();
        let http_request = json_request(
            endpoint.clone(),
            self.build_headers(),
            &build_openai_body(&request, false),
            self.timeout,
        )?;
        let text = self
            .services
            .send_with_retry(
                self.transport.as_ref(),
                || http_request.clone(),
                parse_openai_error,
            )
            .await?;

        let parsed: OpenAiChatResponse = parse_json(self.name(), &text)?;
        let mapped = map_response(parsed, &request)?;
        Ok(mapped.into_response(&self.services, self.name(), endpoint))
    }

    async fn stream(&self, request: AIRequest) -> Result<ChatStream, AIClientError> {
        self.services.admit(self.name(), &request).await?;

        let http_request = json_request(
            self.endpoint(),
            self.build_headers(),
            &build_openai_body(&request, true),
            self.timeout,
        )?;
        let body = self
            .services
            .open_stream_with_retry(
                self.transport.as_ref(),
                || http_request.clone(),
                parse_openai_error,
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
