use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::AIClient;
use crate::error::{AIClientError, CONFIG_ERROR};
use crate::http::DynHttpTransport;
use crate::pricing::PricingTable;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::provider::{DynProvider, ProviderServices};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::RetryConfig;
use crate::usage::UsageTracker;

/// Provider 配置 描述一个可调用后端
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 自定义句柄 例如 `default-openai`
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    #[serde(default)]
    pub base_url: Option<String>,
    /// 单次网络调用超时 缺省 60 秒
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// 仅 OpenAI 使用
    #[serde(default)]
    pub organization: Option<String>,
    /// 仅 Anthropic 使用 对应 anthropic-version
    #[serde(default)]
    pub version: Option<String>,
    /// 覆盖该供应商的限流阈值
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    AnthropicMessages,
}

impl ProviderKind {
    /// 与 [`crate::provider::AIProvider::name`] 一致 用作限流键
    pub fn provider_name(self) -> &'static str {
        match self {
            ProviderKind::OpenAiChat => "openai_chat",
            ProviderKind::AnthropicMessages => "anthropic_messages",
        }
    }
}

/// 鉴权信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// 简单 API Key
    ApiKey { key: String },
    /// Bearer Token
    Bearer { token: String },
    /// 构建时从环境变量读取
    Env { var: String },
    /// 未配置 构建时报错
    None,
}

impl Credential {
    /// 解析出实际密钥
    ///
    /// # Errors
    ///
    /// 缺失 空值或环境变量未设置时返回 `invalid_request` / `CONFIG_ERROR`
    pub fn resolve(&self, handle: &str) -> Result<String, AIClientError> {
        let secret = match self {
            Credential::ApiKey { key } => key.clone(),
            Credential::Bearer { token } => token.clone(),
            Credential::Env { var } => std::env::var(var).map_err(|err| {
                config_error(format!("handle {handle}: cannot read credential from ${var}: {err}"))
            })?,
            Credential::None => {
                return Err(config_error(format!("handle {handle} requires a credential")));
            }
        };
        if secret.trim().is_empty() {
            return Err(config_error(format!("handle {handle} has an empty credential")));
        }
        Ok(secret)
    }
}

/// 客户端整体配置 可直接从 JSON 加载
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub default_rate_limit: RateLimitConfig,
}

impl ClientConfig {
    /// 解析 JSON 配置并校验
    pub fn from_json_str(json: &str) -> Result<Self, AIClientError> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|err| config_error(format!("invalid client config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验句柄唯一 以及超时与限流阈值为正
    pub fn validate(&self) -> Result<(), AIClientError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.handle.trim().is_empty() {
                return Err(config_error("provider handle must not be empty"));
            }
            if !seen.insert(provider.handle.as_str()) {
                return Err(config_error(format!(
                    "duplicate provider handle: {}",
                    provider.handle
                )));
            }
            if provider.timeout_secs == Some(0) {
                return Err(config_error(format!(
                    "handle {}: timeout_secs must be positive",
                    provider.handle
                )));
            }
            if let Some(limits) = &provider.rate_limit {
                validate_limits(limits, &provider.handle)?;
            }
        }
        validate_limits(&self.default_rate_limit, "default_rate_limit")?;
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// 构建一次性共享的限流器 用量账本 价格表
    pub fn services(&self) -> ProviderServices {
        let mut limiter = RateLimiter::new(self.default_rate_limit);
        let mut overridden = HashSet::new();
        for provider in &self.providers {
            let Some(limits) = provider.rate_limit else {
                continue;
            };
            let name = provider.provider.provider_name();
            if !overridden.insert(name) {
                warn!(
                    provider = name,
                    handle = %provider.handle,
                    "several handles override the same provider limits, the last one wins"
                );
            }
            limiter = limiter.with_provider_limits(name, limits);
        }

        ProviderServices::new(
            Arc::new(limiter),
            Arc::new(UsageTracker::new()),
            Arc::new(PricingTable::default()),
            self.retry.clone(),
        )
    }
}

/// 根据配置构建 AIClient 共享服务只创建一次
pub fn build_client(
    config: &ClientConfig,
    transport: DynHttpTransport,
) -> Result<AIClient, AIClientError> {
    build_client_with_services(config, transport, config.services())
}

/// 使用外部注入的共享服务构建 AIClient 便于测试替换
pub fn build_client_with_services(
    config: &ClientConfig,
    transport: DynHttpTransport,
    services: ProviderServices,
) -> Result<AIClient, AIClientError> {
    config.validate()?;
    let mut builder = AIClient::builder().usage_tracker(Arc::clone(&services.usage));

    for provider_config in &config.providers {
        let provider = build_provider_from_config(provider_config, transport.clone(), &services)?;
        builder = builder.register_handle(provider_config.handle.clone(), provider);
    }

    Ok(builder.build())
}

fn build_provider_from_config(
    config: &ProviderConfig,
    transport: DynHttpTransport,
    services: &ProviderServices,
) -> Result<DynProvider, AIClientError> {
    let api_key = config.credential.resolve(&config.handle)?;
    let timeout = config.timeout_secs.map(Duration::from_secs);

    let provider: DynProvider = match config.provider {
        ProviderKind::OpenAiChat => {
            let mut provider = OpenAiChatProvider::new(transport, api_key, services.clone());

            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(org) = &config.organization {
                provider = provider.with_organization(org.clone());
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }

            Arc::new(provider)
        }
        ProviderKind::AnthropicMessages => {
            let mut provider = AnthropicMessagesProvider::new(transport, api_key, services.clone());

            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(version) = &config.version {
                provider = provider.with_version(version.clone());
            }
            if let Some(timeout) = timeout {
                provider = provider.with_timeout(timeout);
            }

            Arc::new(provider)
        }
    };

    Ok(provider)
}

fn validate_limits(limits: &RateLimitConfig, owner: &str) -> Result<(), AIClientError> {
    if limits.requests_per_minute == 0 || limits.tokens_per_minute == 0 {
        return Err(config_error(format!(
            "{owner}: rate limits must be positive"
        )));
    }
    Ok(())
}

fn config_error(message: impl Into<String>) -> AIClientError {
    AIClientError::invalid_request(CONFIG_ERROR, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    const SAMPLE: &str = r#"{
  "providers": [
    {
      "handle": "openai-default",
      "provider": "open_ai_chat",
      "credential": {"type": "api_key", "key": "sk-test"},
      "organization": "org-1",
      "rate_limit": {"requests_per_minute": 10, "tokens_per_minute": 20000}
    },
    {
      "handle": "claude",
      "provider": "anthropic_messages",
      "credential": {"type": "bearer", "token": "sk-ant"},
      "base_url": "http://localhost:9000/v1",
      "timeout_secs": 5
    }
  ],
  "retry": {"max_attempts": 2, "base_delay_ms": 250}
}"#;

    #[test]
    fn parses_json_with_defaults() {
        let config = ClientConfig::from_json_str(SAMPLE).expect("config");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].provider, ProviderKind::OpenAiChat);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, Some(30_000));
        assert_eq!(config.default_rate_limit, RateLimitConfig::default());
        assert_eq!(config.providers[1].timeout_secs, Some(5));
    }

    /// 验证所有 ProviderKind 分支都可以被构建并注册到 AIClient
    #[test]
    fn build_client_registers_every_handle() {
        let transport = default_dyn_transport().expect("transport");
        let config = ClientConfig::from_json_str(SAMPLE).expect("config");
        let client = build_client(&config, transport).expect("client");
        assert_eq!(
            client.handles(),
            vec!["claude".to_string(), "openai-default".to_string()]
        );
    }

    #[test]
    fn provider_rate_limit_overrides_default() {
        let config = ClientConfig::from_json_str(SAMPLE).expect("config");
        let services = config.services();
        assert_eq!(
            services.rate_limiter.limits_for("openai_chat").requests_per_minute,
            10
        );
        assert_eq!(
            services.rate_limiter.limits_for("anthropic_messages"),
            RateLimitConfig::default()
        );
        assert_eq!(services.retry.base_delay_ms, 250);
    }

    #[test]
    fn client_shares_injected_usage_tracker() {
        let transport = default_dyn_transport().expect("transport");
        let config = ClientConfig::from_json_str(SAMPLE).expect("config");
        let services = config.services();
        let client = build_client_with_services(&config, transport, services.clone()).expect("client");
        assert!(Arc::ptr_eq(client.usage(), &services.usage));
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let err = Credential::None.resolve("h").expect_err("none");
        assert_eq!(err.code(), CONFIG_ERROR);

        let err = Credential::ApiKey { key: "  ".into() }
            .resolve("h")
            .expect_err("blank");
        assert_eq!(err.code(), CONFIG_ERROR);

        let err = Credential::Env {
            var: "PROPOSAL_AI_CLIENT_TEST_UNSET_VARIABLE".into(),
        }
        .resolve("h")
        .expect_err("unset");
        assert!(err.message().contains("PROPOSAL_AI_CLIENT_TEST_UNSET_VARIABLE"));
    }

    #[test]
    fn env_credential_reads_process_environment() {
        // PATH is set in every test environment.
        let key = Credential::Env { var: "PATH".into() }
            .resolve("h")
            .expect("PATH is set");
        assert!(!key.is_empty());
    }

    #[test]
    fn duplicate_handles_and_zero_limits_are_rejected() {
        let json = r#"{"providers":[
            {"handle":"a","provider":"open_ai_chat","credential":{"type":"api_key","key":"k"}},
            {"handle":"a","provider":"anthropic_messages","credential":{"type":"api_key","key":"k"}}
        ]}"#;
        let err = ClientConfig::from_json_str(json).expect_err("duplicate");
        assert!(err.message().contains("duplicate provider handle"));

        let json = r#"{"default_rate_limit":{"requests_per_minute":0,"tokens_per_minute":1}}"#;
        let err = ClientConfig::from_json_str(json).expect_err("zero rpm");
        assert_eq!(err.code(), CONFIG_ERROR);

        let err = ClientConfig::from_json_str("{not json").expect_err("syntax");
        assert_eq!(err.code(), CONFIG_ERROR);
    }
}
