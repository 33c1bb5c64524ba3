use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::error::{AIClientError, UNKNOWN_PROVIDER};
use crate::provider::{ChatStream, DynProvider};
use crate::types::{AIRequest, AIResponse, ModelDescriptor};
use crate::usage::UsageTracker;

/// AI 调用入口 负责维护已注册的 Provider
///
/// 不做跨供应商的自动回退 失败时由调用方根据错误类型决定重试或切换
pub struct AIClient {
    providers: HashMap<String, DynProvider>,
    usage: Arc<UsageTracker>,
}

impl AIClient {
    /// 创建 Builder 便于后续注册 Provider
    pub fn builder() -> AIClientBuilder {
        AIClientBuilder {
            providers: HashMap::new(),
            usage: None,
        }
    }

    /// 发送同步聊天请求
    pub async fn chat(&self, handle: &str, request: AIRequest) -> Result<AIResponse, AIClientError> {
        let provider = self.get_provider(handle)?;
        provider.chat(request).await
    }

    /// 发起流式聊天请求
    pub async fn stream(&self, handle: &str, request: AIRequest) -> Result<ChatStream, AIClientError> {
        let provider = self.get_provider(handle)?;
        provider.stream(request).await
    }

    /// 查询指定句柄的模型目录
    pub async fn list_models(&self, handle: &str) -> Result<Vec<ModelDescriptor>, AIClientError> {
        let provider = self.get_provider(handle)?;
        provider.list_models().await
    }

    /// 探测指定句柄是否可用 仅在句柄未注册时返回错误
    pub async fn is_available(&self, handle: &str) -> Result<bool, AIClientError> {
        let provider = self.get_provider(handle)?;
        Ok(provider.is_available().await)
    }

    /// 并发探测全部句柄 返回可用的句柄列表（已排序）
    pub async fn available_handles(&self) -> Vec<String> {
        let probes = self.providers.iter().map(|(handle, provider)| async move {
            provider.is_available().await.then(|| handle.clone())
        });
        let mut handles: Vec<String> = join_all(probes).await.into_iter().flatten().collect();
        handles.sort();
        handles
    }

    /// 返回当前已注册的句柄（已排序）
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.providers.keys().cloned().collect();
        handles.sort();
        handles
    }

    /// 所有 Provider 共享的用量账本
    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// 按句柄取出 Provider
    pub fn provider(&self, handle: &str) -> Result<DynProvider, AIClientError> {
        self.get_provider(handle)
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, AIClientError> {
        self.providers.get(handle).cloned().ok_or_else(|| {
            AIClientError::invalid_request(
                UNKNOWN_PROVIDER,
                format!("unknown provider handle: {handle}"),
            )
        })
    }
}

/// 负责注册 Provider 的 Builder
pub struct AIClientBuilder {
    providers: HashMap<String, DynProvider>,
    usage: Option<Arc<UsageTracker>>,
}

impl AIClientBuilder {
    /// 注册一个句柄对应的 Provider 重复句柄以后注册者为准
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        self.providers.insert(handle.into(), provider);
        self
    }

    /// 指定共享的用量账本 应与注入各 Provider 的为同一实例
    pub fn usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// 构建最终的 AIClient
    pub fn build(self) -> AIClient {
        AIClient {
            providers: self.providers,
            usage: self.usage.unwrap_or_default(),
        }
    }
}
