use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::AIClientError;
use crate::types::{AIRequest, AIResponse, AIStreamChunk, ModelDescriptor};

pub mod anthropic_messages;
pub mod openai_chat;
pub mod shared;

pub use anthropic_messages::AnthropicMessagesProvider;
pub use openai_chat::OpenAiChatProvider;
pub use shared::ProviderServices;

/// 流式响应别名
///
/// 惰性 只能向前消费 不可重启 终止块之后不会再产生任何元素
/// 提前 drop 即释放底层连接
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<AIStreamChunk, AIClientError>> + Send>>;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// 供应商名称 同时作为限流与用量统计的键
    fn name(&self) -> &'static str;

    /// 轻量探测 任何失败都返回 false 不会报错
    async fn is_available(&self) -> bool;

    /// 返回可用模型目录
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, AIClientError>;

    /// 提交完整请求并等待完整响应
    async fn chat(&self, request: AIRequest) -> Result<AIResponse, AIClientError>;

    /// 以流式方式返回增量文本
    async fn stream(&self, request: AIRequest) -> Result<ChatStream, AIClientError>;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn AIProvider>;
