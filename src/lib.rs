//! 多供应商 AI 调用核心
//!
//! 统一 OpenAI 与 Anthropic 风格的聊天接口 提供同步与流式补全
//! 以及限流 重试 成本统计和归一化错误

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod pricing;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod stream;
pub mod types;
pub mod usage;

pub use client::{AIClient, AIClientBuilder};
pub use config::{ClientConfig, Credential, ProviderConfig, ProviderKind, build_client};
pub use error::{AIClientError, ErrorKind};
pub use pricing::{ModelPricing, PricingTable};
pub use provider::{AIProvider, ChatStream, DynProvider, ProviderServices};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryConfig, RetryHandler};
pub use types::*;
pub use usage::{UsageRecord, UsageTotals, UsageTracker};
