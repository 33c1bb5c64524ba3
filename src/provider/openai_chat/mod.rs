//! OpenAI Chat Completions 适配器 兼容任意 OpenAI 风格网关

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::OpenAiChatProvider;
