//! LLM client abstraction.
//!
//! A unified completion interface over the provider API, consumed by the
//! agent facade and the quality judge. Streaming is exposed as a plain
//! token callback so provider-specific streaming types never leak upward.

mod client;
mod types;

pub use client::{AnthropicClient, ClientConfig, LLMClient, TokenCallback};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, StopReason, TokenUsage,
};
