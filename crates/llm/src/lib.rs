pub mod client;
pub mod config;
pub mod gemini;
pub mod openai;
pub mod retry;

pub use client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage, ToolCall, ToolSpec,
};
pub use config::{LlmConfig, SemaphoredClient, build_llm_client};
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
