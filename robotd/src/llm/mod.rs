//! LLM completion client abstraction: a single `complete` call per turn,
//! no implicit conversation state (callers rebuild the full message
//! history into every request).

mod client;
mod error;
mod http;
mod types;

pub use client::{LlmClient, MockLlmClient};
pub use error::LlmError;
pub use http::HttpLlmClient;
pub use types::{CompletionRequest, CompletionResponse, Message, Next, Role, StopReason, StreamChunk, TokenUsage};
