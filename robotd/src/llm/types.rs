//! Request/response types exchanged with an `LlmClient`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    ToolUse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

/// One increment of a streamed completion, delivered to the caller's
/// channel as it arrives rather than all at once from `LlmClient::complete`.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A piece of the assistant's text, in generation order.
    TextDelta(String),
    /// The stream is finished; carries the same terminal fields `complete`
    /// would have returned.
    Done { stop_reason: StopReason, usage: TokenUsage },
}

/// The structured signal an assistant turn may emit in place of (or
/// alongside) free text, indicating it needs a human answer before the
/// current task can finish. Detection is restricted to the outermost
/// assistant turn of a task — a `Next` embedded in an intermediate
/// tool-use turn is not treated as a suspend request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Next {
    Done,
    NeedInput { question: String },
}

impl Next {
    /// Parse a `Next` signal out of an assistant turn's raw text, if
    /// present. The convention is a single trailing JSON object; any
    /// unparsable or absent signal is treated as `Done`.
    pub fn parse_from(content: &str) -> Next {
        let trimmed = content.trim();
        let Some(brace) = trimmed.rfind('{') else {
            return Next::Done;
        };
        match serde_json::from_str::<Next>(&trimmed[brace..]) {
            Ok(next) => next,
            Err(_) => Next::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_from_extracts_need_input_json_tail() {
        let content = "I've made progress.\n{\"status\": \"need_input\", \"question\": \"which branch?\"}";
        assert_eq!(Next::parse_from(content), Next::NeedInput { question: "which branch?".to_string() });
    }

    #[test]
    fn parse_from_defaults_to_done_without_a_signal() {
        assert_eq!(Next::parse_from("just plain prose"), Next::Done);
    }

    #[test]
    fn parse_from_defaults_to_done_on_malformed_json() {
        assert_eq!(Next::parse_from("trailing { not json"), Next::Done);
    }
}
