//! LlmClient trait definition and an in-memory test double.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::LlmError;
use super::types::CompletionRequest;
use super::types::CompletionResponse;
use super::types::StreamChunk;

/// Stateless LLM client - each call is independent (fresh context). No
/// conversation state is carried between calls inside the client itself;
/// callers build the full message history into each `CompletionRequest`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Stream a completion one delta at a time over `chunk_tx`, still
    /// returning the same assembled `CompletionResponse` `complete` would
    /// have. The default forwards the whole response as a single delta,
    /// for clients with no native streaming transport.
    async fn stream(&self, request: CompletionRequest, chunk_tx: mpsc::Sender<StreamChunk>) -> Result<CompletionResponse, LlmError> {
        let response = self.complete(request).await?;
        let _ = chunk_tx.send(StreamChunk::TextDelta(response.content.clone())).await;
        let _ = chunk_tx.send(StreamChunk::Done { stop_reason: response.stop_reason, usage: response.usage.clone() }).await;
        Ok(response)
    }
}

/// Canned-response test double: returns responses from a fixed list in
/// order, erroring once exhausted.
pub struct MockLlmClient {
    responses: std::sync::Mutex<Vec<CompletionResponse>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self { responses: std::sync::Mutex::new(responses.into_iter().rev().collect()) }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| LlmError::InvalidResponse("no more mock responses".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{StopReason, TokenUsage};

    fn request() -> CompletionRequest {
        CompletionRequest { system_prompt: "system".to_string(), messages: vec![], max_tokens: 100 }
    }

    fn response(content: &str) -> CompletionResponse {
        CompletionResponse { content: content.to_string(), stop_reason: StopReason::EndTurn, usage: TokenUsage::default() }
    }

    #[tokio::test]
    async fn mock_client_returns_responses_in_order() {
        let client = MockLlmClient::new(vec![response("first"), response("second")]);
        assert_eq!(client.complete(request()).await.unwrap().content, "first");
        assert_eq!(client.complete(request()).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn mock_client_errors_when_exhausted() {
        let client = MockLlmClient::new(vec![]);
        assert!(client.complete(request()).await.is_err());
    }
}
