//! HTTP-backed `LlmClient` talking to an OpenAI-compatible chat completions
//! endpoint, with retry/backoff on transient errors.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::LlmError;
use super::types::{CompletionRequest, CompletionResponse, Role, StopReason, StreamChunk, TokenUsage};
use crate::llm::client::LlmClient;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

pub struct HttpLlmClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, timeout: Duration, max_tokens: u32) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;
        Ok(Self { model: model.into(), api_key: api_key.into(), base_url: base_url.into(), http, max_tokens })
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({"role": "system", "content": request.system_prompt})];
        for message in &request.messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({"role": role, "content": message.content}));
        }
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens.min(self.max_tokens),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ChatStreamEvent {
    choices: Vec<ChatStreamChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_body(&request);
        let url = format!("{}/chat/completions", self.base_url);

        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) if attempt < MAX_RETRIES && e.is_timeout() => {
                    warn!(attempt, "HttpLlmClient::complete: timeout, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                    continue;
                }
                Err(e) => return Err(LlmError::Network(e)),
            };

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(LlmError::Authentication(format!("status {status}")));
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after_ms = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(backoff_ms);
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                    backoff_ms *= 2;
                    continue;
                }
                return Err(LlmError::RateLimited { retry_after_ms });
            }
            if !status.is_success() {
                if is_retryable_status(status.as_u16()) && attempt < MAX_RETRIES {
                    debug!(%status, attempt, "HttpLlmClient::complete: retryable error");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                    continue;
                }
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::InvalidResponse(format!("status {status}: {body}")));
            }

            let parsed: ChatResponse = response.json().await.map_err(LlmError::Network)?;
            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::InvalidResponse("empty choices array".to_string()))?;
            let stop_reason = match choice.finish_reason.as_str() {
                "length" => StopReason::MaxTokens,
                "tool_calls" => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
            return Ok(CompletionResponse {
                content: choice.message.content,
                stop_reason,
                usage: TokenUsage { input_tokens: parsed.usage.prompt_tokens, output_tokens: parsed.usage.completion_tokens },
            });
        }
    }

    async fn stream(&self, request: CompletionRequest, chunk_tx: mpsc::Sender<StreamChunk>) -> Result<CompletionResponse, LlmError> {
        let mut body = self.build_body(&request);
        body["stream"] = serde_json::json!(true);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self.http.post(&url).bearer_auth(&self.api_key).json(&body).send().await.map_err(LlmError::Network)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidResponse(format!("status {status}: {body}")));
        }

        let mut byte_stream = response.bytes_stream();
        let mut full_content = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(LlmError::Network)?;
            line_buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = line_buffer.find('\n') {
                let line = line_buffer[..line_end].trim().to_string();
                line_buffer = line_buffer[line_end + 1..].to_string();
                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else { continue };
                let Ok(event) = serde_json::from_str::<ChatStreamEvent>(data) else { continue };

                if let Some(choice) = event.choices.first() {
                    if let Some(content) = &choice.delta.content {
                        full_content.push_str(content);
                        let _ = chunk_tx.send(StreamChunk::TextDelta(content.clone())).await;
                    }
                    if let Some(reason) = &choice.finish_reason {
                        stop_reason = match reason.as_str() {
                            "length" => StopReason::MaxTokens,
                            "tool_calls" => StopReason::ToolUse,
                            _ => StopReason::EndTurn,
                        };
                    }
                }
                if let Some(u) = event.usage {
                    usage = TokenUsage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens };
                }
            }
        }

        let _ = chunk_tx.send(StreamChunk::Done { stop_reason, usage: usage.clone() }).await;
        Ok(CompletionResponse { content: full_content, stop_reason, usage })
    }
}
