//! Dispatches a single `Task` to its executor (assistant / MCP tool /
//! named in-process procedure) and detects the need-input signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::domain::{ExecutorType, Task, TaskResult};
use crate::llm::{CompletionRequest, LlmClient, Message, Next};

/// A named in-process procedure a `Process` task can invoke. Registered by
/// name at `TaskRunner` construction; unregistered names fail gracefully
/// rather than panicking.
pub type ProcessFn = Arc<dyn Fn(&HashMap<String, Value>) -> Result<Value, String> + Send + Sync>;

/// Everything a task needs beyond its own fields: the system prompt for its
/// robot, the confirmed goals text, and the prefix of results produced by
/// tasks before it in execution order.
pub struct TaskContext<'a> {
    pub system_prompt: &'a str,
    pub goals: &'a str,
    pub previous_results: &'a [TaskResult],
}

impl<'a> TaskContext<'a> {
    /// Build a context from an execution's full results list and the task's
    /// index, clamping to the results actually available.
    pub fn for_task_index(system_prompt: &'a str, goals: &'a str, results: &'a [TaskResult], task_index: usize) -> Self {
        let clamped = task_index.min(results.len());
        Self { system_prompt, goals, previous_results: &results[..clamped] }
    }
}

fn render_previous_results(results: &[TaskResult]) -> String {
    if results.is_empty() {
        return "(no prior task results)".to_string();
    }
    results
        .iter()
        .map(|r| {
            let mark = if r.success { "ok" } else { "fail" };
            format!("- [{}] {}: {}", r.task_id, mark, r.output)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs tasks against whichever executor their `executor_type` names. Holds
/// the shared LLM client used for `Assistant` tasks and the registry of
/// named procedures `Process` tasks may invoke; MCP dispatch needs no
/// shared state beyond an HTTP client.
pub struct TaskRunner {
    llm: Arc<dyn LlmClient>,
    http: reqwest::Client,
    processes: HashMap<String, ProcessFn>,
}

impl TaskRunner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, http: reqwest::Client::new(), processes: HashMap::new() }
    }

    pub fn with_process(mut self, name: impl Into<String>, f: ProcessFn) -> Self {
        self.processes.insert(name.into(), f);
        self
    }

    /// Run `task` against `ctx`. Need-input detection only ever fires on
    /// the Assistant path's outermost turn — MCP and process executors
    /// cannot ask a clarifying question mid-task.
    pub async fn run(&self, task: &Task, ctx: &TaskContext<'_>) -> TaskResult {
        let started = Instant::now();

        let result = match task.executor_type {
            ExecutorType::Assistant => self.run_assistant(task, ctx).await,
            ExecutorType::Mcp => self.run_mcp(task).await,
            ExecutorType::Process => self.run_process(task),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(mut task_result) => {
                task_result.duration_ms = duration_ms;
                task_result
            }
            Err(error) => TaskResult::failure(&task.id, error, duration_ms),
        }
    }

    async fn run_assistant(&self, task: &Task, ctx: &TaskContext<'_>) -> Result<TaskResult, String> {
        let mut prompt = String::new();
        prompt.push_str("Previous task results:\n");
        prompt.push_str(&render_previous_results(ctx.previous_results));
        prompt.push_str("\n\nGoals:\n");
        prompt.push_str(ctx.goals);
        prompt.push_str("\n\nTask:\n");
        prompt.push_str(&task.description);
        for message in &task.messages {
            prompt.push('\n');
            prompt.push_str(message);
        }

        let request = CompletionRequest {
            system_prompt: ctx.system_prompt.to_string(),
            messages: vec![Message::user(prompt)],
            max_tokens: 4096,
        };
        let response = self.llm.complete(request).await.map_err(|e| e.to_string())?;

        match Next::parse_from(&response.content) {
            Next::NeedInput { question } => Ok(TaskResult::need_input(&task.id, question, 0)),
            Next::Done => {
                let output = serde_json::from_str::<Value>(&response.content).unwrap_or(Value::String(response.content));
                Ok(TaskResult::success(&task.id, output, 0))
            }
        }
    }

    /// `ExecutorID` is a two-segment `server.tool` name; the tool is called
    /// with `Args["input"]` if present, else the whole args map.
    async fn run_mcp(&self, task: &Task) -> Result<TaskResult, String> {
        let (server, tool) = task
            .executor_id
            .split_once('.')
            .ok_or_else(|| format!("malformed MCP executor id (want server.tool): {}", task.executor_id))?;

        let body = task.args.get("input").cloned().unwrap_or_else(|| serde_json::to_value(&task.args).unwrap_or(Value::Null));

        let response = self
            .http
            .post(format!("{server}/tools/{tool}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("MCP call to {server}.{tool} failed with status {}", response.status()));
        }
        let output: Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(TaskResult::success(&task.id, output, 0))
    }

    fn run_process(&self, task: &Task) -> Result<TaskResult, String> {
        let Some(process) = self.processes.get(&task.executor_id) else {
            warn!(task_id = %task.id, procedure = %task.executor_id, "TaskRunner::run_process: unknown procedure");
            return Err(format!("unknown process \"{}\"", task.executor_id));
        };
        let output = process(&task.args)?;
        Ok(TaskResult::success(&task.id, output, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, MockLlmClient, StopReason, TokenUsage};

    fn task(executor: ExecutorType) -> Task {
        Task::new("t1", executor, "assistant-1", 0)
    }

    fn empty_ctx() -> TaskContext<'static> {
        TaskContext { system_prompt: "system", goals: "ship it", previous_results: &[] }
    }

    #[tokio::test]
    async fn assistant_task_returns_success_with_plain_text() {
        let llm = Arc::new(MockLlmClient::new(vec![CompletionResponse {
            content: "all done".to_string(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }]));
        let runner = TaskRunner::new(llm);
        let result = runner.run(&task(ExecutorType::Assistant), &empty_ctx()).await;
        assert!(result.success);
        assert!(!result.need_input);
    }

    #[tokio::test]
    async fn assistant_task_detects_need_input_signal() {
        let llm = Arc::new(MockLlmClient::new(vec![CompletionResponse {
            content: "Checking...\n{\"status\": \"need_input\", \"question\": \"use staging or prod?\"}".to_string(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }]));
        let runner = TaskRunner::new(llm);
        let result = runner.run(&task(ExecutorType::Assistant), &empty_ctx()).await;
        assert!(result.need_input);
        assert_eq!(result.input_question, "use staging or prod?");
    }

    #[tokio::test]
    async fn assistant_task_failure_is_captured_as_task_result() {
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let runner = TaskRunner::new(llm);
        let result = runner.run(&task(ExecutorType::Assistant), &empty_ctx()).await;
        assert!(!result.success);
        assert!(!result.error.is_empty());
    }

    #[tokio::test]
    async fn process_task_runs_registered_procedure() {
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let runner = TaskRunner::new(llm).with_process(
            "echo",
            Arc::new(|args| Ok(args.get("message").cloned().unwrap_or(Value::Null))),
        );
        let mut t = task(ExecutorType::Process);
        t.executor_id = "echo".to_string();
        t.args.insert("message".to_string(), serde_json::json!("hi"));

        let result = runner.run(&t, &empty_ctx()).await;
        assert!(result.success);
        assert_eq!(result.output, serde_json::json!("hi"));
    }

    #[tokio::test]
    async fn process_task_fails_gracefully_for_unknown_procedure() {
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let runner = TaskRunner::new(llm);
        let mut t = task(ExecutorType::Process);
        t.executor_id = "missing".to_string();

        let result = runner.run(&t, &empty_ctx()).await;
        assert!(!result.success);
        assert!(result.error.contains("unknown process"));
    }

    #[tokio::test]
    async fn mcp_task_rejects_malformed_executor_id() {
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let runner = TaskRunner::new(llm);
        let mut t = task(ExecutorType::Mcp);
        t.executor_id = "no-dot-here".to_string();

        let result = runner.run(&t, &empty_ctx()).await;
        assert!(!result.success);
        assert!(result.error.contains("malformed"));
    }
}
