//! A single unit of work dispatched during the Tasks/Run phases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a task is carried out. The executor-specific identifier (assistant
/// id, MCP tool name, binary path) is carried separately in
/// `Task::executor_id` so persisted rows can filter on it without matching
/// inside the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    Assistant,
    Mcp,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    /// Paused on this task awaiting a human reply; the owning
    /// `Execution::status` is `Waiting` and `waiting_task_id` names this
    /// task.
    WaitingInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub executor_type: ExecutorType,
    pub executor_id: String,
    pub args: HashMap<String, Value>,
    pub messages: Vec<String>,
    pub expected_output: String,
    pub description: String,
    /// Position within the execution's task list.
    pub order: usize,
    pub status: TaskStatus,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl Task {
    pub fn new(id: impl Into<String>, executor_type: ExecutorType, executor_id: impl Into<String>, order: usize) -> Self {
        Self {
            id: id.into(),
            executor_type,
            executor_id: executor_id.into(),
            args: HashMap::new(),
            messages: Vec::new(),
            expected_output: String::new(),
            description: String::new(),
            order,
            status: TaskStatus::Pending,
            start_time: None,
            end_time: None,
        }
    }
}

/// The outcome of running a single `Task`. `output` is untyped because
/// executors disagree on shape (assistant text, MCP tool JSON, process
/// stdout) — callers downcast per `executor_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub output: Value,
    pub error: String,
    pub duration_ms: u64,
    /// Set when the outermost assistant turn of this task asked a question
    /// instead of finishing; only ever set on the last element of an
    /// execution's `results`, never mid-list.
    pub need_input: bool,
    pub input_question: String,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, output: Value, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output,
            error: String::new(),
            duration_ms,
            need_input: false,
            input_question: String::new(),
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: Value::Null,
            error: error.into(),
            duration_ms,
            need_input: false,
            input_question: String::new(),
        }
    }

    /// A task skipped by human intervention rather than run to completion:
    /// `Success == false` with the literal string `"skipped"` carried in
    /// `output`, not `error` (`error` is reserved for an executor failure
    /// message).
    pub fn skipped(task_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: Value::String("skipped".to_string()),
            error: String::new(),
            duration_ms,
            need_input: false,
            input_question: String::new(),
        }
    }

    pub fn need_input(task_id: impl Into<String>, question: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output: Value::Null,
            error: String::new(),
            duration_ms,
            need_input: true,
            input_question: question.into(),
        }
    }
}
