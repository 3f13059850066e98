//! Classifies inbound human messages into typed `HostAction`s and
//! dispatches them against the store/pool/controller. The hardest
//! behavioral subsystem: most of its branching is in *which* state an
//! execution is in when a message arrives, not in the LLM call itself.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use tokio::sync::mpsc;

use crate::controller::ExecutionController;
use crate::domain::{
    Execution, ExecutionStatus, ExecutorType, GoalsContent, Robot, Task, TaskResult, TaskStatus, TriggerType,
};
use crate::error::EngineError;
use crate::events::{Event, EventBus, EventPayload};
use crate::llm::{CompletionRequest, LlmClient, Message, StreamChunk};
use crate::pool::Pool;
use crate::robot_cache::RobotCache;
use crate::store::ExecutionStore;

/// The `Status` an `Interact` call reports back to its caller. Kept as an
/// enum with a `Display` impl rather than scattering the message-key
/// strings it corresponds to across the dispatch code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractStatus {
    Confirmed,
    WaitingForMore,
    Adjusted,
    TaskAdded,
    TaskSkipped,
    Resumed,
    Waiting,
    Cancelled,
    Acknowledged,
    Rejected,
    Error,
}

impl InteractStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::WaitingForMore => "waiting_for_more",
            Self::Adjusted => "adjusted",
            Self::TaskAdded => "task_added",
            Self::TaskSkipped => "task_skipped",
            Self::Resumed => "resumed",
            Self::Waiting => "waiting",
            Self::Cancelled => "cancelled",
            Self::Acknowledged => "acknowledged",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for InteractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct InteractRequest {
    pub member_id: String,
    pub execution_id: Option<String>,
    pub task_id: Option<String>,
    pub source: String,
    pub message: String,
    /// An explicit action name, bypassing Host Agent classification (a UI
    /// "Confirm" button rather than free text).
    pub action: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InteractResponse {
    pub execution_id: String,
    pub status: InteractStatus,
    pub message: String,
    pub reply: String,
    pub chat_id: String,
    pub wait_for_more: bool,
}

/// One piece of a streamed `interact_streaming` call. `Text` chunks are
/// always clean user-visible prose — JSON decision text is buffered and
/// never forwarded as `Text`. `Done` carries the same terminal response
/// `interact` returns and is always the last chunk sent.
#[derive(Debug, Clone)]
pub enum InteractChunk {
    Text(String),
    Done(InteractResponse),
}

/// The Host Agent's structured output, when it chooses to emit one instead
/// of a conversational reply.
#[derive(Debug, Clone, Default, Deserialize)]
struct HostDecision {
    #[serde(default)]
    action: String,
    #[serde(default)]
    action_data: Value,
    #[serde(default)]
    reply: String,
    #[serde(default)]
    wait_for_more: bool,
}

enum Classification {
    Decision(HostDecision),
    Conversational(String),
}

/// A whole trimmed completion is either a decision object or free text —
/// never a decision tail appended after prose, unlike task completions.
fn classify(content: &str) -> Classification {
    match serde_json::from_str::<HostDecision>(content.trim()) {
        Ok(decision) if !decision.action.is_empty() => Classification::Decision(decision),
        _ => Classification::Conversational(content.trim().to_string()),
    }
}

enum HostOutcome {
    Classified(Classification),
    Fallback,
}

fn short_uuid() -> String {
    Uuid::now_v7().simple().to_string()[..8].to_string()
}

pub struct HostMediator {
    store: Arc<ExecutionStore>,
    robots: Arc<RobotCache>,
    pool: Arc<Pool>,
    controller: Arc<ExecutionController>,
    bus: Arc<EventBus>,
    llm: Arc<dyn LlmClient>,
}

impl HostMediator {
    pub fn new(
        store: Arc<ExecutionStore>,
        robots: Arc<RobotCache>,
        pool: Arc<Pool>,
        controller: Arc<ExecutionController>,
        bus: Arc<EventBus>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self { store, robots, pool, controller, bus, llm }
    }

    pub async fn interact(&self, req: InteractRequest) -> Result<InteractResponse, EngineError> {
        if req.member_id.is_empty() || req.message.is_empty() {
            return Err(EngineError::InvalidState("member_id and message are required".to_string()));
        }
        let robot = self.robots.get(&req.member_id).await?;

        let (scenario, exec) = match &req.execution_id {
            None => {
                let exec = self.create_confirming(&robot, &req)?;
                ("assign", exec)
            }
            Some(id) => {
                let exec = self.store.get(id)?.ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))?;
                let scenario = match exec.status {
                    ExecutionStatus::Confirming => "assign",
                    ExecutionStatus::Waiting => "clarify",
                    ExecutionStatus::Running => "guide",
                    other => {
                        return Ok(self.response(id, InteractStatus::Rejected, &format!("cannot interact with execution in {other:?}"), "", &exec.chat_id));
                    }
                };
                (scenario, exec)
            }
        };

        if let Some(action_name) = req.action.clone() {
            let data = serde_json::from_str::<Value>(&req.message).unwrap_or(Value::Null);
            return self.dispatch_named(&action_name, &data, &req.message, false, &exec, &robot, &req).await;
        }

        let outcome = self.consult_host_agent(&robot, scenario, &exec, &req).await;
        self.dispatch_outcome(scenario, outcome, &exec, &robot, &req).await
    }

    /// Streaming counterpart of `interact`: pushes the Host Agent's text
    /// deltas onto `chunk_tx` as they arrive instead of waiting for the
    /// whole completion. A chunk whose cumulative text opens with `{` or a
    /// fenced code block is a JSON decision in progress and is buffered
    /// rather than forwarded; once classification lands, a decision's
    /// buffered text is discarded and its `reply` field is sent as one
    /// final `Text` chunk, while a conversational reply's buffered chunks
    /// are flushed in order. Always ends with exactly one `Done` chunk
    /// carrying the same response `interact` would have returned.
    pub async fn interact_streaming(
        &self,
        req: InteractRequest,
        chunk_tx: mpsc::Sender<InteractChunk>,
    ) -> Result<InteractResponse, EngineError> {
        if req.member_id.is_empty() || req.message.is_empty() {
            return Err(EngineError::InvalidState("member_id and message are required".to_string()));
        }
        let robot = self.robots.get(&req.member_id).await?;

        let (scenario, exec) = match &req.execution_id {
            None => {
                let exec = self.create_confirming(&robot, &req)?;
                ("assign", exec)
            }
            Some(id) => {
                let exec = self.store.get(id)?.ok_or_else(|| EngineError::ExecutionNotFound(id.clone()))?;
                let scenario = match exec.status {
                    ExecutionStatus::Confirming => "assign",
                    ExecutionStatus::Waiting => "clarify",
                    ExecutionStatus::Running => "guide",
                    other => {
                        let response = self.response(id, InteractStatus::Rejected, &format!("cannot interact with execution in {other:?}"), "", &exec.chat_id);
                        let _ = chunk_tx.send(InteractChunk::Done(response.clone())).await;
                        return Ok(response);
                    }
                };
                (scenario, exec)
            }
        };

        if let Some(action_name) = req.action.clone() {
            let data = serde_json::from_str::<Value>(&req.message).unwrap_or(Value::Null);
            let response = self.dispatch_named(&action_name, &data, &req.message, false, &exec, &robot, &req).await?;
            self.emit_final(&chunk_tx, &response).await;
            return Ok(response);
        }

        if robot.config.host_agent_id.is_none() {
            let response = self.dispatch_outcome(scenario, HostOutcome::Fallback, &exec, &robot, &req).await?;
            self.emit_final(&chunk_tx, &response).await;
            return Ok(response);
        }

        let context = self.build_context(&robot, scenario, &exec, &req);
        let request = CompletionRequest {
            system_prompt: format!(
                "You are the Host Agent mediating human interaction for \"{}\". Classify the human's message as either a JSON decision object {{action, action_data, reply, wait_for_more}} or a plain conversational reply.",
                robot.display_name
            ),
            messages: vec![Message::user(context.to_string())],
            max_tokens: 1024,
        };

        let (llm_tx, mut llm_rx) = mpsc::channel(32);
        let stream_result = self.llm.stream(request, llm_tx).await;

        let mut cumulative = String::new();
        let mut buffered_as_json = false;
        let mut buffered = Vec::new();
        while let Some(chunk) = llm_rx.recv().await {
            let StreamChunk::TextDelta(delta) = chunk else { continue };
            if cumulative.is_empty() {
                let trimmed = delta.trim_start();
                buffered_as_json = trimmed.starts_with('{') || trimmed.starts_with("```");
            }
            cumulative.push_str(&delta);
            if buffered_as_json {
                buffered.push(delta);
            } else {
                let _ = chunk_tx.send(InteractChunk::Text(delta)).await;
            }
        }

        let outcome = match stream_result {
            Ok(_) => HostOutcome::Classified(classify(&cumulative)),
            Err(e) => {
                warn!(error = %e, member_id = %robot.member_id, "HostMediator::interact_streaming: call failed, falling back");
                HostOutcome::Fallback
            }
        };

        match &outcome {
            HostOutcome::Classified(Classification::Decision(decision)) => {
                // The buffered text was the decision's own JSON, never shown to the human.
                if !decision.reply.is_empty() {
                    let _ = chunk_tx.send(InteractChunk::Text(decision.reply.clone())).await;
                }
            }
            _ => {
                for chunk in buffered {
                    let _ = chunk_tx.send(InteractChunk::Text(chunk)).await;
                }
            }
        }

        let response = self.dispatch_outcome(scenario, outcome, &exec, &robot, &req).await?;
        let _ = chunk_tx.send(InteractChunk::Done(response.clone())).await;
        Ok(response)
    }

    async fn emit_final(&self, chunk_tx: &mpsc::Sender<InteractChunk>, response: &InteractResponse) {
        if !response.reply.is_empty() {
            let _ = chunk_tx.send(InteractChunk::Text(response.reply.clone())).await;
        }
        let _ = chunk_tx.send(InteractChunk::Done(response.clone())).await;
    }

    fn create_confirming(&self, robot: &Robot, req: &InteractRequest) -> Result<Execution, EngineError> {
        let exec_id = Pool::new_exec_id();
        let mut exec = Execution::new(exec_id, &robot.member_id, &robot.team_id, TriggerType::Human { operator: req.source.clone() });
        exec.status = ExecutionStatus::Confirming;
        // The pipeline's Inspiration phase is never entered for a Human
        // trigger; reuse the field to carry the human's opening message
        // forward as context for the Goals phase.
        exec.inspiration = Some(req.message.clone());
        self.store.save(&exec)?;
        Ok(exec)
    }

    async fn consult_host_agent(&self, robot: &Robot, scenario: &str, exec: &Execution, req: &InteractRequest) -> HostOutcome {
        if robot.config.host_agent_id.is_none() {
            return HostOutcome::Fallback;
        }
        let context = self.build_context(robot, scenario, exec, req);
        let request = CompletionRequest {
            system_prompt: format!(
                "You are the Host Agent mediating human interaction for \"{}\". Classify the human's message as either a JSON decision object {{action, action_data, reply, wait_for_more}} or a plain conversational reply.",
                robot.display_name
            ),
            messages: vec![Message::user(context.to_string())],
            max_tokens: 1024,
        };
        match self.llm.complete(request).await {
            Ok(response) => HostOutcome::Classified(classify(&response.content)),
            Err(e) => {
                warn!(error = %e, member_id = %robot.member_id, "HostMediator::consult_host_agent: call failed, falling back");
                HostOutcome::Fallback
            }
        }
    }

    fn build_context(&self, robot: &Robot, scenario: &str, exec: &Execution, req: &InteractRequest) -> Value {
        json!({
            "scenario": scenario,
            "messages": [req.message],
            "context": {
                "robot_status": self.robot_snapshot(robot),
                "goals": exec.goals.as_ref().map(|g| g.content.clone()),
                "tasks": exec.tasks.iter().map(|t| t.description.clone()).collect::<Vec<_>>(),
                "current_task": exec.current_task_name,
                "agent_reply": exec.waiting_question,
            }
        })
    }

    fn robot_snapshot(&self, robot: &Robot) -> Value {
        json!({
            "member_id": robot.member_id,
            "status": robot.status(),
            "active_count": robot.active_count(),
            "waiting_count": robot.waiting_count(),
            "queued_count": self.pool.queue_size(&robot.member_id),
            "max_quota": robot.max_quota(),
        })
    }

    async fn dispatch_outcome(
        &self,
        scenario: &str,
        outcome: HostOutcome,
        exec: &Execution,
        robot: &Arc<Robot>,
        req: &InteractRequest,
    ) -> Result<InteractResponse, EngineError> {
        match outcome {
            HostOutcome::Fallback => match scenario {
                "assign" => self.do_confirm(&exec.id, robot.clone(), req).await,
                "clarify" => self.do_inject_ctx(&exec.id, &req.message, robot.clone()).await,
                _ => Ok(self.response(&exec.id, InteractStatus::Acknowledged, "", "", &exec.chat_id)),
            },
            HostOutcome::Classified(Classification::Conversational(reply)) => {
                Ok(self.response(&exec.id, InteractStatus::WaitingForMore, "", &reply, &exec.chat_id))
            }
            HostOutcome::Classified(Classification::Decision(decision)) => {
                self.dispatch_named(&decision.action, &decision.action_data, &decision.reply, decision.wait_for_more, exec, robot, req).await
            }
        }
    }

    async fn dispatch_named(
        &self,
        action: &str,
        data: &Value,
        reply: &str,
        wait_for_more: bool,
        exec: &Execution,
        robot: &Arc<Robot>,
        req: &InteractRequest,
    ) -> Result<InteractResponse, EngineError> {
        if wait_for_more {
            return Ok(self.response(&exec.id, InteractStatus::WaitingForMore, "", reply, &exec.chat_id));
        }
        match action {
            "confirm" => self.do_confirm(&exec.id, robot.clone(), req).await,
            "adjust" => self.do_adjust(&exec.id, data),
            "add_task" => self.do_add_task(&exec.id, data),
            "skip" => self.do_skip(&exec.id, robot.clone()).await,
            "inject_ctx" => {
                let context = data
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| data.get("reply").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| reply.to_string());
                self.do_inject_ctx(&exec.id, &context, robot.clone()).await
            }
            "cancel" => self.do_cancel(&exec.id, robot),
            _ => Ok(self.response(&exec.id, InteractStatus::Acknowledged, "", reply, &exec.chat_id)),
        }
    }

    async fn do_confirm(&self, exec_id: &str, robot: Arc<Robot>, req: &InteractRequest) -> Result<InteractResponse, EngineError> {
        self.store.update_status(exec_id, ExecutionStatus::Running, None)?;
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        self.pool.submit_with_id(robot, TriggerType::Human { operator: req.source.clone() }, exec_id.to_string()).await?;
        Ok(self.response(exec_id, InteractStatus::Confirmed, "confirmed", "", &exec.chat_id))
    }

    fn do_adjust(&self, exec_id: &str, data: &Value) -> Result<InteractResponse, EngineError> {
        if let Some(goals) = data.get("goals").and_then(Value::as_str) {
            self.store.update_goals(exec_id, GoalsContent { content: goals.to_string() })?;
        }
        if let Some(tasks_value) = data.get("tasks") {
            if let Ok(tasks) = serde_json::from_value::<Vec<Task>>(tasks_value.clone()) {
                self.store.update_tasks(exec_id, tasks, None)?;
            }
        }
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        Ok(self.response(exec_id, InteractStatus::Adjusted, "adjusted", "", &exec.chat_id))
    }

    fn do_add_task(&self, exec_id: &str, data: &Value) -> Result<InteractResponse, EngineError> {
        let mut task = serde_json::from_value::<Task>(data.clone())
            .unwrap_or_else(|_| Task::new(String::new(), ExecutorType::Assistant, "", 0));
        if task.id.is_empty() {
            task.id = format!("injected-{}", short_uuid());
        }
        task.status = TaskStatus::Pending;

        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        let mut tasks = exec.tasks.clone();
        task.order = tasks.len();
        tasks.push(task);
        self.store.update_tasks(exec_id, tasks, None)?;
        Ok(self.response(exec_id, InteractStatus::TaskAdded, "task added", "", &exec.chat_id))
    }

    async fn do_skip(&self, exec_id: &str, robot: Arc<Robot>) -> Result<InteractResponse, EngineError> {
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        let waiting_task_id = exec
            .waiting_task_id
            .clone()
            .ok_or_else(|| EngineError::InvalidState(format!("execution {exec_id} has no waiting task to skip")))?;

        let mut tasks = exec.tasks.clone();
        if let Some(t) = tasks.iter_mut().find(|t| t.id == waiting_task_id) {
            t.status = TaskStatus::Skipped;
            t.end_time = Some(Utc::now().timestamp_millis());
        }
        self.store.update_tasks(exec_id, tasks, None)?;
        self.store.append_result(exec_id, TaskResult::skipped(&waiting_task_id, 0))?;

        self.store.update_resume_state(exec_id)?;
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        self.pool.reattach(robot, TriggerType::Human { operator: "host-mediator".to_string() }, exec_id.to_string());
        Ok(self.response(exec_id, InteractStatus::TaskSkipped, "task skipped", "", &exec.chat_id))
    }

    async fn do_inject_ctx(&self, exec_id: &str, context: &str, robot: Arc<Robot>) -> Result<InteractResponse, EngineError> {
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        if !context.is_empty() {
            if let Some(waiting_task_id) = exec.waiting_task_id.clone() {
                let mut tasks = exec.tasks.clone();
                if let Some(t) = tasks.iter_mut().find(|t| t.id == waiting_task_id) {
                    t.messages.push(format!("[Human reply] {context}"));
                }
                self.store.update_tasks(exec_id, tasks, None)?;
            }
        }
        self.store.update_resume_state(exec_id)?;
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        self.pool.reattach(robot, TriggerType::Human { operator: "host-mediator".to_string() }, exec_id.to_string());
        Ok(self.response(exec_id, InteractStatus::Resumed, "resumed", "", &exec.chat_id))
    }

    fn do_cancel(&self, exec_id: &str, robot: &Robot) -> Result<InteractResponse, EngineError> {
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        if !matches!(exec.status, ExecutionStatus::Waiting | ExecutionStatus::Confirming) {
            return Err(EngineError::InvalidState(format!("execution {exec_id} cannot be cancelled from {:?}", exec.status)));
        }
        self.store.update_status(exec_id, ExecutionStatus::Cancelled, None)?;
        self.controller.untrack(exec_id);
        robot.remove_execution(exec_id);
        self.bus.push(Event::new(
            "robot.exec.cancelled",
            EventPayload::ExecCancelled { exec_id: exec_id.to_string(), member_id: robot.member_id.clone() },
        ));
        Ok(self.response(exec_id, InteractStatus::Cancelled, "cancelled", "", &exec.chat_id))
    }

    fn response(&self, exec_id: &str, status: InteractStatus, message: &str, reply: &str, chat_id: &str) -> InteractResponse {
        let wait_for_more = status == InteractStatus::WaitingForMore;
        InteractResponse {
            execution_id: exec_id.to_string(),
            status,
            message: message.to_string(),
            reply: reply.to_string(),
            chat_id: chat_id.to_string(),
            wait_for_more,
        }
    }
}
