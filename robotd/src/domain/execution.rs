//! Execution - one run of a robot through the phase pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::phase::Phase;
use super::task::{Task, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    /// A human response has been classified as `Confirm`/`Adjust` and the
    /// execution is transitioning back to `Running`; a distinct state from
    /// `Running` so a concurrent `Confirm` cannot double-resume.
    Confirming,
    Running,
    /// Suspended mid-task awaiting a human response, routed through
    /// `HostMediator`.
    Waiting,
    /// Parked by `ExecutionController::pause`; the worker task blocks at
    /// its next checkpoint instead of advancing.
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// What caused this execution to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TriggerType {
    Human { operator: String },
    Clock,
    Event { topic: String },
}

/// An explicit continuation: where a resumed execution should re-enter the
/// Run phase's task loop, and what the prior tasks in this phase produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeContext {
    pub task_index: usize,
    pub previous_results: Vec<TaskResult>,
}

/// Free-text produced by the Goals phase, carried forward to later phases
/// and to the Host Agent prompt (flattened to plain text at that boundary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalsContent {
    pub content: String,
}

/// The artifact produced by the Delivery phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryContent {
    pub content: String,
    pub success: bool,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub member_id: String,
    pub team_id: String,
    /// Shared across every LLM call within this execution, formed as
    /// `robot_<member_id>_<id>`.
    pub chat_id: String,
    pub trigger: TriggerType,

    pub phase: Phase,
    pub status: ExecutionStatus,

    pub inspiration: Option<String>,
    pub goals: Option<GoalsContent>,
    pub tasks: Vec<Task>,
    pub results: Vec<TaskResult>,
    pub delivery: Option<DeliveryContent>,
    pub learning: Option<String>,

    pub waiting_task_id: Option<String>,
    pub waiting_question: Option<String>,
    pub waiting_since: Option<i64>,
    pub resume_context: Option<ResumeContext>,

    pub name: String,
    pub current_task_name: Option<String>,

    pub start_time: i64,
    pub end_time: Option<i64>,
    pub error: Option<String>,

    pub updated_at: i64,
}

impl robotstore::Record for Execution {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "executions"
    }
}

impl Execution {
    pub fn new(id: impl Into<String>, member_id: impl Into<String>, team_id: impl Into<String>, trigger: TriggerType) -> Self {
        let id = id.into();
        let member_id = member_id.into();
        let now = Utc::now().timestamp_millis();
        let chat_id = format!("robot_{member_id}_{id}");
        Self {
            name: format!("execution {id}"),
            chat_id,
            id,
            member_id,
            team_id: team_id.into(),
            trigger,
            phase: Phase::Inspiration,
            status: ExecutionStatus::Pending,
            inspiration: None,
            goals: None,
            tasks: Vec::new(),
            results: Vec::new(),
            delivery: None,
            learning: None,
            waiting_task_id: None,
            waiting_question: None,
            waiting_since: None,
            resume_context: None,
            current_task_name: None,
            start_time: now,
            end_time: None,
            error: None,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }

    /// `Pending` → `Running`.
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.touch();
    }

    pub fn suspend(&mut self, waiting_task_id: impl Into<String>, question: impl Into<String>, resume: ResumeContext) {
        self.status = ExecutionStatus::Waiting;
        self.waiting_task_id = Some(waiting_task_id.into());
        self.waiting_question = Some(question.into());
        self.waiting_since = Some(Utc::now().timestamp_millis());
        self.resume_context = Some(resume);
        self.touch();
    }

    /// Move from `Waiting` to `Confirming` atomically. Returns `false`
    /// (no mutation) if the execution isn't currently `Waiting`, so a
    /// caller can detect a double `Confirm`/`Resume` race.
    pub fn begin_confirming(&mut self) -> bool {
        if self.status != ExecutionStatus::Waiting {
            return false;
        }
        self.status = ExecutionStatus::Confirming;
        self.touch();
        true
    }

    /// Move from `Confirming` to `Running`, consuming the resume context
    /// and clearing the suspend fields.
    pub fn resume_running(&mut self) -> Option<ResumeContext> {
        if self.status != ExecutionStatus::Confirming {
            return None;
        }
        self.status = ExecutionStatus::Running;
        self.waiting_task_id = None;
        self.waiting_question = None;
        self.waiting_since = None;
        self.touch();
        self.resume_context.take()
    }

    pub fn pause(&mut self) {
        if matches!(self.status, ExecutionStatus::Running) {
            self.status = ExecutionStatus::Paused;
            self.touch();
        }
    }

    pub fn unpause(&mut self) {
        if matches!(self.status, ExecutionStatus::Paused) {
            self.status = ExecutionStatus::Running;
            self.touch();
        }
    }

    pub fn advance_to(&mut self, phase: Phase) {
        self.phase = phase;
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.end_time = Some(Utc::now().timestamp_millis());
        self.touch();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now().timestamp_millis());
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.waiting_task_id = None;
        self.waiting_question = None;
        self.waiting_since = None;
        self.resume_context = None;
        self.end_time = Some(Utc::now().timestamp_millis());
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}
