//! Typed event payloads published on the bus, plus the topic strings they
//! are published under.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::TaskResult;

/// A published event: a dot-separated topic and its typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self { topic: topic.into(), payload }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    RobotConfigCreated { member_id: String },
    RobotConfigUpdated { member_id: String },
    RobotConfigDeleted { member_id: String },

    ExecStarted { exec_id: String, member_id: String },
    ExecCompleted { exec_id: String, member_id: String },
    ExecFailed { exec_id: String, member_id: String, error: String },
    ExecCancelled { exec_id: String, member_id: String },
    ExecWaiting { exec_id: String, member_id: String, question: String },
    ExecResumed { exec_id: String, member_id: String },

    TaskCompleted { exec_id: String, task_id: String, result: TaskResult },
    TaskFailed { exec_id: String, task_id: String, error: String },

    Delivery { exec_id: String, member_id: String, content: String },
    Message { exec_id: String, member_id: String, text: String },

    IntegrationWebhook { provider: String, body: Value },
}

impl EventPayload {
    /// The topic this payload is conventionally published under, following
    /// `robot.<category>.<verb>` (or `integration.webhook.<provider>` for
    /// inbound platform traffic).
    pub fn default_topic(&self) -> String {
        match self {
            EventPayload::RobotConfigCreated { .. } => "robot.config.created".to_string(),
            EventPayload::RobotConfigUpdated { .. } => "robot.config.updated".to_string(),
            EventPayload::RobotConfigDeleted { .. } => "robot.config.deleted".to_string(),
            EventPayload::ExecStarted { .. } => "robot.exec.started".to_string(),
            EventPayload::ExecCompleted { .. } => "robot.exec.completed".to_string(),
            EventPayload::ExecFailed { .. } => "robot.exec.failed".to_string(),
            EventPayload::ExecCancelled { .. } => "robot.exec.cancelled".to_string(),
            EventPayload::ExecWaiting { .. } => "robot.exec.waiting".to_string(),
            EventPayload::ExecResumed { .. } => "robot.exec.resumed".to_string(),
            EventPayload::TaskCompleted { .. } => "robot.task.completed".to_string(),
            EventPayload::TaskFailed { .. } => "robot.task.failed".to_string(),
            EventPayload::Delivery { .. } => "robot.delivery".to_string(),
            EventPayload::Message { .. } => "robot.message".to_string(),
            EventPayload::IntegrationWebhook { provider, .. } => format!("integration.webhook.{provider}"),
        }
    }
}
