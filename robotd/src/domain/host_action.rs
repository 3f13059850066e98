//! Typed actions the Host Agent can classify free-text human input into.

use serde::{Deserialize, Serialize};

/// A classified human action, produced by `HostMediator` from free text and
/// routed to the appropriate effect (resume the pipeline, inject context,
/// cancel, or take no action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HostAction {
    /// Approve the pending question as-is; resume with no changes.
    Confirm,
    /// Approve, but with a modification to apply before resuming.
    Adjust { instruction: String },
    /// Add a new task to the execution's remaining task list.
    AddTask { description: String },
    /// Skip the current task and resume at the next one.
    Skip,
    /// Inject additional context without altering control flow.
    InjectCtx { context: String },
    /// Cancel the execution outright.
    Cancel,
    /// The input carried no actionable intent (e.g. small talk).
    None,
}

impl HostAction {
    pub fn label(&self) -> &'static str {
        match self {
            HostAction::Confirm => "confirm",
            HostAction::Adjust { .. } => "adjust",
            HostAction::AddTask { .. } => "add_task",
            HostAction::Skip => "skip",
            HostAction::InjectCtx { .. } => "inject_ctx",
            HostAction::Cancel => "cancel",
            HostAction::None => "none",
        }
    }
}
