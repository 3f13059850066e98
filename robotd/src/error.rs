//! The orchestrator's typed error vocabulary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("robot {member_id} is at quota ({max} active executions)")]
    QuotaExceeded { member_id: String, max: usize },

    #[error("robot {0} not found")]
    RobotNotFound(String),

    #[error("execution {0} not found")]
    ExecutionNotFound(String),

    #[error("execution {exec_id} is suspended at task {task_index} awaiting: {question}")]
    Suspended { exec_id: String, task_index: usize, question: String },

    #[error("execution {0} was cancelled")]
    Cancelled(String),

    #[error("phase failed: {0}")]
    PhaseFailure(String),

    #[error("task failed: {0}")]
    TaskFailure(String),

    #[error(transparent)]
    Store(#[from] robotstore::StoreError),

    #[error("invalid state: {0}")]
    InvalidState(String),
}
