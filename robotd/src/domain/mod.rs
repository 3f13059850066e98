//! Core domain types: the persistent `Robot` identity, one `Execution` of
//! its pipeline, the `Phase` ordering, `Task`/`TaskResult`, and the
//! `HostAction` vocabulary produced by human interaction.

mod execution;
mod host_action;
mod phase;
mod robot;
mod task;

pub use execution::{DeliveryContent, Execution, ExecutionStatus, GoalsContent, ResumeContext, TriggerType};
pub use host_action::HostAction;
pub use phase::{Phase, PIPELINE_ORDER};
pub use robot::{
    DeliveryPreferences, Identity, Integrations, Quota, Robot, RobotConfig, RobotRecord, RobotStatus, Triggers,
};
pub use task::{ExecutorType, Task, TaskResult, TaskStatus};

// Re-export robotstore types for convenience at call sites that only need
// the generic persistence primitives.
pub use robotstore::{Filter, FilterOp, IndexValue, Record, Store, StoreError};
