//! Robot - the persistent identity of a long-lived agent.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::execution::ExecutionStatus;
use super::phase::Phase;

/// Runtime status of a robot, derived from whether it has any running
/// executions (`Status = Working ⇔ RunningCount > 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    #[default]
    Idle,
    Working,
}

/// Per-robot concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub max: usize,
    pub queue: usize,
    pub priority: i32,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            max: 2,
            queue: 8,
            priority: 0,
        }
    }
}

/// Role/duties/rules governing a robot's behavior; opaque free text passed
/// through to prompt construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    pub role: String,
    pub duties: Vec<String>,
    pub rules: Vec<String>,
}

/// Toggles governing which trigger sources may create executions for this
/// robot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Triggers {
    pub clock_enabled: bool,
    pub clock_cron: Option<String>,
    pub intervene_enabled: bool,
    pub event_enabled: bool,
}

/// Human-facing delivery routing preferences (email/webhook/process).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryPreferences {
    pub channel: Option<String>,
    pub target: Option<String>,
}

/// Per-integration credentials/config, keyed by channel name
/// (e.g. "telegram", "discord").
pub type Integrations = HashMap<String, HashMap<String, String>>;

/// Static configuration for a robot: identity, quota, trigger switches,
/// phase-to-assistant resource mapping, delegate agents, delivery
/// preferences, and integration credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    pub identity: Identity,
    pub quota: Quota,
    pub triggers: Triggers,
    pub resources: HashMap<Phase, String>,
    pub agents: Vec<String>,
    pub delivery: DeliveryPreferences,
    pub integrations: Integrations,
    /// Assistant id for the Host Agent used by HostMediator. `None` means
    /// this robot has no Host Agent configured (fallback routing applies).
    pub host_agent_id: Option<String>,
    /// Whether the Run phase keeps going past a task that reports
    /// `Success == false`. When `false`, the remaining tasks are marked
    /// Skipped and the execution ends Failed at that task.
    pub continue_on_failure: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            quota: Quota::default(),
            triggers: Triggers::default(),
            resources: HashMap::default(),
            agents: Vec::default(),
            delivery: DeliveryPreferences::default(),
            integrations: Integrations::default(),
            host_agent_id: None,
            continue_on_failure: true,
        }
    }
}

impl Quota {
    pub fn max_or_default(&self) -> usize {
        if self.max == 0 { 2 } else { self.max }
    }
}

#[derive(Debug, Default)]
struct RobotRuntime {
    status: RobotStatus,
    /// ExecID -> status, for every execution currently holding a slot
    /// (Running or Waiting; Waiting keeps its slot per the Pool contract).
    executions: HashMap<String, ExecutionStatus>,
}

/// Semantic identity of a long-lived agent, serializable config plus a
/// mutex-guarded slot-accounting runtime.
///
/// `Robot` intentionally does **not** own `Execution` values — only their
/// ids and statuses, for quota accounting. `Execution` data lives in the
/// worker task that drives it and is persisted via `ExecutionStore`; this
/// avoids the cyclic Execution-holds-a-Robot-pointer pattern the pipeline
/// this is distilled from used, per the documented redesign.
#[derive(Debug)]
pub struct Robot {
    pub member_id: String,
    pub team_id: String,
    pub display_name: String,
    pub system_prompt: String,
    pub language_model: String,
    pub config: RobotConfig,
    runtime: Mutex<RobotRuntime>,
}

impl Robot {
    pub fn new(
        member_id: impl Into<String>,
        team_id: impl Into<String>,
        display_name: impl Into<String>,
        system_prompt: impl Into<String>,
        language_model: impl Into<String>,
        config: RobotConfig,
    ) -> Self {
        Self {
            member_id: member_id.into(),
            team_id: team_id.into(),
            display_name: display_name.into(),
            system_prompt: system_prompt.into(),
            language_model: language_model.into(),
            config,
            runtime: Mutex::new(RobotRuntime::default()),
        }
    }

    pub fn status(&self) -> RobotStatus {
        self.runtime.lock().unwrap().status
    }

    fn max_quota_inner(&self) -> usize {
        self.config.quota.max_or_default()
    }

    pub fn max_quota(&self) -> usize {
        self.max_quota_inner()
    }

    /// Number of executions currently holding a slot (Running + Waiting).
    pub fn active_count(&self) -> usize {
        self.runtime.lock().unwrap().executions.len()
    }

    pub fn running_count(&self) -> usize {
        self.runtime
            .lock()
            .unwrap()
            .executions
            .values()
            .filter(|s| **s == ExecutionStatus::Running)
            .count()
    }

    pub fn waiting_count(&self) -> usize {
        self.runtime
            .lock()
            .unwrap()
            .executions
            .values()
            .filter(|s| **s == ExecutionStatus::Waiting)
            .count()
    }

    /// Try to reserve a slot for `exec_id`. Returns `false` (no mutation) if
    /// the robot is already at `ActiveCount == MaxQuota`.
    pub fn try_acquire_slot(&self, exec_id: &str) -> bool {
        let mut runtime = self.runtime.lock().unwrap();
        if runtime.executions.len() >= self.max_quota_inner() {
            debug!(exec_id, member_id = %self.member_id, "Robot::try_acquire_slot: quota exhausted");
            return false;
        }
        runtime.executions.insert(exec_id.to_string(), ExecutionStatus::Running);
        runtime.status = RobotStatus::Working;
        true
    }

    /// Attach an execution to this robot without checking quota. Used by
    /// `Pool::reattach` to resume an execution that already holds its slot
    /// (a `Waiting` execution woken by skip or injected context), where
    /// re-running the quota check would reject it against its own slot.
    pub fn add_execution(&self, exec_id: &str, status: ExecutionStatus) {
        let mut runtime = self.runtime.lock().unwrap();
        runtime.executions.insert(exec_id.to_string(), status);
        Self::sync_status(&mut runtime);
    }

    pub fn update_execution_status(&self, exec_id: &str, status: ExecutionStatus) {
        let mut runtime = self.runtime.lock().unwrap();
        if let Some(slot) = runtime.executions.get_mut(exec_id) {
            *slot = status;
        }
        Self::sync_status(&mut runtime);
    }

    pub fn remove_execution(&self, exec_id: &str) {
        let mut runtime = self.runtime.lock().unwrap();
        runtime.executions.remove(exec_id);
        Self::sync_status(&mut runtime);
    }

    fn sync_status(runtime: &mut RobotRuntime) {
        let running = runtime.executions.values().filter(|s| **s == ExecutionStatus::Running).count();
        runtime.status = if running > 0 { RobotStatus::Working } else { RobotStatus::Idle };
    }
}

/// Serializable snapshot of a robot's persistent identity, as written to
/// `RobotStore`. Concurrency runtime state (slot accounting) is never
/// persisted; it is rebuilt in memory by `RobotCache` the first time a
/// robot is loaded in a given process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotRecord {
    pub member_id: String,
    pub team_id: String,
    pub display_name: String,
    pub system_prompt: String,
    pub language_model: String,
    pub config: RobotConfig,
    pub updated_at: i64,
}

impl robotstore::Record for RobotRecord {
    fn id(&self) -> &str {
        &self.member_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "robots"
    }
}

impl From<&Robot> for RobotRecord {
    fn from(robot: &Robot) -> Self {
        Self {
            member_id: robot.member_id.clone(),
            team_id: robot.team_id.clone(),
            display_name: robot.display_name.clone(),
            system_prompt: robot.system_prompt.clone(),
            language_model: robot.language_model.clone(),
            config: robot.config.clone(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl From<RobotRecord> for Robot {
    fn from(record: RobotRecord) -> Self {
        Robot::new(
            record.member_id,
            record.team_id,
            record.display_name,
            record.system_prompt,
            record.language_model,
            record.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_robot(max: usize) -> Robot {
        Robot::new(
            "member-1",
            "team-1",
            "Test Robot",
            "You are a test robot",
            "gpt",
            RobotConfig {
                quota: Quota { max, queue: 4, priority: 0 },
                ..Default::default()
            },
        )
    }

    #[test]
    fn try_acquire_slot_respects_max_quota() {
        let robot = test_robot(2);
        assert!(robot.try_acquire_slot("e1"));
        assert!(robot.try_acquire_slot("e2"));
        assert!(!robot.try_acquire_slot("e3"));
        assert_eq!(robot.active_count(), 2);
    }

    #[test]
    fn status_is_working_iff_running_count_positive() {
        let robot = test_robot(2);
        assert_eq!(robot.status(), RobotStatus::Idle);
        robot.try_acquire_slot("e1");
        assert_eq!(robot.status(), RobotStatus::Working);
        robot.remove_execution("e1");
        assert_eq!(robot.status(), RobotStatus::Idle);
    }

    #[test]
    fn waiting_execution_still_holds_slot() {
        let robot = test_robot(1);
        assert!(robot.try_acquire_slot("e1"));
        robot.update_execution_status("e1", ExecutionStatus::Waiting);
        assert_eq!(robot.active_count(), 1);
        assert_eq!(robot.waiting_count(), 1);
        assert_eq!(robot.running_count(), 0);
        // status becomes Idle because no execution is Running, even though a slot is held
        assert_eq!(robot.status(), RobotStatus::Idle);
        assert!(!robot.try_acquire_slot("e2"));
    }

    #[test]
    fn remove_execution_frees_slot() {
        let robot = test_robot(1);
        robot.try_acquire_slot("e1");
        robot.remove_execution("e1");
        assert_eq!(robot.active_count(), 0);
        assert!(robot.try_acquire_slot("e2"));
    }

    #[test]
    fn default_quota_is_two_when_zero() {
        let robot = test_robot(0);
        assert_eq!(robot.max_quota(), 2);
    }
}
