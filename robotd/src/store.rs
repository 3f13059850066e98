//! Domain-specific persistence built on top of the generic `robotstore`
//! engine: atomic status/phase/suspend-state writes for `Execution`, and
//! CRUD plus filtered listing for `Robot` snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use robotstore::{Filter, IndexValue, Store};

use crate::domain::{
    DeliveryContent, Execution, ExecutionStatus, GoalsContent, Phase, ResumeContext, RobotRecord, Task, TaskResult,
    TriggerType,
};
use crate::error::EngineError;

/// Typed phase output, written atomically alongside the phase advance.
#[derive(Debug, Clone)]
pub enum PhaseOutput {
    Inspiration(String),
    Goals(GoalsContent),
    Tasks(Vec<Task>),
    Delivery(DeliveryContent),
    Learning(String),
}

/// Filters accepted by `ExecutionStore::list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub member_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub exclude_statuses: Vec<ExecutionStatus>,
}

fn status_tag(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Confirming => "confirming",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Waiting => "waiting",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

fn execution_index(exec: &Execution) -> HashMap<String, IndexValue> {
    let mut fields = HashMap::new();
    fields.insert("member_id".to_string(), IndexValue::from(exec.member_id.clone()));
    fields.insert("status".to_string(), IndexValue::from(status_tag(exec.status)));
    fields
}

/// Durable CRUD over `Execution`, with a handful of compound operations
/// that must appear atomic to concurrent readers: a reader never observes
/// a half-applied suspend (status flipped but resume context missing) or a
/// half-applied resume.
///
/// Atomicity here is achieved by serializing every read-modify-write
/// sequence behind a single mutex, rather than through per-field storage
/// writes — sufficient at the concurrency scale a single orchestrator
/// process runs at.
pub struct ExecutionStore {
    store: Store<Execution>,
    write_lock: Mutex<()>,
}

impl ExecutionStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self { store: Store::open(root)?, write_lock: Mutex::new(()) })
    }

    pub fn save(&self, exec: &Execution) -> Result<(), EngineError> {
        self.store.create(exec.clone())?;
        Ok(())
    }

    pub fn get(&self, exec_id: &str) -> Result<Option<Execution>, EngineError> {
        Ok(self.store.get(exec_id)?)
    }

    pub fn delete(&self, exec_id: &str) -> Result<(), EngineError> {
        self.store.delete(exec_id)?;
        Ok(())
    }

    fn mutate(&self, exec_id: &str, f: impl FnOnce(&mut Execution)) -> Result<Execution, EngineError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        f(&mut exec);
        self.store.update(exec.clone())?;
        Ok(exec)
    }

    pub fn update_status(&self, exec_id: &str, status: ExecutionStatus, error_text: Option<String>) -> Result<(), EngineError> {
        self.mutate(exec_id, |exec| {
            exec.status = status;
            if let Some(error) = error_text {
                exec.error = Some(error);
            }
            exec.touch();
        })?;
        Ok(())
    }

    pub fn update_phase(&self, exec_id: &str, phase: Phase, output: PhaseOutput) -> Result<(), EngineError> {
        self.mutate(exec_id, |exec| {
            match output {
                PhaseOutput::Inspiration(text) => exec.inspiration = Some(text),
                PhaseOutput::Goals(goals) => exec.goals = Some(goals),
                PhaseOutput::Tasks(tasks) => exec.tasks = tasks,
                PhaseOutput::Delivery(delivery) => exec.delivery = Some(delivery),
                PhaseOutput::Learning(text) => exec.learning = Some(text),
            }
            exec.advance_to(phase);
        })?;
        Ok(())
    }

    /// Overwrite `goals` without advancing `phase` — used by `HostMediator`'s
    /// Adjust action, which edits a Confirming execution's draft goals
    /// ahead of the pipeline ever reaching the Goals phase.
    pub fn update_goals(&self, exec_id: &str, goals: GoalsContent) -> Result<(), EngineError> {
        self.mutate(exec_id, |exec| {
            exec.goals = Some(goals);
            exec.touch();
        })?;
        Ok(())
    }

    pub fn update_tasks(&self, exec_id: &str, tasks: Vec<Task>, current_task_name: Option<String>) -> Result<(), EngineError> {
        self.mutate(exec_id, |exec| {
            exec.tasks = tasks;
            if let Some(name) = current_task_name {
                exec.current_task_name = Some(name);
            }
            exec.touch();
        })?;
        Ok(())
    }

    pub fn update_suspend_state(
        &self,
        exec_id: &str,
        waiting_task_id: impl Into<String>,
        question: impl Into<String>,
        resume: ResumeContext,
    ) -> Result<(), EngineError> {
        let waiting_task_id = waiting_task_id.into();
        let question = question.into();
        self.mutate(exec_id, |exec| {
            exec.suspend(waiting_task_id, question, resume);
        })?;
        Ok(())
    }

    pub fn update_resume_state(&self, exec_id: &str) -> Result<ResumeContext, EngineError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        if !exec.begin_confirming() {
            return Err(EngineError::InvalidState(format!("execution {exec_id} is not waiting")));
        }
        let resume = exec
            .resume_running()
            .ok_or_else(|| EngineError::InvalidState(format!("execution {exec_id} has no resume context")))?;
        self.store.update(exec)?;
        Ok(resume)
    }

    pub fn update_ui_fields(&self, exec_id: &str, name: Option<String>, current_task_name: Option<String>) -> Result<(), EngineError> {
        self.mutate(exec_id, |exec| {
            if let Some(name) = name {
                exec.name = name;
            }
            if let Some(task_name) = current_task_name {
                exec.current_task_name = Some(task_name);
            }
            exec.touch();
        })?;
        Ok(())
    }

    pub fn append_result(&self, exec_id: &str, result: TaskResult) -> Result<(), EngineError> {
        self.mutate(exec_id, |exec| {
            exec.results.push(result);
            exec.touch();
        })?;
        Ok(())
    }

    /// List executions matching `opts`, most-recently-started first.
    pub fn list(&self, opts: &ListOptions) -> Vec<Execution> {
        let mut filters = Vec::new();
        if let Some(member_id) = &opts.member_id {
            filters.push(Filter::eq("member_id", member_id.clone()));
        }
        if let Some(status) = opts.status {
            filters.push(Filter::eq("status", status_tag(status)));
        }
        let mut results: Vec<Execution> = self
            .store
            .list(&filters, execution_index)
            .into_iter()
            .filter(|exec| !opts.exclude_statuses.contains(&exec.status))
            .collect();
        results.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        results
    }
}

fn robot_index(record: &RobotRecord) -> HashMap<String, IndexValue> {
    let mut fields = HashMap::new();
    fields.insert("team_id".to_string(), IndexValue::from(record.team_id.clone()));
    fields
}

/// Durable CRUD over `RobotRecord` snapshots, backing `RobotCache`'s
/// bulk-load and load-on-miss paths.
pub struct RobotStore {
    store: Store<RobotRecord>,
}

impl RobotStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self { store: Store::open(root)? })
    }

    pub fn save(&self, record: &RobotRecord) -> Result<(), EngineError> {
        self.store.create(record.clone())?;
        Ok(())
    }

    pub fn get(&self, member_id: &str) -> Result<Option<RobotRecord>, EngineError> {
        Ok(self.store.get(member_id)?)
    }

    pub fn delete(&self, member_id: &str) -> Result<(), EngineError> {
        self.store.delete(member_id)?;
        Ok(())
    }

    pub fn list_by_team(&self, team_id: &str) -> Vec<RobotRecord> {
        self.store.list(&[Filter::eq("team_id", team_id)], robot_index)
    }

    pub fn list_all(&self) -> Vec<RobotRecord> {
        self.store.list_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RobotConfig;

    fn new_exec(id: &str, member_id: &str) -> Execution {
        Execution::new(id, member_id, "team-1", TriggerType::Clock)
    }

    #[test]
    fn save_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::open(dir.path()).unwrap();
        store.save(&new_exec("e1", "m1")).unwrap();
        let fetched = store.get("e1").unwrap().unwrap();
        assert_eq!(fetched.member_id, "m1");
    }

    #[test]
    fn update_status_sets_error_only_when_given() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::open(dir.path()).unwrap();
        store.save(&new_exec("e1", "m1")).unwrap();
        store.update_status("e1", ExecutionStatus::Failed, Some("boom".to_string())).unwrap();
        let exec = store.get("e1").unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("boom"));
    }

    #[test]
    fn suspend_then_resume_state_round_trips_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::open(dir.path()).unwrap();
        store.save(&new_exec("e1", "m1")).unwrap();
        let resume = ResumeContext { task_index: 3, previous_results: vec![] };
        store.update_suspend_state("e1", "t1", "which env?", resume).unwrap();

        let exec = store.get("e1").unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Waiting);
        assert_eq!(exec.waiting_task_id.as_deref(), Some("t1"));

        let resumed = store.update_resume_state("e1").unwrap();
        assert_eq!(resumed.task_index, 3);
        let exec = store.get("e1").unwrap().unwrap();
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.waiting_question.is_none());
    }

    #[test]
    fn list_filters_by_member_and_excludes_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::open(dir.path()).unwrap();
        store.save(&new_exec("e1", "m1")).unwrap();
        store.save(&new_exec("e2", "m1")).unwrap();
        store.save(&new_exec("e3", "m2")).unwrap();
        store.update_status("e2", ExecutionStatus::Cancelled, None).unwrap();

        let opts = ListOptions { member_id: Some("m1".to_string()), exclude_statuses: vec![ExecutionStatus::Cancelled], ..Default::default() };
        let results = store.list(&opts);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e1");
    }

    #[test]
    fn robot_store_round_trips_and_lists_by_team() {
        let dir = tempfile::tempdir().unwrap();
        let store = RobotStore::open(dir.path()).unwrap();
        let record = RobotRecord {
            member_id: "m1".to_string(),
            team_id: "t1".to_string(),
            display_name: "Bot".to_string(),
            system_prompt: "You are a bot".to_string(),
            language_model: "gpt".to_string(),
            config: RobotConfig::default(),
            updated_at: 0,
        };
        store.save(&record).unwrap();
        assert_eq!(store.get("m1").unwrap().unwrap().display_name, "Bot");
        assert_eq!(store.list_by_team("t1").len(), 1);
    }
}
