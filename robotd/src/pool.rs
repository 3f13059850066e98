//! Bounded worker pool: one global concurrency limit plus a per-robot FIFO
//! queue and quota gate, handing each accepted execution to exactly one
//! worker task.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use crate::controller::{ExecutionController, ExecutionHandle};
use crate::domain::{ExecutionStatus, Robot, TriggerType};
use crate::error::EngineError;

struct QueuedSubmission {
    exec_id: String,
    trigger: TriggerType,
}

#[derive(Default)]
struct RobotQueues {
    queues: std::sync::Mutex<HashMap<String, VecDeque<QueuedSubmission>>>,
}

impl RobotQueues {
    fn push(&self, member_id: &str, item: QueuedSubmission) {
        self.queues.lock().unwrap().entry(member_id.to_string()).or_default().push_back(item);
    }

    fn pop(&self, member_id: &str) -> Option<QueuedSubmission> {
        self.queues.lock().unwrap().get_mut(member_id).and_then(|q| q.pop_front())
    }

    fn len(&self, member_id: &str) -> usize {
        self.queues.lock().unwrap().get(member_id).map(VecDeque::len).unwrap_or(0)
    }
}

/// What a worker does with the execution id it was handed: load or build
/// the `Execution` (a reused id from `submit_with_id` already has state in
/// the store; a fresh one doesn't), drive it to a stopping point (terminal,
/// or suspended waiting for human input), and report back which. The pool
/// stays agnostic to phase-running and persistence logic — it only knows
/// about ids, quotas, and slots; `run_fn` is supplied by `Manager`, wired to
/// `PhaseRunner::run`/`PhaseRunner::resume`.
pub type WorkerFn = Arc<dyn Fn(Arc<Robot>, String, TriggerType, ExecutionHandle) -> WorkerFuture + Send + Sync>;
pub type WorkerFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ExecutionStatus> + Send>>;

pub struct Pool {
    semaphore: Arc<Semaphore>,
    controller: Arc<ExecutionController>,
    queues: Arc<RobotQueues>,
    run_fn: WorkerFn,
}

impl Pool {
    pub fn new(global_concurrency: usize, controller: Arc<ExecutionController>, run_fn: WorkerFn) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(global_concurrency)),
            controller,
            queues: Arc::new(RobotQueues::default()),
            run_fn,
        }
    }

    pub fn new_exec_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Submit a new execution for `robot`. Returns the assigned exec id;
    /// errors with `QuotaExceeded` only when both the quota and the
    /// robot's queue are full.
    pub async fn submit(&self, robot: Arc<Robot>, trigger: TriggerType) -> Result<String, EngineError> {
        let exec_id = Self::new_exec_id();
        self.submit_with_id(robot, trigger, exec_id).await
    }

    /// Submit reusing an existing execution id, quota-checked as if it were
    /// brand new — used by `HostMediator`'s confirm path, which turns a
    /// `Confirming` execution into its first `Running` attempt and so must
    /// still compete for a slot like any other submission.
    pub async fn submit_with_id(&self, robot: Arc<Robot>, trigger: TriggerType, exec_id: String) -> Result<String, EngineError> {
        if robot.try_acquire_slot(&exec_id) {
            self.spawn_worker(robot, trigger, exec_id.clone());
            return Ok(exec_id);
        }

        if self.queues.len(&robot.member_id) >= robot.config.quota.queue {
            return Err(EngineError::QuotaExceeded { member_id: robot.member_id.clone(), max: robot.max_quota() });
        }
        self.queues.push(&robot.member_id, QueuedSubmission { exec_id: exec_id.clone(), trigger });
        debug!(member_id = %robot.member_id, exec_id, "Pool::submit_with_id: queued, robot at quota");
        Ok(exec_id)
    }

    /// Resume an execution that already holds its slot (a `Waiting`
    /// execution being woken by skip or injected context). Bypasses the
    /// quota check entirely — re-checking it would always pass for the
    /// execution's own slot, and would wrongly reject it the moment that
    /// slot is the one saturating the quota.
    pub fn reattach(&self, robot: Arc<Robot>, trigger: TriggerType, exec_id: String) {
        robot.add_execution(&exec_id, ExecutionStatus::Running);
        self.spawn_worker(robot, trigger, exec_id);
    }

    fn spawn_worker(&self, robot: Arc<Robot>, trigger: TriggerType, exec_id: String) {
        let handle = self.controller.track(&exec_id);
        let controller = self.controller.clone();
        let semaphore = self.semaphore.clone();
        let queues = self.queues.clone();
        let run_fn = self.run_fn.clone();
        let pool_for_drain = PoolDrainHandle { semaphore: semaphore.clone(), controller: controller.clone(), queues: queues.clone(), run_fn: run_fn.clone() };

        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await.expect("semaphore never closed");

            let final_status = (run_fn)(robot.clone(), exec_id.clone(), trigger, handle).await;
            drop(permit);

            if final_status == ExecutionStatus::Waiting {
                // Slot stays attached to the robot; HostMediator/Manager will
                // submit_with_id the same exec_id again on resume. The
                // controller keeps tracking it too, so Cancel still works.
                robot.update_execution_status(&exec_id, ExecutionStatus::Waiting);
            } else {
                controller.untrack(&exec_id);
                robot.remove_execution(&exec_id);
            }

            pool_for_drain.drain_next(&robot).await;
        });
    }

    pub fn queue_size(&self, member_id: &str) -> usize {
        self.queues.len(member_id)
    }

    pub fn active_count(&self) -> usize {
        self.controller.tracked_count()
    }
}

/// A pool-shaped handle held by a worker so it can hand the robot's next
/// queued submission to a fresh worker once its own slot frees up,
/// without re-entering `Pool::submit_with_id` (which would deadlock if the
/// pool itself were mid-shutdown).
struct PoolDrainHandle {
    semaphore: Arc<Semaphore>,
    controller: Arc<ExecutionController>,
    queues: Arc<RobotQueues>,
    run_fn: WorkerFn,
}

impl PoolDrainHandle {
    async fn drain_next(&self, robot: &Arc<Robot>) {
        if robot.active_count() >= robot.max_quota() {
            return;
        }
        let Some(next) = self.queues.pop(&robot.member_id) else {
            return;
        };
        if !robot.try_acquire_slot(&next.exec_id) {
            // Lost the race to another drain; put it back at the front.
            self.queues.push(&robot.member_id, QueuedSubmission { exec_id: next.exec_id, trigger: next.trigger });
            return;
        }

        let pool = Pool {
            semaphore: self.semaphore.clone(),
            controller: self.controller.clone(),
            queues: self.queues.clone(),
            run_fn: self.run_fn.clone(),
        };
        pool.spawn_worker(robot.clone(), next.trigger, next.exec_id);
    }
}
