//! Public facade: wires `RobotCache`/`ExecutionController`/`Pool`/
//! `PhaseRunner`/`HostMediator` into one owned unit and exposes the
//! external surface (`trigger`, `interact`, `cancel_execution`) plus the
//! process-lifetime background tasks (`robot.config.*` cache sync, one
//! clock ticker per robot with `Triggers.clock_enabled`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::ExecutionController;
use crate::domain::{Execution, ExecutionStatus, GoalsContent, Phase, ResumeContext, TriggerType};
use crate::error::EngineError;
use crate::events::{Event, EventBus, EventPayload};
use crate::host_mediator::{HostMediator, InteractRequest, InteractResponse};
use crate::llm::LlmClient;
use crate::phase_runner::PhaseRunner;
use crate::pool::{Pool, WorkerFn};
use crate::robot_cache::RobotCache;
use crate::store::{ExecutionStore, RobotStore};
use crate::task_runner::TaskRunner;

/// Fallback cadence used when a robot's `Triggers.clock_cron` is absent or
/// not a plain integer. The workspace's dependency set has no cron-grammar
/// parser anywhere in it, so the clock ticker reads `clock_cron` as a
/// plain "run every N seconds" integer instead of a real cron expression —
/// a deliberate simplification, not an oversight.
pub const DEFAULT_CLOCK_FALLBACK_SECS: u64 = 3600;

fn clock_period(clock_cron: &Option<String>, fallback_secs: u64) -> Duration {
    clock_cron
        .as_deref()
        .and_then(|text| text.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(fallback_secs))
}

/// Bridges `Pool`'s untyped worker contract to `PhaseRunner::run`/`resume`.
/// A reloaded execution's `phase` alone tells us which to call: `Run` is
/// only ever reached by `advance_to` inside the pipeline's own drive loop,
/// so a freshly created or freshly confirmed execution is always still at
/// `Inspiration` here, while one bounced back from `Waiting` (skip/inject
/// context/resume) keeps the `Run` phase it suspended at. The resume index
/// is recovered from `results.len()`, which always equals the task index
/// by construction (`run_run_phase` pushes a result for every task it
/// advances past, skip included).
fn build_run_fn(store: Arc<ExecutionStore>, phase_runner: Arc<PhaseRunner>) -> WorkerFn {
    Arc::new(move |robot, exec_id, trigger, handle| {
        let store = store.clone();
        let phase_runner = phase_runner.clone();
        Box::pin(async move {
            let exec = match store.get(&exec_id) {
                Ok(Some(exec)) => exec,
                Ok(None) => Execution::new(exec_id.clone(), &robot.member_id, &robot.team_id, trigger),
                Err(e) => {
                    warn!(exec_id, error = %e, "Manager::run_fn: failed to load execution, treating as fresh");
                    Execution::new(exec_id.clone(), &robot.member_id, &robot.team_id, trigger)
                }
            };

            if exec.phase == Phase::Run {
                let resume = ResumeContext { task_index: exec.results.len(), previous_results: exec.results.clone() };
                phase_runner.resume(robot, exec, handle, resume).await
            } else {
                phase_runner.run(robot, exec, handle).await
            }
        })
    })
}

/// Public facade over the whole engine. Construct with [`Manager::start`],
/// release its background tasks with [`Manager::stop`].
pub struct Manager {
    store: Arc<ExecutionStore>,
    robot_store: Arc<RobotStore>,
    robots: Arc<RobotCache>,
    pool: Arc<Pool>,
    controller: Arc<ExecutionController>,
    bus: Arc<EventBus>,
    host_mediator: Arc<HostMediator>,
    clock_fallback_secs: u64,
    cache_subscription: Mutex<Option<(u64, JoinHandle<()>)>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    /// Build every owned component, subscribe the cache to config events,
    /// and spawn one clock ticker per robot currently configured with
    /// `Triggers.clock_enabled`.
    pub async fn start(
        store: Arc<ExecutionStore>,
        robot_store: Arc<RobotStore>,
        llm: Arc<dyn LlmClient>,
        task_runner: Arc<TaskRunner>,
        global_concurrency: usize,
        clock_fallback_secs: u64,
    ) -> Result<Arc<Manager>, EngineError> {
        let robots = RobotCache::load_all(robot_store.clone()).await?;
        let controller = Arc::new(ExecutionController::new());
        let bus = Arc::new(EventBus::new());
        let phase_runner = Arc::new(PhaseRunner::new(store.clone(), bus.clone(), task_runner, llm.clone()));
        let pool = Arc::new(Pool::new(global_concurrency, controller.clone(), build_run_fn(store.clone(), phase_runner)));
        let host_mediator = Arc::new(HostMediator::new(store.clone(), robots.clone(), pool.clone(), controller.clone(), bus.clone(), llm));

        let cache_subscription = robots.subscribe(&bus);

        let manager = Arc::new(Manager {
            store,
            robot_store: robot_store.clone(),
            robots: robots.clone(),
            pool: pool.clone(),
            controller,
            bus,
            host_mediator,
            clock_fallback_secs,
            cache_subscription: Mutex::new(Some(cache_subscription)),
            tickers: Mutex::new(Vec::new()),
        });

        let mut tickers = Vec::new();
        for record in robot_store.list_all() {
            if record.config.triggers.clock_enabled {
                tickers.push(manager.spawn_clock_ticker(record.member_id));
            }
        }
        *manager.tickers.lock().unwrap() = tickers;

        Ok(manager)
    }

    fn spawn_clock_ticker(&self, member_id: String) -> JoinHandle<()> {
        let robots = self.robots.clone();
        let pool = self.pool.clone();
        let store = self.store.clone();
        let fallback_secs = self.clock_fallback_secs;
        tokio::spawn(async move {
            loop {
                let period = match robots.get(&member_id).await {
                    Ok(robot) => clock_period(&robot.config.triggers.clock_cron, fallback_secs),
                    Err(_) => return, // robot deleted; stop ticking rather than tick forever for nothing
                };
                tokio::time::sleep(period).await;

                let robot = match robots.get(&member_id).await {
                    Ok(robot) => robot,
                    Err(_) => return,
                };
                if !robot.config.triggers.clock_enabled {
                    continue;
                }

                let exec_id = Pool::new_exec_id();
                let exec = Execution::new(exec_id.clone(), &robot.member_id, &robot.team_id, TriggerType::Clock);
                if let Err(e) = store.save(&exec) {
                    warn!(member_id = %member_id, error = %e, "clock ticker: failed to persist new execution");
                    continue;
                }
                if let Err(e) = pool.submit_with_id(robot, TriggerType::Clock, exec_id).await {
                    debug!(member_id = %member_id, error = %e, "clock ticker: submit rejected");
                }
            }
        })
    }

    /// Unsubscribe the cache, abort every clock ticker, and cancel every
    /// execution still tracked by the controller.
    pub async fn stop(&self) {
        if let Some((id, handle)) = self.cache_subscription.lock().unwrap().take() {
            self.bus.unsubscribe(id);
            handle.abort();
        }
        for handle in self.tickers.lock().unwrap().drain(..) {
            handle.abort();
        }
        for exec_id in self.store.list(&Default::default()).into_iter().filter(|e| !e.is_terminal()).map(|e| e.id) {
            self.controller.untrack(&exec_id);
        }
    }

    /// Resolve the robot, persist a new execution, and submit it to the
    /// pool. `data["goals"]`/`data["chat_id"]` are honored only for
    /// `Human` triggers, short-circuiting the Goals phase with a
    /// pre-confirmed draft.
    pub async fn trigger(&self, member_id: &str, trigger: TriggerType, data: HashMap<String, Value>) -> Result<String, EngineError> {
        let robot = self.robots.get(member_id).await?;
        let exec_id = Pool::new_exec_id();
        let mut exec = Execution::new(exec_id.clone(), &robot.member_id, &robot.team_id, trigger.clone());

        if matches!(trigger, TriggerType::Human { .. }) {
            if let Some(goals) = data.get("goals").and_then(Value::as_str) {
                exec.goals = Some(GoalsContent { content: goals.to_string() });
            }
            if let Some(chat_id) = data.get("chat_id").and_then(Value::as_str) {
                exec.chat_id = chat_id.to_string();
            }
        }

        self.store.save(&exec)?;
        self.pool.submit_with_id(robot, trigger, exec_id).await
    }

    /// Route a human interaction to the `HostMediator`.
    pub async fn interact(&self, req: InteractRequest) -> Result<InteractResponse, EngineError> {
        self.host_mediator.interact(req).await
    }

    /// Streaming counterpart of `interact`, for a caller that wants the
    /// Host Agent's reply as it's generated rather than in one shot.
    pub async fn interact_streaming(
        &self,
        req: InteractRequest,
        chunk_tx: tokio::sync::mpsc::Sender<crate::host_mediator::InteractChunk>,
    ) -> Result<InteractResponse, EngineError> {
        self.host_mediator.interact_streaming(req, chunk_tx).await
    }

    /// Cancel an execution directly, independent of `HostMediator`'s
    /// narrower Cancel action (which only accepts `Waiting`/`Confirming`).
    /// A `Running`/`Pending`/`Paused` execution is cancelled cooperatively:
    /// its owning worker observes the cancelled controller handle at its
    /// next checkpoint and writes the terminal status itself.
    pub async fn cancel_execution(&self, exec_id: &str) -> Result<(), EngineError> {
        let exec = self.store.get(exec_id)?.ok_or_else(|| EngineError::ExecutionNotFound(exec_id.to_string()))?;
        if exec.is_terminal() {
            return Err(EngineError::InvalidState(format!("execution {exec_id} is already terminal")));
        }

        if matches!(exec.status, ExecutionStatus::Waiting | ExecutionStatus::Confirming) {
            self.store.update_status(exec_id, ExecutionStatus::Cancelled, Some("cancelled by user".to_string()))?;
            self.controller.untrack(exec_id);
            if let Ok(robot) = self.robots.get(&exec.member_id).await {
                robot.remove_execution(exec_id);
            }
            self.bus.push(Event::new(
                "robot.exec.cancelled",
                EventPayload::ExecCancelled { exec_id: exec_id.to_string(), member_id: exec.member_id.clone() },
            ));
        } else {
            self.controller.untrack(exec_id);
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    pub fn ticker_count(&self) -> usize {
        self.tickers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionStatus, RobotConfig, RobotRecord, Triggers};
    use crate::host_mediator::InteractStatus;
    use crate::llm::{CompletionResponse, MockLlmClient, StopReason, TokenUsage};
    use std::time::Duration as StdDuration;

    fn canned(text: &str) -> CompletionResponse {
        CompletionResponse { content: text.to_string(), stop_reason: StopReason::EndTurn, usage: TokenUsage::default() }
    }

    fn robot_record(member_id: &str, config: RobotConfig) -> RobotRecord {
        RobotRecord {
            member_id: member_id.to_string(),
            team_id: "t1".to_string(),
            display_name: "Bot".to_string(),
            system_prompt: "You are a bot".to_string(),
            language_model: "gpt".to_string(),
            config,
            updated_at: 0,
        }
    }

    async fn manager_with(
        member_id: &str,
        config: RobotConfig,
        responses: Vec<CompletionResponse>,
    ) -> (Arc<Manager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let robot_store = Arc::new(RobotStore::open(dir.path().join("robots")).unwrap());
        robot_store.save(&robot_record(member_id, config)).unwrap();
        let exec_store = Arc::new(ExecutionStore::open(dir.path().join("execs")).unwrap());
        let llm = Arc::new(MockLlmClient::new(responses));
        let task_runner = Arc::new(TaskRunner::new(llm.clone()));

        let manager = Manager::start(exec_store, robot_store, llm, task_runner, 8, DEFAULT_CLOCK_FALLBACK_SECS).await.unwrap();
        (manager, dir)
    }

    #[test]
    fn clock_period_parses_a_plain_integer_cadence() {
        assert_eq!(clock_period(&Some("30".to_string()), 999), Duration::from_secs(30));
    }

    #[test]
    fn clock_period_falls_back_when_unparseable_or_absent() {
        assert_eq!(clock_period(&None, 45), Duration::from_secs(45));
        assert_eq!(clock_period(&Some("every hour".to_string()), 45), Duration::from_secs(45));
        assert_eq!(clock_period(&Some("0".to_string()), 45), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn trigger_runs_a_clock_execution_to_completion() {
        let responses = vec![canned("inspired"), canned("goals text"), canned("[]"), canned("delivered"), canned("learned")];
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), responses).await;

        let exec_id = manager.trigger("m1", TriggerType::Clock, HashMap::new()).await.unwrap();

        let mut exec = None;
        for _ in 0..50 {
            let found = manager.store.get(&exec_id).unwrap().unwrap();
            if found.is_terminal() {
                exec = Some(found);
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        let exec = exec.expect("execution reached a terminal state");
        assert_eq!(exec.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn human_trigger_honors_pre_confirmed_goals() {
        let responses = vec![canned("[]"), canned("delivered"), canned("learned")];
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), responses).await;

        let mut data = HashMap::new();
        data.insert("goals".to_string(), Value::String("ship the release".to_string()));
        let exec_id = manager.trigger("m1", TriggerType::Human { operator: "alice".to_string() }, data).await.unwrap();

        for _ in 0..50 {
            let found = manager.store.get(&exec_id).unwrap().unwrap();
            if found.is_terminal() {
                assert_eq!(found.goals.unwrap().content, "ship the release");
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        panic!("execution never reached a terminal state");
    }

    #[tokio::test]
    async fn cancel_execution_on_a_waiting_execution_transitions_to_cancelled() {
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), vec![]).await;
        let mut exec = Execution::new("e1", "m1", "t1", TriggerType::Clock);
        exec.status = ExecutionStatus::Waiting;
        manager.store.save(&exec).unwrap();

        manager.cancel_execution("e1").await.unwrap();
        let after = manager.store.get("e1").unwrap().unwrap();
        assert_eq!(after.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_execution_on_a_terminal_execution_is_rejected() {
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), vec![]).await;
        let mut exec = Execution::new("e1", "m1", "t1", TriggerType::Clock);
        exec.status = ExecutionStatus::Completed;
        manager.store.save(&exec).unwrap();

        assert!(manager.cancel_execution("e1").await.is_err());
    }

    #[tokio::test]
    async fn cancel_execution_on_a_running_execution_untracks_the_handle() {
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), vec![]).await;
        let mut exec = Execution::new("e1", "m1", "t1", TriggerType::Clock);
        exec.status = ExecutionStatus::Running;
        manager.store.save(&exec).unwrap();
        let handle = manager.controller.track("e1");

        manager.cancel_execution("e1").await.unwrap();
        assert!(handle.is_cancelled());
        // Status is left for the (here, nonexistent) worker to write; the
        // store row is untouched by a cooperative cancel.
        assert_eq!(manager.store.get("e1").unwrap().unwrap().status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn interact_delegates_to_host_mediator() {
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), vec![]).await;
        let req = InteractRequest {
            member_id: "m1".to_string(),
            execution_id: None,
            task_id: None,
            source: "ui".to_string(),
            message: "please ship it".to_string(),
            action: None,
        };
        let response = manager.interact(req).await.unwrap();
        assert_eq!(response.status, InteractStatus::Confirmed);
    }

    #[tokio::test]
    async fn start_spawns_one_ticker_per_clock_enabled_robot() {
        let dir = tempfile::tempdir().unwrap();
        let robot_store = Arc::new(RobotStore::open(dir.path().join("robots")).unwrap());
        let mut enabled = RobotConfig::default();
        enabled.triggers = Triggers { clock_enabled: true, clock_cron: Some("3600".to_string()), intervene_enabled: false, event_enabled: false };
        robot_store.save(&robot_record("ticking", enabled)).unwrap();
        robot_store.save(&robot_record("idle", RobotConfig::default())).unwrap();

        let exec_store = Arc::new(ExecutionStore::open(dir.path().join("execs")).unwrap());
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let task_runner = Arc::new(TaskRunner::new(llm.clone()));
        let manager = Manager::start(exec_store, robot_store, llm, task_runner, 8, DEFAULT_CLOCK_FALLBACK_SECS).await.unwrap();

        assert_eq!(manager.ticker_count(), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn stop_aborts_tickers_and_unsubscribes_the_cache() {
        let (manager, _dir) = manager_with("m1", RobotConfig::default(), vec![]).await;
        manager.stop().await;
        assert_eq!(manager.bus.subscriber_count(), 0);
    }
}
