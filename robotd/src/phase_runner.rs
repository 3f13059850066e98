//! Drives one execution through the ordered phase pipeline, dispatching
//! each phase to its LLM call (or, for `Run`, the task loop) and persisting
//! phase outputs and terminal status as it goes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::ExecutionHandle;
use crate::domain::{
    DeliveryContent, Execution, ExecutionStatus, GoalsContent, Phase, ResumeContext, Robot, Task, TaskResult, TaskStatus,
    TriggerType, PIPELINE_ORDER,
};
use crate::error::EngineError;
use crate::events::{Event, EventBus, EventPayload};
use crate::llm::{CompletionRequest, LlmClient, Message};
use crate::store::{ExecutionStore, PhaseOutput};
use crate::task_runner::{TaskContext, TaskRunner};

/// Parsed shape of a Tasks-phase LLM response; falls back to a single
/// catch-all assistant task when the model doesn't return this shape.
#[derive(Debug, serde::Deserialize)]
struct TaskSpec {
    #[serde(default)]
    id: Option<String>,
    executor_type: crate::domain::ExecutorType,
    #[serde(default)]
    executor_id: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    expected_output: String,
}

pub(crate) fn parse_tasks_from(content: &str, fallback_assistant: &str) -> Vec<Task> {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            if end >= start {
                if let Ok(specs) = serde_json::from_str::<Vec<TaskSpec>>(&trimmed[start..=end]) {
                    return specs
                        .into_iter()
                        .enumerate()
                        .map(|(order, spec)| {
                            let id = spec.id.unwrap_or_else(|| format!("task-{order}"));
                            let executor_id = spec.executor_id.unwrap_or_else(|| fallback_assistant.to_string());
                            let mut task = Task::new(id, spec.executor_type, executor_id, order);
                            task.description = spec.description;
                            task.expected_output = spec.expected_output;
                            task
                        })
                        .collect();
                }
            }
        }
    }
    let mut task = Task::new("task-0", crate::domain::ExecutorType::Assistant, fallback_assistant, 0);
    task.description = trimmed.to_string();
    vec![task]
}

/// Drives a single execution end to end. Shared across every worker task
/// the `Pool` spawns; holds no per-execution state itself.
pub struct PhaseRunner {
    store: Arc<ExecutionStore>,
    bus: Arc<EventBus>,
    task_runner: Arc<TaskRunner>,
    llm: Arc<dyn LlmClient>,
}

impl PhaseRunner {
    pub fn new(store: Arc<ExecutionStore>, bus: Arc<EventBus>, task_runner: Arc<TaskRunner>, llm: Arc<dyn LlmClient>) -> Self {
        Self { store, bus, task_runner, llm }
    }

    fn publish(&self, payload: EventPayload) {
        let topic = payload.default_topic();
        self.bus.push(Event::new(topic, payload));
    }

    fn system_prompt_for(&self, robot: &Robot, phase: Phase) -> String {
        match robot.config.resources.get(&phase) {
            Some(resource) => format!("{}\n\n(acting as resource: {resource})", robot.system_prompt),
            None => robot.system_prompt.clone(),
        }
    }

    async fn call_phase(&self, robot: &Robot, phase: Phase, user_prompt: String) -> Result<String, EngineError> {
        let request = CompletionRequest {
            system_prompt: self.system_prompt_for(robot, phase),
            messages: vec![Message::user(user_prompt)],
            max_tokens: 4096,
        };
        let response = self.llm.complete(request).await.map_err(|e| EngineError::PhaseFailure(e.to_string()))?;
        Ok(response.content)
    }

    /// Run a freshly submitted execution starting from its computed
    /// starting phase. Returns the execution's final status.
    pub async fn run(&self, robot: Arc<Robot>, mut exec: Execution, handle: ExecutionHandle) -> ExecutionStatus {
        exec.start();
        if let Err(e) = self.store.save(&exec) {
            warn!(exec_id = %exec.id, error = %e, "PhaseRunner::run: failed to persist initial execution");
        }
        self.publish(EventPayload::ExecStarted { exec_id: exec.id.clone(), member_id: exec.member_id.clone() });

        let start_phase = match &exec.trigger {
            TriggerType::Clock => Phase::Inspiration,
            TriggerType::Human { .. } | TriggerType::Event { .. } => Phase::Goals,
        };
        self.drive(robot, exec, handle, start_phase, None).await
    }

    /// Resume a previously suspended execution at `resume.task_index`,
    /// re-entering the Run phase's task loop before continuing to
    /// Delivery/Learning.
    pub async fn resume(&self, robot: Arc<Robot>, exec: Execution, handle: ExecutionHandle, resume: ResumeContext) -> ExecutionStatus {
        self.publish(EventPayload::ExecResumed { exec_id: exec.id.clone(), member_id: exec.member_id.clone() });
        self.drive(robot, exec, handle, Phase::Run, Some(resume)).await
    }

    async fn drive(
        &self,
        robot: Arc<Robot>,
        mut exec: Execution,
        handle: ExecutionHandle,
        start_phase: Phase,
        mut resume: Option<ResumeContext>,
    ) -> ExecutionStatus {
        let start_index = PIPELINE_ORDER.iter().position(|p| *p == start_phase).unwrap_or(0);

        for phase in &PIPELINE_ORDER[start_index..] {
            if let Err(e) = handle.wait_if_paused().await {
                return self.finish_cancelled(&mut exec, e);
            }
            exec.advance_to(*phase);

            let outcome = match phase {
                Phase::Inspiration => self.run_inspiration(&robot, &mut exec).await,
                Phase::Goals => self.run_goals(&robot, &mut exec).await,
                Phase::Tasks => self.run_tasks(&robot, &mut exec).await,
                Phase::Run => self.run_run_phase(&robot, &mut exec, &handle, resume.take()).await,
                Phase::Delivery => self.run_delivery(&robot, &mut exec).await,
                Phase::Learning => self.run_learning(&robot, &mut exec).await,
                Phase::Host => unreachable!("Host is not a pipeline phase"),
            };

            match outcome {
                Ok(()) => continue,
                Err(PhaseOutcome::Suspended) => return ExecutionStatus::Waiting,
                Err(PhaseOutcome::Cancelled) => return self.finish_cancelled(&mut exec, EngineError::Cancelled(exec.id.clone())),
                Err(PhaseOutcome::Failed(e)) => return self.finish_failed(&mut exec, e),
            }
        }

        exec.complete();
        if let Err(e) = self.store.update_status(&exec.id, ExecutionStatus::Completed, None) {
            warn!(exec_id = %exec.id, error = %e, "PhaseRunner::drive: failed to persist completion");
        }
        self.publish(EventPayload::ExecCompleted { exec_id: exec.id.clone(), member_id: exec.member_id.clone() });
        info!(exec_id = %exec.id, "execution completed");
        ExecutionStatus::Completed
    }

    fn finish_failed(&self, exec: &mut Execution, error: EngineError) -> ExecutionStatus {
        let message = error.to_string();
        exec.fail(message.clone());
        if let Err(e) = self.store.update_status(&exec.id, ExecutionStatus::Failed, Some(message.clone())) {
            warn!(exec_id = %exec.id, error = %e, "PhaseRunner::finish_failed: failed to persist failure");
        }
        self.publish(EventPayload::ExecFailed { exec_id: exec.id.clone(), member_id: exec.member_id.clone(), error: message });
        ExecutionStatus::Failed
    }

    fn finish_cancelled(&self, exec: &mut Execution, _error: EngineError) -> ExecutionStatus {
        exec.cancel();
        exec.error = Some("execution cancelled by user".to_string());
        if let Err(e) = self.store.update_status(&exec.id, ExecutionStatus::Cancelled, exec.error.clone()) {
            warn!(exec_id = %exec.id, error = %e, "PhaseRunner::finish_cancelled: failed to persist cancellation");
        }
        self.publish(EventPayload::ExecCancelled { exec_id: exec.id.clone(), member_id: exec.member_id.clone() });
        ExecutionStatus::Cancelled
    }

    async fn run_inspiration(&self, robot: &Robot, exec: &mut Execution) -> Result<(), PhaseOutcome> {
        let prompt = format!(
            "You are robot \"{}\" ({}). Produce a short inspiration statement for your next execution given your role: {}",
            robot.display_name, robot.member_id, robot.config.identity.role
        );
        let content = self.call_phase(robot, Phase::Inspiration, prompt).await.map_err(PhaseOutcome::Failed)?;
        exec.inspiration = Some(content.clone());
        self.store
            .update_phase(&exec.id, Phase::Inspiration, PhaseOutput::Inspiration(content))
            .map_err(|e| PhaseOutcome::Failed(e))?;
        Ok(())
    }

    async fn run_goals(&self, robot: &Robot, exec: &mut Execution) -> Result<(), PhaseOutcome> {
        if exec.goals.is_some() {
            debug!(exec_id = %exec.id, "Goals phase short-circuited: pre-confirmed goals present");
            return Ok(());
        }
        let prompt = format!(
            "Given the inspiration below, state concrete goals for this execution.\n\nInspiration:\n{}",
            exec.inspiration.as_deref().unwrap_or("(none)")
        );
        let content = self.call_phase(robot, Phase::Goals, prompt).await.map_err(PhaseOutcome::Failed)?;
        let goals = GoalsContent { content };
        exec.goals = Some(goals.clone());
        self.store.update_phase(&exec.id, Phase::Goals, PhaseOutput::Goals(goals)).map_err(PhaseOutcome::Failed)?;
        Ok(())
    }

    async fn run_tasks(&self, robot: &Robot, exec: &mut Execution) -> Result<(), PhaseOutcome> {
        if !exec.tasks.is_empty() {
            debug!(exec_id = %exec.id, "Tasks phase short-circuited: tasks already populated");
            return Ok(());
        }
        let goals_text = exec.goals.as_ref().map(|g| g.content.as_str()).unwrap_or("(none)");
        let prompt = format!(
            "Break the goals below into an ordered JSON array of tasks, each with executor_type (\"assistant\", \"mcp\", or \"process\"), executor_id, description, expected_output.\n\nGoals:\n{goals_text}"
        );
        let content = self.call_phase(robot, Phase::Tasks, prompt).await.map_err(PhaseOutcome::Failed)?;
        let fallback_assistant = robot.config.resources.get(&Phase::Run).cloned().unwrap_or_else(|| "assistant-1".to_string());
        let tasks = parse_tasks_from(&content, &fallback_assistant);
        exec.tasks = tasks.clone();
        self.store.update_phase(&exec.id, Phase::Tasks, PhaseOutput::Tasks(tasks)).map_err(PhaseOutcome::Failed)?;
        Ok(())
    }

    /// Implements the task loop in full, including resume-from-index and
    /// the suspend path.
    async fn run_run_phase(
        &self,
        robot: &Robot,
        exec: &mut Execution,
        handle: &ExecutionHandle,
        resume: Option<ResumeContext>,
    ) -> Result<(), PhaseOutcome> {
        let start_idx = if let Some(resume) = resume {
            exec.results = resume.previous_results;
            resume.task_index
        } else if let Some(ctx) = exec.resume_context.take() {
            exec.results = ctx.previous_results;
            ctx.task_index
        } else {
            exec.results = Vec::new();
            0
        };

        let continue_on_failure = robot.config.continue_on_failure;
        let goals_text = exec.goals.as_ref().map(|g| g.content.clone()).unwrap_or_default();
        let system_prompt = robot.system_prompt.clone();

        for i in start_idx..exec.tasks.len() {
            handle.check_cancelled().map_err(|_| PhaseOutcome::Cancelled)?;
            handle.wait_if_paused().await.map_err(|_| PhaseOutcome::Cancelled)?;

            exec.tasks[i].status = TaskStatus::Running;
            exec.tasks[i].start_time = Some(Utc::now().timestamp_millis());
            exec.current_task_name = Some(exec.tasks[i].id.clone());
            self.store
                .update_tasks(&exec.id, exec.tasks.clone(), exec.current_task_name.clone())
                .map_err(PhaseOutcome::Failed)?;

            let ctx = TaskContext::for_task_index(&system_prompt, &goals_text, &exec.results, i);
            let result = self.task_runner.run(&exec.tasks[i], &ctx).await;

            if result.need_input {
                return self.suspend_run(exec, i, result.input_question.clone()).await;
            }

            exec.tasks[i].end_time = Some(Utc::now().timestamp_millis());
            if result.success {
                exec.tasks[i].status = TaskStatus::Completed;
                self.publish(EventPayload::TaskCompleted { exec_id: exec.id.clone(), task_id: exec.tasks[i].id.clone(), result: result.clone() });
            } else {
                exec.tasks[i].status = TaskStatus::Failed;
                self.publish(EventPayload::TaskFailed { exec_id: exec.id.clone(), task_id: exec.tasks[i].id.clone(), error: result.error.clone() });
            }

            exec.results.push(result.clone());
            self.store
                .update_tasks(&exec.id, exec.tasks.clone(), exec.current_task_name.clone())
                .map_err(PhaseOutcome::Failed)?;
            self.store.append_result(&exec.id, result.clone()).map_err(PhaseOutcome::Failed)?;

            if !result.success && !continue_on_failure {
                for task in exec.tasks.iter_mut().skip(i + 1) {
                    task.status = TaskStatus::Skipped;
                }
                self.store.update_tasks(&exec.id, exec.tasks.clone(), None).map_err(PhaseOutcome::Failed)?;
                return Err(PhaseOutcome::Failed(EngineError::TaskFailure(result.error)));
            }
        }

        exec.current_task_name = None;
        exec.resume_context = None;
        self.store.update_phase(&exec.id, Phase::Run, PhaseOutput::Tasks(exec.tasks.clone())).map_err(PhaseOutcome::Failed)?;
        Ok(())
    }

    async fn suspend_run(&self, exec: &mut Execution, task_index: usize, question: String) -> Result<(), PhaseOutcome> {
        exec.tasks[task_index].status = TaskStatus::WaitingInput;
        let resume = ResumeContext { task_index, previous_results: exec.results.clone() };
        exec.suspend(exec.tasks[task_index].id.clone(), question.clone(), resume.clone());

        self.store
            .update_tasks(&exec.id, exec.tasks.clone(), exec.current_task_name.clone())
            .map_err(PhaseOutcome::Failed)?;
        self.store
            .update_phase(&exec.id, Phase::Run, PhaseOutput::Tasks(exec.tasks.clone()))
            .map_err(PhaseOutcome::Failed)?;
        self.store
            .update_suspend_state(&exec.id, exec.tasks[task_index].id.clone(), question.clone(), resume)
            .map_err(PhaseOutcome::Failed)?;

        self.publish(EventPayload::ExecWaiting { exec_id: exec.id.clone(), member_id: exec.member_id.clone(), question });
        Err(PhaseOutcome::Suspended)
    }

    async fn run_delivery(&self, robot: &Robot, exec: &mut Execution) -> Result<(), PhaseOutcome> {
        let summary = exec
            .results
            .iter()
            .map(|r| format!("- {}: {}", r.task_id, if r.success { "ok" } else { r.error.as_str() }))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("Summarize the outcome of this execution for delivery to the human.\n\nTask results:\n{summary}");
        let content = self.call_phase(robot, Phase::Delivery, prompt).await;

        let delivery = match content {
            Ok(content) => DeliveryContent { content, success: true, request_id: Uuid::now_v7().to_string() },
            Err(e) => DeliveryContent { content: e.to_string(), success: false, request_id: Uuid::now_v7().to_string() },
        };
        exec.delivery = Some(delivery.clone());
        self.store
            .update_phase(&exec.id, Phase::Delivery, PhaseOutput::Delivery(delivery.clone()))
            .map_err(PhaseOutcome::Failed)?;
        self.publish(EventPayload::Delivery { exec_id: exec.id.clone(), member_id: exec.member_id.clone(), content: delivery.content });
        Ok(())
    }

    async fn run_learning(&self, robot: &Robot, exec: &mut Execution) -> Result<(), PhaseOutcome> {
        let prompt = format!(
            "What should be learned from this execution for next time? Delivery outcome:\n{}",
            exec.delivery.as_ref().map(|d| d.content.as_str()).unwrap_or("(none)")
        );
        let content = self.call_phase(robot, Phase::Learning, prompt).await.map_err(PhaseOutcome::Failed)?;
        exec.learning = Some(content.clone());
        self.store.update_phase(&exec.id, Phase::Learning, PhaseOutput::Learning(content)).map_err(PhaseOutcome::Failed)?;
        Ok(())
    }
}

/// Internal control-flow signal distinguishing a normal phase error from
/// the two special non-error exits a phase may take.
enum PhaseOutcome {
    Suspended,
    Cancelled,
    Failed(EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ExecutionController;
    use crate::domain::{ExecutorType, RobotConfig};
    use crate::llm::{CompletionResponse, MockLlmClient, StopReason, TokenUsage};

    fn canned(text: &str) -> CompletionResponse {
        CompletionResponse { content: text.to_string(), stop_reason: StopReason::EndTurn, usage: TokenUsage::default() }
    }

    fn test_robot() -> Arc<Robot> {
        Arc::new(Robot::new("m1", "t1", "Bot", "You are a bot", "gpt", RobotConfig::default()))
    }

    fn runner_with(responses: Vec<CompletionResponse>, store: Arc<ExecutionStore>) -> PhaseRunner {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(responses));
        let task_runner = Arc::new(TaskRunner::new(llm.clone()));
        PhaseRunner::new(store, Arc::new(EventBus::new()), task_runner, llm)
    }

    #[tokio::test]
    async fn clock_trigger_runs_full_pipeline_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ExecutionStore::open(dir.path()).unwrap());
        let responses = vec![
            canned("inspired"),                       // Inspiration
            canned("goals text"),                     // Goals
            canned("[]"),                              // Tasks (empty list -> no tasks to run)
            canned("delivered"),                       // Delivery
            canned("learned"),                          // Learning
        ];
        let runner = runner_with(responses, store.clone());
        let robot = test_robot();
        let exec = Execution::new("e1", &robot.member_id, &robot.team_id, TriggerType::Clock);
        let controller = ExecutionController::new();
        let handle = controller.track("e1");

        let status = runner.run(robot, exec, handle).await;
        assert_eq!(status, ExecutionStatus::Completed);
        let persisted = store.get("e1").unwrap().unwrap();
        assert_eq!(persisted.status, ExecutionStatus::Completed);
        assert!(persisted.end_time.is_some());
    }

    #[tokio::test]
    async fn human_trigger_skips_inspiration_phase() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ExecutionStore::open(dir.path()).unwrap());
        let responses = vec![canned("goals text"), canned("[]"), canned("delivered"), canned("learned")];
        let runner = runner_with(responses, store.clone());
        let robot = test_robot();
        let exec = Execution::new("e1", &robot.member_id, &robot.team_id, TriggerType::Human { operator: "alice".to_string() });
        let controller = ExecutionController::new();
        let handle = controller.track("e1");

        let status = runner.run(robot, exec, handle).await;
        assert_eq!(status, ExecutionStatus::Completed);
        let persisted = store.get("e1").unwrap().unwrap();
        assert!(persisted.inspiration.is_none());
    }

    #[tokio::test]
    async fn task_needing_input_suspends_the_execution() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ExecutionStore::open(dir.path()).unwrap());
        let responses = vec![
            canned("inspired"),
            canned("goals text"),
            canned(r#"[{"executor_type":"assistant","description":"do it"}]"#),
            canned("{\"status\": \"need_input\", \"question\": \"which env?\"}"),
        ];
        let runner = runner_with(responses, store.clone());
        let robot = test_robot();
        let exec = Execution::new("e1", &robot.member_id, &robot.team_id, TriggerType::Clock);
        let controller = ExecutionController::new();
        let handle = controller.track("e1");

        let status = runner.run(robot, exec, handle).await;
        assert_eq!(status, ExecutionStatus::Waiting);
        let persisted = store.get("e1").unwrap().unwrap();
        assert_eq!(persisted.waiting_question.as_deref(), Some("which env?"));
        assert!(persisted.resume_context.is_some());
    }

    #[tokio::test]
    async fn goals_phase_short_circuits_when_pre_populated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ExecutionStore::open(dir.path()).unwrap());
        // Only Tasks/Delivery/Learning responses -- Goals must be skipped.
        let responses = vec![canned("[]"), canned("delivered"), canned("learned")];
        let runner = runner_with(responses, store.clone());
        let robot = test_robot();
        let mut exec = Execution::new("e1", &robot.member_id, &robot.team_id, TriggerType::Human { operator: "alice".to_string() });
        exec.goals = Some(GoalsContent { content: "pre-confirmed".to_string() });
        let controller = ExecutionController::new();
        let handle = controller.track("e1");

        let status = runner.run(robot, exec, handle).await;
        assert_eq!(status, ExecutionStatus::Completed);
        let persisted = store.get("e1").unwrap().unwrap();
        assert_eq!(persisted.goals.unwrap().content, "pre-confirmed");
    }

    #[tokio::test]
    async fn continue_on_failure_false_skips_remaining_tasks_on_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ExecutionStore::open(dir.path()).unwrap());
        let responses = vec![
            canned("inspired"),
            canned("goals text"),
            canned(r#"[{"executor_type":"assistant","description":"a"},{"executor_type":"assistant","description":"b"}]"#),
            // No response left for task "a" -> MockLlmClient errors, which
            // TaskRunner captures as a failed TaskResult rather than a panic.
        ];
        let runner = runner_with(responses, store.clone());
        let robot = Arc::new(Robot::new(
            "m1",
            "t1",
            "Bot",
            "You are a bot",
            "gpt",
            RobotConfig { continue_on_failure: false, ..Default::default() },
        ));
        let exec = Execution::new("e1", &robot.member_id, &robot.team_id, TriggerType::Clock);
        let controller = ExecutionController::new();
        let handle = controller.track("e1");

        let status = runner.run(robot, exec, handle).await;
        assert_eq!(status, ExecutionStatus::Failed);
        let persisted = store.get("e1").unwrap().unwrap();
        assert_eq!(persisted.results.len(), 1);
        assert_eq!(persisted.tasks[1].status, TaskStatus::Skipped);
    }

    #[test]
    fn parse_tasks_from_falls_back_to_single_task_on_malformed_json() {
        let tasks = parse_tasks_from("not json at all", "assistant-1");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].executor_type, ExecutorType::Assistant);
    }

    #[test]
    fn parse_tasks_from_parses_a_well_formed_array() {
        let tasks = parse_tasks_from(
            r#"Here you go: [{"executor_type":"mcp","executor_id":"srv.tool","description":"do x"}]"#,
            "assistant-1",
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].executor_type, ExecutorType::Mcp);
        assert_eq!(tasks[0].executor_id, "srv.tool");
    }
}
