//! robotd - Multi-tenant robot agent orchestrator
//!
//! robotd runs a population of long-lived "robots", each driven through an
//! ordered phase pipeline (Inspiration -> Goals -> Tasks -> Run -> Delivery
//! -> Learning) on every trigger, with per-robot concurrency quotas,
//! suspend/resume around human interaction, and cooperative cancellation.
//!
//! # Core concepts
//!
//! - **Robots**: persistent configuration plus in-flight execution slots,
//!   cached in memory and kept in sync with the store via `robot.config.*`
//!   events.
//! - **Executions**: one run of the phase pipeline for a robot, triggered by
//!   a clock, a human message, or another execution's event.
//! - **Phases**: a fixed pipeline order; the Run phase suspends around each
//!   task's MCP-mediated human interaction point.
//! - **Host Agent**: classifies free-text human input into typed actions and
//!   dispatches them against whichever execution they target.
//!
//! # Modules
//!
//! - [`domain`] - Robot/Execution/Task/Phase/Event types
//! - [`store`] - durable CRUD over robots and executions
//! - [`robot_cache`] - in-memory robot index, synced via events
//! - [`events`] - topic-globbed pub/sub bus
//! - [`controller`] - pause/cancel handles for in-flight executions
//! - [`pool`] - per-robot-quota worker scheduling
//! - [`task_runner`] - per-task executor dispatch (assistant/MCP/process)
//! - [`phase_runner`] - the pipeline driver and Run-phase suspend/resume loop
//! - [`host_mediator`] - human interaction classification and dispatch
//! - [`manager`] - the public facade wiring everything together
//! - [`llm`] - LLM client trait and HTTP implementation
//! - [`config`] - runtime configuration
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod host_mediator;
pub mod llm;
pub mod manager;
pub mod phase_runner;
pub mod pool;
pub mod robot_cache;
pub mod store;
pub mod task_runner;

pub use config::{BusConfig, HostConfig, LlmConfig, PoolConfig, RuntimeConfig, StoreConfig};
pub use controller::{ExecutionController, ExecutionHandle};
pub use domain::{
    DeliveryContent, DeliveryPreferences, Execution, ExecutionStatus, ExecutorType, GoalsContent, HostAction,
    Identity, Integrations, Phase as PipelinePhase, Quota, ResumeContext, Robot, RobotConfig, RobotRecord,
    RobotStatus, Task, TaskResult, TaskStatus, TriggerType, Triggers, PIPELINE_ORDER,
};
pub use error::EngineError;
pub use events::{Event, EventBus, EventPayload};
pub use host_mediator::{HostMediator, InteractChunk, InteractRequest, InteractResponse, InteractStatus};
pub use llm::{CompletionRequest, CompletionResponse, HttpLlmClient, LlmClient, LlmError, MockLlmClient, StreamChunk};
pub use manager::Manager;
pub use phase_runner::PhaseRunner;
pub use pool::Pool;
pub use robot_cache::RobotCache;
pub use store::{ExecutionStore, RobotStore};
pub use task_runner::TaskRunner;
