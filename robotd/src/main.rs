//! robotd - multi-tenant robot agent orchestrator
//!
//! CLI entry point: loads configuration, wires up the engine, and dispatches
//! the requested subcommand.

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use robotd::cli::{Cli, Command};
use robotd::domain::TriggerType;
use robotd::host_mediator::InteractRequest;
use robotd::llm::{HttpLlmClient, LlmClient};
use robotd::manager::{DEFAULT_CLOCK_FALLBACK_SECS, Manager};
use robotd::store::{ExecutionStore, RobotStore};
use robotd::task_runner::TaskRunner;
use robotd::RuntimeConfig;

fn setup_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    info!(?level, "logging initialized");
}

fn build_llm_client(config: &RuntimeConfig) -> Result<Arc<dyn LlmClient>> {
    let api_key = std::env::var(&config.llm.api_key_env)
        .with_context(|| format!("environment variable {} is not set", config.llm.api_key_env))?;
    let client = HttpLlmClient::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        api_key,
        config.llm.timeout(),
        config.llm.max_tokens,
    )
    .context("failed to build LLM client")?;
    Ok(Arc::new(client))
}

async fn build_manager(config: &RuntimeConfig) -> Result<Arc<Manager>> {
    std::fs::create_dir_all(&config.store.path)
        .with_context(|| format!("failed to create store directory {}", config.store.path.display()))?;

    let exec_store =
        Arc::new(ExecutionStore::open(config.store.path.join("executions")).context("failed to open execution store")?);
    let robot_store = Arc::new(RobotStore::open(config.store.path.join("robots")).context("failed to open robot store")?);

    let llm = build_llm_client(config)?;
    let task_runner = Arc::new(TaskRunner::new(llm.clone()));

    let manager = Manager::start(
        exec_store,
        robot_store,
        llm,
        task_runner,
        config.pool.global_concurrency,
        DEFAULT_CLOCK_FALLBACK_SECS,
    )
    .await
    .context("failed to start manager")?;
    Ok(manager)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(robotd::cli::parse_log_level(cli.log_level.as_deref()));

    let config = RuntimeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!(?cli.command, "main: dispatching command");

    match cli.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Trigger { member_id, message } => cmd_trigger(&config, &member_id, &message).await,
        Command::Interact { member_id, execution_id, message } => {
            cmd_interact(&config, &member_id, execution_id, &message).await
        }
    }
}

/// Start the engine and block until Ctrl+C, then drain and stop it.
async fn cmd_serve(config: &RuntimeConfig) -> Result<()> {
    info!("robotd starting");
    let manager = build_manager(config).await?;
    info!("robotd running, active executions: {}", manager.active_count());

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    manager.stop().await;
    info!("robotd stopped");
    Ok(())
}

/// Push a one-shot human trigger at a robot and print the assigned
/// execution id. Leaves the run itself to the engine's own workers, so this
/// command does not block on the pipeline finishing.
async fn cmd_trigger(config: &RuntimeConfig, member_id: &str, message: &str) -> Result<()> {
    let manager = build_manager(config).await?;

    let mut data = std::collections::HashMap::new();
    data.insert("goals".to_string(), serde_json::Value::String(message.to_string()));

    let exec_id = manager
        .trigger(member_id, TriggerType::Human { operator: "cli".to_string() }, data)
        .await
        .context("trigger failed")?;
    println!("execution {} submitted", exec_id);

    manager.stop().await;
    Ok(())
}

/// Send one human message through the Host Agent and print its reply.
async fn cmd_interact(config: &RuntimeConfig, member_id: &str, execution_id: Option<String>, message: &str) -> Result<()> {
    let manager = build_manager(config).await?;

    let response = manager
        .interact(InteractRequest {
            member_id: member_id.to_string(),
            execution_id,
            task_id: None,
            source: "cli".to_string(),
            message: message.to_string(),
            action: None,
        })
        .await
        .context("interact failed")?;

    println!("[{}] {}", response.status, response.reply);
    println!("execution: {}", response.execution_id);

    manager.stop().await;
    Ok(())
}
