//! CLI command definitions and subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// robotd - multi-tenant robot agent orchestrator
#[derive(Parser)]
#[command(name = "robotd", about = "Multi-tenant robot agent orchestrator", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the engine and block, driving every robot's clock triggers and
    /// serving interact calls until Ctrl+C.
    Serve,

    /// Push a trigger at a robot, waiting for the execution id it was
    /// assigned (the run itself continues in the background).
    Trigger {
        /// Robot member id
        member_id: String,

        /// Free-text seed, carried as the initial goals content
        message: String,
    },

    /// Send a human message into an execution (or start one, if no
    /// execution id is given) via the Host Agent.
    Interact {
        /// Robot member id
        member_id: String,

        /// Execution id to route the message to. Omit to start a new one.
        #[arg(short, long)]
        execution_id: Option<String>,

        /// Message text
        message: String,
    },
}

/// Parse a log level string into a `tracing::Level`, defaulting to `INFO`
/// on an empty or unrecognized value.
pub fn parse_log_level(level_str: Option<&str>) -> tracing::Level {
    debug!(?level_str, "parse_log_level: called");
    match level_str.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
        None => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_command() {
        let cli = Cli::parse_from(["robotd", "trigger", "bot-1", "build the widget"]);
        match cli.command {
            Command::Trigger { member_id, message } => {
                assert_eq!(member_id, "bot-1");
                assert_eq!(message, "build the widget");
            }
            _ => panic!("expected Trigger command"),
        }
    }

    #[test]
    fn parses_interact_command_without_execution_id() {
        let cli = Cli::parse_from(["robotd", "interact", "bot-1", "what's the status?"]);
        match cli.command {
            Command::Interact { member_id, execution_id, message } => {
                assert_eq!(member_id, "bot-1");
                assert!(execution_id.is_none());
                assert_eq!(message, "what's the status?");
            }
            _ => panic!("expected Interact command"),
        }
    }

    #[test]
    fn parses_interact_command_with_execution_id() {
        let cli = Cli::parse_from(["robotd", "interact", "bot-1", "-e", "exec-1", "looks good"]);
        match cli.command {
            Command::Interact { execution_id, .. } => assert_eq!(execution_id, Some("exec-1".to_string())),
            _ => panic!("expected Interact command"),
        }
    }

    #[test]
    fn parses_serve_command() {
        let cli = Cli::parse_from(["robotd", "serve"]);
        assert!(matches!(cli.command, Command::Serve));
    }

    #[test]
    fn log_level_defaults_to_info_for_unknown_input() {
        assert_eq!(parse_log_level(Some("bogus")), tracing::Level::INFO);
        assert_eq!(parse_log_level(None), tracing::Level::INFO);
    }

    #[test]
    fn log_level_parses_known_values() {
        assert_eq!(parse_log_level(Some("debug")), tracing::Level::DEBUG);
        assert_eq!(parse_log_level(Some("ERROR")), tracing::Level::ERROR);
    }
}
