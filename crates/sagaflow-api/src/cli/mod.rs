//! Command-line interface for the `sflow` binary.

pub mod execution;
pub mod serve;
pub mod status;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Parser)]
#[command(
    name = "sflow",
    version,
    about = "Durable saga execution engine",
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Only log warnings and errors.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server with the embedded worker and relay.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8700)]
        port: u16,
        /// Export spans via OpenTelemetry.
        #[arg(long)]
        otel: bool,
    },

    /// Submit a plan from a JSON file and drive it to a settled state.
    #[command(alias = "run")]
    Execute {
        /// Path to the plan JSON file.
        plan: PathBuf,
        /// Pause before every step until confirmed.
        #[arg(long)]
        confirm_each: bool,
    },

    /// Show one execution with its transition history.
    #[command(alias = "get")]
    Show { execution_id: Uuid },

    /// List recent executions.
    #[command(alias = "ls")]
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Confirm a paused execution and drive it forward.
    Confirm { execution_id: Uuid },

    /// Cancel an execution.
    Cancel { execution_id: Uuid },

    /// Engine status: queue depth, outbox backlog, circuit breakers.
    Status,

    /// Run one outbox relay pass.
    Relay,

    /// List live step locks.
    Locks {
        #[arg(long, default_value = "exec:")]
        prefix: String,
    },

    /// Generate shell completions.
    Completions { shell: Shell },
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Serve { host, port, .. } => {
            let state = AppState::init().await?;
            serve::run(state, &host, port).await
        }
        Commands::Execute { plan, confirm_each } => {
            let state = AppState::init().await?;
            execution::execute(&state, &plan, confirm_each, json).await
        }
        Commands::Show { execution_id } => {
            let state = AppState::init().await?;
            execution::show(&state, &execution_id, json).await
        }
        Commands::List { limit } => {
            let state = AppState::init().await?;
            execution::list(&state, limit, json).await
        }
        Commands::Confirm { execution_id } => {
            let state = AppState::init().await?;
            execution::confirm(&state, &execution_id, json).await
        }
        Commands::Cancel { execution_id } => {
            let state = AppState::init().await?;
            execution::cancel(&state, &execution_id, json).await
        }
        Commands::Status => {
            let state = AppState::init().await?;
            status::status(&state, json).await
        }
        Commands::Relay => {
            let state = AppState::init().await?;
            status::relay(&state, json).await
        }
        Commands::Locks { prefix } => {
            let state = AppState::init().await?;
            status::locks(&state, &prefix, json).await
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
