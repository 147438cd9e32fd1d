//! `sflow` binary entry point.

mod cli;
mod http;
mod state;
mod worker;

use clap::Parser;
use sagaflow_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Completions must not emit log lines on stdout.
    if let Commands::Completions { shell } = &cli.command {
        cli::generate_completions(*shell);
        return Ok(());
    }

    let filter = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "info,sagaflow=debug",
            _ => "debug",
        }
    };
    let serving = matches!(cli.command, Commands::Serve { .. });
    let enable_otel = matches!(cli.command, Commands::Serve { otel: true, .. });
    init_tracing(TracingOptions {
        filter,
        enable_otel,
        span_timing: serving,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = cli::dispatch(cli).await;
    shutdown_tracing();
    result
}
