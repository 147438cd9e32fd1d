//! Execution commands.
//!
//! `execute` and `confirm` drive the queue inline instead of relying on a
//! running server: after submitting, the command claims and handles
//! triggers until the queue drains, which leaves the execution completed,
//! paused for confirmation, or settled as failed/compensated.

use std::path::Path;
use std::time::Duration;

use comfy_table::{presets, Table};
use console::style;
use sagaflow_core::repository::{ExecutionStateStore, StepQueue};
use sagaflow_types::execution::{ExecutionState, ExecutionStatus};
use sagaflow_types::plan::Plan;
use uuid::Uuid;

use crate::state::AppState;
use crate::worker::settle;

pub async fn execute(
    state: &AppState,
    plan_path: &Path,
    confirm_each: bool,
    json: bool,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(plan_path).await?;
    let plan: Plan = serde_json::from_str(&raw)?;
    let trace_id = format!("tr-{}", Uuid::now_v7());

    let execution = state
        .scheduler
        .start_execution(plan, confirm_each, trace_id)
        .await?;
    let id = execution.execution_id;

    if execution.status == ExecutionStatus::Rejected {
        print_state(&execution, json);
        return Ok(());
    }

    drive(state).await?;
    let settled = state.scheduler.get_execution(&id).await?;
    print_state(&settled, json);
    Ok(())
}

pub async fn confirm(state: &AppState, execution_id: &Uuid, json: bool) -> anyhow::Result<()> {
    state.scheduler.resume_execution(execution_id).await?;
    drive(state).await?;
    let settled = state.scheduler.get_execution(execution_id).await?;
    print_state(&settled, json);
    Ok(())
}

pub async fn cancel(state: &AppState, execution_id: &Uuid, json: bool) -> anyhow::Result<()> {
    let execution = state.scheduler.cancel_execution(execution_id).await?;
    print_state(&execution, json);
    Ok(())
}

pub async fn show(state: &AppState, execution_id: &Uuid, json: bool) -> anyhow::Result<()> {
    let execution = state.scheduler.get_execution(execution_id).await?;
    print_state(&execution, json);
    Ok(())
}

pub async fn list(state: &AppState, limit: u32, json: bool) -> anyhow::Result<()> {
    let recent = state.store.list_recent(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recent)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(vec!["Execution", "Status", "Step", "Updated"]);
    for execution in &recent {
        table.add_row(vec![
            execution.execution_id.to_string(),
            execution.status.to_string(),
            format!("{}/{}", execution.current_step_index, execution.total_steps),
            execution.updated_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Claim and handle triggers until the queue drains. Delayed retries count
/// as pending, so the loop waits them out instead of exiting early.
async fn drive(state: &AppState) -> anyhow::Result<()> {
    loop {
        match state.queue.claim_next("cli").await? {
            Some(claimed) => settle(state, claimed).await,
            None => {
                if state.queue.pending_count().await? == 0 {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn print_state(execution: &ExecutionState, json: bool) {
    if json {
        match serde_json::to_string_pretty(execution) {
            Ok(out) => println!("{out}"),
            Err(err) => eprintln!("failed to serialize execution: {err}"),
        }
        return;
    }

    let status = execution.status.to_string();
    let styled_status = match execution.status {
        ExecutionStatus::Completed => style(status).green(),
        ExecutionStatus::Failed | ExecutionStatus::Rejected => style(status).red(),
        ExecutionStatus::AwaitingConfirmation => style(status).yellow(),
        ExecutionStatus::Compensated | ExecutionStatus::Cancelled => style(status).magenta(),
        _ => style(status).cyan(),
    };
    println!(
        "{} {}  {}",
        style("execution").bold(),
        execution.execution_id,
        styled_status
    );
    println!(
        "  steps {}/{}  segment {}  trace {}",
        execution.current_step_index,
        execution.total_steps,
        execution.segment_number,
        execution.trace_id
    );
    if let Some(error) = &execution.error {
        println!("  {} {}", style("error").red().bold(), error);
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(vec!["From", "To", "At", "Reason"]);
    for transition in &execution.transitions {
        table.add_row(vec![
            transition.from.to_string(),
            transition.to.to_string(),
            transition.timestamp.to_rfc3339(),
            transition.reason.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
}
