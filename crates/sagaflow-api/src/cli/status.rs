//! Introspection commands: engine status, relay, locks.

use chrono::Utc;
use comfy_table::{presets, Table};
use console::style;
use sagaflow_core::repository::StepQueue;
use serde_json::json;

use crate::state::AppState;

pub async fn status(state: &AppState, json_out: bool) -> anyhow::Result<()> {
    let queue_depth = state.queue.pending_count().await?;
    let backlog = state.relay.backlog().await?;
    let breakers = state.scheduler.breakers().snapshots();

    if json_out {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "queueDepth": queue_depth,
                "outboxBacklog": backlog,
                "breakers": breakers,
            }))?
        );
        return Ok(());
    }

    println!("{}", style("sagaflow status").bold());
    println!("  queue depth    {queue_depth}");
    println!("  outbox backlog {backlog}");

    if breakers.is_empty() {
        println!("  no circuit breakers registered");
        return Ok(());
    }
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(vec!["Service", "State", "Recent failures", "Retry after"]);
    for snapshot in &breakers {
        table.add_row(vec![
            snapshot.service_key.clone(),
            snapshot.state.to_string(),
            snapshot.recent_failures.to_string(),
            format!("{}ms", snapshot.retry_after_ms),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn relay(state: &AppState, json_out: bool) -> anyhow::Result<()> {
    let report = state.relay.run_once().await?;
    let backlog = state.relay.backlog().await?;

    if json_out {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "relayed": report.relayed,
                "skippedStale": report.skipped_stale,
                "backlog": backlog,
            }))?
        );
        return Ok(());
    }
    println!(
        "relayed {} event(s), {} stale, {} pending",
        report.relayed, report.skipped_stale, backlog
    );
    Ok(())
}

pub async fn locks(state: &AppState, prefix: &str, json_out: bool) -> anyhow::Result<()> {
    let records = state.scheduler.locks().list(prefix).await?;

    if json_out {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no locks under {prefix}");
        return Ok(());
    }
    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(vec!["Key", "Owner", "Age", "TTL", "Operation"]);
    for record in &records {
        table.add_row(vec![
            record.lock_key.clone(),
            record.owner_id.clone(),
            format!("{}s", record.age_seconds(now)),
            format!("{}s", record.ttl_seconds),
            record.operation.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}
