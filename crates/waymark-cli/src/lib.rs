//! Library half of the `waymark` CLI.
//!
//! Kept separate from `main.rs` so a host process can depend on this crate,
//! register its own workflows/activities/queries into
//! `waymark_engine::Registry`'s process-wide global registry, and then drive
//! the same `Worker`/`Status`/`Start` logic the binary uses — without that
//! host having to re-implement argument parsing or snapshot rendering.
//! `Registry::global()` is what the worker and `status --query` paths consult,
//! so registration must happen before `run` is called.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use chrono::Utc;
use serde_json::Value;
use waymark_engine::{Registry, Worker, WorkerConfig};
use waymark_persistence::{PgStore, Store};
use waymark_types::{ExecutionId, Payload};

#[derive(Parser)]
#[command(name = "waymark")]
#[command(about = "Durable workflow execution engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker loop.
    Worker {
        #[arg(long, default_value_t = 1)]
        tick: u64,
        #[arg(long, default_value_t = 50)]
        batch: i64,
        /// Bounds the number of ticks; omit to run forever.
        #[arg(long)]
        iterations: Option<u64>,
        #[arg(long, default_value_t = 10)]
        procs: usize,
    },
    /// Start a new workflow execution.
    Start {
        workflow_name: String,
        #[arg(long, default_value = "null")]
        input: String,
        /// Absolute deadline, in seconds from now.
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Deliver a signal to a running execution.
    Signal {
        execution_id: ExecutionId,
        name: String,
        #[arg(long, default_value = "null")]
        input: String,
    },
    /// Cancel an execution.
    Cancel {
        execution_id: ExecutionId,
        #[arg(long, default_value = "canceled via CLI")]
        reason: String,
        /// Disable cancellation of not-yet-started activity tasks.
        #[arg(long)]
        keep_queued: bool,
    },
    /// Print an execution's status, or the result of a registered query.
    Status {
        execution_id: ExecutionId,
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value = "null")]
        input: String,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&database_url).await.context("connecting to Postgres")?;
    store.migrate().await.context("running migrations")?;

    match cli.command {
        Command::Worker { tick, batch, iterations, procs } => {
            let mut config = WorkerConfig::default()
                .with_tick(StdDuration::from_secs(tick))
                .with_batch(batch)
                .with_procs(procs);
            if let Some(iterations) = iterations {
                config = config.with_iterations(iterations);
            }
            let worker = Worker::new(Arc::new(store), Arc::new(Registry::global()), config);
            worker.run().await.context("worker loop")?;
        }
        Command::Start { workflow_name, input, timeout } => {
            let inputs = parse_payload(&input)?;
            let timeout_at = timeout.map(|secs| Utc::now() + chrono::Duration::milliseconds((secs * 1000.0) as i64));
            let id = waymark_engine::start_workflow(&store, workflow_name, inputs, timeout_at)
                .await
                .context("starting workflow")?;
            println!("{id}");
        }
        Command::Signal { execution_id, name, input } => {
            let payload = parse_payload(&input)?;
            waymark_engine::signal_workflow(&store, execution_id, name, payload)
                .await
                .context("delivering signal")?;
        }
        Command::Cancel { execution_id, reason, keep_queued } => {
            waymark_engine::cancel_workflow(&store, execution_id, reason, keep_queued)
                .await
                .context("canceling execution")?;
        }
        Command::Status { execution_id, query, input } => {
            let view = match query {
                Some(query_name) => {
                    let payload = parse_payload(&input)?;
                    let snapshot = store
                        .snapshot(execution_id)
                        .await
                        .context("loading snapshot")?
                        .with_context(|| format!("execution {execution_id} not found"))?;
                    let registry = Registry::global();
                    waymark_engine::query_workflow(
                        &store,
                        &registry,
                        execution_id,
                        &snapshot.execution.workflow_name,
                        &query_name,
                        payload,
                    )
                    .await
                    .context("running query")?
                    .into_value()
                }
                None => builtin_status(&store, execution_id).await?,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }
    Ok(())
}

/// Status view for executions with no registered query, plus a consistency
/// check between the persisted row and what the journal alone implies.
///
/// `derive_status` only ever sees the event alphabet, so it can't reproduce
/// the row's PENDING/RUNNING toggle across suspends — it folds a started
/// execution straight to RUNNING and stays there until a terminal event. That
/// makes it unsuitable as the row's source of truth, but still useful as a
/// divergence check: if the journal thinks the execution reached a terminal
/// state and the row disagrees (or vice versa), that is a real inconsistency
/// worth surfacing, not an artifact of the coarser derivation.
async fn builtin_status(store: &PgStore, execution_id: ExecutionId) -> Result<Value> {
    let snapshot = store
        .snapshot(execution_id)
        .await
        .context("loading snapshot")?
        .with_context(|| format!("execution {execution_id} not found"))?;
    let pending_activities = waymark_journal::resolution::outstanding_schedule_positions(&snapshot.history).len();

    let derived = waymark_journal::derive_status(&snapshot.history);
    if derived.is_terminal() != snapshot.execution.status.is_terminal() {
        tracing::warn!(
            %execution_id,
            row_status = %snapshot.execution.status,
            derived_status = %derived,
            "execution row and journal-derived status disagree on terminal-ness"
        );
    }

    Ok(serde_json::json!({
        "id": execution_id.to_string(),
        "workflow_name": snapshot.execution.workflow_name,
        "status": snapshot.execution.status.to_string(),
        "result": snapshot.execution.result.map(Payload::into_value),
        "error": snapshot.execution.error,
        "pending_activities": pending_activities,
    }))
}

fn parse_payload(input: &str) -> Result<Payload> {
    let value: Value = serde_json::from_str(input).context("parsing --input as JSON")?;
    Ok(Payload::from_value(value))
}
