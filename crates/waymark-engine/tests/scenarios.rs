//! The six end-to-end scenarios, each driven through a real `Worker` loop
//! against `MemoryStore` rather than calling `scheduler::step` directly, so
//! the tests exercise the same path a live deployment runs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::json;
use waymark_engine::{cancel_workflow, signal_workflow, start_workflow, wait_workflow, Registry, Worker, WorkerConfig};
use waymark_persistence::{MemoryStore, Store};
use waymark_types::{ErrorKind, EventType, Payload, RetryPolicy, RetryStrategy};

fn fast_worker(store: Arc<MemoryStore>, registry: Arc<Registry>) -> Worker<MemoryStore> {
    Worker::new(store, registry, WorkerConfig::default().with_tick(StdDuration::from_millis(1)))
}

async fn run_until_terminal(worker: &Worker<MemoryStore>, store: &MemoryStore, id: waymark_types::ExecutionId, max_ticks: u32) {
    for _ in 0..max_ticks {
        let snapshot = store.snapshot(id).await.unwrap().unwrap();
        if snapshot.execution.status.is_terminal() {
            return;
        }
        worker.tick().await.unwrap();
    }
    panic!("execution {id} did not reach a terminal status within {max_ticks} ticks");
}

#[tokio::test]
async fn scenario_1_linear_two_step() {
    let mut registry = Registry::new();
    registry.register_activity(
        "add",
        Arc::new(|args| {
            Box::pin(async move {
                let (a, b): (i64, i64) = args.decode().unwrap();
                Payload::encode(&(a + b)).map_err(|e| waymark_types::ExecutionError::new(ErrorKind::Serialization, e.to_string()))
            })
        }),
        None,
        None,
        None,
    );
    registry.register_workflow(
        "add_workflow",
        Arc::new(|ctx, inputs| {
            Box::pin(async move {
                let (a, b): (i64, i64) = inputs.decode().unwrap();
                let v: i64 = ctx.run_activity("add", Payload::encode(&(a, b)).unwrap(), None).await?.decode().unwrap();
                Ok(Payload::from_value(json!({ "value": v })))
            })
        }),
        None,
    );

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(registry);
    let worker = fast_worker(Arc::clone(&store), Arc::clone(&registry));

    let id = start_workflow(store.as_ref(), "add_workflow", Payload::encode(&(2, 3)).unwrap(), None)
        .await
        .unwrap();
    run_until_terminal(&worker, &store, id, 10).await;

    let result = wait_workflow(store.as_ref(), id, StdDuration::from_millis(1), Some(StdDuration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(result.into_value(), json!({ "value": 5 }));

    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    let kinds: Vec<&str> = snapshot.history.iter().map(|e| e.kind.name()).collect();
    assert_eq!(kinds, vec!["WORKFLOW_STARTED", "ACTIVITY_SCHEDULED", "ACTIVITY_COMPLETED", "WORKFLOW_COMPLETED"]);
}

#[tokio::test]
async fn scenario_2_durable_timer() {
    let mut registry = Registry::new();
    registry.register_workflow(
        "sleeper",
        Arc::new(|ctx, _inputs| {
            Box::pin(async move {
                ctx.sleep(0.05)?;
                Ok(Payload::encode(&"ok").unwrap())
            })
        }),
        None,
    );

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(registry);
    let worker = fast_worker(Arc::clone(&store), Arc::clone(&registry));

    let id = start_workflow(store.as_ref(), "sleeper", Payload::null(), None).await.unwrap();
    // First tick: the timer is scheduled but hasn't elapsed yet.
    worker.tick().await.unwrap();
    let mid_snapshot = store.snapshot(id).await.unwrap().unwrap();
    assert!(!mid_snapshot.execution.status.is_terminal());

    tokio::time::sleep(StdDuration::from_millis(80)).await;
    run_until_terminal(&worker, &store, id, 20).await;

    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    let scheduled = snapshot.history.iter().filter(|e| matches!(e.kind, EventType::TimerScheduled { .. })).count();
    let fired = snapshot.history.iter().filter(|e| matches!(e.kind, EventType::TimerFired { .. })).count();
    assert_eq!(scheduled, 1);
    assert_eq!(fired, 1);
    assert_eq!(snapshot.execution.result.unwrap().decode::<String>().unwrap(), "ok");
}

#[tokio::test]
async fn scenario_3_retry_to_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let mut registry = Registry::new();
    {
        let attempts = Arc::clone(&attempts);
        registry.register_activity(
            "flaky",
            Arc::new(move |_args| {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(waymark_types::ExecutionError::new(ErrorKind::ActivityFailed, "not yet"))
                    } else {
                        Payload::encode(&"done").map_err(|e| waymark_types::ExecutionError::new(ErrorKind::Serialization, e.to_string()))
                    }
                })
            }),
            None,
            None,
            None,
        );
    }
    registry.register_workflow(
        "flaky_workflow",
        Arc::new(|ctx, _inputs| {
            Box::pin(async move {
                let policy = RetryPolicy {
                    strategy: RetryStrategy::Exponential { backoff_coefficient: 2.0 },
                    initial_interval_secs: 0.01,
                    max_attempts: 3,
                    max_interval_secs: None,
                    jitter: 0.0,
                };
                let result: String = ctx.run_activity("flaky", Payload::null(), Some(policy)).await?.decode().unwrap();
                Ok(Payload::encode(&result).unwrap())
            })
        }),
        None,
    );

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(registry);
    let worker = fast_worker(Arc::clone(&store), Arc::clone(&registry));

    let id = start_workflow(store.as_ref(), "flaky_workflow", Payload::null(), None).await.unwrap();
    for _ in 0..50 {
        let snapshot = store.snapshot(id).await.unwrap().unwrap();
        if snapshot.execution.status.is_terminal() {
            break;
        }
        worker.tick().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(15)).await;
    }

    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    assert_eq!(snapshot.execution.status, waymark_types::ExecutionStatus::Completed);
    let scheduled = snapshot.history.iter().filter(|e| matches!(e.kind, EventType::ActivityScheduled { .. })).count();
    let completed = snapshot.history.iter().filter(|e| matches!(e.kind, EventType::ActivityCompleted { .. })).count();
    assert_eq!(scheduled, 1, "retries re-queue the same task row, never a second ACTIVITY_SCHEDULED");
    assert_eq!(completed, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn scenario_4_signal_wait() {
    let mut registry = Registry::new();
    registry.register_workflow(
        "waits_for_go",
        Arc::new(|ctx, _inputs| Box::pin(async move { ctx.wait_signal("go") })),
        None,
    );

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(registry);
    let worker = fast_worker(Arc::clone(&store), Arc::clone(&registry));

    let id = start_workflow(store.as_ref(), "waits_for_go", Payload::null(), None).await.unwrap();
    worker.tick().await.unwrap();
    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    assert!(!snapshot.execution.status.is_terminal(), "yields immediately on the signal wait");

    signal_workflow(store.as_ref(), id, "go", Payload::from_value(json!({"x": 1}))).await.unwrap();
    run_until_terminal(&worker, &store, id, 10).await;

    let result = wait_workflow(store.as_ref(), id, StdDuration::from_millis(1), Some(StdDuration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(result.into_value(), json!({"x": 1}));
}

#[tokio::test]
async fn scenario_5_cancellation_during_sleep() {
    let mut registry = Registry::new();
    registry.register_activity("x", Arc::new(|_args| Box::pin(async move { Ok(Payload::null()) })), None, None, None);
    registry.register_workflow(
        "sleep_then_x",
        Arc::new(|ctx, _inputs| {
            Box::pin(async move {
                ctx.sleep(3600.0)?;
                ctx.run_activity("x", Payload::null(), None).await
            })
        }),
        None,
    );

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(registry);
    let worker = fast_worker(Arc::clone(&store), Arc::clone(&registry));

    let id = start_workflow(store.as_ref(), "sleep_then_x", Payload::null(), None).await.unwrap();
    worker.tick().await.unwrap();

    cancel_workflow(store.as_ref(), id, "stop", false).await.unwrap();
    worker.tick().await.unwrap();

    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    assert_eq!(snapshot.execution.status, waymark_types::ExecutionStatus::Canceled);
    assert!(
        !snapshot.history.iter().any(|e| matches!(&e.kind, EventType::ActivityScheduled { name, .. } if name == "x")),
        "x is never scheduled — cancellation happens during the sleep"
    );
}

#[tokio::test]
async fn scenario_6_nondeterminism_detection() {
    let mut registry_v1 = Registry::new();
    registry_v1.register_activity("add", Arc::new(|args| Box::pin(async move { Ok(args) })), None, None, None);
    registry_v1.register_workflow(
        "evolving",
        Arc::new(|ctx, inputs| {
            Box::pin(async move {
                ctx.run_activity("add", inputs, None).await?;
                Ok(Payload::null())
            })
        }),
        None,
    );

    let store = Arc::new(MemoryStore::new());
    let registry_v1 = Arc::new(registry_v1);
    let worker_v1 = fast_worker(Arc::clone(&store), Arc::clone(&registry_v1));

    let id = start_workflow(store.as_ref(), "evolving", Payload::null(), None).await.unwrap();
    worker_v1.tick().await.unwrap();
    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    assert!(matches!(snapshot.history[1].kind, EventType::ActivityScheduled { .. }));

    // Replay the same history against a v2 body that sleeps first instead.
    let mut registry_v2 = Registry::new();
    registry_v2.register_workflow(
        "evolving",
        Arc::new(|ctx, _inputs| {
            Box::pin(async move {
                ctx.sleep(1.0)?;
                Ok(Payload::null())
            })
        }),
        None,
    );
    let worker_v2 = fast_worker(Arc::clone(&store), Arc::new(registry_v2));
    for _ in 0..5 {
        let snapshot = store.snapshot(id).await.unwrap().unwrap();
        if snapshot.execution.status.is_terminal() {
            break;
        }
        worker_v2.tick().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }

    let snapshot = store.snapshot(id).await.unwrap().unwrap();
    assert_eq!(snapshot.execution.status, waymark_types::ExecutionStatus::Failed);
    assert_eq!(snapshot.execution.error.unwrap().kind, ErrorKind::Nondeterminism);
}
