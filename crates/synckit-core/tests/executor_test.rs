// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the per-domain executor.
//!
//! These tests verify:
//! 1. Tasks of one domain never overlap and run in submission order
//! 2. Distinct domains run in parallel
//! 3. `max_wait` and caller cancellation unblock waiting submitters
//! 4. Idle runners are evicted and transparently recreated
//! 5. Shutdown drains in-flight work and rejects everything after it
//!
//! Run with:
//! ```bash
//! cargo test -p synckit-core --test executor_test
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use synckit_core::{Context, Executor, ExecutorConfig, ExecutorError};
use tokio::sync::{Mutex, oneshot};

fn executor(max_wait: Duration, idle: Duration, capacity: usize) -> Arc<Executor> {
    Arc::new(Executor::new(ExecutorConfig {
        max_wait,
        idle_evict_after: idle,
        queue_capacity: capacity,
    }))
}

/// Tracks how many tasks are inside their critical section at once.
#[derive(Default)]
struct Overlap {
    running: AtomicUsize,
    max_seen: AtomicUsize,
}

impl Overlap {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Occupy `domain` with a task that signals start and then waits for the returned gate.
async fn block_domain(executor: &Arc<Executor>, domain: &'static str) -> (oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), ExecutorError>>) {
    let (started_tx, started_rx) = oneshot::channel();
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let exec = executor.clone();
    let handle = tokio::spawn(async move {
        exec.submit(&Context::background(), domain, move |_ctx| async move {
            let _ = started_tx.send(());
            let _ = gate_rx.await;
            Ok::<(), ExecutorError>(())
        })
        .await
    });
    started_rx.await.unwrap();
    (gate_tx, handle)
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_in_one_domain_never_overlap() {
    let executor = executor(Duration::from_secs(5), Duration::ZERO, 64);
    let overlap = Arc::new(Overlap::default());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let executor = executor.clone();
        let overlap = overlap.clone();
        handles.push(tokio::spawn(async move {
            executor
                .submit(&Context::background(), "k", move |_ctx| async move {
                    overlap.enter();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    overlap.exit();
                    Ok::<(), ExecutorError>(())
                })
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(overlap.max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_tasks_run_in_submission_order() {
    let executor = executor(Duration::from_secs(5), Duration::ZERO, 64);
    let order = Arc::new(Mutex::new(Vec::new()));

    // Hold the runner so every submission below is queued before any runs.
    let (gate, blocker) = block_domain(&executor, "k").await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let submitter = executor.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            submitter
                .submit(&Context::background(), "k", move |_ctx| async move {
                    order.lock().await.push(i);
                    Ok::<(), ExecutorError>(())
                })
                .await
        }));
        // Let this submitter reach the queue before the next one starts.
        while executor.in_flight() < i + 2 {
            tokio::task::yield_now().await;
        }
    }

    gate.send(()).unwrap();
    blocker.await.unwrap().unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(*order.lock().await, (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bounded_queue_under_stress() {
    let executor = executor(Duration::from_secs(5), Duration::ZERO, 1);
    let overlap = Arc::new(Overlap::default());
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let executor = executor.clone();
        let overlap = overlap.clone();
        handles.push(tokio::spawn(async move {
            executor
                .submit(&Context::background(), "z", move |_ctx| async move {
                    overlap.enter();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    overlap.exit();
                    Ok::<(), ExecutorError>(())
                })
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(overlap.max_seen.load(Ordering::SeqCst), 1);
    assert!(
        started.elapsed() >= Duration::from_millis(500),
        "50 serial 10ms tasks finished in {:?}",
        started.elapsed()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_domains_run_in_parallel() {
    let executor = executor(Duration::from_secs(5), Duration::ZERO, 8);
    let started = Instant::now();

    let task = |_ctx: Context| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<(), ExecutorError>(())
    };
    let ctx = Context::background();
    let (a, b) = tokio::join!(executor.submit(&ctx, "a", task), executor.submit(&ctx, "b", task));

    a.unwrap();
    b.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(350),
        "two 200ms tasks on distinct keys took {:?}",
        started.elapsed()
    );
    assert_eq!(executor.domain_count(), 2);
}

// ============================================================================
// Timeouts and cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_while_queued() {
    let executor = executor(Duration::from_millis(100), Duration::ZERO, 8);
    let (gate, blocker) = block_domain(&executor, "k").await;

    let started = Instant::now();
    let result: Result<(), ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async { Ok(()) })
        .await;
    let waited = started.elapsed();

    assert_eq!(result, Err(ExecutorError::Timeout));
    assert!(waited >= Duration::from_millis(90), "timed out after {waited:?}");
    assert!(waited < Duration::from_secs(1), "timed out after {waited:?}");

    // The blocked submitter hit the same bound; its task keeps running until released.
    assert_eq!(blocker.await.unwrap(), Err(ExecutorError::Timeout));
    let _ = gate.send(());
}

#[tokio::test]
async fn test_caller_cancel_while_queued_and_task_still_runs() {
    let executor = executor(Duration::ZERO, Duration::ZERO, 8);
    let (gate, blocker) = block_domain(&executor, "k").await;

    let ran = Arc::new(AtomicBool::new(false));
    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let flag = ran.clone();
    let result: Result<(), ExecutorError> = executor
        .submit(&ctx, "k", move |_ctx| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert_eq!(result, Err(ExecutorError::Cancelled));

    // Giving up does not dequeue: the task runs once the domain frees up.
    gate.send(()).unwrap();
    blocker.await.unwrap().unwrap();
    let next: Result<(), ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async { Ok(()) })
        .await;
    next.unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_task_context_carries_the_submission_deadline() {
    let executor = executor(Duration::from_millis(500), Duration::ZERO, 8);
    let remaining = executor
        .submit(&Context::background(), "k", |ctx| async move {
            Ok::<_, ExecutorError>(ctx.remaining())
        })
        .await
        .unwrap();
    let remaining = remaining.expect("task context must carry a deadline");
    assert!(remaining <= Duration::from_millis(500));

    // A tighter caller deadline wins over max_wait.
    let tight = Context::background().with_timeout(Duration::from_millis(50));
    let remaining = executor
        .submit(&tight, "k", |ctx| async move { Ok::<_, ExecutorError>(ctx.remaining()) })
        .await
        .unwrap()
        .unwrap();
    assert!(remaining <= Duration::from_millis(50));
}

// ============================================================================
// Failures
// ============================================================================

#[derive(Debug, PartialEq)]
enum AppError {
    Rejected(&'static str),
    Executor(ExecutorError),
}

impl From<ExecutorError> for AppError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err)
    }
}

#[tokio::test]
async fn test_task_errors_pass_through_verbatim() {
    let executor = executor(Duration::ZERO, Duration::ZERO, 8);
    let result: Result<(), AppError> = executor
        .submit(&Context::background(), "k", |_ctx| async {
            Err(AppError::Rejected("nope"))
        })
        .await;
    assert_eq!(result, Err(AppError::Rejected("nope")));
}

#[tokio::test]
async fn test_panicking_task_reports_internal_and_runner_survives() {
    let executor = executor(Duration::ZERO, Duration::ZERO, 8);

    let result: Result<(), ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await;
    match result {
        Err(ExecutorError::Internal(message)) => assert!(message.contains("boom")),
        other => panic!("expected internal error, got {other:?}"),
    }

    let value: Result<u8, ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async { Ok(7) })
        .await;
    assert_eq!(value, Ok(7));
    assert_eq!(executor.live_runners(), 1);
}

// ============================================================================
// Idle eviction
// ============================================================================

#[tokio::test]
async fn test_idle_runner_is_evicted_and_recreated() {
    let executor = executor(Duration::from_secs(1), Duration::from_millis(50), 8);

    let first: Result<(), ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async { Ok(()) })
        .await;
    first.unwrap();
    assert_eq!(executor.domain_count(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(executor.domain_count(), 0);
    assert_eq!(executor.live_runners(), 0);

    let second: Result<(), ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async { Ok(()) })
        .await;
    second.unwrap();
    assert_eq!(executor.domain_count(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_in_flight_task() {
    let executor = executor(Duration::ZERO, Duration::ZERO, 8);
    let (gate, blocker) = block_domain(&executor, "k").await;

    // A second task is queued behind the blocker and never starts.
    let queued = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor
                .submit(&Context::background(), "k", |_ctx| async { Ok::<(), ExecutorError>(()) })
                .await
        })
    };
    while executor.queued("k") < 1 {
        tokio::task::yield_now().await;
    }

    let shutdown = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.shutdown(&Context::background()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished(), "shutdown returned while a task was running");

    gate.send(()).unwrap();
    shutdown.await.unwrap().unwrap();

    blocker.await.unwrap().unwrap();
    assert_eq!(queued.await.unwrap(), Err(ExecutorError::DomainClosed));
    assert_eq!(executor.in_flight(), 0);
    assert_eq!(executor.live_runners(), 0);

    let after: Result<(), ExecutorError> = executor
        .submit(&Context::background(), "k", |_ctx| async { Ok(()) })
        .await;
    assert_eq!(after, Err(ExecutorError::ExecutorClosed));
}

#[tokio::test]
async fn test_shutdown_bounded_by_caller_context() {
    let executor = executor(Duration::ZERO, Duration::ZERO, 8);
    let (gate, blocker) = block_domain(&executor, "k").await;

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    assert_eq!(executor.shutdown(&ctx).await, Err(ExecutorError::Timeout));

    // Draining continues in the background.
    gate.send(()).unwrap();
    blocker.await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while executor.live_runners() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(executor.is_closed());
}
