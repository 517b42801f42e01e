// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-domain serial executor.
//!
//! Tasks submitted under the same domain key run one at a time in submission
//! order; distinct keys run in parallel. Each key owns a runner: a bounded queue
//! drained by a single consumer task that is created on first use and torn down
//! after `idle_evict_after` without work.
//!
//! ```text
//!  submit(ctx, "acme.orders", task)
//!        │
//!        ▼
//!  ┌──────────────┐   lookup/create    ┌──────────────────────────────┐
//!  │   Executor   │ ─────────────────► │ runners: domain → Runner      │
//!  └──────────────┘                    └──────────────────────────────┘
//!        │ enqueue (bounded)                      │
//!        ▼                                        ▼
//!  ┌──────────────┐    one at a time   ┌──────────────────────────────┐
//!  │ mpsc queue   │ ─────────────────► │ consumer task (per domain)   │
//!  └──────────────┘                    └──────────────────────────────┘
//!        ▲                                        │
//!        └──────────── oneshot reply ◄────────────┘
//! ```
//!
//! # Timeouts and cancellation
//!
//! `max_wait` bounds the whole submission: one child context is derived at the
//! start of [`Executor::submit`] and the same deadline governs the queue wait,
//! the result wait, and the [`Context`] handed to the task. A submitter that
//! gives up after its task was queued does not dequeue it; the task still runs
//! and its result is dropped. Caller cancellation yields
//! [`ExecutorError::Cancelled`], deadline expiry yields [`ExecutorError::Timeout`].
//!
//! # Shutdown
//!
//! [`Executor::shutdown`] rejects new work, releases queued-but-not-started
//! tasks with [`ExecutorError::DomainClosed`], lets running tasks finish, and
//! waits (bounded by its context) until no task is in flight and no runner is
//! alive.

mod context;
mod job;

pub use context::{Context, ContextError};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use job::{Envelope, InFlight, TaskJob};

/// Errors produced by the executor itself. Task errors are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The executor has been shut down.
    #[error("executor is closed")]
    ExecutorClosed,

    /// The runner for the domain was stopped (idle eviction, explicit stop, or shutdown)
    /// before the task could run.
    #[error("domain runner is closed")]
    DomainClosed,

    /// The effective deadline fired before the task completed.
    #[error("timed out waiting for task")]
    Timeout,

    /// The caller cancelled its context before the task completed.
    #[error("submission cancelled by caller")]
    Cancelled,

    /// The task panicked or a precondition was violated.
    #[error("internal executor error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ExecutorClosed => "EXECUTOR_CLOSED",
            Self::DomainClosed => "DOMAIN_CLOSED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<ContextError> for ExecutorError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::Timeout,
        }
    }
}

/// Per-domain serial task executor.
///
/// Not `Clone`: share it behind an `Arc`. Dropping the executor without calling
/// [`shutdown`](Self::shutdown) still stops every runner.
pub struct Executor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.shared.config)
            .field("in_flight", &self.in_flight())
            .field("live_runners", &self.live_runners())
            .finish()
    }
}

pub(crate) struct Shared {
    config: ExecutorConfig,
    state: Mutex<State>,
    stop: CancellationToken,
    in_flight: AtomicUsize,
    live_runners: AtomicUsize,
    drained: Notify,
}

#[derive(Default)]
struct State {
    stopped: bool,
    runners: HashMap<String, Arc<Runner>>,
}

struct Runner {
    domain: String,
    tx: mpsc::Sender<Envelope>,
    stop: CancellationToken,
}

impl Executor {
    /// Create an executor. `queue_capacity` is raised to at least 1.
    pub fn new(config: ExecutorConfig) -> Self {
        let config = ExecutorConfig {
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        info!(
            max_wait_ms = config.max_wait.as_millis() as u64,
            idle_evict_after_ms = config.idle_evict_after.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            "Executor started"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                stop: CancellationToken::new(),
                in_flight: AtomicUsize::new(0),
                live_runners: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Number of submissions currently queued or running.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Number of runner consumer loops still alive.
    pub fn live_runners(&self) -> usize {
        self.shared.live_runners.load(Ordering::SeqCst)
    }

    /// Number of tasks sitting in `domain`'s queue, not counting the running one.
    pub fn queued(&self, domain: &str) -> usize {
        self.shared
            .lock()
            .runners
            .get(domain)
            .map_or(0, |runner| runner.tx.max_capacity() - runner.tx.capacity())
    }

    /// Number of domains currently mapped to a runner.
    pub fn domain_count(&self) -> usize {
        self.shared.lock().runners.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().stopped
    }

    /// Run `task` under `domain`, serialized with every other task of the same domain.
    ///
    /// Returns the task's own result verbatim, or an executor error converted
    /// into `E`. The task receives a [`Context`] carrying the same effective
    /// deadline the submission waits on.
    pub async fn submit<F, Fut, T, E>(&self, ctx: &Context, domain: &str, task: F) -> Result<T, E>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<ExecutorError> + Send + 'static,
    {
        if domain.is_empty() {
            return Err(ExecutorError::Internal("domain key must not be empty".to_string()).into());
        }

        let runner = self.shared.runner_for(domain)?;

        let ctx = if self.shared.config.max_wait.is_zero() {
            ctx.child()
        } else {
            ctx.with_timeout(self.shared.config.max_wait)
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            job: Box::new(TaskJob::new(task, reply_tx)),
            ctx: ctx.clone(),
            in_flight: InFlight::acquire(&self.shared),
        };

        // Losing branches drop the envelope, which releases the in-flight slot.
        tokio::select! {
            biased;
            _ = self.shared.stop.cancelled() => {
                return Err(ExecutorError::ExecutorClosed.into());
            }
            _ = runner.stop.cancelled() => {
                debug!(domain, "Runner stopped while enqueueing");
                return Err(ExecutorError::DomainClosed.into());
            }
            err = ctx.done() => {
                debug!(domain, error = %err, "Submission gave up while enqueueing");
                return Err(ExecutorError::from(err).into());
            }
            sent = runner.tx.send(envelope) => {
                if sent.is_err() {
                    return Err(ExecutorError::DomainClosed.into());
                }
            }
        }

        tokio::select! {
            biased;
            reply = reply_rx => match reply {
                Ok(result) => result,
                // Reply sender dropped without an answer: the envelope was discarded
                // by a closing runner.
                Err(_) => Err(ExecutorError::DomainClosed.into()),
            },
            err = ctx.done() => {
                debug!(domain, error = %err, "Submission stopped waiting for result");
                Err(ExecutorError::from(err).into())
            }
        }
    }

    /// Stop the runner for `domain`, if any. Queued tasks fail with
    /// [`ExecutorError::DomainClosed`]; the running task finishes.
    ///
    /// Returns `true` when a runner was mapped to the domain.
    pub fn stop_domain(&self, domain: &str) -> bool {
        let runner = self.shared.lock().runners.remove(domain);
        match runner {
            Some(runner) => {
                runner.stop.cancel();
                info!(domain, "Runner stopped");
                true
            }
            None => false,
        }
    }

    /// Stop accepting work and wait for in-flight tasks and runners to drain.
    ///
    /// A second call fails with [`ExecutorError::ExecutorClosed`]. When `ctx`
    /// finishes first its error is returned and draining continues in the background.
    pub async fn shutdown(&self, ctx: &Context) -> Result<(), ExecutorError> {
        let runners: Vec<Arc<Runner>> = {
            let mut state = self.shared.lock();
            if state.stopped {
                return Err(ExecutorError::ExecutorClosed);
            }
            state.stopped = true;
            self.shared.stop.cancel();
            state.runners.values().cloned().collect()
        };

        info!(
            runners = runners.len(),
            in_flight = self.in_flight(),
            "Executor shutting down"
        );

        for runner in &runners {
            runner.stop.cancel();
        }
        drop(runners);

        loop {
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.shared.is_idle() {
                info!("Executor shutdown complete");
                return Ok(());
            }

            tokio::select! {
                _ = &mut drained => {}
                err = ctx.done() => {
                    warn!(
                        in_flight = self.in_flight(),
                        live_runners = self.live_runners(),
                        "Executor shutdown interrupted; draining continues in background"
                    );
                    return Err(err.into());
                }
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.live_runners.load(Ordering::SeqCst) == 0
    }

    pub(crate) fn task_started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn task_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn runner_exited(&self) {
        if self.live_runners.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Look up the runner for `domain`, creating it (and its consumer task) if absent.
    fn runner_for(self: &Arc<Self>, domain: &str) -> Result<Arc<Runner>, ExecutorError> {
        let mut state = self.lock();
        if state.stopped {
            return Err(ExecutorError::ExecutorClosed);
        }
        if let Some(runner) = state.runners.get(domain) {
            return Ok(runner.clone());
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let runner = Arc::new(Runner {
            domain: domain.to_string(),
            tx,
            stop: self.stop.child_token(),
        });
        state.runners.insert(domain.to_string(), runner.clone());
        self.live_runners.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(consume(self.clone(), runner.clone(), rx));

        debug!(domain, runners = state.runners.len(), "Runner created");
        Ok(runner)
    }

    /// Drop the mapping for `runner`, but only if the map still points at it.
    fn forget(&self, runner: &Arc<Runner>) -> bool {
        let mut state = self.lock();
        let current = state
            .runners
            .get(&runner.domain)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, runner));
        if current {
            state.runners.remove(&runner.domain);
        }
        current
    }
}

/// Consumer loop for one domain.
async fn consume(shared: Arc<Shared>, runner: Arc<Runner>, mut rx: mpsc::Receiver<Envelope>) {
    let idle_after = shared.config.idle_evict_after;
    let idle = tokio::time::sleep(idle_after);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;
            _ = runner.stop.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let Envelope { job, ctx, in_flight } = envelope;
                job.run(ctx).await;
                drop(in_flight);
                if !idle_after.is_zero() {
                    idle.as_mut().reset(Instant::now() + idle_after);
                }
            }
            _ = &mut idle, if !idle_after.is_zero() => {
                // A submitter may still hold this runner; its enqueue then races the
                // stop signal below and resolves as DomainClosed.
                if shared.forget(&runner) {
                    debug!(domain = %runner.domain, "Evicting idle runner");
                }
                runner.stop.cancel();
            }
        }
    }

    rx.close();
    let mut rejected = 0usize;
    while let Some(envelope) = rx.recv().await {
        envelope.job.reject(ExecutorError::DomainClosed);
        rejected += 1;
    }
    shared.forget(&runner);

    debug!(domain = %runner.domain, rejected, "Runner exited");
    shared.runner_exited();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_wait: Duration, idle: Duration, capacity: usize) -> ExecutorConfig {
        ExecutorConfig {
            max_wait,
            idle_evict_after: idle,
            queue_capacity: capacity,
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ExecutorError::ExecutorClosed.error_code(), "EXECUTOR_CLOSED");
        assert_eq!(ExecutorError::DomainClosed.error_code(), "DOMAIN_CLOSED");
        assert_eq!(ExecutorError::Timeout.error_code(), "TIMEOUT");
        assert_eq!(ExecutorError::Cancelled.error_code(), "CANCELLED");
        assert_eq!(ExecutorError::Internal("x".into()).error_code(), "INTERNAL");
    }

    #[test]
    fn test_context_error_mapping() {
        assert_eq!(
            ExecutorError::from(ContextError::DeadlineExceeded),
            ExecutorError::Timeout
        );
        assert_eq!(
            ExecutorError::from(ContextError::Cancelled),
            ExecutorError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_queue_capacity_floor() {
        let executor = Executor::new(config(Duration::ZERO, Duration::ZERO, 0));
        assert_eq!(executor.config().queue_capacity, 1);
    }

    #[tokio::test]
    async fn test_empty_domain_rejected() {
        let executor = Executor::new(config(Duration::ZERO, Duration::ZERO, 4));
        let result: Result<(), ExecutorError> = executor
            .submit(&Context::background(), "", |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(ExecutorError::Internal(_))));
        assert_eq!(executor.domain_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_domain_removes_mapping() {
        let executor = Executor::new(config(Duration::ZERO, Duration::ZERO, 4));
        let value: Result<u32, ExecutorError> = executor
            .submit(&Context::background(), "k", |_| async { Ok(1) })
            .await;
        assert_eq!(value, Ok(1));
        assert_eq!(executor.domain_count(), 1);

        assert!(executor.stop_domain("k"));
        assert!(!executor.stop_domain("k"));
        assert_eq!(executor.domain_count(), 0);

        // A fresh runner is created on the next submission.
        let value: Result<u32, ExecutorError> = executor
            .submit(&Context::background(), "k", |_| async { Ok(2) })
            .await;
        assert_eq!(value, Ok(2));
    }

    #[tokio::test]
    async fn test_queued_counts_waiting_tasks() {
        let executor = Arc::new(Executor::new(config(Duration::ZERO, Duration::ZERO, 4)));
        assert_eq!(executor.queued("k"), 0);

        let (started_tx, started_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let running = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .submit(&Context::background(), "k", move |_| async move {
                        let _ = started_tx.send(());
                        let _ = gate_rx.await;
                        Ok::<(), ExecutorError>(())
                    })
                    .await
            })
        };
        started_rx.await.unwrap();
        assert_eq!(executor.queued("k"), 0);

        let waiting = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .submit(&Context::background(), "k", |_| async { Ok::<(), ExecutorError>(()) })
                    .await
            })
        };
        while executor.queued("k") < 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(executor.in_flight(), 2);

        gate_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        waiting.await.unwrap().unwrap();
        assert_eq!(executor.queued("k"), 0);
    }

    #[tokio::test]
    async fn test_second_shutdown_reports_closed() {
        let executor = Executor::new(config(Duration::ZERO, Duration::ZERO, 4));
        executor.shutdown(&Context::background()).await.unwrap();
        assert!(executor.is_closed());
        assert_eq!(
            executor.shutdown(&Context::background()).await,
            Err(ExecutorError::ExecutorClosed)
        );
    }
}
