// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Type-erased queue entries for the per-domain runners.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use super::{Context, ExecutorError, Shared};

/// A submitted task with its reply channel, erased over result and error types.
pub(crate) trait Job: Send {
    /// Run the task and deliver its result. Panics are reported as [`ExecutorError::Internal`].
    fn run(self: Box<Self>, ctx: Context) -> BoxFuture<'static, ()>;

    /// Complete the submission without running the task.
    fn reject(self: Box<Self>, err: ExecutorError);
}

pub(crate) struct TaskJob<F, T, E> {
    task: F,
    reply: oneshot::Sender<Result<T, E>>,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<F, T, E> TaskJob<F, T, E> {
    pub(crate) fn new(task: F, reply: oneshot::Sender<Result<T, E>>) -> Self {
        Self {
            task,
            reply,
            _marker: PhantomData,
        }
    }
}

impl<F, Fut, T, E> Job for TaskJob<F, T, E>
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<ExecutorError> + Send + 'static,
{
    fn run(self: Box<Self>, ctx: Context) -> BoxFuture<'static, ()> {
        let TaskJob { task, reply, .. } = *self;
        Box::pin(async move {
            let result = match std::panic::catch_unwind(AssertUnwindSafe(move || task(ctx))) {
                Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(E::from(ExecutorError::Internal(panic_message(&*payload)))),
                },
                Err(payload) => Err(E::from(ExecutorError::Internal(panic_message(&*payload)))),
            };
            // The submitter may have stopped waiting; its result is discarded then.
            let _ = reply.send(result);
        })
    }

    fn reject(self: Box<Self>, err: ExecutorError) {
        let _ = self.reply.send(Err(E::from(err)));
    }
}

/// Queue entry: the job, the context it runs under, and its in-flight registration.
pub(crate) struct Envelope {
    pub(crate) job: Box<dyn Job>,
    pub(crate) ctx: Context,
    pub(crate) in_flight: InFlight,
}

/// Keeps one task counted as in flight until dropped.
///
/// Dropping an envelope anywhere (completed, rejected, or discarded with a closed
/// queue) releases its slot, so the shutdown barrier cannot leak.
pub(crate) struct InFlight {
    shared: Arc<Shared>,
}

impl InFlight {
    pub(crate) fn acquire(shared: &Arc<Shared>) -> Self {
        shared.task_started();
        Self {
            shared: shared.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.task_finished();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
