use std::{
    any::Any,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::IntervalGateError;

type Job = Box<dyn FnOnce() -> Result<(), IntervalGateError> + Send + 'static>;

/// A type-erased unit of deferred work sitting in the gate's queue.
pub(crate) struct QueuedItem {
    id: u64,
    job: Job,
}

impl QueuedItem {
    /// Wrap a fire-and-forget item. A panic is returned from [`Self::invoke`].
    pub(crate) fn detached<F>(id: u64, item: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            job: Box::new(move || catch_unwind(AssertUnwindSafe(item)).map_err(panic_error)),
        }
    }

    /// Wrap an item whose outcome is reported to its own [`Completion`].
    ///
    /// A panic is delivered to the completion and never returned from
    /// [`Self::invoke`].
    pub(crate) fn awaitable<F, T>(id: u64, item: F) -> (Self, Completion<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(item)).map_err(panic_error);
            // The caller may have dropped its completion; that is not a failure.
            let _ = tx.send(outcome);
            Ok(())
        });

        (Self { id, job }, Completion::new(rx))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Run the item on the current thread.
    pub(crate) fn invoke(self) -> Result<(), IntervalGateError> {
        (self.job)()
    }
}

impl std::fmt::Debug for QueuedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedItem").field("id", &self.id).finish()
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> IntervalGateError {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "item panicked".to_string()
    };

    IntervalGateError::ItemInvocation(message)
}

/// Completion signal for one enqueued item.
///
/// Resolves once the item has been released and invoked:
///
/// - `Ok(value)`: the item returned `value`
/// - `Err(ItemInvocation)`: the item panicked
/// - `Err(GateUnavailable)`: the gate closed before the item was released
///
/// Dropping a `Completion` does not cancel the item.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited or waited on"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, IntervalGateError>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, IntervalGateError>>) -> Self {
        Self { rx }
    }

    /// Block the current thread until the item has been released.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn wait(self) -> Result<T, IntervalGateError> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(IntervalGateError::GateUnavailable))
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, IntervalGateError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(IntervalGateError::GateUnavailable)),
        }
    }
}
