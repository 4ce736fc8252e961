//! Public gate handle.
//!
//! An [`IntervalGate`] accepts work from any thread and hands it to a single
//! worker task that owns the queue and the timer. Two entry points share the
//! same drain engine:
//!
//! - [`IntervalGate::enqueue`]: fire-and-forget
//! - [`IntervalGate::enqueue_awaitable`]: resolves once that item was released

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::{
    Completion, DrainSchedule, GateSchedule, IntervalGateError, IntervalMs, MaxPerInterval,
    item::QueuedItem,
    runtime::now,
    worker::{GateSignal, GateWorker},
};

/// Configuration for [`IntervalGate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalGateOptions {
    /// Items released per interval.
    pub max_per_interval: MaxPerInterval,
    /// Interval length.
    pub interval: IntervalMs,
    /// Spread releases uniformly instead of bursting `max_per_interval` at once.
    ///
    /// When enabled the gate releases one item every
    /// `interval / max_per_interval`.
    pub evenly_spaced: bool,
}

impl IntervalGateOptions {
    /// Validate raw values into options.
    pub fn new(
        max_per_interval: u64,
        interval_ms: u64,
        evenly_spaced: bool,
    ) -> Result<Self, IntervalGateError> {
        Ok(Self {
            max_per_interval: MaxPerInterval::try_from(max_per_interval)
                .map_err(IntervalGateError::InvalidConfiguration)?,
            interval: IntervalMs::try_from(interval_ms)
                .map_err(IntervalGateError::InvalidConfiguration)?,
            evenly_spaced,
        })
    }
}

/// Self-correcting interval rate limiter.
///
/// Queued items are released in FIFO order, at most `max_per_interval` per
/// interval. The first batch is released one interval after the first enqueue
/// into an idle gate; subsequent batches follow one interval apart while the
/// queue is non-empty.
///
/// # Runtime
///
/// Construction spawns a worker task and must happen inside the async runtime
/// selected by the crate features (`runtime-tokio` by default). Outside a
/// runtime construction fails with [`IntervalGateError::TimerScheduling`].
///
/// Items run synchronously on the worker task. Keep them short; spawn a task
/// from the item for anything slow.
///
/// # Shutdown
///
/// [`close`](Self::close) or dropping the gate stops the worker, tears down
/// the pending timer and discards queued items. Their completions resolve to
/// [`IntervalGateError::GateUnavailable`].
///
/// # Examples
///
/// ```no_run
/// use interval_gate::IntervalGate;
///
/// # async fn run() -> Result<(), interval_gate::IntervalGateError> {
/// // 3 calls per second
/// let gate = IntervalGate::new(3, 1000, false)?;
///
/// for i in 0..10 {
///     gate.enqueue(move || println!("call {i}"))?;
/// }
///
/// let status = gate.enqueue_awaitable(|| 200).await?;
/// assert_eq!(status, 200);
/// # Ok(())
/// # }
/// ```
pub struct IntervalGate {
    options: IntervalGateOptions,
    schedule: GateSchedule,
    tx: mpsc::UnboundedSender<GateSignal>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl IntervalGate {
    /// Create a gate from raw values.
    ///
    /// Fails with [`IntervalGateError::InvalidConfiguration`] when
    /// `max_per_interval` or `interval_ms` is `0`.
    pub fn new(
        max_per_interval: u64,
        interval_ms: u64,
        evenly_spaced: bool,
    ) -> Result<Self, IntervalGateError> {
        Self::with_options(IntervalGateOptions::new(
            max_per_interval,
            interval_ms,
            evenly_spaced,
        )?)
    }

    /// Create a gate from validated options.
    pub fn with_options(options: IntervalGateOptions) -> Result<Self, IntervalGateError> {
        let schedule = GateSchedule::new(
            options.max_per_interval,
            options.interval,
            options.evenly_spaced,
        )?;

        if schedule.is_short() {
            tracing::warn!(
                interval = ?schedule.interval(),
                "An interval of less than 200ms can create performance issues"
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        GateWorker::run(DrainSchedule::new(schedule, now()), rx)?;

        Ok(Self {
            options,
            schedule,
            tx,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        })
    } // end constructor

    /// Options the gate was created with.
    pub fn options(&self) -> &IntervalGateOptions {
        &self.options
    }

    /// Cadence the gate actually runs at, after evenly-spaced normalization.
    pub fn schedule(&self) -> &GateSchedule {
        &self.schedule
    }

    /// Queue `item` for release. Never blocks.
    ///
    /// A panic inside `item` is logged and does not affect other items.
    pub fn enqueue<F>(&self, item: F) -> Result<(), IntervalGateError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(QueuedItem::detached(self.next_id(), item).into())
    }

    /// Queue `item` and invoke `on_drain_empty` once a release empties the
    /// queue after it.
    pub fn enqueue_with_drain_notify<F, D>(
        &self,
        item: F,
        on_drain_empty: D,
    ) -> Result<(), IntervalGateError>
    where
        F: FnOnce() + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        self.send(GateSignal::Enqueue {
            item: QueuedItem::detached(self.next_id(), item),
            on_drain_empty: Some(Box::new(on_drain_empty)),
        })
    }

    /// Queue `item` and get a [`Completion`] for its result.
    ///
    /// The completion resolves with the value returned by `item` once it has
    /// been released. If `item` panics, only this completion observes
    /// [`IntervalGateError::ItemInvocation`]. A closed gate yields a completion
    /// that resolves to [`IntervalGateError::GateUnavailable`].
    pub fn enqueue_awaitable<F, T>(&self, item: F) -> Completion<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (queued, completion) = QueuedItem::awaitable(self.next_id(), item);

        // On failure the item is dropped with its sender and the completion
        // resolves to `GateUnavailable`.
        let _ = self.send(queued.into());

        completion
    }

    /// Queue `item` and block the current thread until it has been released.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn enqueue_blocking<F, T>(&self, item: F) -> Result<T, IntervalGateError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue_awaitable(item).wait()
    }

    /// Resolve the next time the queue is empty.
    ///
    /// Resolves right away when the gate is idle.
    pub fn wait_idle(&self) -> Completion<()> {
        let (tx, rx) = oneshot::channel();

        let _ = self.send(GateSignal::NotifyIdle(Box::new(move || {
            let _ = tx.send(Ok(()));
        })));

        Completion::new(rx)
    }

    /// Stop the gate.
    ///
    /// Further enqueues fail with [`IntervalGateError::GateUnavailable`].
    /// Calling `close` more than once is a no-op.
    ///
    /// An enqueue running concurrently with `close` on another thread may
    /// still return `Ok(())`. Its item is then discarded with the rest of the
    /// queue and never runs; an awaitable completion resolves to
    /// [`IntervalGateError::GateUnavailable`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.tx.send(GateSignal::Close);
    }

    /// `true` once the gate was closed or its worker stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    fn send(&self, signal: GateSignal) -> Result<(), IntervalGateError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IntervalGateError::GateUnavailable);
        }

        self.tx
            .send(signal)
            .map_err(|_| IntervalGateError::GateUnavailable)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
} // end of impl

impl Drop for IntervalGate {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for IntervalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalGate")
            .field("options", &self.options)
            .field("schedule", &self.schedule)
            .field("closed", &self.is_closed())
            .finish()
    }
}
