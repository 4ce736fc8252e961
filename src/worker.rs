use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;

use crate::{
    DrainSchedule, Fire,
    item::QueuedItem,
    runtime::{now, sleep_until, spawn_task},
};

pub(crate) type DrainListener = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum GateSignal {
    Enqueue {
        item: QueuedItem,
        on_drain_empty: Option<DrainListener>,
    },
    NotifyIdle(DrainListener),
    Close,
}

impl From<QueuedItem> for GateSignal {
    fn from(item: QueuedItem) -> Self {
        Self::Enqueue {
            item,
            on_drain_empty: None,
        }
    }
}

/// Owns the drain state of one gate.
///
/// All queue mutation and every timer fire happen on this task, so the
/// schedule needs no locking. Only one sleep future exists at a time, which is
/// the gate's single timer handle.
pub(crate) struct GateWorker {
    drain: DrainSchedule<QueuedItem>,
    listeners: Vec<DrainListener>,
}

impl GateWorker {
    pub fn run(
        drain: DrainSchedule<QueuedItem>,
        rx: mpsc::UnboundedReceiver<GateSignal>,
    ) -> Result<(), crate::IntervalGateError> {
        let worker = Self {
            drain,
            listeners: Vec::new(),
        };

        spawn_task(worker.serve(rx))
    }

    async fn serve(mut self, mut rx: mpsc::UnboundedReceiver<GateSignal>) {
        tracing::debug!(
            max_per_interval = self.drain.schedule().max_per_interval(),
            interval = ?self.drain.schedule().interval(),
            "interval_gate.worker.started"
        );

        loop {
            let signal = match self.drain.deadline() {
                None => rx.recv().await,
                Some(deadline) => {
                    let sleep_fut = sleep_until(deadline);
                    let recv_fut = rx.recv();

                    futures::pin_mut!(sleep_fut);
                    futures::pin_mut!(recv_fut);

                    match futures::future::select(sleep_fut, recv_fut).await {
                        futures::future::Either::Left((_, _recv_fut)) => {
                            self.on_timer();
                            continue;
                        }
                        futures::future::Either::Right((signal, _sleep_fut)) => signal,
                    }
                }
            };

            match signal {
                Some(GateSignal::Enqueue {
                    item,
                    on_drain_empty,
                }) => {
                    if let Some(listener) = on_drain_empty {
                        self.listeners.push(listener);
                    }

                    let id = item.id();
                    if self.drain.enqueue(item, now()) {
                        tracing::trace!(item = id, "interval_gate.timer.armed");
                    }
                }
                Some(GateSignal::NotifyIdle(listener)) => {
                    if self.drain.is_idle() {
                        notify(listener);
                    } else {
                        self.listeners.push(listener);
                    }
                }
                Some(GateSignal::Close) | None => break,
            }
        }

        // Anything that raced `Close` into the channel is discarded with the
        // queue. Later sends fail once the receiver is closed.
        rx.close();
        let mut discarded = self.drain.clear();
        while let Ok(signal) = rx.try_recv() {
            if let GateSignal::Enqueue { .. } = signal {
                discarded += 1;
            }
        }

        tracing::debug!(discarded, "interval_gate.worker.stopped");
    } // end method serve

    fn on_timer(&mut self) {
        match self.drain.fire(now()) {
            Fire::Idle => {}
            Fire::Rearmed { remaining } => {
                tracing::trace!(?remaining, "interval_gate.timer.early");
            }
            Fire::Released { batch, drained } => {
                tracing::trace!(released = batch.len(), drained, "interval_gate.batch");

                for item in batch {
                    let id = item.id();
                    if let Err(err) = item.invoke() {
                        tracing::error!(item = id, error = ?err, "Unhandled item invocation failure");
                    }
                }

                if drained {
                    for listener in self.listeners.drain(..) {
                        notify(listener);
                    }
                }
            }
        }
    } // end method on_timer
} // end impl GateWorker

fn notify(listener: DrainListener) {
    if catch_unwind(AssertUnwindSafe(listener)).is_err() {
        tracing::error!("Drain listener panicked");
    }
}
