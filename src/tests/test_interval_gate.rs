use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use super::runtime::{async_sleep, block_on};
use crate::{IntervalGate, IntervalGateError};

type Log = Arc<Mutex<Vec<(usize, Instant)>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, i: usize) -> impl FnOnce() + Send + 'static {
    let log = log.clone();
    move || log.lock().unwrap().push((i, Instant::now()))
}

#[test]
fn construction_rejects_invalid_configuration() {
    block_on(async {
        assert!(matches!(
            IntervalGate::new(0, 1000, false),
            Err(IntervalGateError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            IntervalGate::new(1, 0, true),
            Err(IntervalGateError::InvalidConfiguration(_))
        ));
        // 1ms spread over 2M slots truncates to a zero spacing.
        assert!(matches!(
            IntervalGate::new(2_000_000, 1, true),
            Err(IntervalGateError::InvalidConfiguration(_))
        ));
    });
}

#[cfg(feature = "runtime-tokio")]
#[test]
fn construction_outside_runtime_fails_with_timer_scheduling() {
    assert!(matches!(
        IntervalGate::new(1, 1000, false),
        Err(IntervalGateError::TimerScheduling(_))
    ));
}

#[test]
fn releases_in_batches_never_earlier_than_interval() {
    block_on(async {
        let gate = IntervalGate::new(3, 100, false).unwrap();
        let log = log();

        let started = Instant::now();
        for i in 0..7 {
            gate.enqueue(record(&log, i)).unwrap();
        }

        gate.wait_idle().await.unwrap();

        let log = log.lock().unwrap();
        let order: Vec<usize> = log.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..7).collect::<Vec<_>>());

        for (i, at) in log.iter() {
            let batch = (*i / 3 + 1) as u32;
            assert!(
                at.duration_since(started) >= Duration::from_millis(100) * batch,
                "item {i} released after {:?}",
                at.duration_since(started)
            );
        }

        // Batches are at least one interval apart.
        assert!(log[3].1.duration_since(log[0].1) >= Duration::from_millis(95));
        assert!(log[6].1.duration_since(log[3].1) >= Duration::from_millis(95));
    });
}

#[test]
fn evenly_spaced_gate_releases_one_item_per_slot() {
    block_on(async {
        let gate = IntervalGate::new(4, 200, true).unwrap();
        assert_eq!(gate.schedule().max_per_interval(), 1);
        assert_eq!(gate.schedule().interval(), Duration::from_millis(50));

        let log = log();
        for i in 0..4 {
            gate.enqueue(record(&log, i)).unwrap();
        }

        gate.wait_idle().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        for pair in log.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(45));
        }
    });
}

#[test]
fn fifo_order_holds_across_many_batches() {
    block_on(async {
        let gate = IntervalGate::new(50, 10, false).unwrap();
        let log = log();

        for i in 0..500 {
            gate.enqueue(record(&log, i)).unwrap();
        }

        gate.wait_idle().await.unwrap();

        let order: Vec<usize> = log.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..500).collect::<Vec<_>>());
    });
}

#[test]
fn awaitable_enqueue_resolves_with_item_value() {
    block_on(async {
        let gate = IntervalGate::new(2, 50, false).unwrap();

        let started = Instant::now();
        let value = gate.enqueue_awaitable(|| "ok").await.unwrap();

        assert_eq!(value, "ok");
        assert!(started.elapsed() >= Duration::from_millis(50));
    });
}

#[test]
fn awaitable_enqueue_resolves_when_its_own_item_is_released() {
    block_on(async {
        let gate = IntervalGate::new(1, 50, false).unwrap();

        let started = Instant::now();
        let first = gate.enqueue_awaitable(|| 1);
        let second = gate.enqueue_awaitable(|| 2);
        let third = gate.enqueue_awaitable(|| 3);

        assert_eq!(first.await, Ok(1));
        assert!(started.elapsed() >= Duration::from_millis(50));

        assert_eq!(third.await, Ok(3));
        assert!(started.elapsed() >= Duration::from_millis(150));

        // Already released by now.
        assert_eq!(second.await, Ok(2));
    });
}

#[test]
fn failing_item_does_not_block_batch_or_later_batches() {
    block_on(async {
        let gate = IntervalGate::new(3, 50, false).unwrap();

        let a = gate.enqueue_awaitable(|| "a");
        let b = gate.enqueue_awaitable(|| -> &'static str { panic!("b failed") });
        let c = gate.enqueue_awaitable(|| "c");
        let d = gate.enqueue_awaitable(|| "d");

        assert_eq!(a.await, Ok("a"));
        assert_eq!(
            b.await,
            Err(IntervalGateError::ItemInvocation("b failed".to_string()))
        );
        assert_eq!(c.await, Ok("c"));
        assert_eq!(d.await, Ok("d"));
    });
}

#[test]
fn panicking_detached_item_does_not_stop_drain_loop() {
    block_on(async {
        let gate = IntervalGate::new(2, 30, false).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        gate.enqueue(|| panic!("detached failure")).unwrap();
        for _ in 0..3 {
            let calls = calls.clone();
            gate.enqueue(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        gate.wait_idle().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!gate.is_closed());
    });
}

#[test]
fn idle_gate_rearms_fresh_timer_without_double_drain() {
    block_on(async {
        let gate = IntervalGate::new(5, 50, false).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        gate.enqueue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        gate.wait_idle().await.unwrap();

        // Well past the interval: the next item still waits one full interval.
        async_sleep(Duration::from_millis(150)).await;

        let started = Instant::now();
        let c = calls.clone();
        gate.enqueue_awaitable(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));

        // No stray timer releases anything else.
        async_sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    });
}

#[test]
fn drain_notify_fires_once_when_queue_empties() {
    block_on(async {
        let gate = IntervalGate::new(2, 30, false).unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let released = released.clone();
            gate.enqueue(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let n = notified.clone();
        let r = released.clone();
        gate.enqueue_with_drain_notify(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                n.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        async_sleep(Duration::from_millis(40)).await;
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        gate.wait_idle().await.unwrap();
        async_sleep(Duration::from_millis(20)).await;
        assert_eq!(released.load(Ordering::SeqCst), 5);
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        // A later drain cycle does not call the listener again.
        gate.enqueue(|| ()).unwrap();
        gate.wait_idle().await.unwrap();
        async_sleep(Duration::from_millis(20)).await;
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn wait_idle_on_idle_gate_resolves_immediately() {
    block_on(async {
        let gate = IntervalGate::new(1, 1000, false).unwrap();

        let started = Instant::now();
        gate.wait_idle().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    });
}

#[test]
fn close_rejects_enqueue_and_fails_pending_completions() {
    block_on(async {
        let gate = IntervalGate::new(1, 1000, false).unwrap();

        let pending = gate.enqueue_awaitable(|| ());
        gate.close();
        gate.close();

        assert!(gate.is_closed());
        assert_eq!(pending.await, Err(IntervalGateError::GateUnavailable));
        assert_eq!(gate.enqueue(|| ()), Err(IntervalGateError::GateUnavailable));
        assert_eq!(
            gate.enqueue_awaitable(|| ()).await,
            Err(IntervalGateError::GateUnavailable)
        );
        assert_eq!(gate.wait_idle().await, Err(IntervalGateError::GateUnavailable));
    });
}

#[test]
fn dropping_gate_discards_queued_items() {
    block_on(async {
        let calls = Arc::new(AtomicUsize::new(0));

        let pending = {
            let gate = IntervalGate::new(1, 50, false).unwrap();
            let c = calls.clone();
            gate.enqueue_awaitable(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert_eq!(pending.await, Err(IntervalGateError::GateUnavailable));
        async_sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn enqueue_from_plain_threads_releases_everything() {
    block_on(async {
        let gate = Arc::new(IntervalGate::new(25, 10, false).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let calls = calls.clone();

                thread::spawn(move || {
                    for _ in 0..50 {
                        let calls = calls.clone();
                        gate.enqueue(move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().expect("thread panicked");
        }

        gate.wait_idle().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 200);
    });
}

#[cfg(feature = "runtime-tokio")]
#[test]
fn worker_lost_with_its_runtime_makes_gate_unavailable() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let gate = {
        let _guard = rt.enter();
        IntervalGate::new(1, 1000, false).unwrap()
    };

    let pending = gate.enqueue_awaitable(|| ());
    drop(rt);

    assert!(gate.is_closed());
    assert_eq!(gate.enqueue(|| ()), Err(IntervalGateError::GateUnavailable));
    assert_eq!(pending.wait(), Err(IntervalGateError::GateUnavailable));
    assert_eq!(
        gate.enqueue_blocking(|| ()),
        Err(IntervalGateError::GateUnavailable)
    );
}

#[test]
fn enqueue_racing_close_never_runs_or_hangs() {
    block_on(async {
        let gate = Arc::new(IntervalGate::new(1, 1000, false).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let calls = calls.clone();

                thread::spawn(move || {
                    let mut pending = Vec::new();
                    loop {
                        let c = calls.clone();
                        let accepted = gate.enqueue(move || {
                            c.fetch_add(1, Ordering::SeqCst);
                        });
                        pending.push(gate.enqueue_awaitable(|| ()));

                        if accepted.is_err() {
                            break;
                        }
                    }
                    pending
                })
            })
            .collect();

        async_sleep(Duration::from_millis(20)).await;
        gate.close();

        // Once `close` returned, nothing is accepted any more.
        assert_eq!(gate.enqueue(|| ()), Err(IntervalGateError::GateUnavailable));

        for t in threads {
            let pending = t.join().expect("thread panicked");
            for completion in pending {
                assert_eq!(completion.await, Err(IntervalGateError::GateUnavailable));
            }
        }

        async_sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    });
}
