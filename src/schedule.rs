use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::GateSchedule;

/// Outcome of a timer fire.
#[derive(Debug, PartialEq, Eq)]
pub enum Fire<T> {
    /// No timer was armed; nothing happened.
    Idle,
    /// The timer fired before the interval elapsed and was re-armed.
    Rearmed {
        /// Time left until the interval has truly elapsed.
        remaining: Duration,
    },
    /// A batch was popped from the head of the queue.
    Released {
        /// Items to invoke, in enqueue order.
        batch: Vec<T>,
        /// `true` when this release emptied the queue.
        drained: bool,
    },
}

/// Clock-injected drain state machine.
///
/// Holds the FIFO queue, the instant of the last release and at most one wake
/// deadline. Every method takes `now` from the caller, so the schedule never
/// reads a clock itself and can be driven deterministically.
///
/// # States
///
/// - **Idle:** queue empty, no deadline
/// - **Armed:** queue non-empty, exactly one deadline
///
/// # Drift correction
///
/// A fire is only honoured once `last_released + interval` has passed. An
/// early fire re-arms for the remaining delta, never for a full interval, so
/// imprecise wake-ups do not accumulate.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
/// use interval_gate::{DrainSchedule, Fire, GateSchedule, IntervalMs, MaxPerInterval};
///
/// let schedule = GateSchedule::new(
///     MaxPerInterval::try_from(2).unwrap(),
///     IntervalMs::try_from(1000).unwrap(),
///     false,
/// )
/// .unwrap();
///
/// let t0 = Instant::now();
/// let mut drain = DrainSchedule::new(schedule, t0);
///
/// assert!(drain.enqueue("a", t0));
/// assert!(!drain.enqueue("b", t0));
/// assert_eq!(drain.deadline(), Some(t0 + Duration::from_secs(1)));
///
/// match drain.fire(t0 + Duration::from_secs(1)) {
///     Fire::Released { batch, drained } => {
///         assert_eq!(batch, vec!["a", "b"]);
///         assert!(drained);
///     }
///     other => panic!("unexpected {other:?}"),
/// }
/// assert!(drain.is_idle());
/// ```
#[derive(Debug)]
pub struct DrainSchedule<T> {
    schedule: GateSchedule,
    queue: VecDeque<T>,
    last_released: Instant,
    wake_at: Option<Instant>,
}

impl<T> DrainSchedule<T> {
    /// Create an idle schedule whose last release is `now`.
    pub fn new(schedule: GateSchedule, now: Instant) -> Self {
        Self {
            schedule,
            queue: VecDeque::new(),
            last_released: now,
            wake_at: None,
        }
    } // end constructor

    /// Append `item` to the tail of the queue.
    ///
    /// Arms the timer for one full interval from `now` if none is armed and
    /// returns whether it did so. An armed timer is left untouched.
    pub fn enqueue(&mut self, item: T, now: Instant) -> bool {
        self.queue.push_back(item);

        if self.wake_at.is_some() {
            return false;
        }

        self.wake_at = Some(now + self.schedule.interval());
        true
    } // end method enqueue

    /// Handle a timer fire at `now`.
    ///
    /// The caller is expected to invoke every item of a [`Fire::Released`]
    /// batch, in order.
    pub fn fire(&mut self, now: Instant) -> Fire<T> {
        if self.wake_at.is_none() {
            return Fire::Idle;
        }

        let threshold = self.last_released + self.schedule.interval();

        if now < threshold {
            let remaining = threshold - now;
            self.wake_at = Some(threshold);
            return Fire::Rearmed { remaining };
        }

        let take = self.schedule.max_per_interval().min(self.queue.len());
        let batch: Vec<T> = self.queue.drain(..take).collect();

        self.last_released = now;

        if self.queue.is_empty() {
            self.wake_at = None;
        } else {
            self.wake_at = Some(now + self.schedule.interval());
        }

        Fire::Released {
            batch,
            drained: self.wake_at.is_none(),
        }
    } // end method fire

    /// Current wake deadline, if the timer is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.wake_at
    }

    /// Instant of the most recent release (construction instant initially).
    pub fn last_released(&self) -> Instant {
        self.last_released
    }

    /// Normalized cadence this schedule runs at.
    pub fn schedule(&self) -> &GateSchedule {
        &self.schedule
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// `true` if the queue is empty and no timer is armed.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.wake_at.is_none()
    }

    /// Drop every queued item and disarm the timer.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.wake_at = None;
        dropped
    }
} // end of impl
