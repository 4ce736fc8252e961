use std::{ops::Deref, time::Duration};

use crate::IntervalGateError;

/// Intervals shorter than this trigger a performance warning at construction.
pub(crate) const SHORT_INTERVAL_WARNING_MS: u64 = 200;

/// Maximum number of items released per interval.
///
/// Must be at least `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxPerInterval(u64);

impl Deref for MaxPerInterval {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for MaxPerInterval {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err("Max per interval must be greater than 0");
        }

        Ok(Self(value))
    }
}

/// Length of one release interval, in milliseconds.
///
/// Must be greater than `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalMs(u64);

impl IntervalMs {
    /// The interval as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Deref for IntervalMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for IntervalMs {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err("Interval must be greater than 0");
        }

        Ok(Self(value))
    }
}

/// Effective release cadence after normalization.
///
/// In evenly-spaced mode a burst of `N` items every `T` becomes one item every
/// `T / N`. The aggregate rate is the same, the spacing is uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSchedule {
    max_per_interval: usize,
    interval: Duration,
}

impl GateSchedule {
    /// Normalize a configuration into the cadence the gate actually runs at.
    ///
    /// Besides the zero checks done by [`MaxPerInterval`] and [`IntervalMs`],
    /// an evenly-spaced configuration whose `interval / max_per_interval`
    /// truncates to `0ns` is rejected with
    /// [`IntervalGateError::InvalidConfiguration`].
    pub fn new(
        max_per_interval: MaxPerInterval,
        interval: IntervalMs,
        evenly_spaced: bool,
    ) -> Result<Self, IntervalGateError> {
        if !evenly_spaced {
            return Ok(Self {
                max_per_interval: usize::try_from(*max_per_interval).unwrap_or(usize::MAX),
                interval: interval.as_duration(),
            });
        }

        let nanos = interval.as_duration().as_nanos() / u128::from(*max_per_interval);
        if nanos == 0 {
            return Err(IntervalGateError::InvalidConfiguration(
                "Evenly spaced interval must be at least 1ns",
            ));
        }

        Ok(Self {
            max_per_interval: 1,
            interval: Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)),
        })
    }

    /// Number of items released per timer fire.
    pub fn max_per_interval(&self) -> usize {
        self.max_per_interval
    }

    /// Minimum time between two releases.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn is_short(&self) -> bool {
        self.interval < Duration::from_millis(SHORT_INTERVAL_WARNING_MS)
    }
}
