#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod gate;
pub use gate::*;

mod schedule;
pub use schedule::*;

mod item;
pub use item::Completion;

mod worker;

mod runtime;

mod error;
pub use error::*;

mod common;
pub use common::{GateSchedule, IntervalMs, MaxPerInterval};

#[cfg(test)]
mod tests;
