//! Core time, scheduling and observability types.
//!
//! Peripheral chips in this workspace do not tick every master clock cycle.
//! They arm one-shot timers on a shared [`Scheduler`] and are called back
//! when emulated time reaches the deadline. Everything is measured in
//! [`Ticks`] of one microsecond.

mod observable;
mod scheduler;
mod ticks;

pub use observable::{Observable, Value};
pub use scheduler::{Fired, Scheduler};
pub use ticks::Ticks;
