//! Timer slots and payloads.
//!
//! Each chip owns three one-shot slots on the controller's scheduler. The
//! misc slot carries every data-phase purpose; arming it again replaces
//! whatever it was waiting for.

use emu_core::Ticks;

use crate::config::Wd179xConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Head stepping and seek verify.
    Seek,
    /// Sector and track searches for Type 2/3 commands.
    Busy,
    /// DRQ, completion and the lost-data watchdog.
    Misc,
}

/// Scheduler key: one slot of one chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub chip: usize,
    pub slot: TimerSlot,
}

impl TimerKey {
    #[must_use]
    pub const fn new(chip: usize, slot: TimerSlot) -> Self {
        Self { chip, slot }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiscOp {
    /// First byte of the data phase is available or wanted.
    DataReady,
    /// End the command with these status bits.
    Complete { bits: u8 },
    /// DRQ went unserviced.
    LostData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Step,
    Verify,
    Locate,
    Misc(MiscOp),
}

impl TimerEvent {
    /// The slot this event is armed on.
    #[must_use]
    pub const fn slot(self) -> TimerSlot {
        match self {
            TimerEvent::Step | TimerEvent::Verify => TimerSlot::Seek,
            TimerEvent::Locate => TimerSlot::Busy,
            TimerEvent::Misc(_) => TimerSlot::Misc,
        }
    }
}

/// Step period for the `rr` field: 1, 2, 3 or 4 ms.
#[must_use]
pub const fn step_period(rate: u8) -> Ticks {
    Ticks::from_millis((rate & 3) as u64 + 1)
}

/// Byte times between the end of an ID field and its data field.
pub const ID_TO_DATA_BYTES: u64 = 32;

/// Byte times from the last data byte to the completion interrupt.
pub const COMPLETION_BYTES: u64 = 3;

/// Delay before the first data byte of a Type 2/3 command.
#[must_use]
pub fn settle(config: &Wd179xConfig, e_flag: bool) -> Ticks {
    if e_flag {
        config.settle_delay
    } else {
        Ticks::ZERO
    }
}
