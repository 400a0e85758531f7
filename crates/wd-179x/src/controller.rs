//! Controller board: chips, the shared image registry and the timer queue.

use emu_core::{Scheduler, Ticks};
use format_floppy::{DiskImage, ImageId, ImageKey, ImageRegistry};
use log::{debug, info};

use crate::Wd179x;
use crate::config::Wd179xConfig;
use crate::timing::{TimerEvent, TimerKey};

/// The four addressable registers, selected by A1/A0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Status on read, command on write.
    Status,
    Track,
    Sector,
    Data,
}

impl Register {
    /// Decode the two low address lines.
    #[must_use]
    pub const fn from_address(addr: u16) -> Self {
        match addr & 3 {
            0 => Register::Status,
            1 => Register::Track,
            2 => Register::Sector,
            _ => Register::Data,
        }
    }
}

/// Interrupt and data request line transitions reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    IrqSet,
    IrqClear,
    DrqSet,
    DrqClear,
}

/// Host-side handler for line transitions: `(chip, event)`.
pub type LineHandler = Box<dyn FnMut(usize, LineEvent)>;

/// What a chip may touch outside itself while handling an access or a
/// timer.
pub(crate) struct ChipIo<'a> {
    pub images: &'a mut ImageRegistry,
    pub timers: &'a mut Scheduler<TimerKey, TimerEvent>,
    pub lines: &'a mut dyn FnMut(usize, LineEvent),
}

/// One or more WD179x chips sharing a clock and a set of disk images.
pub struct FdcController {
    chips: Vec<Wd179x>,
    images: ImageRegistry,
    scheduler: Scheduler<TimerKey, TimerEvent>,
    lines: LineHandler,
}

impl FdcController {
    /// Build a controller with `chip_count` chips, all in the reset state.
    pub fn new(
        config: &Wd179xConfig,
        chip_count: usize,
        lines: impl FnMut(usize, LineEvent) + 'static,
    ) -> Self {
        info!(
            "{} controller with {chip_count} chip(s)",
            config.variant.name()
        );
        Self {
            chips: (0..chip_count).map(|i| Wd179x::new(i, config)).collect(),
            images: ImageRegistry::new(),
            scheduler: Scheduler::new(),
            lines: Box::new(lines),
        }
    }

    /// Split the borrow: one chip plus the shared state it works against.
    fn parts(&mut self, chip: usize) -> Option<(&mut Wd179x, ChipIo<'_>)> {
        let chip = self.chips.get_mut(chip)?;
        let io = ChipIo {
            images: &mut self.images,
            timers: &mut self.scheduler,
            lines: self.lines.as_mut(),
        };
        Some((chip, io))
    }

    /// Bus write. Accesses to chips that do not exist are ignored.
    pub fn write_register(&mut self, chip: usize, reg: Register, value: u8) {
        if let Some((c, mut io)) = self.parts(chip) {
            c.write_register(reg, value, &mut io);
        }
    }

    /// Bus read. Chips that do not exist float the bus high.
    pub fn read_register(&mut self, chip: usize, reg: Register) -> u8 {
        match self.parts(chip) {
            Some((c, mut io)) => c.read_register(reg, &mut io),
            None => 0xFF,
        }
    }

    /// Drive and side select lines.
    pub fn select(&mut self, chip: usize, drive: usize, head: u8) {
        if let Some(c) = self.chips.get_mut(chip) {
            c.select(drive, head);
        }
    }

    /// Put the image registered under `key` in a drive, creating the
    /// handle with `make` on first use.
    pub fn insert_disk(
        &mut self,
        chip: usize,
        drive: usize,
        key: ImageKey,
        make: impl FnOnce() -> DiskImage,
    ) -> ImageId {
        let id = self.images.get_or_insert_with(key, make);
        self.attach(chip, drive, Some(id));
        id
    }

    /// Open an image file and put it in a drive.
    pub fn open_disk(
        &mut self,
        chip: usize,
        drive: usize,
        path: impl Into<std::path::PathBuf>,
    ) -> format_floppy::Result<ImageId> {
        let id = self.images.open_path(path)?;
        self.attach(chip, drive, Some(id));
        Ok(id)
    }

    /// Take the disk out of a drive. The image stays registered.
    pub fn eject_disk(&mut self, chip: usize, drive: usize) -> Option<ImageId> {
        self.attach(chip, drive, None)
    }

    fn attach(&mut self, chip: usize, drive: usize, image: Option<ImageId>) -> Option<ImageId> {
        let c = self.chips.get_mut(chip)?;
        c.attach(drive, image, &mut self.images)
    }

    /// Master reset of one chip.
    pub fn reset(&mut self, chip: usize) {
        if let Some((c, mut io)) = self.parts(chip) {
            c.reset(&mut io);
        }
    }

    /// Advance emulated time, firing every timer that falls due.
    pub fn run_for(&mut self, ticks: Ticks) {
        let limit = self.scheduler.now() + ticks;
        while let Some(fired) = self.scheduler.pop_due(limit) {
            if let Some((c, mut io)) = self.parts(fired.key.chip) {
                c.on_timer(fired.payload, &mut io);
            }
        }
        self.scheduler.advance_to(limit);
    }

    /// Emulated time since construction.
    #[must_use]
    pub fn now(&self) -> Ticks {
        self.scheduler.now()
    }

    /// Deadline of the next pending timer on any chip.
    #[must_use]
    pub fn next_event(&self) -> Option<Ticks> {
        self.scheduler.next_due()
    }

    #[must_use]
    pub fn chip(&self, chip: usize) -> Option<&Wd179x> {
        self.chips.get(chip)
    }

    #[must_use]
    pub fn chip_count(&self) -> usize {
        self.chips.len()
    }

    #[must_use]
    pub fn images(&self) -> &ImageRegistry {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageRegistry {
        &mut self.images
    }

    /// Stop every chip and write all images back.
    pub fn shutdown(mut self) -> format_floppy::Result<()> {
        debug!("controller shutdown");
        self.scheduler.cancel_where(|_| true);
        self.images.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_decode_from_low_address_bits() {
        assert_eq!(Register::from_address(0x37EC), Register::Status);
        assert_eq!(Register::from_address(0x37ED), Register::Track);
        assert_eq!(Register::from_address(0x37EE), Register::Sector);
        assert_eq!(Register::from_address(0x37EF), Register::Data);
    }

    #[test]
    fn missing_chip_floats_high() {
        let mut fdc = FdcController::new(&Wd179xConfig::default(), 1, |_, _| {});
        assert_eq!(fdc.read_register(3, Register::Track), 0xFF);
        fdc.write_register(3, Register::Track, 5);
        assert_eq!(fdc.chip_count(), 1);
    }
}
