//! Western Digital WD179x floppy disk controller.
//!
//! Covers the WD1791, WD1793, WD1795 and WD1797. The chip does not tick
//! every clock: commands arm one-shot timers on the controller's
//! [`Scheduler`](emu_core::Scheduler) and every data movement goes
//! through a [`DiskImage`](format_floppy::DiskImage).
//!
//! # Register interface
//!
//! | Addr | Read   | Write   |
//! |------|--------|---------|
//! | 0    | Status | Command |
//! | 1    | Track  | Track   |
//! | 2    | Sector | Sector  |
//! | 3    | Data   | Data    |
//!
//! # State machine
//!
//! Idle → SeekBusy (Type 1) or TransferBusy (Type 2/3) → Complete → Idle.
//! Force Interrupt (Type 4) drops back to Idle from anywhere. Errors never
//! surface from the register interface: they land in the status register
//! and the command ends with an interrupt after a delay.

#![allow(clippy::cast_possible_truncation)]

pub mod commands;
pub mod config;
mod controller;
pub mod status;
pub mod timing;

pub use commands::{Command, CommandType, Decoded, StepFlags, TransferFlags, decode};
pub use config::{Variant, Wd179xConfig};
pub use controller::{FdcController, LineEvent, LineHandler, Register};
pub use status::FdcError;

use emu_core::{Observable, Ticks, Value};
use format_floppy::chrn::sector_size;
use format_floppy::crc::Crc16;
use format_floppy::{ChrnId, Density, DiskImage, ImageId, ImageRegistry};
use log::{debug, trace, warn};

use crate::controller::ChipIo;
use crate::status::{
    BUSY, CRC_ERROR, DRQ, HEAD_LOADED, INDEX, LOST_DATA, NOT_READY, RECORD_TYPE, SEEK_ERROR,
    TRACK_0, WRITE_PROTECT,
};
use crate::timing::{
    COMPLETION_BYTES, ID_TO_DATA_BYTES, MiscOp, TimerEvent, TimerKey, TimerSlot, settle,
    step_period,
};

/// Drive select lines per chip.
pub const MAX_DRIVES: usize = 4;

/// Restore gives up after this many steps without seeing track 0.
const RESTORE_STEP_LIMIT: u16 = 255;

/// The data phase a Type 2/3 command is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    ReadSector,
    WriteSector,
    ReadTrack,
    WriteTrack,
    ReadId,
}

impl TransferKind {
    /// Data flows from the disk to the host.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            TransferKind::ReadSector | TransferKind::ReadTrack | TransferKind::ReadId
        )
    }
}

/// Chip state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Type 1 command stepping or verifying.
    SeekBusy,
    TransferBusy(TransferKind),
    /// Command finished; cleared by the next status read or command.
    Complete,
}

#[derive(Debug, Clone, Copy, Default)]
struct Drive {
    image: Option<ImageId>,
    /// Physical head position, kept even with no disk inserted.
    cylinder: u8,
}

/// One WD179x chip.
#[derive(Debug)]
pub struct Wd179x {
    index: usize,
    config: Wd179xConfig,
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    command: u8,
    command_type: CommandType,
    current: Option<Command>,
    state: State,
    selected_drive: usize,
    selected_head: u8,
    density: Density,
    drives: [Drive; MAX_DRIVES],
    /// Sector, ID or track bytes being transferred.
    buffer: Vec<u8>,
    /// Next byte of `buffer` to move.
    offset: usize,
    last_sector_found: ChrnId,
    /// Status bits to report when the data phase ends.
    pending_bits: u8,
    /// +1 towards the hub, -1 towards track 0.
    step_direction: i8,
    restore_steps: u16,
    /// Force Interrupt condition bits of the last Type 4 command.
    interrupt_mode: u8,
    irq: bool,
    drq: bool,
}

impl Wd179x {
    /// A chip in the reset state with no disks.
    #[must_use]
    pub fn new(index: usize, config: &Wd179xConfig) -> Self {
        Self {
            index,
            config: config.clone(),
            status: NOT_READY | INDEX,
            track: 0,
            sector: 1,
            data: 0,
            command: 0,
            command_type: CommandType::Type1,
            current: None,
            state: State::Idle,
            selected_drive: 0,
            selected_head: 0,
            density: Density::Single,
            drives: [Drive::default(); MAX_DRIVES],
            buffer: Vec::new(),
            offset: 0,
            last_sector_found: ChrnId::default(),
            pending_bits: 0,
            step_direction: 1,
            restore_steps: 0,
            interrupt_mode: 0,
            irq: false,
            drq: false,
        }
    }

    /// Latched status register, without the side effects of a bus read.
    #[must_use]
    pub fn status(&self) -> u8 {
        self.status
    }

    #[must_use]
    pub fn track(&self) -> u8 {
        self.track
    }

    #[must_use]
    pub fn sector(&self) -> u8 {
        self.sector
    }

    #[must_use]
    pub fn data(&self) -> u8 {
        self.data
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    #[must_use]
    pub fn density(&self) -> Density {
        self.density
    }

    #[must_use]
    pub fn irq(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn drq(&self) -> bool {
        self.drq
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.status & BUSY != 0
    }

    #[must_use]
    pub fn selected_drive(&self) -> usize {
        self.selected_drive
    }

    #[must_use]
    pub fn selected_head(&self) -> u8 {
        self.selected_head
    }

    /// ID of the sector most recently located.
    #[must_use]
    pub fn last_sector_found(&self) -> ChrnId {
        self.last_sector_found
    }

    #[must_use]
    pub fn interrupt_mode(&self) -> u8 {
        self.interrupt_mode
    }

    /// Physical cylinder of a drive's head.
    #[must_use]
    pub fn drive_cylinder(&self, drive: usize) -> Option<u8> {
        self.drives.get(drive).map(|d| d.cylinder)
    }

    #[must_use]
    pub fn drive_image(&self, drive: usize) -> Option<ImageId> {
        self.drives.get(drive).and_then(|d| d.image)
    }

    /// Drive and side select. Out-of-range drives are ignored.
    pub fn select(&mut self, drive: usize, head: u8) {
        if drive < MAX_DRIVES {
            self.selected_drive = drive;
            self.selected_head = head & 1;
        }
    }

    /// Insert (`Some`) or remove (`None`) a disk, returning the previous one.
    pub(crate) fn attach(
        &mut self,
        drive: usize,
        image: Option<ImageId>,
        images: &mut ImageRegistry,
    ) -> Option<ImageId> {
        let slot = self.drives.get_mut(drive)?;
        let previous = std::mem::replace(&mut slot.image, image);
        if let Some(img) = image.and_then(|id| images.get_mut(id)) {
            img.set_current_cylinder(slot.cylinder);
        }
        debug!(
            "chip {} drive {drive}: {}",
            self.index,
            if image.is_some() { "disk inserted" } else { "empty" }
        );
        previous
    }

    pub(crate) fn reset(&mut self, io: &mut ChipIo<'_>) {
        debug!("chip {}: reset", self.index);
        self.cancel_timers(io);
        self.set_irq(false, io);
        self.set_drq(false, io);
        let drives = self.drives;
        let (drive, head) = (self.selected_drive, self.selected_head);
        *self = Self::new(self.index, &self.config);
        self.drives = drives;
        self.selected_drive = drive;
        self.selected_head = head;
    }

    pub(crate) fn write_register(&mut self, reg: Register, value: u8, io: &mut ChipIo<'_>) {
        match reg {
            Register::Status => self.write_command(value, io),
            Register::Track => self.track = value,
            Register::Sector => self.sector = value,
            Register::Data => self.write_data(value, io),
        }
    }

    pub(crate) fn read_register(&mut self, reg: Register, io: &mut ChipIo<'_>) -> u8 {
        match reg {
            Register::Status => self.read_status(io),
            Register::Track => self.track,
            Register::Sector => self.sector,
            Register::Data => self.read_data(io),
        }
    }

    pub(crate) fn on_timer(&mut self, event: TimerEvent, io: &mut ChipIo<'_>) {
        trace!("chip {}: timer {event:?}", self.index);
        match event {
            TimerEvent::Step => self.step_tick(io),
            TimerEvent::Verify => self.verify(io),
            TimerEvent::Locate => self.locate(io),
            TimerEvent::Misc(MiscOp::DataReady) => self.data_ready(io),
            TimerEvent::Misc(MiscOp::Complete { bits }) => self.complete(bits, io),
            TimerEvent::Misc(MiscOp::LostData) => self.lost_data(io),
        }
    }

    // -----------------------------------------------------------------------
    // Register access
    // -----------------------------------------------------------------------

    fn write_command(&mut self, value: u8, io: &mut ChipIo<'_>) {
        let cmd = match decode(value) {
            Decoded::SelectDensity(d) => {
                debug!("chip {}: {d} selected", self.index);
                self.density = d;
                return;
            }
            Decoded::Command(c) => c,
        };
        debug!("chip {}: {} ({value:#04X})", self.index, cmd.mnemonic());
        self.set_irq(false, io);
        if let Command::ForceInterrupt(mode) = cmd {
            self.force_interrupt(value, mode, io);
            return;
        }

        self.cancel_timers(io);
        self.drop_drq(io);
        self.command = value;
        self.command_type = cmd.kind();
        self.current = Some(cmd);
        self.pending_bits = 0;
        if let Some(flags) = cmd.step_flags() {
            self.start_seek(cmd, flags, io);
        } else if let Some(flags) = cmd.transfer_flags() {
            self.start_transfer(cmd, flags, io);
        }
    }

    fn read_status(&mut self, io: &mut ChipIo<'_>) -> u8 {
        self.set_irq(false, io);
        if self.state == State::Complete {
            self.state = State::Idle;
        }
        if matches!(self.command_type, CommandType::Type1 | CommandType::Type4) {
            let (ready, protected) = self.drive_flags(io.images);
            let mut s = (self.status ^ INDEX) & !(NOT_READY | WRITE_PROTECT | TRACK_0);
            if !ready {
                s |= NOT_READY;
            }
            if protected {
                s |= WRITE_PROTECT;
            }
            if self.cylinder() == 0 {
                s |= TRACK_0;
            }
            self.status = s;
        }
        self.status
    }

    fn read_data(&mut self, io: &mut ChipIo<'_>) -> u8 {
        let value = self.data;
        if self.drq && self.transfer().is_some_and(TransferKind::is_read) {
            self.offset += 1;
            if let Some(&next) = self.buffer.get(self.offset) {
                self.data = next;
                self.arm_watchdog(io);
            } else {
                self.drop_drq(io);
                self.end_transfer(io);
            }
        }
        value
    }

    fn write_data(&mut self, value: u8, io: &mut ChipIo<'_>) {
        self.data = value;
        if !self.drq || self.transfer().is_none_or(TransferKind::is_read) {
            return;
        }
        if let Some(slot) = self.buffer.get_mut(self.offset) {
            *slot = value;
        }
        self.offset += 1;
        if self.offset < self.buffer.len() {
            self.arm_watchdog(io);
        } else {
            self.drop_drq(io);
            self.end_transfer(io);
        }
    }

    // -----------------------------------------------------------------------
    // Type 1
    // -----------------------------------------------------------------------

    fn start_seek(&mut self, cmd: Command, flags: StepFlags, io: &mut ChipIo<'_>) {
        self.state = State::SeekBusy;
        self.status = BUSY | if flags.head_load { HEAD_LOADED } else { 0 };
        match cmd {
            Command::Restore(_) => self.restore_steps = 0,
            Command::StepIn(_) => self.step_direction = 1,
            Command::StepOut(_) => self.step_direction = -1,
            _ => {}
        }
        self.arm(io, TimerEvent::Step, step_period(flags.rate));
    }

    fn step_tick(&mut self, io: &mut ChipIo<'_>) {
        let Some(cmd) = self.current else { return };
        let Some(flags) = cmd.step_flags() else { return };
        if !self.drive_flags(io.images).0 {
            self.finish_seek(NOT_READY, io);
            return;
        }

        match cmd {
            Command::Restore(_) => {
                if self.cylinder() != 0 {
                    self.step_head(-1, io);
                    self.track = self.track.wrapping_sub(1);
                    self.restore_steps += 1;
                }
                if self.cylinder() == 0 {
                    self.track = 0;
                    self.end_seek(flags, io);
                } else if self.restore_steps >= RESTORE_STEP_LIMIT {
                    self.finish_seek(SEEK_ERROR, io);
                } else {
                    self.arm(io, TimerEvent::Step, step_period(flags.rate));
                }
            }
            Command::Seek(_) => {
                if self.track != self.data {
                    let dir = if self.data > self.track { 1 } else { -1 };
                    self.step_direction = dir;
                    self.step_head(dir, io);
                    self.track = self.track.wrapping_add_signed(dir);
                }
                if self.track == self.data {
                    self.end_seek(flags, io);
                } else {
                    self.arm(io, TimerEvent::Step, step_period(flags.rate));
                }
            }
            _ => {
                self.step_head(self.step_direction, io);
                if flags.update {
                    self.track = self.track.wrapping_add_signed(self.step_direction);
                }
                self.end_seek(flags, io);
            }
        }
    }

    fn step_head(&mut self, dir: i8, io: &mut ChipIo<'_>) {
        let drive = &mut self.drives[self.selected_drive];
        drive.cylinder = if dir < 0 {
            drive.cylinder.saturating_sub(1)
        } else {
            drive.cylinder.saturating_add(1)
        };
        let cylinder = drive.cylinder;
        if let Some(img) = self.image(io.images) {
            img.set_current_cylinder(cylinder);
        }
        trace!("chip {}: head at cylinder {cylinder}", self.index);
    }

    fn end_seek(&mut self, flags: StepFlags, io: &mut ChipIo<'_>) {
        if flags.verify {
            self.arm(io, TimerEvent::Verify, self.config.settle_delay);
        } else {
            self.finish_seek(0, io);
        }
    }

    fn verify(&mut self, io: &mut ChipIo<'_>) {
        let bits = match self.verify_track(io) {
            Ok(()) => 0,
            Err(e) => {
                debug!("chip {}: verify failed: {e}", self.index);
                match e {
                    FdcError::NotReady => NOT_READY,
                    _ => SEEK_ERROR,
                }
            }
        };
        self.finish_seek(bits, io);
    }

    /// Look for an ID on the current cylinder whose track matches the
    /// track register, within the configured number of revolutions.
    fn verify_track(&mut self, io: &mut ChipIo<'_>) -> Result<(), FdcError> {
        let (head, density, track) = (self.selected_head, self.density, self.track);
        let revolutions = u32::from(self.config.verify_revolutions);
        let img = self.image(io.images).ok_or(FdcError::NotReady)?;
        let mut pulses = 0;
        // Bound the scan even if the image never raises an index pulse.
        for _ in 0..(revolutions + 1) * 256 {
            let id = img.get_next_id(head, density).map_err(|e| match e {
                format_floppy::Error::NotReady => FdcError::NotReady,
                _ => FdcError::SeekError,
            })?;
            if id.cylinder == track && !id.flags.id_crc_error {
                return Ok(());
            }
            if img.index_pulse() {
                pulses += 1;
                if pulses > revolutions {
                    break;
                }
            }
        }
        Err(FdcError::SeekError)
    }

    fn finish_seek(&mut self, bits: u8, io: &mut ChipIo<'_>) {
        self.status = (self.status & HEAD_LOADED) | bits;
        self.state = State::Complete;
        debug!(
            "chip {}: seek done, track {} cylinder {} status {:#04X}",
            self.index,
            self.track,
            self.cylinder(),
            self.status
        );
        self.set_irq(true, io);
    }

    // -----------------------------------------------------------------------
    // Type 2 and 3
    // -----------------------------------------------------------------------

    fn start_transfer(&mut self, cmd: Command, flags: TransferFlags, io: &mut ChipIo<'_>) {
        let kind = match cmd {
            Command::ReadSector(_) => TransferKind::ReadSector,
            Command::WriteSector(_) => TransferKind::WriteSector,
            Command::ReadTrack(_) => TransferKind::ReadTrack,
            Command::WriteTrack(_) => TransferKind::WriteTrack,
            _ => TransferKind::ReadId,
        };
        self.state = State::TransferBusy(kind);
        self.status = BUSY;
        if self.config.variant.has_side_select() {
            self.selected_head = u8::from(flags.bit1);
        }

        let (ready, protected) = self.drive_flags(io.images);
        if !ready {
            self.schedule_completion(NOT_READY, self.config.not_ready_delay, io);
            return;
        }
        if protected && !kind.is_read() {
            self.schedule_completion(WRITE_PROTECT, self.config.not_ready_delay, io);
            return;
        }
        let delay = settle(&self.config, flags.settle) + self.byte_time();
        self.arm(io, TimerEvent::Locate, delay);
    }

    fn locate(&mut self, io: &mut ChipIo<'_>) {
        let Some(cmd) = self.current else { return };
        let found = match cmd {
            Command::ReadSector(f) => self.locate_sector(f, true, io),
            Command::WriteSector(f) => self.locate_sector(f, false, io),
            Command::ReadAddress(_) => self.locate_id(io),
            Command::ReadTrack(_) => self.load_track(io),
            Command::WriteTrack(_) => {
                self.buffer = vec![0; self.config.track_len(self.density)];
                self.offset = 0;
                Ok(self.byte_time())
            }
            _ => return,
        };
        match found {
            Ok(delay) => self.arm(io, TimerEvent::Misc(MiscOp::DataReady), delay),
            Err(e) => {
                debug!("chip {}: {} failed: {e}", self.index, cmd.mnemonic());
                let delay = match e {
                    FdcError::NotReady => self.config.not_ready_delay,
                    _ => self.config.rnf_delay,
                };
                self.schedule_completion(e.status_bits(), delay, io);
            }
        }
    }

    /// Find the sector named by the sector register and, for reads, load
    /// it. Returns the delay until its data field arrives.
    fn locate_sector(
        &mut self,
        flags: TransferFlags,
        read: bool,
        io: &mut ChipIo<'_>,
    ) -> Result<Ticks, FdcError> {
        let (head, sector, track, density) =
            (self.selected_head, self.sector, self.track, self.density);
        let side = (!self.config.variant.has_side_select() && flags.bit1)
            .then_some(u8::from(flags.bit3));
        let img = self.image(io.images).ok_or(FdcError::NotReady)?;

        let id = img.find_sector(head, sector, density)?;
        if id.cylinder != track || side.is_some_and(|s| s != id.head) {
            trace!("chip {}: ID {id:?} does not match", self.index);
            return Err(FdcError::RecordNotFound);
        }
        let mut buffer = vec![0; self.sector_length(flags, id.size_code)];
        let id = if read {
            img.read_sector(head, sector, &mut buffer, density)?
        } else {
            id
        };

        self.pending_bits = 0;
        if id.flags.deleted {
            self.pending_bits |= RECORD_TYPE;
        }
        if id.flags.data_crc_error {
            warn!("chip {}: data CRC error in sector {sector}", self.index);
            self.pending_bits |= CRC_ERROR;
        }
        self.last_sector_found = id;
        self.buffer = buffer;
        self.offset = 0;
        Ok(self.byte_time().times(ID_TO_DATA_BYTES))
    }

    /// Read Address: the next ID field with its CRC.
    fn locate_id(&mut self, io: &mut ChipIo<'_>) -> Result<Ticks, FdcError> {
        let (head, density) = (self.selected_head, self.density);
        let img = self.image(io.images).ok_or(FdcError::NotReady)?;
        let id = img.get_next_id(head, density)?;

        let mut crc = Crc16::for_field(density.is_double());
        crc.push(format_floppy::chrn::IDAM);
        crc.extend(&id.id_bytes());
        let mut crc = crc.to_bytes();
        if id.flags.id_crc_error {
            crc[1] ^= 0xFF;
            self.pending_bits |= CRC_ERROR;
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(&id.id_bytes());
        self.buffer.extend_from_slice(&crc);
        self.offset = 0;
        self.sector = id.cylinder;
        self.last_sector_found = id;
        Ok(self.byte_time())
    }

    fn load_track(&mut self, io: &mut ChipIo<'_>) -> Result<Ticks, FdcError> {
        let (head, density, cylinder) = (self.selected_head, self.density, self.cylinder());
        let mut buffer = vec![0; self.config.track_len(density)];
        let img = self.image(io.images).ok_or(FdcError::NotReady)?;
        img.read_track(cylinder, head, &mut buffer, density)?;
        self.buffer = buffer;
        self.offset = 0;
        Ok(self.byte_time())
    }

    /// Sector length for a length code. The 1795/1797 with L clear use the
    /// shifted table 256, 512, 1024, 128.
    fn sector_length(&self, flags: TransferFlags, n: u8) -> usize {
        if self.config.variant.has_side_select() && !flags.bit3 {
            sector_size(n.wrapping_add(1))
        } else {
            sector_size(n)
        }
    }

    fn data_ready(&mut self, io: &mut ChipIo<'_>) {
        let Some(kind) = self.transfer() else { return };
        if kind.is_read() {
            match self.buffer.get(self.offset) {
                Some(&b) => self.data = b,
                None => {
                    self.end_transfer(io);
                    return;
                }
            }
        }
        self.status |= DRQ;
        self.set_drq(true, io);
        self.arm_watchdog(io);
    }

    /// The host has moved the last byte.
    fn end_transfer(&mut self, io: &mut ChipIo<'_>) {
        let Some(cmd) = self.current else { return };
        let done = self.byte_time().times(COMPLETION_BYTES);
        let flushed = match cmd {
            Command::WriteSector(f) => self.flush_sector(f.deleted_mark, io),
            Command::WriteTrack(_) => self.flush_track(io),
            _ => Ok(()),
        };
        if let Err(e) = flushed {
            warn!("chip {}: {} failed: {e}", self.index, cmd.mnemonic());
            self.schedule_completion(self.pending_bits | e.status_bits(), done, io);
            return;
        }
        let multiple = cmd.kind() == CommandType::Type2
            && cmd.transfer_flags().is_some_and(|f| f.multiple);
        // A data CRC error ends a multi-record command on the bad record.
        if multiple && self.pending_bits & CRC_ERROR == 0 {
            self.sector = self.sector.wrapping_add(1);
            trace!("chip {}: next record {}", self.index, self.sector);
            self.arm(io, TimerEvent::Locate, done);
        } else {
            self.schedule_completion(self.pending_bits, done, io);
        }
    }

    fn flush_sector(&mut self, deleted: bool, io: &mut ChipIo<'_>) -> Result<(), FdcError> {
        let (head, sector, density) = (self.selected_head, self.sector, self.density);
        let img = self.image(io.images).ok_or(FdcError::NotReady)?;
        img.write_sector(head, sector, &self.buffer, density, deleted)?;
        Ok(())
    }

    fn flush_track(&mut self, io: &mut ChipIo<'_>) -> Result<(), FdcError> {
        let (head, density, cylinder) = (self.selected_head, self.density, self.cylinder());
        let img = self.image(io.images).ok_or(FdcError::NotReady)?;
        img.write_track(cylinder, head, &self.buffer, density)?;
        Ok(())
    }

    fn schedule_completion(&mut self, bits: u8, delay: Ticks, io: &mut ChipIo<'_>) {
        self.arm(io, TimerEvent::Misc(MiscOp::Complete { bits }), delay);
    }

    fn complete(&mut self, bits: u8, io: &mut ChipIo<'_>) {
        io.timers.cancel(&TimerKey::new(self.index, TimerSlot::Busy));
        self.set_drq(false, io);
        self.status = bits & !(BUSY | DRQ);
        self.state = State::Complete;
        debug!(
            "chip {}: command {:#04X} done, status {:#04X}",
            self.index, self.command, self.status
        );
        self.set_irq(true, io);
    }

    fn lost_data(&mut self, io: &mut ChipIo<'_>) {
        warn!("chip {}: lost data at byte {}", self.index, self.offset);
        self.complete(self.pending_bits | LOST_DATA, io);
    }

    fn arm_watchdog(&mut self, io: &mut ChipIo<'_>) {
        if let Some(timeout) = self.config.lost_data_timeout {
            self.arm(io, TimerEvent::Misc(MiscOp::LostData), timeout);
        }
    }

    // -----------------------------------------------------------------------
    // Type 4
    // -----------------------------------------------------------------------

    fn force_interrupt(&mut self, value: u8, mode: u8, io: &mut ChipIo<'_>) {
        self.cancel_timers(io);
        self.set_drq(false, io);
        if self.is_busy() {
            self.status &= !(BUSY | DRQ);
        } else {
            self.status &= HEAD_LOADED;
        }
        self.command = value;
        self.command_type = CommandType::Type4;
        self.current = Some(Command::ForceInterrupt(mode));
        self.interrupt_mode = mode;
        self.state = State::Idle;
        self.set_irq(true, io);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transfer(&self) -> Option<TransferKind> {
        match self.state {
            State::TransferBusy(kind) => Some(kind),
            _ => None,
        }
    }

    fn cylinder(&self) -> u8 {
        self.drives[self.selected_drive].cylinder
    }

    fn byte_time(&self) -> Ticks {
        self.config.byte_time(self.density)
    }

    /// The image in the selected drive.
    fn image<'r>(&self, images: &'r mut ImageRegistry) -> Option<&'r mut DiskImage> {
        self.drives[self.selected_drive]
            .image
            .and_then(|id| images.get_mut(id))
    }

    /// (ready, write protected) for the selected drive.
    fn drive_flags(&self, images: &ImageRegistry) -> (bool, bool) {
        self.drives[self.selected_drive]
            .image
            .and_then(|id| images.get(id))
            .map_or((false, false), |img| {
                (img.is_ready(), img.is_write_protected())
            })
    }

    fn arm(&self, io: &mut ChipIo<'_>, event: TimerEvent, delay: Ticks) {
        io.timers
            .schedule(TimerKey::new(self.index, event.slot()), delay, event);
    }

    fn cancel_timers(&self, io: &mut ChipIo<'_>) {
        let chip = self.index;
        io.timers.cancel_where(|k| k.chip == chip);
    }

    fn drop_drq(&mut self, io: &mut ChipIo<'_>) {
        self.status &= !DRQ;
        self.set_drq(false, io);
        io.timers.cancel(&TimerKey::new(self.index, TimerSlot::Misc));
    }

    fn set_irq(&mut self, on: bool, io: &mut ChipIo<'_>) {
        if self.irq != on {
            self.irq = on;
            let event = if on { LineEvent::IrqSet } else { LineEvent::IrqClear };
            (io.lines)(self.index, event);
        }
    }

    fn set_drq(&mut self, on: bool, io: &mut ChipIo<'_>) {
        if self.drq != on {
            self.drq = on;
            let event = if on { LineEvent::DrqSet } else { LineEvent::DrqClear };
            (io.lines)(self.index, event);
        }
    }
}

impl Observable for Wd179x {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "status" => Some(self.status.into()),
            "track" => Some(self.track.into()),
            "sector" => Some(self.sector.into()),
            "data" => Some(self.data.into()),
            "command" => Some(self.command.into()),
            "busy" => Some(self.is_busy().into()),
            "drq" => Some(self.drq.into()),
            "irq" => Some(self.irq.into()),
            "drive" => Some((self.selected_drive as u64).into()),
            "head" => Some(self.selected_head.into()),
            "density" => Some(self.density.to_string().into()),
            "state" => Some(
                match self.state {
                    State::Idle => "idle",
                    State::SeekBusy => "seek",
                    State::TransferBusy(TransferKind::ReadSector) => "read sector",
                    State::TransferBusy(TransferKind::WriteSector) => "write sector",
                    State::TransferBusy(TransferKind::ReadTrack) => "read track",
                    State::TransferBusy(TransferKind::WriteTrack) => "write track",
                    State::TransferBusy(TransferKind::ReadId) => "read address",
                    State::Complete => "complete",
                }
                .into(),
            ),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "status", "track", "sector", "data", "command", "busy", "drq", "irq", "drive",
            "head", "density", "state",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_state() {
        let chip = Wd179x::new(0, &Wd179xConfig::default());
        assert_eq!(chip.status(), NOT_READY | INDEX);
        assert_eq!(chip.density(), Density::Single);
        assert_eq!(chip.state(), State::Idle);
        assert!(!chip.irq());
    }

    #[test]
    fn length_table_follows_variant() {
        let wd1797 = Wd179x::new(
            0,
            &Wd179xConfig {
                variant: Variant::Wd1797,
                ..Wd179xConfig::default()
            },
        );
        let wd1793 = Wd179x::new(0, &Wd179xConfig::default());
        let l_clear = TransferFlags::default();
        let l_set = TransferFlags {
            bit3: true,
            ..TransferFlags::default()
        };
        assert_eq!(wd1797.sector_length(l_clear, 0), 256);
        assert_eq!(wd1797.sector_length(l_clear, 3), 128);
        assert_eq!(wd1797.sector_length(l_set, 1), 256);
        assert_eq!(wd1793.sector_length(l_clear, 1), 256);
    }

    #[test]
    fn observable_paths_answer() {
        let chip = Wd179x::new(0, &Wd179xConfig::default());
        for path in chip.query_paths() {
            assert!(chip.query(path).is_some(), "{path}");
        }
        assert_eq!(chip.query("state"), Some(Value::from("idle")));
        assert_eq!(chip.query("density"), Some(Value::from("FM")));
        assert_eq!(chip.query("nonsense"), None);
    }
}
