//! WD179x command decoding.
//!
//! The top nibble of a command byte selects the command; the low bits are
//! flags whose meaning depends on the command type.
//!
//! | Byte      | Command         | Type | Flags              |
//! |-----------|-----------------|------|--------------------|
//! | 0000 hVrr | Restore         | 1    |                    |
//! | 0001 hVrr | Seek            | 1    |                    |
//! | 001u hVrr | Step            | 1    |                    |
//! | 010u hVrr | Step In         | 1    |                    |
//! | 011u hVrr | Step Out        | 1    |                    |
//! | 100m SEC0 | Read Sector     | 2    | S/L, E, C/U        |
//! | 101m SECa | Write Sector    | 2    | S/L, E, C/U, a0    |
//! | 1100 0E00 | Read Address    | 3    | E (U on 1795/7)    |
//! | 1110 0E00 | Read Track      | 3    | E (U on 1795/7)    |
//! | 1111 0E00 | Write Track     | 3    | E (U on 1795/7)    |
//! | 1101 IIII | Force Interrupt | 4    | interrupt mode     |
//!
//! 0xFE and 0xFF never reach the chip as commands: the host glue uses them
//! to select FM and MFM recording.

use format_floppy::Density;

/// Which status layout and completion rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Type1,
    Type2,
    Type3,
    Type4,
}

/// Flags of Restore, Seek and the Step family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepFlags {
    /// Step rate field `rr`; the step period is `rr + 1` ms.
    pub rate: u8,
    /// V: verify the track ID after the last step.
    pub verify: bool,
    /// h: load the head at the start of the command.
    pub head_load: bool,
    /// u: update the track register on each step.
    pub update: bool,
}

impl StepFlags {
    fn decode(byte: u8) -> Self {
        Self {
            rate: byte & 0x03,
            verify: byte & 0x04 != 0,
            head_load: byte & 0x08 != 0,
            update: byte & 0x10 != 0,
        }
    }
}

/// Flags of Read/Write Sector, Read Address and the track commands.
///
/// Bits 3 and 1 are interpreted per chip variant: side compare flag and
/// enable on the 1791/1793, sector length table and side select on the
/// 1795/1797.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferFlags {
    /// m: multiple records.
    pub multiple: bool,
    /// Bit 3: S (expected side) or L (length table).
    pub bit3: bool,
    /// E: 15 ms head settle delay.
    pub settle: bool,
    /// Bit 1: C (side compare enable) or U (side select).
    pub bit1: bool,
    /// a0: write a deleted data mark.
    pub deleted_mark: bool,
}

impl TransferFlags {
    fn decode(byte: u8) -> Self {
        Self {
            multiple: byte & 0x10 != 0,
            bit3: byte & 0x08 != 0,
            settle: byte & 0x04 != 0,
            bit1: byte & 0x02 != 0,
            deleted_mark: byte & 0x01 != 0,
        }
    }
}

/// A decoded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restore(StepFlags),
    Seek(StepFlags),
    Step(StepFlags),
    StepIn(StepFlags),
    StepOut(StepFlags),
    ReadSector(TransferFlags),
    WriteSector(TransferFlags),
    ReadAddress(TransferFlags),
    ReadTrack(TransferFlags),
    WriteTrack(TransferFlags),
    /// Interrupt condition bits I0..I3.
    ForceInterrupt(u8),
}

/// What a byte written to the command register does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Command(Command),
    SelectDensity(Density),
}

/// Decode a command register write.
#[must_use]
pub fn decode(byte: u8) -> Decoded {
    let cmd = match byte {
        0xFE => return Decoded::SelectDensity(Density::Single),
        0xFF => return Decoded::SelectDensity(Density::Double),
        0x00..=0x0F => Command::Restore(StepFlags::decode(byte)),
        0x10..=0x1F => Command::Seek(StepFlags::decode(byte)),
        0x20..=0x3F => Command::Step(StepFlags::decode(byte)),
        0x40..=0x5F => Command::StepIn(StepFlags::decode(byte)),
        0x60..=0x7F => Command::StepOut(StepFlags::decode(byte)),
        0x80..=0x9F => Command::ReadSector(TransferFlags::decode(byte)),
        0xA0..=0xBF => Command::WriteSector(TransferFlags::decode(byte)),
        0xC0..=0xCF => Command::ReadAddress(TransferFlags::decode(byte)),
        0xD0..=0xDF => Command::ForceInterrupt(byte & 0x0F),
        0xE0..=0xEF => Command::ReadTrack(TransferFlags::decode(byte)),
        0xF0..=0xFD => Command::WriteTrack(TransferFlags::decode(byte)),
    };
    Decoded::Command(cmd)
}

impl Command {
    #[must_use]
    pub fn kind(&self) -> CommandType {
        match self {
            Command::Restore(_)
            | Command::Seek(_)
            | Command::Step(_)
            | Command::StepIn(_)
            | Command::StepOut(_) => CommandType::Type1,
            Command::ReadSector(_) | Command::WriteSector(_) => CommandType::Type2,
            Command::ReadAddress(_) | Command::ReadTrack(_) | Command::WriteTrack(_) => {
                CommandType::Type3
            }
            Command::ForceInterrupt(_) => CommandType::Type4,
        }
    }

    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Command::Restore(_) => "RESTORE",
            Command::Seek(_) => "SEEK",
            Command::Step(_) => "STEP",
            Command::StepIn(_) => "STEP IN",
            Command::StepOut(_) => "STEP OUT",
            Command::ReadSector(_) => "READ SECTOR",
            Command::WriteSector(_) => "WRITE SECTOR",
            Command::ReadAddress(_) => "READ ADDRESS",
            Command::ReadTrack(_) => "READ TRACK",
            Command::WriteTrack(_) => "WRITE TRACK",
            Command::ForceInterrupt(_) => "FORCE INTERRUPT",
        }
    }

    /// Step flags for Type 1 commands.
    #[must_use]
    pub fn step_flags(&self) -> Option<StepFlags> {
        match *self {
            Command::Restore(f)
            | Command::Seek(f)
            | Command::Step(f)
            | Command::StepIn(f)
            | Command::StepOut(f) => Some(f),
            _ => None,
        }
    }

    /// Transfer flags for Type 2 and 3 commands.
    #[must_use]
    pub fn transfer_flags(&self) -> Option<TransferFlags> {
        match *self {
            Command::ReadSector(f)
            | Command::WriteSector(f)
            | Command::ReadAddress(f)
            | Command::ReadTrack(f)
            | Command::WriteTrack(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(byte: u8) -> Command {
        match decode(byte) {
            Decoded::Command(c) => c,
            Decoded::SelectDensity(d) => panic!("{byte:#04X} selected {d}"),
        }
    }

    #[test]
    fn every_byte_decodes() {
        for b in 0..=0xFDu8 {
            let _ = cmd(b);
        }
        assert_eq!(decode(0xFE), Decoded::SelectDensity(Density::Single));
        assert_eq!(decode(0xFF), Decoded::SelectDensity(Density::Double));
    }

    #[test]
    fn type1_flags() {
        let c = cmd(0x1F);
        assert_eq!(c.kind(), CommandType::Type1);
        assert_eq!(
            c.step_flags(),
            Some(StepFlags {
                rate: 3,
                verify: true,
                head_load: true,
                update: true
            })
        );
        assert_eq!(cmd(0x35), Command::Step(StepFlags::decode(0x35)));
        assert!(cmd(0x35).step_flags().is_some_and(|f| f.update));
        assert!(matches!(cmd(0x48), Command::StepIn(_)));
        assert!(matches!(cmd(0x7B), Command::StepOut(_)));
    }

    #[test]
    fn type2_and_type3_flags() {
        let c = cmd(0xB5);
        assert_eq!(c.mnemonic(), "WRITE SECTOR");
        let f = c.transfer_flags().expect("transfer flags");
        assert!(f.multiple);
        assert!(f.settle);
        assert!(f.deleted_mark);
        assert!(!f.bit1);

        assert_eq!(cmd(0xC4).kind(), CommandType::Type3);
        assert!(matches!(cmd(0xE4), Command::ReadTrack(f) if f.settle));
        assert!(matches!(cmd(0xF4), Command::WriteTrack(_)));
    }

    #[test]
    fn force_interrupt_keeps_mode_bits() {
        assert_eq!(cmd(0xD8), Command::ForceInterrupt(0x08));
        assert_eq!(cmd(0xD0).kind(), CommandType::Type4);
    }
}
