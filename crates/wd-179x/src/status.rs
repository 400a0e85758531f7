//! Status register bits and the controller error taxonomy.
//!
//! | Bit | Type 1          | Type 2/3 read          | Type 2/3 write  |
//! |-----|-----------------|------------------------|-----------------|
//! | 7   | Not Ready       | Not Ready              | Not Ready       |
//! | 6   | Write Protect   | 0                      | Write Protect   |
//! | 5   | Head Loaded     | Record Type (deleted)  | Write Fault     |
//! | 4   | Seek Error      | Record Not Found       | Record Not Found|
//! | 3   | CRC Error       | CRC Error              | CRC Error       |
//! | 2   | Track 0         | Lost Data              | Lost Data       |
//! | 1   | Index           | DRQ                    | DRQ             |
//! | 0   | Busy            | Busy                   | Busy            |

use format_floppy::CrcField;
use thiserror::Error;

pub const NOT_READY: u8 = 0x80;
pub const WRITE_PROTECT: u8 = 0x40;
pub const HEAD_LOADED: u8 = 0x20;
pub const RECORD_TYPE: u8 = 0x20;
pub const SEEK_ERROR: u8 = 0x10;
pub const RECORD_NOT_FOUND: u8 = 0x10;
pub const CRC_ERROR: u8 = 0x08;
pub const TRACK_0: u8 = 0x04;
pub const LOST_DATA: u8 = 0x04;
pub const INDEX: u8 = 0x02;
pub const DRQ: u8 = 0x02;
pub const BUSY: u8 = 0x01;

/// Conditions that end a command abnormally.
///
/// None of these is returned from the register interface: each becomes
/// status bits and a delayed interrupt.
#[derive(Debug, Error)]
pub enum FdcError {
    #[error("drive not ready")]
    NotReady,

    #[error("seek error: track ID not verified")]
    SeekError,

    #[error("record not found")]
    RecordNotFound,

    #[error("CRC error in {0}")]
    Crc(CrcField),

    #[error("write protected")]
    WriteProtected,

    #[error("lost data")]
    LostData,

    #[error("address mark missing")]
    AddressMarkMissing,

    #[error("unrecognised disk image format")]
    FormatUnrecognized,

    /// Image-level failures with no dedicated status bit.
    #[error("image error: {0}")]
    Image(format_floppy::Error),
}

impl FdcError {
    /// Status bits this condition sets.
    #[must_use]
    pub fn status_bits(&self) -> u8 {
        match self {
            FdcError::NotReady | FdcError::FormatUnrecognized => NOT_READY,
            FdcError::SeekError => SEEK_ERROR,
            FdcError::RecordNotFound | FdcError::AddressMarkMissing | FdcError::Image(_) => {
                RECORD_NOT_FOUND
            }
            FdcError::Crc(CrcField::Id) => RECORD_NOT_FOUND | CRC_ERROR,
            FdcError::Crc(CrcField::Data) => CRC_ERROR,
            FdcError::WriteProtected => WRITE_PROTECT,
            FdcError::LostData => LOST_DATA,
        }
    }
}

impl From<format_floppy::Error> for FdcError {
    fn from(e: format_floppy::Error) -> Self {
        use format_floppy::Error as E;
        match e {
            E::NotReady => FdcError::NotReady,
            E::RecordNotFound => FdcError::RecordNotFound,
            E::Crc(field) => FdcError::Crc(field),
            E::WriteProtected => FdcError::WriteProtected,
            E::AddressMarkMissing => FdcError::AddressMarkMissing,
            E::FormatUnrecognized => FdcError::FormatUnrecognized,
            other => FdcError::Image(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_map_to_status_bits() {
        let bits = |e: format_floppy::Error| FdcError::from(e).status_bits();
        assert_eq!(bits(format_floppy::Error::RecordNotFound), RECORD_NOT_FOUND);
        assert_eq!(bits(format_floppy::Error::Crc(CrcField::Id)), 0x18);
        assert_eq!(bits(format_floppy::Error::WriteProtected), WRITE_PROTECT);
        assert_eq!(bits(format_floppy::Error::FormatUnrecognized), NOT_READY);
        assert_eq!(bits(format_floppy::Error::GeometryLocked), RECORD_NOT_FOUND);
    }
}
