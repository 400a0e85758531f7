use thiserror::Error;

/// Result type alias for format layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which field of a sector failed its CRC check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcField {
    Id,
    Data,
}

impl std::fmt::Display for CrcField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrcField::Id => write!(f, "ID field"),
            CrcField::Data => write!(f, "data field"),
        }
    }
}

/// Errors raised by the image handle and the format drivers.
///
/// None of these abort emulation: the controller turns each one into a
/// status bit. Only [`Error::FormatUnrecognized`] makes an image unusable.
#[derive(Debug, Error)]
pub enum Error {
    /// No image behind the handle, or the drive was marked not ready.
    #[error("drive not ready")]
    NotReady,

    /// The requested sector or track is not on the current cylinder.
    #[error("record not found")]
    RecordNotFound,

    /// A CRC check failed where no data could be delivered.
    #[error("CRC error in {0}")]
    Crc(CrcField),

    #[error("disk is write protected")]
    WriteProtected,

    #[error("address mark missing")]
    AddressMarkMissing,

    /// Neither JV3 nor DMK, and no host geometry to fall back on.
    #[error("unrecognised image format")]
    FormatUnrecognized,

    /// Geometry changes are refused once a format cache exists.
    #[error("geometry cannot change after the format cache is built")]
    GeometryLocked,

    /// A structure in the image file points somewhere impossible.
    #[error("corrupt image at offset {offset}: {reason}")]
    Corrupt {
        offset: usize,
        reason: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(offset: usize, reason: &'static str) -> Self {
        Error::Corrupt { offset, reason }
    }
}
