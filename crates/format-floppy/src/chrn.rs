//! Sector identity as seen by the controller after a search.

/// Recording density of a field or track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Density {
    /// FM.
    #[default]
    Single,
    /// MFM.
    Double,
}

impl Density {
    #[must_use]
    pub const fn is_double(self) -> bool {
        matches!(self, Density::Double)
    }

    #[must_use]
    pub const fn from_double(double: bool) -> Self {
        if double { Density::Double } else { Density::Single }
    }

    /// Gap filler byte for this density.
    #[must_use]
    pub const fn gap_byte(self) -> u8 {
        match self {
            Density::Single => 0xFF,
            Density::Double => 0x4E,
        }
    }
}

impl std::fmt::Display for Density {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Density::Single => write!(f, "FM"),
            Density::Double => write!(f, "MFM"),
        }
    }
}

/// Data address marks.
pub const DAM_NORMAL: u8 = 0xFB;
pub const DAM_DELETED: u8 = 0xF8;
/// ID address mark.
pub const IDAM: u8 = 0xFE;

/// Whether a data address mark flags a deleted record.
///
/// 0xF8 and 0xF9 are deleted, 0xFA and 0xFB are normal data.
#[must_use]
pub const fn dam_is_deleted(dam: u8) -> bool {
    dam & 0x02 == 0
}

/// The data address mark to record for a deleted or normal write.
#[must_use]
pub const fn dam_for(deleted: bool) -> u8 {
    if deleted { DAM_DELETED } else { DAM_NORMAL }
}

/// Sector length in bytes for an IBM length code.
#[must_use]
pub const fn sector_size(n: u8) -> usize {
    128 << (n & 3)
}

/// IBM length code for a sector length, if it is one of 128/256/512/1024.
#[must_use]
pub const fn size_code(len: usize) -> Option<u8> {
    match len {
        128 => Some(0),
        256 => Some(1),
        512 => Some(2),
        1024 => Some(3),
        _ => None,
    }
}

/// Status flags attached to a located sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdFlags {
    /// The data field carries a deleted data mark.
    pub deleted: bool,
    pub id_crc_error: bool,
    pub data_crc_error: bool,
    /// The ID field has no data field behind it.
    pub address_mark_missing: bool,
}

impl IdFlags {
    #[must_use]
    pub const fn any_crc_error(self) -> bool {
        self.id_crc_error || self.data_crc_error
    }
}

/// Result of a find or next-sector operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChrnId {
    pub cylinder: u8,
    pub head: u8,
    pub record: u8,
    /// Length code N.
    pub size_code: u8,
    /// Driver-specific handle of the data field (table entry, track
    /// offset or LBA).
    pub data_id: usize,
    pub flags: IdFlags,
}

impl ChrnId {
    #[must_use]
    pub const fn new(cylinder: u8, head: u8, record: u8, size_code: u8) -> Self {
        Self {
            cylinder,
            head,
            record,
            size_code,
            data_id: 0,
            flags: IdFlags {
                deleted: false,
                id_crc_error: false,
                data_crc_error: false,
                address_mark_missing: false,
            },
        }
    }

    /// Data field length given by N.
    #[must_use]
    pub const fn sector_size(&self) -> usize {
        sector_size(self.size_code)
    }

    /// The four ID bytes as recorded on disk.
    #[must_use]
    pub const fn id_bytes(&self) -> [u8; 4] {
        [self.cylinder, self.head, self.record, self.size_code]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_marks() {
        assert!(dam_is_deleted(0xF8));
        assert!(dam_is_deleted(0xF9));
        assert!(!dam_is_deleted(0xFA));
        assert!(!dam_is_deleted(0xFB));
        assert_eq!(dam_for(true), 0xF8);
        assert_eq!(dam_for(false), 0xFB);
    }

    #[test]
    fn size_codes() {
        assert_eq!(sector_size(0), 128);
        assert_eq!(sector_size(3), 1024);
        assert_eq!(sector_size(5), 256, "only the low two bits count");
        assert_eq!(size_code(512), Some(2));
        assert_eq!(size_code(300), None);
    }
}
