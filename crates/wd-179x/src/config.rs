//! Chip variant and timing configuration.

use emu_core::Ticks;
use format_floppy::Density;

/// Members of the WD179x family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Variant {
    Wd1791,
    #[default]
    Wd1793,
    Wd1795,
    Wd1797,
}

impl Variant {
    /// 1795/1797 drive a side select output from command bit 1 and use
    /// bit 3 to pick the sector length table.
    #[must_use]
    pub fn has_side_select(self) -> bool {
        matches!(self, Variant::Wd1795 | Variant::Wd1797)
    }

    /// 1791/1795 present an inverted data bus. The host glue applies the
    /// inversion; the chip model always works in true logic.
    #[must_use]
    pub fn inverted_bus(self) -> bool {
        matches!(self, Variant::Wd1791 | Variant::Wd1795)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Variant::Wd1791 => "WD1791",
            Variant::Wd1793 => "WD1793",
            Variant::Wd1795 => "WD1795",
            Variant::Wd1797 => "WD1797",
        }
    }
}

/// Controller configuration.
///
/// Defaults model a 5.25" drive at 300 rpm with a 1 MHz controller clock.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Wd179xConfig {
    pub variant: Variant,
    /// One disk revolution.
    pub rotation: Ticks,
    pub fm_byte_time: Ticks,
    pub mfm_byte_time: Ticks,
    /// Read/Write Track buffer sizes.
    pub fm_track_len: usize,
    pub mfm_track_len: usize,
    /// Delay before a Record Not Found completion.
    pub rnf_delay: Ticks,
    /// Delay before completing a command on a drive that is not ready.
    pub not_ready_delay: Ticks,
    /// Head settle time for the E flag and seek verify.
    pub settle_delay: Ticks,
    /// Terminate with Lost Data when DRQ goes unserviced this long.
    pub lost_data_timeout: Option<Ticks>,
    /// Index pulses to search through before giving up.
    pub verify_revolutions: u8,
}

impl Wd179xConfig {
    #[must_use]
    pub fn byte_time(&self, density: Density) -> Ticks {
        match density {
            Density::Single => self.fm_byte_time,
            Density::Double => self.mfm_byte_time,
        }
    }

    #[must_use]
    pub fn track_len(&self, density: Density) -> usize {
        match density {
            Density::Single => self.fm_track_len,
            Density::Double => self.mfm_track_len,
        }
    }
}

impl Default for Wd179xConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            rotation: Ticks::from_millis(200),
            fm_byte_time: Ticks::from_micros(64),
            mfm_byte_time: Ticks::from_micros(32),
            fm_track_len: 3125,
            mfm_track_len: 6250,
            rnf_delay: Ticks::from_millis(1000),
            not_ready_delay: Ticks::from_millis(1),
            settle_delay: Ticks::from_millis(15),
            lost_data_timeout: None,
            verify_revolutions: 5,
        }
    }
}
