//! CRC-16/CCITT as used by the WD179x and IBM System/34 track layouts.
//!
//! Polynomial 0x1021, MSB first, no final XOR. Every ID and data field is
//! checksummed from the address mark onwards with the register preset to
//! 0xFFFF. In MFM the three 0xA1 sync bytes ahead of the mark are part of the
//! checksum, which is why MFM fields start from [`MFM_SYNC_SEED`].

/// CCITT generator polynomial.
pub const POLY: u16 = 0x1021;

/// Register preset before the first checksummed byte.
pub const CRC_PRESET: u16 = 0xFFFF;

/// MFM sync byte written with a missing clock bit.
pub const MFM_SYNC: u8 = 0xA1;

/// Register value after `0xFFFF` has absorbed three 0xA1 sync bytes.
pub const MFM_SYNC_SEED: u16 = 0xCDB4;

/// Byte-at-a-time lookup table, generated at compile time.
pub static CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = crc_update_bitwise(0, i as u8);
        i += 1;
    }
    table
}

/// Fold one byte into the register, one bit at a time.
#[must_use]
pub const fn crc_update_bitwise(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    let mut bit = 0;
    while bit < 8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ POLY
        } else {
            crc << 1
        };
        bit += 1;
    }
    crc
}

/// Fold one byte into the register using [`CRC_TABLE`].
#[inline]
#[must_use]
pub fn crc_update(crc: u16, byte: u8) -> u16 {
    (crc << 8) ^ CRC_TABLE[usize::from((crc >> 8) as u8 ^ byte)]
}

/// Fold a run of bytes into the register.
#[must_use]
pub fn crc_slice(crc: u16, bytes: &[u8]) -> u16 {
    bytes.iter().fold(crc, |c, &b| crc_update(c, b))
}

/// Initial register for a field recorded at the given density.
#[must_use]
pub const fn field_seed(double_density: bool) -> u16 {
    if double_density {
        MFM_SYNC_SEED
    } else {
        CRC_PRESET
    }
}

/// Running CRC over one address or data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16(u16);

impl Crc16 {
    /// Start a field; MFM fields include the three sync bytes.
    #[must_use]
    pub const fn for_field(double_density: bool) -> Self {
        Self(field_seed(double_density))
    }

    pub fn push(&mut self, byte: u8) {
        self.0 = crc_update(self.0, byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.0 = crc_slice(self.0, bytes);
    }

    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Value as stored on disk (big-endian).
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_FIELD: [u8; 8] = [0xA1, 0xA1, 0xA1, 0xFE, 0x00, 0x00, 0x01, 0x01];

    #[test]
    fn implementations_agree_for_every_byte() {
        for seed in [0x0000u16, 0xFFFF, 0x1D0F, 0xCDB4, 0x8000, 0x1234] {
            for b in 0..=255u8 {
                assert_eq!(
                    crc_update_bitwise(seed, b),
                    crc_update(seed, b),
                    "seed {seed:#06X} byte {b:#04X}"
                );
            }
        }
    }

    #[test]
    fn mfm_id_reference_vector() {
        let bitwise = ID_FIELD
            .iter()
            .fold(CRC_PRESET, |c, &b| crc_update_bitwise(c, b));
        let table = crc_slice(CRC_PRESET, &ID_FIELD);
        assert_eq!(bitwise, 0xFA0C);
        assert_eq!(table, 0xFA0C);
    }

    #[test]
    fn sync_seed_matches_three_a1_bytes() {
        assert_eq!(crc_slice(CRC_PRESET, &[MFM_SYNC; 3]), MFM_SYNC_SEED);

        let mut crc = Crc16::for_field(true);
        crc.extend(&ID_FIELD[3..]);
        assert_eq!(crc.value(), 0xFA0C);
        assert_eq!(crc.to_bytes(), [0xFA, 0x0C]);
    }

    #[test]
    fn check_string() {
        // CRC-16/CCITT-FALSE check value.
        assert_eq!(crc_slice(CRC_PRESET, b"123456789"), 0x29B1);
    }
}
