//! Raw track streams: IBM-style generator, write-track parser and a
//! bounds-checked cursor over encoded track bytes.
//!
//! # Layouts
//!
//! | Field          | FM                   | MFM                          |
//! |----------------|----------------------|------------------------------|
//! | Gap 4a         | 40 x FF              | 80 x 4E                      |
//! | Index sync     | 6 x 00, FC           | 12 x 00, 3 x C2, FC          |
//! | Gap 1          | 26 x FF              | 50 x 4E                      |
//! | ID sync        | 6 x 00               | 12 x 00, 3 x A1              |
//! | ID field       | FE C H R N CRC       | FE C H R N CRC               |
//! | Gap 2          | 11 x FF, 6 x 00      | 22 x 4E, 12 x 00, 3 x A1     |
//! | Data field     | DAM data CRC         | DAM data CRC                 |
//! | Gap 3          | 27 x FF              | 54 x 4E                      |
//! | Gap 4b         | FF to end            | 4E to end                    |

use log::trace;

use crate::chrn::{ChrnId, Density, IDAM, sector_size};
use crate::crc::{Crc16, MFM_SYNC};

/// Index address mark.
pub const INDEX_MARK: u8 = 0xFC;
/// MFM index sync byte.
pub const MFM_INDEX_SYNC: u8 = 0xC2;

/// Write-track control byte: MFM A1 sync with CRC preset.
pub const WT_SYNC_A1: u8 = 0xF5;
/// Write-track control byte: MFM C2 index sync.
pub const WT_SYNC_C2: u8 = 0xF6;
/// Write-track control byte: emit the two CRC bytes.
pub const WT_CRC: u8 = 0xF7;

struct Gaps {
    gap4a: usize,
    index_sync: usize,
    gap1: usize,
    sync: usize,
    gap2: usize,
    gap3: usize,
}

const FM_GAPS: Gaps = Gaps {
    gap4a: 40,
    index_sync: 6,
    gap1: 26,
    sync: 6,
    gap2: 11,
    gap3: 27,
};

const MFM_GAPS: Gaps = Gaps {
    gap4a: 80,
    index_sync: 12,
    gap1: 50,
    sync: 12,
    gap2: 22,
    gap3: 54,
};

/// Builds the byte stream a Read Track command sees.
///
/// Output past `capacity` is dropped; [`TrackWriter::finish`] pads the rest
/// with the density's gap byte.
#[derive(Debug)]
pub struct TrackWriter {
    density: Density,
    capacity: usize,
    buf: Vec<u8>,
    id_marks: Vec<usize>,
}

impl TrackWriter {
    #[must_use]
    pub fn new(density: Density, capacity: usize) -> Self {
        Self {
            density,
            capacity,
            buf: Vec::with_capacity(capacity),
            id_marks: Vec::new(),
        }
    }

    fn gaps(&self) -> &'static Gaps {
        match self.density {
            Density::Single => &FM_GAPS,
            Density::Double => &MFM_GAPS,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.buf.len() < self.capacity {
            self.buf.push(byte);
        }
    }

    fn fill(&mut self, byte: u8, count: usize) {
        for _ in 0..count {
            self.push(byte);
        }
    }

    fn sync(&mut self) {
        let g = self.gaps();
        self.fill(0x00, g.sync);
        if self.density.is_double() {
            self.fill(MFM_SYNC, 3);
        }
    }

    /// Gap 4a, index mark and gap 1.
    pub fn index_gap(&mut self) {
        let g = self.gaps();
        let gap = self.density.gap_byte();
        self.fill(gap, g.gap4a);
        self.fill(0x00, g.index_sync);
        if self.density.is_double() {
            self.fill(MFM_INDEX_SYNC, 3);
        }
        self.push(INDEX_MARK);
        self.fill(gap, g.gap1);
    }

    /// One ID field and data field. CRC error flags in `id` are reproduced
    /// by recording a corrupted CRC.
    pub fn sector(&mut self, id: &ChrnId, dam: u8, data: &[u8]) {
        let g = self.gaps();
        let gap = self.density.gap_byte();
        let dd = self.density.is_double();

        self.sync();
        if self.buf.len() < self.capacity {
            self.id_marks.push(self.buf.len());
        }
        let mut crc = Crc16::for_field(dd);
        crc.push(IDAM);
        crc.extend(&id.id_bytes());
        self.push(IDAM);
        for b in id.id_bytes() {
            self.push(b);
        }
        self.crc(crc, id.flags.id_crc_error);

        self.fill(gap, g.gap2);
        self.sync();
        let mut crc = Crc16::for_field(dd);
        crc.push(dam);
        crc.extend(data);
        self.push(dam);
        for &b in data {
            self.push(b);
        }
        self.crc(crc, id.flags.data_crc_error);
        self.fill(gap, g.gap3);
    }

    fn crc(&mut self, crc: Crc16, corrupt: bool) {
        let [hi, lo] = crc.to_bytes();
        self.push(hi);
        self.push(if corrupt { lo ^ 0xFF } else { lo });
    }

    /// Stream offsets of every ID address mark written so far.
    #[must_use]
    pub fn id_marks(&self) -> &[usize] {
        &self.id_marks
    }

    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let gap = self.density.gap_byte();
        self.buf.resize(self.capacity, gap);
        self.buf
    }
}

/// A sector recovered from a write-track stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSector {
    pub id: ChrnId,
    /// Offset of the ID address mark in [`ParsedTrack::bytes`].
    pub id_mark: usize,
    pub dam: u8,
    pub data: Vec<u8>,
}

/// A write-track stream after control bytes have been replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTrack {
    /// Bytes as they land on the disk.
    pub bytes: Vec<u8>,
    /// Offsets of every ID address mark, including IDs without data.
    pub id_marks: Vec<usize>,
    /// Complete ID + data records in stream order.
    pub sectors: Vec<ParsedSector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Idle,
    Cylinder,
    Head,
    Record,
    Length,
    IdCrc,
    WaitDam,
    Data { remaining: usize },
    DataCrc,
}

/// Parse a Write Track data stream.
///
/// 0xF5 (MFM) becomes A1 and presets the CRC, 0xF6 (MFM) becomes C2 and
/// 0xF7 becomes the two CRC bytes; in FM the CRC is preset at each address
/// mark. Stream CRCs are always recomputed. Data field bytes are taken
/// literally.
#[must_use]
pub fn parse_write_track(stream: &[u8], density: Density) -> ParsedTrack {
    let dd = density.is_double();
    let mut out = ParsedTrack::default();
    let mut state = ParseState::Idle;
    let mut crc = Crc16::for_field(false);
    let mut in_sync = false;
    let mut id = ChrnId::default();
    let mut id_mark = 0;
    let mut dam = 0;
    let mut data = Vec::new();

    for &byte in stream {
        if let ParseState::Data { remaining } = state {
            out.bytes.push(byte);
            crc.push(byte);
            data.push(byte);
            state = if remaining > 1 {
                ParseState::Data {
                    remaining: remaining - 1,
                }
            } else {
                ParseState::DataCrc
            };
            continue;
        }

        if byte == WT_CRC {
            out.bytes.extend_from_slice(&crc.to_bytes());
            in_sync = false;
            state = match state {
                ParseState::IdCrc => ParseState::WaitDam,
                ParseState::DataCrc => {
                    trace!("write track: sector {:?} dam {dam:#04X}", id.id_bytes());
                    out.sectors.push(ParsedSector {
                        id,
                        id_mark,
                        dam,
                        data: std::mem::take(&mut data),
                    });
                    ParseState::Idle
                }
                other => other,
            };
            continue;
        }

        let written = match byte {
            WT_SYNC_A1 if dd => {
                if !in_sync {
                    crc = Crc16::for_field(false);
                }
                in_sync = true;
                crc.push(MFM_SYNC);
                out.bytes.push(MFM_SYNC);
                continue;
            }
            WT_SYNC_C2 if dd => MFM_INDEX_SYNC,
            _ => byte,
        };
        in_sync = false;

        let is_mark = match state {
            ParseState::Idle | ParseState::WaitDam => {
                written == IDAM || (state == ParseState::WaitDam && (0xF8..=0xFB).contains(&written))
            }
            _ => false,
        };
        if is_mark && !dd {
            crc = Crc16::for_field(false);
        }
        let pos = out.bytes.len();
        out.bytes.push(written);
        crc.push(written);

        state = match state {
            ParseState::Idle | ParseState::WaitDam if written == IDAM => {
                id_mark = pos;
                out.id_marks.push(pos);
                id = ChrnId::default();
                ParseState::Cylinder
            }
            ParseState::WaitDam if is_mark => {
                dam = written;
                data.clear();
                ParseState::Data {
                    remaining: sector_size(id.size_code),
                }
            }
            ParseState::Cylinder => {
                id.cylinder = written;
                ParseState::Head
            }
            ParseState::Head => {
                id.head = written;
                ParseState::Record
            }
            ParseState::Record => {
                id.record = written;
                ParseState::Length
            }
            ParseState::Length => {
                id.size_code = written;
                ParseState::IdCrc
            }
            // An ID or data field not closed by F7 is abandoned.
            ParseState::IdCrc | ParseState::DataCrc => ParseState::Idle,
            other => other,
        };
    }
    out
}

/// Read cursor over an encoded track that steps one or two bytes per cell.
#[derive(Debug, Clone)]
pub struct TrackCursor<'a> {
    data: &'a [u8],
    pos: usize,
    step: usize,
}

impl<'a> TrackCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], pos: usize, step: usize) -> Self {
        Self {
            data,
            pos,
            step: step.max(1),
        }
    }

    /// Byte offset of the next cell.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Take one cell, or `None` at the end of the track.
    pub fn next_cell(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += self.step;
        Some(b)
    }

    /// Fill `out` cell by cell; false if the track ends first.
    pub fn read_cells(&mut self, out: &mut [u8]) -> bool {
        for slot in out.iter_mut() {
            match self.next_cell() {
                Some(b) => *slot = b,
                None => return false,
            }
        }
        true
    }

    /// Advance to the next cell holding one of `marks`, within `limit` cells.
    pub fn seek_mark(&mut self, marks: std::ops::RangeInclusive<u8>, limit: usize) -> Option<u8> {
        for _ in 0..limit {
            let b = self.next_cell()?;
            if marks.contains(&b) {
                return Some(b);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::{CRC_PRESET, crc_slice};

    fn mfm_format_stream(records: &[u8]) -> Vec<u8> {
        let mut s = vec![0x4E; 80];
        for &r in records {
            s.extend_from_slice(&[0x00; 12]);
            s.extend_from_slice(&[WT_SYNC_A1; 3]);
            s.extend_from_slice(&[IDAM, 2, 0, r, 1, WT_CRC]);
            s.extend_from_slice(&[0x4E; 22]);
            s.extend_from_slice(&[0x00; 12]);
            s.extend_from_slice(&[WT_SYNC_A1; 3]);
            s.push(0xFB);
            s.extend_from_slice(&[0xE5; 256]);
            s.push(WT_CRC);
            s.extend_from_slice(&[0x4E; 54]);
        }
        s
    }

    #[test]
    fn parser_recomputes_mfm_crcs() {
        let parsed = parse_write_track(&mfm_format_stream(&[1, 2]), Density::Double);
        assert_eq!(parsed.sectors.len(), 2);
        assert_eq!(parsed.id_marks.len(), 2);

        let s = &parsed.sectors[0];
        assert_eq!(s.id.id_bytes(), [2, 0, 1, 1]);
        assert_eq!(s.dam, 0xFB);
        assert_eq!(s.data.len(), 256);

        let m = s.id_mark;
        assert_eq!(&parsed.bytes[m - 3..m], &[0xA1; 3]);
        let crc = crc_slice(CRC_PRESET, &parsed.bytes[m - 3..m + 5]);
        assert_eq!(&parsed.bytes[m + 5..m + 7], &crc.to_be_bytes());
    }

    #[test]
    fn parser_fm_presets_at_mark() {
        let mut s = vec![0xFF; 10];
        s.extend_from_slice(&[0x00; 6]);
        s.extend_from_slice(&[IDAM, 0, 0, 1, 0, WT_CRC]);
        s.extend_from_slice(&[0xFF; 11]);
        s.extend_from_slice(&[0x00; 6]);
        s.push(0xF8);
        s.extend_from_slice(&[0x11; 128]);
        s.push(WT_CRC);

        let parsed = parse_write_track(&s, Density::Single);
        assert_eq!(parsed.sectors.len(), 1);
        assert_eq!(parsed.sectors[0].dam, 0xF8);
        let m = parsed.sectors[0].id_mark;
        let crc = crc_slice(CRC_PRESET, &parsed.bytes[m..m + 5]);
        assert_eq!(&parsed.bytes[m + 5..m + 7], &crc.to_be_bytes());
    }

    #[test]
    fn id_without_crc_is_dropped() {
        let s = [IDAM, 0, 0, 1, 1, 0x4E, 0xFB, 0x00];
        let parsed = parse_write_track(&s, Density::Double);
        assert!(parsed.sectors.is_empty());
        assert_eq!(parsed.id_marks, vec![0]);
    }

    #[test]
    fn generator_layout_and_crc() {
        let mut w = TrackWriter::new(Density::Single, 3125);
        w.index_gap();
        let id = ChrnId::new(0, 0, 1, 0);
        w.sector(&id, 0xFB, &[0xE5; 128]);
        let marks = w.id_marks().to_vec();
        let track = w.finish();

        assert_eq!(track.len(), 3125);
        assert_eq!(track[40 + 6], INDEX_MARK);
        let m = marks[0];
        assert_eq!(m, 40 + 6 + 1 + 26 + 6);
        assert_eq!(&track[m..m + 5], &[IDAM, 0, 0, 1, 0]);
        let crc = crc_slice(CRC_PRESET, &track[m..m + 5]);
        assert_eq!(&track[m + 5..m + 7], &crc.to_be_bytes());
        assert_eq!(*track.last().expect("non-empty"), 0xFF);
    }

    #[test]
    fn generator_truncates_at_capacity() {
        let mut w = TrackWriter::new(Density::Double, 100);
        w.index_gap();
        w.sector(&ChrnId::new(0, 0, 1, 1), 0xFB, &[0; 256]);
        assert_eq!(w.finish().len(), 100);
    }

    #[test]
    fn cursor_steps_and_bounds() {
        let data = [0xFE, 0xFE, 1, 1, 2, 2];
        let mut c = TrackCursor::new(&data, 0, 2);
        assert_eq!(c.next_cell(), Some(0xFE));
        let mut out = [0u8; 2];
        assert!(c.read_cells(&mut out));
        assert_eq!(out, [1, 2]);
        assert_eq!(c.next_cell(), None);
    }
}
