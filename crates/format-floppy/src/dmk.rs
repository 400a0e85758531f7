//! DMK track images.
//!
//! # Format
//!
//! A 16-byte header is followed by `cylinders * heads` fixed-length track
//! blocks. Each block opens with a table of 64 little-endian IDAM pointers
//! (bit 15 = double density, low 14 bits = offset of the 0xFE mark from the
//! start of the block, 0 = end of list), followed by the encoded track bytes.
//! Single-density bytes are stored twice unless the header says otherwise.
//!
//! | Offset | Size | Field                                        |
//! |--------|------|----------------------------------------------|
//! | 0      | 1    | write protect (0xFF = protected)             |
//! | 1      | 1    | cylinders                                    |
//! | 2      | 2    | track block length, LE                       |
//! | 4      | 1    | flags                                        |
//! | 5      | 7    | reserved                                     |
//! | 12     | 4    | real-disk marker                             |

use log::{debug, trace, warn};

use crate::chrn::{ChrnId, Density, IDAM, dam_for, dam_is_deleted};
use crate::crc::Crc16;
use crate::image::{Media, RotationCursor};
use crate::track::{TrackCursor, parse_write_track};
use crate::{CrcField, Error, Result};

pub const DMK_HEADER_LEN: usize = 16;
/// IDAM pointer table at the start of each track block.
pub const DMK_IDAM_TABLE_LEN: usize = 128;
pub const DMK_MAX_SECTORS: usize = 64;
pub const DMK_MIN_TRACK_LEN: usize = 1024;
pub const DMK_MAX_TRACK_LEN: usize = 0x7FFF;

pub const DMK_SINGLE_SIDED: u8 = 0x10;
pub const DMK_SD_ONE_BYTE: u8 = 0x40;
pub const DMK_IGNORE_DENSITY: u8 = 0x80;

pub const IDAM_DOUBLE: u16 = 0x8000;
pub const IDAM_OFFSET_MASK: u16 = 0x3FFF;

/// Cells searched after an ID field for its data address mark.
const FM_DAM_WINDOW: usize = 30;
const MFM_DAM_WINDOW: usize = 43;

/// Parsed 16-byte DMK header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmkHeader {
    pub write_protected: bool,
    pub cylinders: u8,
    pub track_len: usize,
    pub flags: u8,
}

impl DmkHeader {
    #[must_use]
    pub fn parse(raw: &[u8; DMK_HEADER_LEN]) -> Self {
        Self {
            write_protected: raw[0] == 0xFF,
            cylinders: raw[1],
            track_len: usize::from(u16::from_le_bytes([raw[2], raw[3]])),
            flags: raw[4],
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; DMK_HEADER_LEN] {
        let mut raw = [0u8; DMK_HEADER_LEN];
        raw[0] = if self.write_protected { 0xFF } else { 0x00 };
        raw[1] = self.cylinders;
        raw[2..4].copy_from_slice(&(self.track_len as u16).to_le_bytes());
        raw[4] = self.flags;
        raw
    }

    #[must_use]
    pub fn heads(&self) -> u8 {
        if self.flags & DMK_SINGLE_SIDED != 0 { 1 } else { 2 }
    }

    /// Whether the header could describe a file of `file_size` bytes.
    #[must_use]
    pub fn plausible(&self, file_size: u64) -> bool {
        (DMK_MIN_TRACK_LEN..=DMK_MAX_TRACK_LEN).contains(&self.track_len)
            && file_size >= DMK_HEADER_LEN as u64
            && (file_size - DMK_HEADER_LEN as u64) % self.track_len as u64 == 0
    }
}

/// IDAM table entry for an ID mark at `pos`, or `None` when the offset does
/// not fit in 14 bits.
fn idam_pointer(pos: usize, double: bool) -> Option<u16> {
    let offset = u16::try_from(pos).ok().filter(|&o| o <= IDAM_OFFSET_MASK)?;
    Some(if double { offset | IDAM_DOUBLE } else { offset })
}

/// A usable IDAM table entry.
#[derive(Debug, Clone, Copy)]
struct Idam {
    offset: usize,
    double: bool,
}

/// Valid entries of a track's IDAM table. Pointers past the block or not at
/// an 0xFE byte are skipped.
fn idams(track: &[u8]) -> Vec<Idam> {
    let mut out = Vec::new();
    for i in 0..DMK_MAX_SECTORS {
        let Some(raw) = track.get(2 * i..2 * i + 2) else {
            break;
        };
        let v = u16::from_le_bytes([raw[0], raw[1]]);
        if v == 0 {
            break;
        }
        let offset = usize::from(v & IDAM_OFFSET_MASK);
        if offset < DMK_IDAM_TABLE_LEN || track.get(offset) != Some(&IDAM) {
            warn!("DMK IDAM pointer {v:#06X} does not reach an ID mark");
            continue;
        }
        out.push(Idam {
            offset,
            double: v & IDAM_DOUBLE != 0,
        });
    }
    out
}

#[derive(Debug)]
pub(crate) struct DmkCache {
    pub(crate) header: DmkHeader,
    tracks: Vec<Option<Vec<u8>>>,
}

/// An ID field found on a track, with its data mark if one follows.
#[derive(Debug, Clone, Copy)]
struct Located {
    chrn: ChrnId,
    double: bool,
    dam_pos: Option<usize>,
}

impl DmkCache {
    pub(crate) fn load(media: &mut Media) -> Result<Self> {
        let mut raw = [0u8; DMK_HEADER_LEN];
        if media.read(0, &mut raw)? < DMK_HEADER_LEN {
            return Err(Error::corrupt(0, "DMK header truncated"));
        }
        let header = DmkHeader::parse(&raw);
        let count = usize::from(header.cylinders) * usize::from(header.heads());
        debug!(
            "DMK: {} cylinders, {} heads, track length {}, flags {:#04X}",
            header.cylinders,
            header.heads(),
            header.track_len,
            header.flags
        );
        Ok(Self {
            header,
            tracks: vec![None; count],
        })
    }

    fn slot(&self, cylinder: u8, head: u8) -> Option<usize> {
        if cylinder >= self.header.cylinders || head >= self.header.heads() {
            return None;
        }
        Some(usize::from(cylinder) * usize::from(self.header.heads()) + usize::from(head))
    }

    fn block_offset(&self, slot: usize) -> u64 {
        (DMK_HEADER_LEN + slot * self.header.track_len) as u64
    }

    /// Cells per byte for a field recorded at the given density.
    fn step(&self, double: bool) -> usize {
        if double || self.header.flags & (DMK_SD_ONE_BYTE | DMK_IGNORE_DENSITY) != 0 {
            1
        } else {
            2
        }
    }

    fn accepts(&self, idam_double: bool, density: Density) -> bool {
        self.header.flags & DMK_IGNORE_DENSITY != 0 || idam_double == density.is_double()
    }

    fn track(&mut self, media: &mut Media, cylinder: u8, head: u8) -> Result<&mut Vec<u8>> {
        let slot = self.slot(cylinder, head).ok_or(Error::RecordNotFound)?;
        if self.tracks[slot].is_none() {
            let mut buf = vec![0u8; self.header.track_len];
            media.read_padded(self.block_offset(slot), &mut buf, 0)?;
            trace!("DMK load C{cylinder} H{head}");
            self.tracks[slot] = Some(buf);
        }
        self.tracks[slot].as_mut().ok_or(Error::RecordNotFound)
    }

    fn store_track(&mut self, media: &mut Media, cylinder: u8, head: u8) -> Result<()> {
        let slot = self.slot(cylinder, head).ok_or(Error::RecordNotFound)?;
        let offset = self.block_offset(slot);
        if let Some(track) = &self.tracks[slot] {
            media.write(offset, track)?;
        }
        Ok(())
    }

    /// Decode the ID field at `idam` and look for its data mark.
    fn decode(&self, track: &[u8], idam: Idam) -> Option<Located> {
        let step = self.step(idam.double);
        let mut cur = TrackCursor::new(track, idam.offset, step);
        let mut field = [0u8; 7];
        if !cur.read_cells(&mut field) {
            warn!("DMK ID field at {} runs off the track", idam.offset);
            return None;
        }
        let mut crc = Crc16::for_field(idam.double);
        crc.extend(&field[..5]);
        let stored = u16::from_be_bytes([field[5], field[6]]);

        let mut chrn = ChrnId::new(field[1], field[2], field[3], field[4]);
        chrn.flags.id_crc_error = crc.value() != stored;

        let window = if idam.double { MFM_DAM_WINDOW } else { FM_DAM_WINDOW };
        let dam_pos = cur
            .seek_mark(0xF8..=0xFB, window)
            .map(|dam| {
                chrn.flags.deleted = dam_is_deleted(dam);
                cur.pos() - step
            });
        chrn.flags.address_mark_missing = dam_pos.is_none();
        chrn.data_id = dam_pos.unwrap_or(idam.offset);
        Some(Located {
            chrn,
            double: idam.double,
            dam_pos,
        })
    }

    /// First ID on the track with record `record` and a good ID CRC.
    fn locate(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        record: u8,
        density: Density,
    ) -> Result<Located> {
        self.track(media, cylinder, head)?;
        let slot = self.slot(cylinder, head).ok_or(Error::RecordNotFound)?;
        let track = self.tracks[slot].as_deref().ok_or(Error::RecordNotFound)?;
        let mut bad_id = false;
        for idam in idams(track) {
            if !self.accepts(idam.double, density) {
                continue;
            }
            let Some(found) = self.decode(track, idam) else {
                continue;
            };
            if found.chrn.record != record {
                continue;
            }
            if found.chrn.flags.id_crc_error {
                bad_id = true;
                continue;
            }
            return Ok(found);
        }
        Err(if bad_id {
            Error::Crc(CrcField::Id)
        } else {
            Error::RecordNotFound
        })
    }

    pub(crate) fn next_id(
        &mut self,
        media: &mut Media,
        rotation: &mut RotationCursor,
        cylinder: u8,
        head: u8,
        density: Density,
    ) -> Result<ChrnId> {
        self.track(media, cylinder, head)?;
        let slot = self.slot(cylinder, head).ok_or(Error::RecordNotFound)?;
        let track = self.tracks[slot].as_deref().ok_or(Error::RecordNotFound)?;
        let ids: Vec<Located> = idams(track)
            .into_iter()
            .filter(|i| self.accepts(i.double, density))
            .filter_map(|i| self.decode(track, i))
            .collect();
        let idx = rotation.advance(ids.len()).ok_or(Error::RecordNotFound)?;
        Ok(ids[idx].chrn)
    }

    pub(crate) fn find_sector(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        record: u8,
        density: Density,
    ) -> Result<ChrnId> {
        let found = self.locate(media, cylinder, head, record, density)?;
        if found.dam_pos.is_none() {
            return Err(Error::AddressMarkMissing);
        }
        Ok(found.chrn)
    }

    pub(crate) fn read_sector(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        record: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<ChrnId> {
        let found = self.locate(media, cylinder, head, record, density)?;
        let dam_pos = found.dam_pos.ok_or(Error::AddressMarkMissing)?;
        let slot = self.slot(cylinder, head).ok_or(Error::RecordNotFound)?;
        let track = self.tracks[slot].as_deref().ok_or(Error::RecordNotFound)?;

        let step = self.step(found.double);
        let mut cur = TrackCursor::new(track, dam_pos, step);
        let mut chrn = found.chrn;
        let mut field = vec![0xFF; 1 + chrn.sector_size() + 2];
        if !cur.read_cells(&mut field) {
            warn!("DMK data field of R{record} runs off the track");
            chrn.flags.data_crc_error = true;
        }
        let (body, stored) = field.split_at(field.len() - 2);
        let mut crc = Crc16::for_field(found.double);
        crc.extend(body);
        if crc.to_bytes() != stored {
            chrn.flags.data_crc_error = true;
        }

        let data = &body[1..];
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        buf[n..].fill(0xFF);
        trace!(
            "DMK read C{cylinder} H{head} R{record} dam {:#04X} crc_err {}",
            body[0], chrn.flags.data_crc_error
        );
        Ok(chrn)
    }

    pub(crate) fn write_sector(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        record: u8,
        buf: &[u8],
        density: Density,
        deleted: bool,
    ) -> Result<()> {
        let found = self.locate(media, cylinder, head, record, density)?;
        let dam_pos = found.dam_pos.ok_or(Error::AddressMarkMissing)?;
        let step = self.step(found.double);

        let dam = dam_for(deleted);
        let mut field = Vec::with_capacity(found.chrn.sector_size() + 3);
        field.push(dam);
        field.extend((0..found.chrn.sector_size()).map(|i| buf.get(i).copied().unwrap_or(0)));
        let mut crc = Crc16::for_field(found.double);
        crc.extend(&field);
        field.extend_from_slice(&crc.to_bytes());

        let track = self.track(media, cylinder, head)?;
        let end = dam_pos + field.len() * step;
        if end > track.len() {
            return Err(Error::corrupt(dam_pos, "DMK data field runs off the track"));
        }
        for (i, &b) in field.iter().enumerate() {
            let at = dam_pos + i * step;
            track[at..at + step].fill(b);
        }
        self.store_track(media, cylinder, head)?;
        trace!("DMK write C{cylinder} H{head} R{record} dam {dam:#04X}");
        Ok(())
    }

    /// Encoded track bytes after the IDAM table, one byte per cell.
    pub(crate) fn read_track(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<()> {
        let step = self.step(density.is_double());
        let track = self.track(media, cylinder, head)?;
        let body = track.get(DMK_IDAM_TABLE_LEN..).unwrap_or_default();
        let mut n = 0;
        for (slot, &b) in buf.iter_mut().zip(body.iter().step_by(step)) {
            *slot = b;
            n += 1;
        }
        buf[n..].fill(density.gap_byte());
        Ok(())
    }

    /// Rebuild a track block and its IDAM table from a write-track stream.
    pub(crate) fn write_track(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        stream: &[u8],
        density: Density,
    ) -> Result<()> {
        let slot = self.slot(cylinder, head).ok_or(Error::RecordNotFound)?;
        let parsed = parse_write_track(stream, density);
        let step = self.step(density.is_double());
        let len = self.header.track_len;

        let mut block = vec![0u8; len];
        let mut pos = DMK_IDAM_TABLE_LEN;
        let mut marks = parsed.id_marks.iter().peekable();
        let mut table = Vec::new();
        for (i, &b) in parsed.bytes.iter().enumerate() {
            if pos + step > len {
                warn!("DMK write track C{cylinder} H{head} truncated at {i} bytes");
                break;
            }
            if marks.next_if(|&&m| m == i).is_some() && table.len() < DMK_MAX_SECTORS {
                match idam_pointer(pos, density.is_double()) {
                    Some(v) => table.push(v),
                    None => warn!("DMK ID mark at {pos:#06X} on C{cylinder} H{head} is out of pointer range"),
                }
            }
            block[pos..pos + step].fill(b);
            pos += step;
        }
        block[pos..].fill(density.gap_byte());
        for (i, v) in table.iter().enumerate() {
            block[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes());
        }

        self.tracks[slot] = Some(block);
        self.store_track(media, cylinder, head)?;
        debug!(
            "DMK formatted C{cylinder} H{head}: {} IDAMs",
            table.len()
        );
        Ok(())
    }
}

/// A blank DMK image: header plus zeroed track blocks.
#[must_use]
pub fn blank_image(cylinders: u8, heads: u8, track_len: usize, flags: u8) -> Vec<u8> {
    let flags = if heads == 1 {
        flags | DMK_SINGLE_SIDED
    } else {
        flags & !DMK_SINGLE_SIDED
    };
    let header = DmkHeader {
        write_protected: false,
        cylinders,
        track_len,
        flags,
    };
    let mut out = header.to_bytes().to_vec();
    out.resize(
        DMK_HEADER_LEN + usize::from(cylinders) * usize::from(header.heads()) * track_len,
        0,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = DmkHeader {
            write_protected: true,
            cylinders: 40,
            track_len: 0x1900,
            flags: DMK_SINGLE_SIDED,
        };
        let raw = h.to_bytes();
        assert_eq!(raw[2..4], [0x00, 0x19]);
        assert_eq!(DmkHeader::parse(&raw), h);
        assert_eq!(h.heads(), 1);
    }

    #[test]
    fn plausibility_checks_track_multiple() {
        let h = DmkHeader {
            write_protected: false,
            cylinders: 1,
            track_len: 0x1900,
            flags: 0,
        };
        assert!(h.plausible(16 + 2 * 0x1900));
        assert!(!h.plausible(16 + 2 * 0x1900 + 1));
        let tiny = DmkHeader { track_len: 512, ..h };
        assert!(!tiny.plausible(16 + 512));
    }

    #[test]
    fn idam_table_stops_at_zero_and_skips_bad_pointers() {
        let mut track = vec![0u8; 1024];
        track[0..2].copy_from_slice(&(200u16 | IDAM_DOUBLE).to_le_bytes());
        track[2..4].copy_from_slice(&300u16.to_le_bytes());
        track[4..6].copy_from_slice(&5000u16.to_le_bytes());
        track[8..10].copy_from_slice(&400u16.to_le_bytes());
        track[200] = IDAM;
        track[400] = IDAM;

        let found = idams(&track);
        assert_eq!(found.len(), 1, "300 is not an ID mark, 5000 is out of range");
        assert_eq!(found[0].offset, 200);
        assert!(found[0].double);
    }

    #[test]
    fn idam_pointers_stay_within_fourteen_bits() {
        assert_eq!(idam_pointer(0x0200, true), Some(0x8200));
        assert_eq!(idam_pointer(0x3FFF, false), Some(0x3FFF));
        assert_eq!(idam_pointer(0x4000, true), None);
        assert_eq!(idam_pointer(0x7F00, false), None);
    }

    #[test]
    fn blank_image_size() {
        let img = blank_image(2, 1, 0x0C80, 0);
        assert_eq!(img.len(), 16 + 2 * 0x0C80);
        assert_eq!(img[4] & DMK_SINGLE_SIDED, DMK_SINGLE_SIDED);
    }
}
