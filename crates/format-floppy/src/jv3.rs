//! JV3 sector-table images.
//!
//! # Format
//!
//! The file opens with a table of 2901 three-byte entries `(track, sector,
//! flags)`, followed by one write-protect byte (0xFF = writable). Sector data
//! follows at offset 8704 in table order; each entry's data length comes
//! from the two size bits of its flags. A track byte of 0xFF marks a free
//! entry, whose size bits use a different encoding.
//!
//! | Flag bits | Meaning                                             |
//! |-----------|-----------------------------------------------------|
//! | 0x80      | double density                                      |
//! | 0x60      | DAM: SD 00=FB 20=FA 40=F9 60=F8, DD 00=FB 20=F8      |
//! | 0x10      | side 1                                              |
//! | 0x08      | CRC error recorded                                  |
//! | 0x04      | non-IBM sector                                      |
//! | 0x03      | size code                                           |

use log::{debug, trace};

use crate::chrn::{ChrnId, Density, IdFlags, dam_for, dam_is_deleted, size_code};
use crate::image::{Media, RotationCursor};
use crate::track::{TrackWriter, parse_write_track};
use crate::{Error, Result};

pub const JV3_ENTRIES: usize = 2901;
/// Offset of the write-protect byte.
pub const JV3_WP_OFFSET: usize = JV3_ENTRIES * 3;
/// Offset of the first sector's data.
pub const JV3_HEADER_LEN: usize = JV3_WP_OFFSET + 1;

/// Track value of an unused entry.
pub const JV3_FREE: u8 = 0xFF;
/// Flags of an unused entry, before the size bits.
pub const JV3_FREEF: u8 = 0xFC;

pub const JV3_DENSITY: u8 = 0x80;
pub const JV3_DAM: u8 = 0x60;
pub const JV3_SIDE: u8 = 0x10;
pub const JV3_ERROR: u8 = 0x08;
pub const JV3_NONIBM: u8 = 0x04;
pub const JV3_SIZE: u8 = 0x03;

/// Data length of a table entry.
#[must_use]
pub const fn entry_size(track: u8, flags: u8) -> usize {
    let code = flags & JV3_SIZE;
    if track == JV3_FREE {
        match code {
            0 => 512,
            1 => 1024,
            2 => 128,
            _ => 256,
        }
    } else {
        match code {
            0 => 256,
            1 => 128,
            2 => 1024,
            _ => 512,
        }
    }
}

const fn used_size_bits(size: usize) -> u8 {
    match size {
        128 => 1,
        1024 => 2,
        512 => 3,
        _ => 0,
    }
}

const fn free_size_bits(size: usize) -> u8 {
    match size {
        512 => 0,
        1024 => 1,
        128 => 2,
        _ => 3,
    }
}

/// Data address mark encoded by an entry's flags.
#[must_use]
pub const fn dam_from_flags(flags: u8) -> u8 {
    if flags & JV3_DENSITY != 0 {
        if flags & JV3_DAM == 0 { 0xFB } else { 0xF8 }
    } else {
        match flags & JV3_DAM {
            0x00 => 0xFB,
            0x20 => 0xFA,
            0x40 => 0xF9,
            _ => 0xF8,
        }
    }
}

/// Flag bits recording `dam` at the given density.
#[must_use]
pub const fn dam_to_flags(dam: u8, double: bool) -> u8 {
    if double {
        if dam_is_deleted(dam) { 0x20 } else { 0x00 }
    } else {
        match dam {
            0xFA => 0x20,
            0xF9 => 0x40,
            0xF8 => 0x60,
            _ => 0x00,
        }
    }
}

/// Total file length implied by a header table: header plus the data of
/// every entry up to the last one in use.
#[must_use]
pub fn expected_size(header: &[u8]) -> Option<u64> {
    let table = header.get(..JV3_WP_OFFSET)?;
    let entries: Vec<&[u8]> = table.chunks_exact(3).collect();
    let last_used = entries.iter().rposition(|e| e[0] != JV3_FREE);
    let data: usize = match last_used {
        Some(last) => entries[..=last].iter().map(|e| entry_size(e[0], e[2])).sum(),
        None => 0,
    };
    Some((JV3_HEADER_LEN + data) as u64)
}

/// One sector described by the table.
#[derive(Debug, Clone)]
pub(crate) struct Jv3Sector {
    entry: usize,
    offset: u64,
    size: usize,
    cylinder: u8,
    head: u8,
    record: u8,
    density: Density,
    dam: u8,
    error: bool,
}

impl Jv3Sector {
    fn flag_offset(&self) -> u64 {
        (self.entry * 3 + 2) as u64
    }

    fn chrn(&self) -> ChrnId {
        ChrnId {
            cylinder: self.cylinder,
            head: self.head,
            record: self.record,
            size_code: size_code(self.size).unwrap_or(1),
            data_id: self.entry,
            flags: IdFlags {
                deleted: dam_is_deleted(self.dam),
                data_crc_error: self.error,
                ..IdFlags::default()
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct Jv3Cache {
    table: Vec<[u8; 3]>,
    sectors: Vec<Jv3Sector>,
    /// Entry index to data offset, for every entry up to the last used.
    offsets: Vec<u64>,
    data_end: u64,
    pub(crate) write_protected: bool,
}

impl Jv3Cache {
    pub(crate) fn load(media: &mut Media) -> Result<Self> {
        let mut header = vec![0u8; JV3_HEADER_LEN];
        if media.read(0, &mut header)? < JV3_HEADER_LEN {
            return Err(Error::corrupt(0, "JV3 header truncated"));
        }
        let table = header[..JV3_WP_OFFSET]
            .chunks_exact(3)
            .map(|e| [e[0], e[1], e[2]])
            .collect();
        let mut cache = Self {
            table,
            sectors: Vec::new(),
            offsets: Vec::new(),
            data_end: JV3_HEADER_LEN as u64,
            write_protected: header[JV3_WP_OFFSET] != 0xFF,
        };
        cache.index();
        debug!(
            "JV3: {} sectors, data ends at {}",
            cache.sectors.len(),
            cache.data_end
        );
        Ok(cache)
    }

    /// Rebuild sector descriptors from the table in one linear scan.
    fn index(&mut self) {
        self.sectors.clear();
        self.offsets.clear();
        let last_used = self.table.iter().rposition(|e| e[0] != JV3_FREE);
        let mut offset = JV3_HEADER_LEN as u64;
        if let Some(last) = last_used {
            for (entry, &[track, sector, flags]) in self.table[..=last].iter().enumerate() {
                self.offsets.push(offset);
                let size = entry_size(track, flags);
                if track != JV3_FREE {
                    self.sectors.push(Jv3Sector {
                        entry,
                        offset,
                        size,
                        cylinder: track,
                        head: u8::from(flags & JV3_SIDE != 0),
                        record: sector,
                        density: Density::from_double(flags & JV3_DENSITY != 0),
                        dam: dam_from_flags(flags),
                        error: flags & JV3_ERROR != 0,
                    });
                }
                offset += size as u64;
            }
        }
        self.data_end = offset;
    }

    fn on_track(&self, cylinder: u8, head: u8) -> impl Iterator<Item = &Jv3Sector> {
        self.sectors
            .iter()
            .filter(move |s| s.cylinder == cylinder && s.head == head)
    }

    fn find(&self, cylinder: u8, head: u8, record: u8, density: Density) -> Result<&Jv3Sector> {
        self.on_track(cylinder, head)
            .find(|s| s.record == record && s.density == density)
            .ok_or(Error::RecordNotFound)
    }

    pub(crate) fn next_id(
        &self,
        rotation: &mut RotationCursor,
        cylinder: u8,
        head: u8,
        density: Density,
    ) -> Result<ChrnId> {
        let track: Vec<&Jv3Sector> = self
            .on_track(cylinder, head)
            .filter(|s| s.density == density)
            .collect();
        let idx = rotation.advance(track.len()).ok_or(Error::RecordNotFound)?;
        Ok(track[idx].chrn())
    }

    pub(crate) fn find_sector(
        &self,
        cylinder: u8,
        head: u8,
        record: u8,
        density: Density,
    ) -> Result<ChrnId> {
        Ok(self.find(cylinder, head, record, density)?.chrn())
    }

    pub(crate) fn read_sector(
        &self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        record: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<ChrnId> {
        let s = self.find(cylinder, head, record, density)?;
        let n = buf.len().min(s.size);
        media.read_padded(s.offset, &mut buf[..n], 0xFF)?;
        buf[n..].fill(0xFF);
        trace!("JV3 read C{cylinder} H{head} R{record} {n} bytes at {}", s.offset);
        Ok(s.chrn())
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
        let s = self.find(cylinder, head, record, density)?.clone();
        let n = buf.len().min(s.size);
        media.write(s.offset, &buf[..n])?;

        let entry = &mut self.table[s.entry];
        let flags = (entry[2] & !(JV3_DAM | JV3_ERROR)) | dam_to_flags(dam_for(deleted), density.is_double());
        entry[2] = flags;
        media.write(s.flag_offset(), &[flags])?;
        if let Some(cached) = self.sectors.iter_mut().find(|c| c.entry == s.entry) {
            cached.dam = dam_from_flags(flags);
            cached.error = false;
        }
        trace!("JV3 write C{cylinder} H{head} R{record} flags {flags:#04X}");
        Ok(())
    }

    /// Synthesise the track as the controller would read it, sectors in
    /// table order.
    pub(crate) fn read_track(
        &self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<()> {
        let track: Vec<&Jv3Sector> = self
            .on_track(cylinder, head)
            .filter(|s| s.density == density)
            .collect();
        if track.is_empty() {
            return Err(Error::RecordNotFound);
        }
        let mut w = TrackWriter::new(density, buf.len());
        w.index_gap();
        let mut data = Vec::new();
        for s in track {
            data.resize(s.size, 0);
            media.read_padded(s.offset, &mut data, 0xFF)?;
            w.sector(&s.chrn(), s.dam, &data);
        }
        buf.copy_from_slice(&w.finish());
        Ok(())
    }

    /// Reformat one track: release its old entries, then store every parsed
    /// sector in a free entry of the same size or a new entry at the end.
    ///
    /// The new table is planned on a copy, so a table that runs out of
    /// entries leaves both the cache and the file untouched. Data freed
    /// past the new last entry is cut off the file.
    pub(crate) fn write_track(
        &mut self,
        media: &mut Media,
        cylinder: u8,
        head: u8,
        stream: &[u8],
        density: Density,
    ) -> Result<()> {
        let parsed = parse_write_track(stream, density);
        let side = if head != 0 { JV3_SIDE } else { 0 };

        let mut table = self.table.clone();
        let mut offsets = self.offsets.clone();
        let mut data_end = self.data_end;
        for s in self.sectors.iter().filter(|s| s.cylinder == cylinder && s.head == head) {
            table[s.entry] = [JV3_FREE, JV3_FREE, JV3_FREEF | free_size_bits(s.size)];
        }

        let mut placed = Vec::with_capacity(parsed.sectors.len());
        for p in &parsed.sectors {
            let size = p.data.len();
            if p.id.cylinder != cylinder || p.id.head != head {
                debug!(
                    "JV3 cannot record ID C{} H{} on C{cylinder} H{head}; storing physical position",
                    p.id.cylinder, p.id.head
                );
            }
            let flags = used_size_bits(size)
                | side
                | dam_to_flags(p.dam, density.is_double())
                | if density.is_double() { JV3_DENSITY } else { 0 };

            let reuse = (0..offsets.len()).find(|&i| {
                let [t, _, f] = table[i];
                t == JV3_FREE && entry_size(t, f) == size
            });
            let (entry, offset) = match reuse {
                Some(i) => (i, offsets[i]),
                None => {
                    let i = offsets.len();
                    if i >= JV3_ENTRIES {
                        return Err(Error::corrupt(JV3_WP_OFFSET, "JV3 sector table full"));
                    }
                    let offset = data_end;
                    offsets.push(offset);
                    data_end += size as u64;
                    (i, offset)
                }
            };
            table[entry] = [cylinder, p.id.record, flags];
            placed.push((offset, &p.data));
        }

        for (offset, data) in placed {
            media.write(offset, data)?;
        }
        let raw: Vec<u8> = table.iter().flatten().copied().collect();
        media.write(0, &raw)?;
        self.table = table;
        self.index();
        if media.len()? > self.data_end {
            media.set_len(self.data_end)?;
        }
        debug!(
            "JV3 formatted C{cylinder} H{head}: {} sectors, data ends at {}",
            parsed.sectors.len(),
            self.data_end
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_codes_differ_for_free_entries() {
        assert_eq!(entry_size(0, 0x00), 256);
        assert_eq!(entry_size(0, 0x01), 128);
        assert_eq!(entry_size(JV3_FREE, JV3_FREE), 256);
        assert_eq!(entry_size(JV3_FREE, JV3_FREEF), 512);
        for size in [128, 256, 512, 1024] {
            assert_eq!(entry_size(0, used_size_bits(size)), size);
            assert_eq!(entry_size(JV3_FREE, JV3_FREEF | free_size_bits(size)), size);
        }
    }

    #[test]
    fn dam_flags_by_density() {
        assert_eq!(dam_from_flags(0x60), 0xF8);
        assert_eq!(dam_from_flags(0x20), 0xFA);
        assert_eq!(dam_from_flags(JV3_DENSITY | 0x20), 0xF8);
        assert_eq!(dam_to_flags(0xF8, true), 0x20);
        assert_eq!(dam_to_flags(0xF8, false), 0x60);
        assert_eq!(dam_to_flags(0xFB, false), 0x00);
    }

    #[test]
    fn expected_size_counts_up_to_last_used() {
        let mut header = vec![0xFF; JV3_HEADER_LEN];
        header[0..3].copy_from_slice(&[0, 1, 0x00]);
        header[3..6].copy_from_slice(&[JV3_FREE, JV3_FREE, JV3_FREEF | 1]);
        header[6..9].copy_from_slice(&[0, 2, 0x01]);
        assert_eq!(
            expected_size(&header),
            Some((JV3_HEADER_LEN + 256 + 1024 + 128) as u64)
        );
        assert_eq!(expected_size(&header[..100]), None);
    }
}
