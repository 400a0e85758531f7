//! Headerless sector images laid out by host-supplied geometry.
//!
//! `lba = (heads * cylinder + head) * sectors_per_track + sector - first_id`
//! and the sector lives at `header_length + lba * sector_length`. There is
//! nowhere in the file to record a deleted mark, so that state lives in the
//! image's [`DdamMap`](crate::image::DdamMap).

use log::trace;

use crate::chrn::{ChrnId, Density, dam_for, dam_is_deleted, size_code};
use crate::image::{DdamMap, Geometry, Media, RotationCursor};
use crate::track::{TrackWriter, parse_write_track};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct RawLayout {
    geometry: Geometry,
    size_code: u8,
}

impl RawLayout {
    pub(crate) fn new(geometry: Geometry) -> Result<Self> {
        if !geometry.is_usable() {
            return Err(Error::FormatUnrecognized);
        }
        let size_code = size_code(geometry.sector_length).ok_or(Error::FormatUnrecognized)?;
        Ok(Self {
            geometry,
            size_code,
        })
    }

    /// Logical sector number, if the address is inside the geometry.
    pub(crate) fn lba(&self, cylinder: u8, head: u8, sector: u8) -> Option<usize> {
        let g = &self.geometry;
        let index = sector.checked_sub(g.first_sector_id)?;
        if u16::from(cylinder) >= g.cylinders || head >= g.heads || index >= g.sectors_per_track {
            return None;
        }
        let track = usize::from(g.heads) * usize::from(cylinder) + usize::from(head);
        Some(track * usize::from(g.sectors_per_track) + usize::from(index))
    }

    fn offset(&self, lba: usize) -> u64 {
        self.geometry.header_length + (lba * self.geometry.sector_length) as u64
    }

    fn chrn(&self, cylinder: u8, head: u8, sector: u8, lba: usize, ddam: &DdamMap) -> ChrnId {
        let mut id = ChrnId::new(cylinder, head, sector, self.size_code);
        id.data_id = lba;
        id.flags.deleted = ddam.get(lba);
        id
    }

    fn address(&self, cylinder: u8, head: u8, sector: u8) -> Result<usize> {
        self.lba(cylinder, head, sector).ok_or(Error::RecordNotFound)
    }

    pub(crate) fn next_id(
        &self,
        rotation: &mut RotationCursor,
        ddam: &DdamMap,
        cylinder: u8,
        head: u8,
    ) -> Result<ChrnId> {
        self.address(cylinder, head, self.geometry.first_sector_id)?;
        let idx = rotation
            .advance(usize::from(self.geometry.sectors_per_track))
            .ok_or(Error::RecordNotFound)?;
        let sector = self.geometry.first_sector_id.wrapping_add(idx as u8);
        let lba = self.address(cylinder, head, sector)?;
        Ok(self.chrn(cylinder, head, sector, lba, ddam))
    }

    pub(crate) fn find_sector(
        &self,
        media: &mut Media,
        ddam: &DdamMap,
        cylinder: u8,
        head: u8,
        sector: u8,
    ) -> Result<ChrnId> {
        let lba = self.address(cylinder, head, sector)?;
        if self.offset(lba) >= media.len()? {
            return Err(Error::RecordNotFound);
        }
        Ok(self.chrn(cylinder, head, sector, lba, ddam))
    }

    pub(crate) fn read_sector(
        &self,
        media: &mut Media,
        ddam: &DdamMap,
        cylinder: u8,
        head: u8,
        sector: u8,
        buf: &mut [u8],
    ) -> Result<ChrnId> {
        let id = self.find_sector(media, ddam, cylinder, head, sector)?;
        let n = buf.len().min(self.geometry.sector_length);
        media.read_padded(self.offset(id.data_id), &mut buf[..n], 0xFF)?;
        buf[n..].fill(0xFF);
        trace!("raw read lba {} ({n} bytes)", id.data_id);
        Ok(id)
    }

    pub(crate) fn write_sector(
        &self,
        media: &mut Media,
        ddam: &mut DdamMap,
        cylinder: u8,
        head: u8,
        sector: u8,
        buf: &[u8],
        deleted: bool,
    ) -> Result<()> {
        let lba = self.address(cylinder, head, sector)?;
        let n = buf.len().min(self.geometry.sector_length);
        media.write(self.offset(lba), &buf[..n])?;
        ddam.set(lba, deleted);
        trace!("raw write lba {lba} deleted {deleted}");
        Ok(())
    }

    pub(crate) fn read_track(
        &self,
        media: &mut Media,
        ddam: &DdamMap,
        cylinder: u8,
        head: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<()> {
        self.address(cylinder, head, self.geometry.first_sector_id)?;
        let mut w = TrackWriter::new(density, buf.len());
        w.index_gap();
        let mut data = vec![0u8; self.geometry.sector_length];
        for i in 0..self.geometry.sectors_per_track {
            let sector = self.geometry.first_sector_id.wrapping_add(i);
            let lba = self.address(cylinder, head, sector)?;
            media.read_padded(self.offset(lba), &mut data, 0xE5)?;
            let id = self.chrn(cylinder, head, sector, lba, ddam);
            w.sector(&id, dam_for(id.flags.deleted), &data);
        }
        buf.copy_from_slice(&w.finish());
        Ok(())
    }

    /// Store every parsed sector that maps into the geometry.
    pub(crate) fn write_track(
        &self,
        media: &mut Media,
        ddam: &mut DdamMap,
        cylinder: u8,
        head: u8,
        stream: &[u8],
        density: Density,
    ) -> Result<()> {
        self.address(cylinder, head, self.geometry.first_sector_id)?;
        let parsed = parse_write_track(stream, density);
        for s in &parsed.sectors {
            let Some(lba) = self.lba(cylinder, head, s.id.record) else {
                trace!("raw write track: R{} outside geometry", s.id.record);
                continue;
            };
            let n = s.data.len().min(self.geometry.sector_length);
            let mut data = s.data[..n].to_vec();
            data.resize(self.geometry.sector_length, 0xE5);
            media.write(self.offset(lba), &data)?;
            ddam.set(lba, dam_is_deleted(s.dam));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> RawLayout {
        RawLayout::new(Geometry {
            cylinders: 40,
            heads: 2,
            sectors_per_track: 18,
            sector_length: 256,
            first_sector_id: 1,
            header_length: 0,
        })
        .expect("usable geometry")
    }

    #[test]
    fn lba_mapping() {
        let l = layout();
        assert_eq!(l.lba(0, 0, 1), Some(0));
        assert_eq!(l.lba(0, 1, 1), Some(18));
        assert_eq!(l.lba(1, 0, 3), Some(38));
        assert_eq!(l.lba(0, 0, 0), None, "below first sector id");
        assert_eq!(l.lba(0, 0, 19), None);
        assert_eq!(l.lba(40, 0, 1), None);
        assert_eq!(l.lba(0, 2, 1), None);
    }

    #[test]
    fn unusable_geometry_is_rejected() {
        let g = Geometry {
            sector_length: 300,
            ..Geometry::default()
        };
        assert!(matches!(RawLayout::new(g), Err(Error::FormatUnrecognized)));
    }
}
