//! Format-independent sector and track operations on a [`DiskImage`].
//!
//! Each call detects the format and builds the driver cache on first use,
//! then dispatches to the JV3, DMK or raw driver. Sector operations act on
//! the image's current physical cylinder.

use log::info;

use crate::chrn::{ChrnId, Density};
use crate::detect::{DETECT_WINDOW, detect_format};
use crate::dmk::DmkCache;
use crate::image::{DiskImage, FormatCache, FormatTag};
use crate::jv3::Jv3Cache;
use crate::raw::RawLayout;
use crate::{Error, Result};

impl DiskImage {
    /// Detect (once) which format the image is in.
    pub fn find_format(&mut self) -> Result<FormatTag> {
        if self.format != FormatTag::Unknown {
            return Ok(self.format);
        }
        if !self.exists() {
            return Err(Error::NotReady);
        }
        let size = self.media.len()?;
        let window = usize::try_from(size).unwrap_or(DETECT_WINDOW).min(DETECT_WINDOW);
        let mut head = vec![0u8; window];
        let n = self.media.read(0, &mut head)?;
        head.truncate(n);

        let tag = detect_format(&head, size, self.geometry.as_ref())?;
        info!("detected {tag} image ({size} bytes)");
        self.format = tag;
        Ok(tag)
    }

    fn load_cache(&mut self) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        if !matches!(self.cache, FormatCache::Unloaded) {
            return Ok(());
        }
        self.cache = match self.find_format()? {
            FormatTag::Jv3 => {
                let cache = Jv3Cache::load(&mut self.media)?;
                self.write_protected |= cache.write_protected;
                FormatCache::Jv3(cache)
            }
            FormatTag::Dmk => {
                let cache = DmkCache::load(&mut self.media)?;
                self.write_protected |= cache.header.write_protected;
                FormatCache::Dmk(cache)
            }
            FormatTag::Raw => {
                let geometry = self.geometry.ok_or(Error::FormatUnrecognized)?;
                FormatCache::Raw(RawLayout::new(geometry)?)
            }
            FormatTag::Unknown => return Err(Error::FormatUnrecognized),
        };
        Ok(())
    }

    /// The next ID field to pass under the head on the current cylinder.
    pub fn get_next_id(&mut self, head: u8, density: Density) -> Result<ChrnId> {
        self.load_cache()?;
        let cyl = self.current_cylinder;
        self.rotation.follow(cyl, head, density);
        match &mut self.cache {
            FormatCache::Jv3(c) => c.next_id(&mut self.rotation, cyl, head, density),
            FormatCache::Dmk(c) => {
                c.next_id(&mut self.media, &mut self.rotation, cyl, head, density)
            }
            FormatCache::Raw(c) => c.next_id(&mut self.rotation, &self.ddam, cyl, head),
            FormatCache::Unloaded => Err(Error::FormatUnrecognized),
        }
    }

    /// Locate a sector on the current cylinder without transferring data.
    pub fn find_sector(&mut self, head: u8, sector: u8, density: Density) -> Result<ChrnId> {
        self.load_cache()?;
        let cyl = self.current_cylinder;
        match &mut self.cache {
            FormatCache::Jv3(c) => c.find_sector(cyl, head, sector, density),
            FormatCache::Dmk(c) => c.find_sector(&mut self.media, cyl, head, sector, density),
            FormatCache::Raw(c) => c.find_sector(&mut self.media, &self.ddam, cyl, head, sector),
            FormatCache::Unloaded => Err(Error::FormatUnrecognized),
        }
    }

    /// Read a sector into `buf`. Bytes beyond the sector are filled with
    /// 0xFF. A data CRC error is reported in the returned flags, not as an
    /// error.
    pub fn read_sector(
        &mut self,
        head: u8,
        sector: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<ChrnId> {
        self.load_cache()?;
        let cyl = self.current_cylinder;
        match &mut self.cache {
            FormatCache::Jv3(c) => c.read_sector(&mut self.media, cyl, head, sector, buf, density),
            FormatCache::Dmk(c) => c.read_sector(&mut self.media, cyl, head, sector, buf, density),
            FormatCache::Raw(c) => {
                c.read_sector(&mut self.media, &self.ddam, cyl, head, sector, buf)
            }
            FormatCache::Unloaded => Err(Error::FormatUnrecognized),
        }
    }

    /// Write a sector with a normal or deleted data mark.
    pub fn write_sector(
        &mut self,
        head: u8,
        sector: u8,
        buf: &[u8],
        density: Density,
        deleted: bool,
    ) -> Result<()> {
        self.load_cache()?;
        self.check_writable()?;
        let cyl = self.current_cylinder;
        match &mut self.cache {
            FormatCache::Jv3(c) => {
                c.write_sector(&mut self.media, cyl, head, sector, buf, density, deleted)
            }
            FormatCache::Dmk(c) => {
                c.write_sector(&mut self.media, cyl, head, sector, buf, density, deleted)
            }
            FormatCache::Raw(c) => c.write_sector(
                &mut self.media,
                &mut self.ddam,
                cyl,
                head,
                sector,
                buf,
                deleted,
            ),
            FormatCache::Unloaded => Err(Error::FormatUnrecognized),
        }
    }

    /// Fill `buf` with the track as Read Track would see it.
    pub fn read_track(
        &mut self,
        cylinder: u8,
        head: u8,
        buf: &mut [u8],
        density: Density,
    ) -> Result<()> {
        self.load_cache()?;
        match &mut self.cache {
            FormatCache::Jv3(c) => c.read_track(&mut self.media, cylinder, head, buf, density),
            FormatCache::Dmk(c) => c.read_track(&mut self.media, cylinder, head, buf, density),
            FormatCache::Raw(c) => {
                c.read_track(&mut self.media, &self.ddam, cylinder, head, buf, density)
            }
            FormatCache::Unloaded => Err(Error::FormatUnrecognized),
        }
    }

    /// Format a track from a Write Track data stream.
    pub fn write_track(
        &mut self,
        cylinder: u8,
        head: u8,
        buf: &[u8],
        density: Density,
    ) -> Result<()> {
        self.load_cache()?;
        self.check_writable()?;
        self.rotation.reset();
        match &mut self.cache {
            FormatCache::Jv3(c) => c.write_track(&mut self.media, cylinder, head, buf, density),
            FormatCache::Dmk(c) => c.write_track(&mut self.media, cylinder, head, buf, density),
            FormatCache::Raw(c) => {
                c.write_track(&mut self.media, &mut self.ddam, cylinder, head, buf, density)
            }
            FormatCache::Unloaded => Err(Error::FormatUnrecognized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;

    fn raw_image() -> DiskImage {
        let g = Geometry::default();
        let mut img = DiskImage::from_bytes(vec![0xE5; g.total_sectors() * g.sector_length]);
        img.set_geometry(g).expect("geometry before first access");
        img
    }

    #[test]
    fn geometry_locks_after_first_access() {
        let mut img = raw_image();
        img.get_next_id(0, Density::Single).expect("next id");
        assert!(matches!(
            img.set_geometry(Geometry::default()),
            Err(Error::GeometryLocked)
        ));
    }

    #[test]
    fn not_ready_image_refuses_io() {
        let mut img = raw_image();
        img.set_ready(false);
        assert!(matches!(
            img.get_next_id(0, Density::Single),
            Err(Error::NotReady)
        ));
    }

    #[test]
    fn write_protect_blocks_writes() {
        let mut img = raw_image();
        img.set_write_protected(true);
        assert!(matches!(
            img.write_sector(0, 0, &[0; 256], Density::Single, false),
            Err(Error::WriteProtected)
        ));
    }

    #[test]
    fn raw_sectors_follow_current_cylinder() {
        let mut img = raw_image();
        let mut pattern = vec![0u8; 256];
        pattern[0] = 0x42;
        img.set_current_cylinder(3);
        img.write_sector(0, 2, &pattern, Density::Single, false)
            .expect("write");

        let mut raw = [0u8; 1];
        img.read_bytes((3 * 10 + 2) * 256, &mut raw).expect("raw read");
        assert_eq!(raw[0], 0x42);

        img.set_current_cylinder(0);
        let mut buf = vec![0u8; 256];
        img.read_sector(0, 2, &mut buf, Density::Single).expect("read");
        assert_eq!(buf[0], 0xE5);
    }

    #[test]
    fn next_id_restarts_after_head_switch() {
        let mut img = raw_image();
        img.set_geometry(Geometry { heads: 2, ..Geometry::default() })
            .expect("still unloaded");
        for _ in 0..3 {
            img.get_next_id(0, Density::Single).expect("side 0");
        }
        let id = img.get_next_id(1, Density::Single).expect("side 1");
        assert_eq!((id.head, id.record), (1, 0));
    }
}
