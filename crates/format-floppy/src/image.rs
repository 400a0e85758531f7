//! The image handle: backing store, drive flags, geometry and format cache.

use std::io;
use std::path::Path;

use bit_vec::BitVec;
use log::{debug, warn};

use crate::chrn::Density;
use crate::dmk::DmkCache;
use crate::jv3::Jv3Cache;
use crate::raw::RawLayout;
use crate::store::{FileStore, ImageStore, MemStore};
use crate::{Error, Result};

/// Largest number of logical sectors tracked by the deleted-mark bitmap.
pub const MAX_DDAM_SECTORS: usize = 16384;

/// Host-supplied geometry for headerless images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Geometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub sector_length: usize,
    pub first_sector_id: u8,
    /// Bytes to skip before the first sector.
    pub header_length: u64,
}

impl Geometry {
    /// Whether every field describes a real disk.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.cylinders > 0
            && self.heads > 0
            && self.sectors_per_track > 0
            && crate::chrn::size_code(self.sector_length).is_some()
    }

    /// Total logical sectors.
    #[must_use]
    pub fn total_sectors(&self) -> usize {
        usize::from(self.cylinders) * usize::from(self.heads) * usize::from(self.sectors_per_track)
    }
}

impl Default for Geometry {
    /// 40 track, single-sided, 10 x 256 byte sectors (TRS-80 SSSD).
    fn default() -> Self {
        Self {
            cylinders: 40,
            heads: 1,
            sectors_per_track: 10,
            sector_length: 256,
            first_sector_id: 0,
            header_length: 0,
        }
    }
}

/// Which driver serves the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatTag {
    #[default]
    Unknown,
    Jv3,
    Dmk,
    /// Headerless sectors laid out by [`Geometry`].
    Raw,
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatTag::Unknown => write!(f, "unknown"),
            FormatTag::Jv3 => write!(f, "JV3"),
            FormatTag::Dmk => write!(f, "DMK"),
            FormatTag::Raw => write!(f, "raw"),
        }
    }
}

/// Per-image driver state, built on first access.
#[derive(Debug, Default)]
pub(crate) enum FormatCache {
    #[default]
    Unloaded,
    Jv3(Jv3Cache),
    Dmk(DmkCache),
    Raw(RawLayout),
}

/// Deleted-data-mark state for headerless images, one bit per LBA.
#[derive(Debug, Clone)]
pub struct DdamMap {
    bits: BitVec,
}

impl DdamMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: BitVec::from_elem(MAX_DDAM_SECTORS, false),
        }
    }

    /// Whether `lba` carries a deleted mark; out-of-range sectors never do.
    #[must_use]
    pub fn get(&self, lba: usize) -> bool {
        self.bits.get(lba).unwrap_or(false)
    }

    /// Returns false when `lba` is past the bitmap.
    pub fn set(&mut self, lba: usize, deleted: bool) -> bool {
        if lba >= self.bits.len() {
            return false;
        }
        self.bits.set(lba, deleted);
        true
    }
}

impl Default for DdamMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated rotation: which sector passes under the head next.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RotationCursor {
    next: usize,
    index_pulse: bool,
    /// Cylinder, head and density the position belongs to.
    track: Option<(u8, u8, Density)>,
}

impl RotationCursor {
    /// Start over from the index hole unless still on the same track.
    pub(crate) fn follow(&mut self, cylinder: u8, head: u8, density: Density) {
        let track = Some((cylinder, head, density));
        if self.track != track {
            *self = Self {
                track,
                ..Self::default()
            };
        }
    }

    /// Index of the next sector out of `count`, raising the index pulse on
    /// the call that wraps back to the first.
    pub(crate) fn advance(&mut self, count: usize) -> Option<usize> {
        if count == 0 {
            self.index_pulse = false;
            return None;
        }
        let idx = if self.next >= count {
            self.index_pulse = true;
            0
        } else {
            self.index_pulse = false;
            self.next
        };
        self.next = idx + 1;
        Some(idx)
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Byte access to the backing store with format-layer errors.
pub(crate) struct Media {
    store: Option<Box<dyn ImageStore>>,
}

impl std::fmt::Debug for Media {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Media")
            .field("attached", &self.store.is_some())
            .finish()
    }
}

impl Media {
    fn store(&mut self) -> Result<&mut (dyn ImageStore + 'static)> {
        self.store.as_deref_mut().ok_or(Error::NotReady)
    }

    pub(crate) fn len(&mut self) -> Result<u64> {
        Ok(self.store()?.len()?)
    }

    /// Read as much of `buf` as the store holds; returns the count.
    pub(crate) fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.store()?.read_at(offset, buf)?)
    }

    /// Read into `buf`, filling anything past the end of the store with `fill`.
    pub(crate) fn read_padded(&mut self, offset: u64, buf: &mut [u8], fill: u8) -> Result<usize> {
        let n = self.read(offset, buf)?;
        buf[n..].fill(fill);
        Ok(n)
    }

    pub(crate) fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let n = self.store()?.write_at(offset, data)?;
        if n != data.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write to image",
            )));
        }
        Ok(())
    }

    pub(crate) fn set_len(&mut self, len: u64) -> Result<()> {
        Ok(self.store()?.set_len(len)?)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        match self.store.as_deref_mut() {
            Some(s) => Ok(s.flush()?),
            None => Ok(()),
        }
    }
}

/// One disk image as seen by a drive.
#[derive(Debug)]
pub struct DiskImage {
    pub(crate) media: Media,
    pub(crate) geometry: Option<Geometry>,
    pub(crate) ready: bool,
    pub(crate) write_protected: bool,
    pub(crate) current_cylinder: u8,
    pub(crate) format: FormatTag,
    pub(crate) rotation: RotationCursor,
    pub(crate) cache: FormatCache,
    pub(crate) ddam: DdamMap,
}

impl DiskImage {
    fn with_store(store: Option<Box<dyn ImageStore>>) -> Self {
        let write_protected = store.as_ref().is_some_and(|s| s.read_only());
        let ready = store.is_some();
        Self {
            media: Media { store },
            geometry: None,
            ready,
            write_protected,
            current_cylinder: 0,
            format: FormatTag::Unknown,
            rotation: RotationCursor::default(),
            cache: FormatCache::Unloaded,
            ddam: DdamMap::new(),
        }
    }

    /// Wrap an arbitrary store.
    #[must_use]
    pub fn new(store: Box<dyn ImageStore>) -> Self {
        Self::with_store(Some(store))
    }

    /// In-memory image holding `data`.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemStore::new(data)))
    }

    /// A drive with nothing in it.
    #[must_use]
    pub fn absent() -> Self {
        Self::with_store(None)
    }

    /// Open an image file. A missing file gives a handle that does not
    /// exist; a file that refuses writes opens write-protected.
    pub fn open(path: &Path) -> Result<Self> {
        match FileStore::open(path) {
            Ok(store) => {
                debug!("opened {}", path.display());
                Ok(Self::new(Box::new(store)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("image {} not found", path.display());
                Ok(Self::absent())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.media.store.is_some()
    }

    /// Size of the backing store in bytes; zero if there is none.
    pub fn size(&mut self) -> Result<u64> {
        if self.exists() { self.media.len() } else { Ok(0) }
    }

    /// An image is ready when it exists and has not been taken offline.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready && self.exists()
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    #[must_use]
    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    /// Physical cylinder under the head.
    #[must_use]
    pub fn current_cylinder(&self) -> u8 {
        self.current_cylinder
    }

    pub fn set_current_cylinder(&mut self, cylinder: u8) {
        self.current_cylinder = cylinder;
    }

    /// True for the one `get_next_id` call that passed the index hole.
    #[must_use]
    pub fn index_pulse(&self) -> bool {
        self.rotation.index_pulse
    }

    /// The detected format; [`FormatTag::Unknown`] until the first access.
    #[must_use]
    pub fn format(&self) -> FormatTag {
        self.format
    }

    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Set host geometry. Refused once a format cache has been built.
    pub fn set_geometry(&mut self, geometry: Geometry) -> Result<()> {
        if !matches!(self.cache, FormatCache::Unloaded) {
            return Err(Error::GeometryLocked);
        }
        self.geometry = Some(geometry);
        Ok(())
    }

    /// Deleted-data-mark state for `lba` (headerless images).
    #[must_use]
    pub fn ddam(&self, lba: usize) -> bool {
        self.ddam.get(lba)
    }

    /// Mark or unmark `lba` as deleted; returns false if out of range.
    pub fn set_ddam(&mut self, lba: usize, deleted: bool) -> bool {
        self.ddam.set(lba, deleted)
    }

    /// Raw byte read from the backing store, bypassing any format.
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.media.read(offset, buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.media.flush()
    }

    /// Detach the store; the handle no longer exists afterwards.
    pub fn take_store(&mut self) -> Option<Box<dyn ImageStore>> {
        self.cache = FormatCache::Unloaded;
        self.format = FormatTag::Unknown;
        self.rotation.reset();
        self.media.store.take()
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.write_protected {
            Err(Error::WriteProtected)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_pulses_once_per_wrap() {
        let mut r = RotationCursor::default();
        let seq: Vec<_> = (0..7)
            .map(|_| {
                let idx = r.advance(3).expect("sectors on track");
                (idx, r.index_pulse)
            })
            .collect();
        assert_eq!(
            seq,
            vec![
                (0, false),
                (1, false),
                (2, false),
                (0, true),
                (1, false),
                (2, false),
                (0, true)
            ]
        );
        assert_eq!(r.advance(0), None);
    }

    #[test]
    fn rotation_restarts_on_track_change() {
        let mut r = RotationCursor::default();
        r.follow(0, 0, Density::Single);
        r.advance(5);
        r.advance(5);
        r.follow(0, 0, Density::Single);
        assert_eq!(r.advance(5), Some(2), "same track keeps position");

        for (c, h, d) in [(0, 1, Density::Single), (0, 1, Density::Double), (1, 1, Density::Double)] {
            r.advance(5);
            r.follow(c, h, d);
            assert_eq!(r.advance(5), Some(0));
        }
    }

    #[test]
    fn ddam_map_bounds() {
        let mut m = DdamMap::new();
        assert!(m.set(5, true));
        assert!(m.get(5));
        assert!(!m.set(MAX_DDAM_SECTORS, true));
        assert!(!m.get(MAX_DDAM_SECTORS));
    }

    #[test]
    fn absent_image_is_not_ready() {
        let mut img = DiskImage::absent();
        assert!(!img.exists());
        assert!(!img.is_ready());
        assert_eq!(img.size().expect("size"), 0);
    }

    #[test]
    fn missing_file_opens_absent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let img = DiskImage::open(&dir.path().join("nope.dsk")).expect("open");
        assert!(!img.exists());
    }
}
