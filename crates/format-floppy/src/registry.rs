//! One image handle per device or file.
//!
//! The registry only grows: ejecting a disk detaches it from a drive but the
//! handle, with its caches and deleted-mark state, stays registered.

use std::path::PathBuf;

use log::{debug, warn};

use crate::Result;
use crate::image::DiskImage;

/// Index of a registered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(usize);

impl ImageId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// What an image handle is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageKey {
    /// Host block device numbers.
    Device { major: u32, minor: u32 },
    Path(PathBuf),
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageKey::Device { major, minor } => write!(f, "device {major}:{minor}"),
            ImageKey::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ImageRegistry {
    entries: Vec<(ImageKey, DiskImage)>,
}

impl ImageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, key: &ImageKey) -> Option<ImageId> {
        self.entries.iter().position(|(k, _)| k == key).map(ImageId)
    }

    /// The handle registered under `key`, creating it with `make` only if
    /// there is none yet.
    pub fn get_or_insert_with(&mut self, key: ImageKey, make: impl FnOnce() -> DiskImage) -> ImageId {
        if let Some(id) = self.lookup(&key) {
            return id;
        }
        debug!("registering image {key}");
        self.entries.push((key, make()));
        ImageId(self.entries.len() - 1)
    }

    /// Register the file at `path`, opening it on first use.
    pub fn open_path(&mut self, path: impl Into<PathBuf>) -> Result<ImageId> {
        let path = path.into();
        let key = ImageKey::Path(path.clone());
        if let Some(id) = self.lookup(&key) {
            return Ok(id);
        }
        let image = DiskImage::open(&path)?;
        Ok(self.get_or_insert_with(key, || image))
    }

    #[must_use]
    pub fn get(&self, id: ImageId) -> Option<&DiskImage> {
        self.entries.get(id.0).map(|(_, img)| img)
    }

    pub fn get_mut(&mut self, id: ImageId) -> Option<&mut DiskImage> {
        self.entries.get_mut(id.0).map(|(_, img)| img)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush every image, returning the first failure.
    pub fn flush_all(&mut self) -> Result<()> {
        let mut first = Ok(());
        for (key, img) in &mut self.entries {
            if let Err(e) = img.flush() {
                warn!("flushing {key} failed: {e}");
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_handle_per_key() {
        let mut reg = ImageRegistry::new();
        let key = ImageKey::Device { major: 2, minor: 0 };
        let a = reg.get_or_insert_with(key.clone(), || DiskImage::from_bytes(vec![0; 16]));
        let b = reg.get_or_insert_with(key.clone(), || panic!("must not create twice"));
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(&key), Some(a));
        assert_eq!(reg.lookup(&ImageKey::Device { major: 2, minor: 1 }), None);
    }

    #[test]
    fn missing_path_registers_absent_image() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut reg = ImageRegistry::new();
        let id = reg.open_path(dir.path().join("disk0.dmk")).expect("open");
        assert!(!reg.get(id).expect("registered").exists());
        assert_eq!(reg.open_path(dir.path().join("disk0.dmk")).expect("reopen"), id);
    }
}
