//! Byte stores behind an image handle.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Random-access byte storage for one disk image.
///
/// Reads past the end return fewer bytes than requested; writes past the end
/// grow the store.
pub trait ImageStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize>;
    fn len(&mut self) -> io::Result<u64>;
    /// Truncate or zero-extend the store to `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
    /// Whether the backing medium refuses writes.
    fn read_only(&self) -> bool {
        false
    }
}

/// In-memory image, used for images built on the fly and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    data: Vec<u8>,
}

impl MemStore {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

fn to_index(offset: u64) -> io::Result<usize> {
    usize::try_from(offset).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))
}

impl ImageStore for MemStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = to_index(offset)?;
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let start = to_index(offset)?;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.data.resize(to_index(len)?, 0);
        Ok(())
    }
}

/// Image file on the host filesystem.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    read_only: bool,
}

impl FileStore {
    /// Open read-write, falling back to read-only if the file refuses writes.
    pub fn open(path: &Path) -> io::Result<Self> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Ok(Self {
                file,
                read_only: false,
            }),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(Self {
                file: File::open(path)?,
                read_only: true,
            }),
            Err(e) => Err(e),
        }
    }
}

impl ImageStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "image opened read-only"));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "image opened read-only"));
        }
        self.file.set_len(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_short_read_at_end() {
        let mut s = MemStore::new(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(s.read_at(1, &mut buf).expect("read"), 2);
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(s.read_at(10, &mut buf).expect("read"), 0);
    }

    #[test]
    fn mem_store_write_grows() {
        let mut s = MemStore::new(Vec::new());
        s.write_at(2, &[9, 9]).expect("write");
        assert_eq!(s.data(), &[0, 0, 9, 9]);
        assert_eq!(s.len().expect("len"), 4);
        s.set_len(3).expect("truncate");
        assert_eq!(s.data(), &[0, 0, 9]);
    }

    #[test]
    fn file_store_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        tmp.write_all(&[0u8; 16]).expect("seed file");
        let mut s = FileStore::open(tmp.path()).expect("open");
        s.write_at(4, &[0xAA, 0xBB]).expect("write");
        let mut buf = [0u8; 3];
        assert_eq!(s.read_at(3, &mut buf).expect("read"), 3);
        assert_eq!(buf, [0, 0xAA, 0xBB]);
        assert_eq!(s.len().expect("len"), 16);
        s.set_len(5).expect("truncate");
        assert_eq!(s.len().expect("len"), 5);
    }
}
