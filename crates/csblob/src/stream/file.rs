//! File-backed stream backend.

use super::{BufferStream, MemoryStream, StreamFlags};
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A stream over a window of an open file.
///
/// The window normally covers the whole file. Growing and shrinking at the
/// end only touch the file itself when the handle owns it and the window
/// reaches the end of the file; otherwise they fail or only narrow the
/// window. Front expansion is never supported because a file cannot be
/// prepended to in place.
#[derive(Debug)]
pub struct FileStream {
    file: Rc<File>,
    path: PathBuf,
    start: u64,
    len: u64,
    flags: StreamFlags,
}

impl FileStream {
    /// Open `path` for reading, or for reading and writing if `writable`.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let flags = if writable {
            StreamFlags::OWNS_DATA | StreamFlags::MUTABLE
        } else {
            StreamFlags::OWNS_DATA
        };
        Self::open_with_flags(path, flags)
    }

    /// Open `path` with explicit flags; the file is opened read-write when
    /// [`StreamFlags::MUTABLE`] is set.
    pub fn open_with_flags(path: impl AsRef<Path>, flags: StreamFlags) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(flags.contains(StreamFlags::MUTABLE))
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Rc::new(file),
            path: path.to_path_buf(),
            start: 0,
            len,
            flags,
        })
    }

    /// Create a stream over `len` bytes of `file` starting at `start`.
    ///
    /// The handle never owns the file, so it cannot resize it.
    pub fn from_file_range(
        file: File,
        path: impl AsRef<Path>,
        start: u64,
        len: u64,
        flags: StreamFlags,
    ) -> Result<Self> {
        let file_len = file.metadata()?.len();
        match start.checked_add(len) {
            Some(end) if end <= file_len => {}
            _ => {
                return Err(Error::OutOfBounds {
                    offset: start,
                    size: len,
                    available: file_len,
                })
            }
        }
        Ok(Self {
            file: Rc::new(file),
            path: path.as_ref().to_path_buf(),
            start,
            len,
            flags: flags.without(StreamFlags::OWNS_DATA),
        })
    }

    /// Path the stream was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn range_check(&self, offset: u64, size: u64) -> Result<u64> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Ok(self.start + offset),
            _ => Err(Error::OutOfBounds { offset, size, available: self.len }),
        }
    }

    fn reaches_file_end(&self) -> Result<bool> {
        Ok(self.start + self.len == self.file.metadata()?.len())
    }
}

impl MemoryStream for FileStream {
    fn flags(&self) -> StreamFlags {
        self.flags
    }

    fn size(&self) -> Option<u64> {
        Some(self.len)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let pos = self.range_check(offset, buf.len() as u64)?;
        let mut file = &*self.file;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.flags.contains(StreamFlags::MUTABLE) {
            return Err(Error::ImmutableStream);
        }
        let end = offset.saturating_add(data.len() as u64);
        if end > self.len && self.flags.contains(StreamFlags::AUTO_EXPAND) {
            self.expand(0, end - self.len)?;
        }
        let pos = self.range_check(offset, data.len() as u64)?;
        let mut file = &*self.file;
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(data)?;
        Ok(())
    }

    fn trim(&mut self, at_start: u64, at_end: u64) -> Result<()> {
        let total = at_start.saturating_add(at_end);
        if total > self.len {
            return Err(Error::OutOfBounds { offset: 0, size: total, available: self.len });
        }
        if at_end > 0
            && self.flags.contains(StreamFlags::OWNS_DATA | StreamFlags::MUTABLE)
            && self.reaches_file_end()?
        {
            self.file.set_len(self.start + self.len - at_end)?;
        }
        self.start += at_start;
        self.len -= total;
        Ok(())
    }

    fn expand(&mut self, at_start: u64, at_end: u64) -> Result<()> {
        if at_start > 0 {
            return Err(Error::BackendUnsupported("expand at the start of a file"));
        }
        if at_end == 0 {
            return Ok(());
        }
        if !self.flags.contains(StreamFlags::OWNS_DATA | StreamFlags::MUTABLE)
            || !self.reaches_file_end()?
        {
            return Err(Error::BackendUnsupported("expand of a non-owned file window"));
        }
        self.file.set_len(self.start + self.len + at_end)?;
        self.len += at_end;
        Ok(())
    }

    fn shared_view(&self) -> Result<Box<dyn MemoryStream>> {
        Ok(Box::new(FileStream {
            file: Rc::clone(&self.file),
            path: self.path.clone(),
            start: self.start,
            len: self.len,
            flags: self.flags.without(StreamFlags::OWNS_DATA),
        }))
    }

    /// Copies the window into memory; the copy is a [`BufferStream`].
    fn deep_copy(&self) -> Result<Box<dyn MemoryStream>> {
        let mut data = vec![0u8; self.len as usize];
        self.read(0, &mut data)?;
        Ok(Box::new(BufferStream::with_flags(
            data,
            self.flags.without(StreamFlags::AUTO_EXPAND) | StreamFlags::MUTABLE,
        )))
    }
}
