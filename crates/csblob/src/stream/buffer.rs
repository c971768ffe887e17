//! In-memory stream backend.

use super::{MemoryStream, StreamFlags};
use crate::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;

/// A stream over a heap buffer.
///
/// An owning stream always views its whole buffer. Views produced by
/// [`MemoryStream::shared_view`] share the buffer, do not own it, and keep
/// their own window into it; they can be trimmed (which narrows the window)
/// but not expanded.
#[derive(Debug)]
pub struct BufferStream {
    storage: Rc<RefCell<Vec<u8>>>,
    start: usize,
    len: usize,
    flags: StreamFlags,
}

impl BufferStream {
    /// Create a mutable stream owning `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_flags(data, StreamFlags::OWNS_DATA | StreamFlags::MUTABLE)
    }

    /// Create a mutable stream holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// Create an owning stream with explicit flags.
    pub fn with_flags(data: Vec<u8>, flags: StreamFlags) -> Self {
        let len = data.len();
        Self {
            storage: Rc::new(RefCell::new(data)),
            start: 0,
            len,
            flags: flags | StreamFlags::OWNS_DATA,
        }
    }

    /// Create an empty stream that grows on write.
    pub fn growable() -> Self {
        Self::with_flags(Vec::new(), StreamFlags::MUTABLE | StreamFlags::AUTO_EXPAND)
    }

    fn range_check(&self, offset: u64, size: usize) -> Result<usize> {
        let available = self.len as u64;
        match offset.checked_add(size as u64) {
            Some(end) if end <= available => Ok(self.start + offset as usize),
            _ => Err(Error::OutOfBounds { offset, size: size as u64, available }),
        }
    }
}

impl MemoryStream for BufferStream {
    fn flags(&self) -> StreamFlags {
        self.flags
    }

    fn size(&self) -> Option<u64> {
        Some(self.len as u64)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = self.range_check(offset, buf.len())?;
        let storage = self.storage.borrow();
        let end = start + buf.len();
        let src = storage.get(start..end).ok_or(Error::OutOfBounds {
            offset,
            size: buf.len() as u64,
            available: storage.len().saturating_sub(self.start) as u64,
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.flags.contains(StreamFlags::MUTABLE) {
            return Err(Error::ImmutableStream);
        }
        let end = offset.saturating_add(data.len() as u64);
        if end > self.len as u64 && self.flags.contains(StreamFlags::AUTO_EXPAND) {
            self.expand(0, end - self.len as u64)?;
        }
        let start = self.range_check(offset, data.len())?;
        let mut storage = self.storage.borrow_mut();
        let dst = storage.get_mut(start..start + data.len()).ok_or(Error::OutOfBounds {
            offset,
            size: data.len() as u64,
            available: self.len as u64,
        })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn trim(&mut self, at_start: u64, at_end: u64) -> Result<()> {
        let total = at_start.saturating_add(at_end);
        if total > self.len as u64 {
            return Err(Error::OutOfBounds {
                offset: 0,
                size: total,
                available: self.len as u64,
            });
        }
        let (at_start, at_end) = (at_start as usize, at_end as usize);
        if self.flags.contains(StreamFlags::OWNS_DATA) {
            let mut storage = self.storage.borrow_mut();
            let new_len = storage.len() - at_end;
            storage.truncate(new_len);
            storage.drain(..at_start);
            self.start = 0;
            self.len = storage.len();
        } else {
            self.start += at_start;
            self.len -= at_start + at_end;
        }
        Ok(())
    }

    fn expand(&mut self, at_start: u64, at_end: u64) -> Result<()> {
        if !self.flags.contains(StreamFlags::OWNS_DATA) {
            return Err(Error::BackendUnsupported("expand of a shared buffer view"));
        }
        let mut storage = self.storage.borrow_mut();
        let new_len = storage.len() + at_end as usize;
        storage.resize(new_len, 0);
        if at_start > 0 {
            storage.splice(0..0, std::iter::repeat(0u8).take(at_start as usize));
        }
        self.start = 0;
        self.len = storage.len();
        Ok(())
    }

    fn shared_view(&self) -> Result<Box<dyn MemoryStream>> {
        Ok(Box::new(BufferStream {
            storage: Rc::clone(&self.storage),
            start: self.start,
            len: self.len,
            flags: self.flags.without(StreamFlags::OWNS_DATA),
        }))
    }

    fn deep_copy(&self) -> Result<Box<dyn MemoryStream>> {
        let storage = self.storage.borrow();
        let copy = storage
            .get(self.start..self.start + self.len)
            .ok_or(Error::InvalidSize)?
            .to_vec();
        Ok(Box::new(BufferStream::with_flags(copy, self.flags)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStreamExt;

    #[test]
    fn test_read_write() {
        let mut stream = BufferStream::new(vec![0u8; 8]);
        stream.write(2, &[1, 2, 3]).unwrap();
        assert_eq!(stream.read_bytes(1, 4).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_out_of_bounds_read_fails() {
        let stream = BufferStream::new(vec![7u8; 6]);
        let mut buf = [0xffu8; 4];
        let err = stream.read(4, &mut buf).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { offset: 4, size: 4, available: 6 }));
        assert_eq!(buf, [0xff; 4]);
    }

    #[test]
    fn test_out_of_bounds_write_is_not_partial() {
        let mut stream = BufferStream::new(vec![0u8; 6]);
        let err = stream.write(4, &[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { .. }));
        assert_eq!(stream.to_vec().unwrap(), vec![0u8; 6]);
    }

    #[test]
    fn test_immutable_write_rejected() {
        let mut stream = BufferStream::with_flags(vec![0u8; 4], StreamFlags::NONE);
        assert!(matches!(stream.write(0, &[1]), Err(Error::ImmutableStream)));
    }

    #[test]
    fn test_auto_expand() {
        let mut stream = BufferStream::growable();
        stream.write(4, &[1, 2]).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_trim_and_expand_owning() {
        let mut stream = BufferStream::new(vec![1, 2, 3, 4, 5, 6]);
        stream.trim(1, 2).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![2, 3, 4]);
        stream.expand(1, 2).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![0, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_trim_too_much() {
        let mut stream = BufferStream::new(vec![1, 2, 3]);
        assert!(stream.trim(2, 2).is_err());
        assert_eq!(stream.size(), Some(3));
    }

    #[test]
    fn test_shared_view_sees_writes() {
        let mut owner = BufferStream::new(vec![0u8; 4]);
        let view = owner.shared_view().unwrap();
        owner.write(0, &[9]).unwrap();
        assert_eq!(view.read_bytes(0, 1).unwrap(), vec![9]);
        assert!(!view.flags().contains(StreamFlags::OWNS_DATA));
    }

    #[test]
    fn test_shared_view_trim_narrows_window_only() {
        let owner = BufferStream::new(vec![1, 2, 3, 4, 5]);
        let mut view = owner.shared_view().unwrap();
        view.trim(1, 1).unwrap();
        assert_eq!(view.to_vec().unwrap(), vec![2, 3, 4]);
        assert_eq!(owner.to_vec().unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(matches!(view.expand(0, 1), Err(Error::BackendUnsupported(_))));
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let mut owner = BufferStream::new(vec![1, 2, 3]);
        let copy = owner.deep_copy().unwrap();
        owner.write(0, &[42]).unwrap();
        assert_eq!(copy.to_vec().unwrap(), vec![1, 2, 3]);
    }
}
