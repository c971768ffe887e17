//! Randomly addressable byte storage with pluggable backends.
//!
//! Everything above this module reads and writes through the
//! [`MemoryStream`] trait, so the Mach-O model and the SuperBlob engine
//! behave the same over a file ([`FileStream`]) and over an in-memory buffer
//! ([`BufferStream`]).
//!
//! Capabilities differ per backend. Operations a backend does not implement
//! return [`Error::BackendUnsupported`] through the trait's default methods
//! instead of being silently ignored.

mod buffer;
mod file;
mod search;

pub use buffer::BufferStream;
pub use file::FileStream;
pub use search::find_memory;

use crate::byte_order;
use crate::{Error, Result};
use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::Endian;
use std::fmt;
use std::ops::BitOr;

/// Default chunk size for [`copy_data`].
pub const DEFAULT_COPY_CHUNK: usize = 0x4000;

/// Behaviour flags carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags(u32);

impl StreamFlags {
    /// No capabilities beyond reading.
    pub const NONE: StreamFlags = StreamFlags(0);
    /// The stream owns its storage and may shrink or grow it.
    pub const OWNS_DATA: StreamFlags = StreamFlags(1 << 0);
    /// Writes are permitted.
    pub const MUTABLE: StreamFlags = StreamFlags(1 << 1);
    /// Writes past the end grow the stream instead of failing.
    pub const AUTO_EXPAND: StreamFlags = StreamFlags(1 << 2);

    /// Returns true if every flag in `other` is set.
    pub fn contains(self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` cleared.
    pub fn without(self, other: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 & !other.0)
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 | rhs.0)
    }
}

/// Random-access byte storage.
///
/// Offsets are relative to the start of the stream's view. Reads and writes
/// are range-checked against [`MemoryStream::size`] before any I/O happens,
/// so a failing call never performs a partial transfer.
///
/// Dropping a stream releases it; storage shared through
/// [`MemoryStream::shared_view`] lives until its last handle is dropped.
pub trait MemoryStream: fmt::Debug {
    /// Behaviour flags of this handle.
    fn flags(&self) -> StreamFlags;

    /// Current size in bytes, or `None` if the backend cannot report one.
    fn size(&self) -> Option<u64>;

    /// Fill `buf` with the bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Remove `at_start` bytes from the front and `at_end` bytes from the back.
    fn trim(&mut self, _at_start: u64, _at_end: u64) -> Result<()> {
        Err(Error::BackendUnsupported("trim"))
    }

    /// Insert `at_start` zero bytes at the front and `at_end` at the back.
    fn expand(&mut self, _at_start: u64, _at_end: u64) -> Result<()> {
        Err(Error::BackendUnsupported("expand"))
    }

    /// New handle over the same storage with its own view state.
    fn shared_view(&self) -> Result<Box<dyn MemoryStream>> {
        Err(Error::BackendUnsupported("shared_view"))
    }

    /// New handle over an independent copy of this stream's bytes.
    fn deep_copy(&self) -> Result<Box<dyn MemoryStream>> {
        Err(Error::BackendUnsupported("deep_copy"))
    }
}

impl<S: MemoryStream + ?Sized> MemoryStream for Box<S> {
    fn flags(&self) -> StreamFlags {
        (**self).flags()
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        (**self).write(offset, data)
    }

    fn trim(&mut self, at_start: u64, at_end: u64) -> Result<()> {
        (**self).trim(at_start, at_end)
    }

    fn expand(&mut self, at_start: u64, at_end: u64) -> Result<()> {
        (**self).expand(at_start, at_end)
    }

    fn shared_view(&self) -> Result<Box<dyn MemoryStream>> {
        (**self).shared_view()
    }

    fn deep_copy(&self) -> Result<Box<dyn MemoryStream>> {
        (**self).deep_copy()
    }
}

/// Convenience operations available on every [`MemoryStream`].
pub trait MemoryStreamExt: MemoryStream {
    /// Size of the stream, failing with [`Error::InvalidSize`] if unknown.
    fn checked_size(&self) -> Result<u64> {
        self.size().ok_or(Error::InvalidSize)
    }

    /// Fail with [`Error::OutOfBounds`] unless `offset..offset + size` lies
    /// inside the stream.
    fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        let available = self.checked_size()?;
        match offset.checked_add(size) {
            Some(end) if end <= available => Ok(()),
            _ => Err(Error::OutOfBounds { offset, size, available }),
        }
    }

    /// Read `size` bytes at `offset` into a new buffer.
    fn read_bytes(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.check_range(offset, size as u64)?;
        let mut buf = vec![0u8; size];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read the whole stream.
    fn to_vec(&self) -> Result<Vec<u8>> {
        let size = self.checked_size()?;
        self.read_bytes(0, size as usize)
    }

    /// Read and decode a wire structure at `offset`.
    fn read_wire<T>(&self, offset: u64, endian: Endian) -> Result<T>
    where
        T: for<'a> TryFromCtx<'a, Endian, Error = scroll::Error> + SizeWith<Endian>,
    {
        let bytes = self.read_bytes(offset, T::size_with(&endian))?;
        byte_order::decode(&bytes, endian)
    }

    /// Encode and write a wire structure at `offset`.
    fn write_wire<T>(&mut self, offset: u64, value: T, endian: Endian) -> Result<()>
    where
        T: TryIntoCtx<Endian, Error = scroll::Error> + SizeWith<Endian>,
    {
        let bytes = byte_order::encode(value, endian)?;
        self.write(offset, &bytes)
    }

    /// Read a single `u32` at `offset`.
    fn read_u32(&self, offset: u64, endian: Endian) -> Result<u32> {
        self.read_wire::<u32>(offset, endian)
    }

    /// Write `len` zero bytes at `offset`.
    fn write_zeros(&mut self, offset: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let chunk = vec![0u8; (len as usize).min(DEFAULT_COPY_CHUNK)];
        let mut written = 0u64;
        while written < len {
            let n = (len - written).min(chunk.len() as u64) as usize;
            self.write(offset + written, &chunk[..n])?;
            written += n as u64;
        }
        Ok(())
    }
}

impl<S: MemoryStream + ?Sized> MemoryStreamExt for S {}

/// Copy `size` bytes between two streams in chunks of `chunk_size`.
///
/// Both ranges are checked before the first byte moves.
pub fn copy_data<S, T>(
    origin: &S,
    origin_offset: u64,
    target: &mut T,
    target_offset: u64,
    size: u64,
    chunk_size: usize,
) -> Result<()>
where
    S: MemoryStream + ?Sized,
    T: MemoryStream + ?Sized,
{
    if chunk_size == 0 {
        return Err(Error::Config("copy chunk size must be non-zero".into()));
    }
    origin.check_range(origin_offset, size)?;
    target.check_range(target_offset, size)?;

    let mut buf = vec![0u8; chunk_size.min(size as usize)];
    let mut copied = 0u64;
    while copied < size {
        let n = (size - copied).min(buf.len() as u64) as usize;
        origin.read(origin_offset + copied, &mut buf[..n])?;
        target.write(target_offset + copied, &buf[..n])?;
        copied += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order::CODESIGN_ENDIAN;

    #[test]
    fn test_flags() {
        let flags = StreamFlags::MUTABLE | StreamFlags::OWNS_DATA;
        assert!(flags.contains(StreamFlags::MUTABLE));
        assert!(!flags.contains(StreamFlags::AUTO_EXPAND));
        assert!(!flags.without(StreamFlags::OWNS_DATA).contains(StreamFlags::OWNS_DATA));
    }

    #[test]
    fn test_read_u32_and_zeros() {
        let mut stream = BufferStream::new(vec![0xfa, 0xde, 0x0c, 0xc0, 1, 2, 3, 4]);
        assert_eq!(stream.read_u32(0, CODESIGN_ENDIAN).unwrap(), 0xfade0cc0);
        stream.write_zeros(4, 4).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![0xfa, 0xde, 0x0c, 0xc0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_copy_data_between_streams() {
        let origin = BufferStream::new((0u8..100).collect());
        let mut target = BufferStream::new(vec![0u8; 50]);
        copy_data(&origin, 10, &mut target, 5, 40, 7).unwrap();
        let out = target.to_vec().unwrap();
        assert_eq!(&out[5..45], &(10u8..50).collect::<Vec<_>>()[..]);
        assert_eq!(out[0], 0);
        assert_eq!(out[45], 0);
    }

    #[test]
    fn test_copy_data_checks_bounds_first() {
        let origin = BufferStream::new(vec![1u8; 10]);
        let mut target = BufferStream::new(vec![0u8; 4]);
        let err = copy_data(&origin, 0, &mut target, 0, 8, 2).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { .. }));
        assert_eq!(target.to_vec().unwrap(), vec![0u8; 4]);
    }

    #[test]
    fn test_boxed_stream_forwards() {
        let mut boxed: Box<dyn MemoryStream> = Box::new(BufferStream::new(vec![0u8; 4]));
        boxed.write(0, &[9, 9]).unwrap();
        assert_eq!(boxed.read_bytes(0, 2).unwrap(), vec![9, 9]);
        assert_eq!(boxed.checked_size().unwrap(), 4);
    }
}
