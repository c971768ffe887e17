//! Byte-order conversion for fixed-layout wire structures.
//!
//! Every on-disk structure is a plain host-typed struct deriving scroll's
//! `Pread`/`Pwrite`/`SizeWith`. Conversion only ever goes bytes → value
//! ([`decode`]) or value → bytes ([`encode`]); there is no in-place
//! normalization, so a structure can never be swapped twice.
//!
//! Mach-O headers and load commands are stored little-endian, while the
//! fat header and everything inside a code signature are big-endian
//! regardless of the host.

use crate::Result;
use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::{Endian, Pread, Pwrite};

/// Byte order of Mach headers and load commands.
pub const MACHO_ENDIAN: Endian = scroll::LE;

/// Byte order of the fat header and arch table.
pub const FAT_ENDIAN: Endian = scroll::BE;

/// Byte order of SuperBlob, BlobIndex, CodeDirectory and blob headers.
pub const CODESIGN_ENDIAN: Endian = scroll::BE;

/// Decode a wire structure from the start of `bytes`.
pub fn decode<T>(bytes: &[u8], endian: Endian) -> Result<T>
where
    T: for<'a> TryFromCtx<'a, Endian, Error = scroll::Error>,
{
    Ok(bytes.pread_with::<T>(0, endian)?)
}

/// Encode a wire structure into a freshly allocated buffer of its exact size.
pub fn encode<T>(value: T, endian: Endian) -> Result<Vec<u8>>
where
    T: TryIntoCtx<Endian, Error = scroll::Error> + SizeWith<Endian>,
{
    let mut buf = vec![0u8; T::size_with(&endian)];
    buf.pwrite_with(value, 0, endian)?;
    Ok(buf)
}

/// Size in bytes of a wire structure.
pub fn wire_size<T: SizeWith<Endian>>() -> usize {
    T::size_with(&CODESIGN_ENDIAN)
}
