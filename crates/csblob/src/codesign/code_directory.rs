//! CodeDirectory header decoding.
//!
//! Only the fixed, version-independent prefix of the CodeDirectory is
//! modelled. Hash slots and later-version fields are left in the blob
//! untouched; the engine never needs to interpret them.

use super::constants::{hash_type_name, CSMAGIC_CODEDIRECTORY};
use crate::byte_order::{self, CODESIGN_ENDIAN};
use crate::{Error, Result};
use scroll::{Pread, Pwrite, SizeWith};
use std::fmt;

/// Size of the fixed CodeDirectory header.
pub const CODEDIRECTORY_HEADER_SIZE: usize = 44;

/// The fixed header at the start of every CodeDirectory blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct CodeDirectoryHeader {
    /// [`CSMAGIC_CODEDIRECTORY`].
    pub magic: u32,
    /// Size of the whole CodeDirectory blob.
    pub length: u32,
    /// Format version, e.g. `0x20400`.
    pub version: u32,
    /// `CS_*` signing flags.
    pub flags: u32,
    /// Offset of the first code-slot hash, relative to the blob.
    pub hash_offset: u32,
    /// Offset of the NUL-terminated identifier, relative to the blob.
    pub ident_offset: u32,
    /// Number of special slots stored before `hash_offset`.
    pub n_special_slots: u32,
    /// Number of page hashes.
    pub n_code_slots: u32,
    /// Bytes of the binary covered by page hashes.
    pub code_limit: u32,
    /// Size of each hash in bytes.
    pub hash_size: u8,
    /// One of the `CS_HASHTYPE_*` values.
    pub hash_type: u8,
    /// Platform identifier, zero for third-party code.
    pub platform: u8,
    /// Log2 of the page size.
    pub page_size: u8,
    /// Reserved.
    pub spare2: u32,
}

impl CodeDirectoryHeader {
    /// Decode the header at the start of a CodeDirectory blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMagic`] if the blob is not a CodeDirectory.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let header: Self = byte_order::decode(blob, CODESIGN_ENDIAN)?;
        if header.magic != CSMAGIC_CODEDIRECTORY {
            return Err(Error::InvalidMagic { magic: header.magic, offset: 0 });
        }
        Ok(header)
    }

    /// Page size in bytes, or `None` for an unpaged directory.
    pub fn page_bytes(&self) -> Option<u64> {
        if self.page_size == 0 {
            None
        } else {
            1u64.checked_shl(self.page_size as u32)
        }
    }

    /// Read the signing identifier out of the full blob.
    pub fn identifier<'a>(&self, blob: &'a [u8]) -> Option<&'a str> {
        let start = self.ident_offset as usize;
        let tail = blob.get(start..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }
}

impl fmt::Display for CodeDirectoryHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CodeDirectory v{:x} ({} slots, {} special, {} hashes",
            self.version,
            self.n_code_slots,
            self.n_special_slots,
            hash_type_name(self.hash_type),
        )?;
        if let Some(page) = self.page_bytes() {
            write!(f, ", {} byte pages", page)?;
        }
        write!(f, ")")
    }
}
