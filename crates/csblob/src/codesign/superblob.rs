//! SuperBlob wire layout and blob assembly.
//!
//! ```text
//! offset 0        magic 0xfade0cc0 | length | count
//! offset 12       count x { slot_type, offset }
//! offset 12+8n    blob data, in index order
//! ```
//!
//! Every blob starts with its own `{magic, length}` header. Offsets are
//! relative to the start of the SuperBlob and all fields are big-endian.

use super::constants::*;
use crate::byte_order::{self, CODESIGN_ENDIAN};
use crate::{Error, Result};
use scroll::{Pread, Pwrite, SizeWith};

/// `{magic, length, count}`.
pub const SUPERBLOB_HEADER_SIZE: u32 = 12;

/// `{slot_type, offset}`.
pub const INDEX_ENTRY_SIZE: u32 = 8;

/// Size of the `{magic, length}` header every blob starts with.
pub const BLOB_HEADER_SIZE: u32 = 8;

/// `{magic, length, count}` at the start of a SuperBlob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct SuperBlobHeader {
    /// [`CSMAGIC_EMBEDDED_SIGNATURE`] for an embedded signature.
    pub magic: u32,
    /// Total size of the SuperBlob including header, index and blobs.
    pub length: u32,
    /// Number of index entries.
    pub count: u32,
}

impl SuperBlobHeader {
    /// Size of the header plus its index table.
    pub fn table_size(&self) -> u64 {
        SUPERBLOB_HEADER_SIZE as u64 + self.count as u64 * INDEX_ENTRY_SIZE as u64
    }

    /// Offset of index entry `i`, relative to the SuperBlob.
    pub fn index_offset(i: u32) -> u64 {
        SUPERBLOB_HEADER_SIZE as u64 + i as u64 * INDEX_ENTRY_SIZE as u64
    }
}

/// One index entry: which slot a blob fills and where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct BlobIndex {
    /// One of the `CSSLOT_*` values.
    pub slot_type: u32,
    /// Offset of the blob relative to the SuperBlob.
    pub offset: u32,
}

/// The generic `{magic, length}` header of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct BlobHeader {
    /// One of the `CSMAGIC_*` values.
    pub magic: u32,
    /// Size of the blob, header included.
    pub length: u32,
}

/// A slot and the complete bytes of the blob that fills it.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    /// Slot the blob is indexed under.
    pub slot_type: u32,
    /// Blob bytes, header included.
    pub data: Vec<u8>,
}

impl BlobEntry {
    pub fn new(slot_type: u32, data: Vec<u8>) -> Self {
        Self { slot_type, data }
    }
}

/// Serialize a SuperBlob from entries in the given order.
///
/// Offsets are assigned as a running sum starting right after the index
/// table, so whatever offsets the entries came from are discarded.
///
/// # Errors
///
/// Returns [`Error::SuperBlobTooLarge`] if the result would not fit the
/// 32-bit `length` field.
pub fn build_superblob(entries: &[BlobEntry]) -> Result<Vec<u8>> {
    let count = u32::try_from(entries.len())
        .map_err(|_| Error::SuperBlobTooLarge(entries.len() as u64))?;
    let header_size = SUPERBLOB_HEADER_SIZE as u64 + count as u64 * INDEX_ENTRY_SIZE as u64;

    let mut cursor = header_size;
    let offsets: Vec<u64> = entries
        .iter()
        .map(|entry| {
            let at = cursor;
            cursor += entry.data.len() as u64;
            at
        })
        .collect();
    let length = u32::try_from(cursor).map_err(|_| Error::SuperBlobTooLarge(cursor))?;

    let mut buf = Vec::with_capacity(cursor as usize);
    let header = SuperBlobHeader {
        magic: CSMAGIC_EMBEDDED_SIGNATURE,
        length,
        count,
    };
    buf.extend(byte_order::encode(header, CODESIGN_ENDIAN)?);

    for (entry, &offset) in entries.iter().zip(&offsets) {
        let index = BlobIndex {
            slot_type: entry.slot_type,
            // Bounded by `length`, which already fits in 32 bits.
            offset: offset as u32,
        };
        buf.extend(byte_order::encode(index, CODESIGN_ENDIAN)?);
    }

    for entry in entries {
        buf.extend(&entry.data);
    }

    Ok(buf)
}

/// Prefix `payload` with a `{magic, length}` blob header.
pub fn wrap_blob(magic: u32, payload: &[u8]) -> Vec<u8> {
    let total_len = BLOB_HEADER_SIZE as usize + payload.len();
    let mut buf = Vec::with_capacity(total_len);
    buf.extend(&magic.to_be_bytes());
    buf.extend(&(total_len as u32).to_be_bytes());
    buf.extend(payload);
    buf
}

/// Entitlements blob around an XML plist.
pub fn build_entitlements_blob(plist: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_EMBEDDED_ENTITLEMENTS, plist)
}

/// Entitlements blob around DER-encoded entitlements.
pub fn build_der_entitlements_blob(der: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, der)
}

/// Requirement set with zero requirements: a 12-byte blob whose count is 0.
pub fn build_requirements_blob() -> Vec<u8> {
    wrap_blob(CSMAGIC_REQUIREMENTS, &0u32.to_be_bytes())
}

/// Wrapper blob for the signature slot around an opaque CMS payload.
pub fn build_signature_blob(cms: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_BLOBWRAPPER, cms)
}

/// Empty wrapper blob, as found in ad-hoc signatures.
pub fn build_adhoc_signature_blob() -> Vec<u8> {
    wrap_blob(CSMAGIC_BLOBWRAPPER, &[])
}
