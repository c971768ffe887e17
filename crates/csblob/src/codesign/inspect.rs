//! Locating the signature of a slice and walking its SuperBlob index.

use super::code_directory::CodeDirectoryHeader;
use super::constants::{magic_name, slot_name, CSMAGIC_CODEDIRECTORY, CSMAGIC_EMBEDDED_SIGNATURE};
use super::superblob::{BlobIndex, SuperBlobHeader};
use crate::byte_order::{CODESIGN_ENDIAN, MACHO_ENDIAN};
use crate::macho::{LinkeditDataCommand, LoadCommand, Slice};
use crate::stream::{MemoryStream, MemoryStreamExt};
use crate::{Error, Result};
use goblin::mach::load_command::LC_CODE_SIGNATURE;
use std::fmt;
use tracing::{debug, warn};

/// The `LC_CODE_SIGNATURE` of a slice, with where it was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeSignatureCommand {
    /// The load-command record.
    pub load_command: LoadCommand,
    /// Decoded command body.
    pub command: LinkeditDataCommand,
    /// Absolute offset of the SuperBlob in the container.
    pub absolute_offset: u64,
}

impl CodeSignatureCommand {
    /// Read the code-signature command of `slice`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CodeSignatureLoadCommandNotFound`] if the slice has none.
    pub fn locate<S: MemoryStream + ?Sized>(stream: &S, slice: &Slice) -> Result<Self> {
        let load_command = *slice
            .find_load_command(LC_CODE_SIGNATURE)
            .ok_or(Error::CodeSignatureLoadCommandNotFound)?;
        let command: LinkeditDataCommand =
            slice.read_wire_at(stream, load_command.offset, MACHO_ENDIAN)?;
        Ok(Self {
            load_command,
            command,
            absolute_offset: slice.absolute_offset(command.dataoff as u64),
        })
    }

    /// Signature data offset relative to the slice.
    pub fn dataoff(&self) -> u32 {
        self.command.dataoff
    }

    /// Size of the signature region recorded in the command.
    pub fn datasize(&self) -> u32 {
        self.command.datasize
    }
}

/// Absolute offset of the SuperBlob of `slice`.
pub fn code_signature_offset<S: MemoryStream + ?Sized>(stream: &S, slice: &Slice) -> Result<u64> {
    Ok(CodeSignatureCommand::locate(stream, slice)?.absolute_offset)
}

/// One line of a SuperBlob walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSummary {
    /// Zero-based position in the index.
    pub index: usize,
    /// Slot the index entry names.
    pub slot_type: u32,
    /// Offset relative to the SuperBlob.
    pub offset: u32,
    /// First four bytes of the blob.
    pub magic: u32,
    /// Header of the blob, if it is a CodeDirectory.
    pub code_directory: Option<CodeDirectoryHeader>,
}

impl BlobSummary {
    /// Human-readable kind of the blob.
    pub fn kind(&self) -> &'static str {
        magic_name(self.magic)
    }

    /// Name of the slot the blob occupies.
    pub fn slot(&self) -> &'static str {
        slot_name(self.slot_type)
    }
}

impl fmt::Display for BlobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Blob {}: {} at 0x{:x} (magic 0x{:x}",
            self.index + 1,
            self.kind(),
            self.offset,
            self.magic
        )?;
        if let Some(cd) = &self.code_directory {
            write!(f, ", hash offset 0x{:x}", cd.hash_offset)?;
        }
        write!(f, ").")
    }
}

/// Walk the SuperBlob of `slice` without copying any blob.
///
/// Unknown load commands are reported along the way. Holds one index entry
/// and at most one CodeDirectory header at a time.
pub fn inspect_superblob<S: MemoryStream + ?Sized>(
    stream: &S,
    slice: &Slice,
) -> Result<(SuperBlobHeader, Vec<BlobSummary>)> {
    for (i, lc) in slice.load_commands().iter().enumerate() {
        if !lc.is_known() {
            warn!("Unknown load command at load command {}, 0x{:x}.", i + 1, lc.cmd);
        }
    }
    let offset = code_signature_offset(stream, slice)?;
    inspect_superblob_at(stream, offset)
}

/// Walk a SuperBlob at an absolute offset, collecting every summary.
pub fn inspect_superblob_at<S: MemoryStream + ?Sized>(
    stream: &S,
    offset: u64,
) -> Result<(SuperBlobHeader, Vec<BlobSummary>)> {
    let mut summaries = Vec::new();
    let header = walk_superblob_at(stream, offset, |summary| {
        summaries.push(summary);
        Ok(())
    })?;
    Ok((header, summaries))
}

/// Walk a SuperBlob at an absolute offset, handing each summary to `visit`.
///
/// Reads one index entry at a time and stops at the first error, from the
/// stream or from `visit`.
///
/// # Errors
///
/// * [`Error::InvalidSuperBlobMagic`] if the magic is not an embedded signature
/// * [`Error::BlobOutOfBounds`] if the index table does not fit in `length`
/// * [`Error::OutOfBounds`] if `length` runs past the stream
pub fn walk_superblob_at<S, F>(stream: &S, offset: u64, mut visit: F) -> Result<SuperBlobHeader>
where
    S: MemoryStream + ?Sized,
    F: FnMut(BlobSummary) -> Result<()>,
{
    let header: SuperBlobHeader = stream.read_wire(offset, CODESIGN_ENDIAN)?;
    if header.magic != CSMAGIC_EMBEDDED_SIGNATURE {
        return Err(Error::InvalidSuperBlobMagic(header.magic));
    }
    if header.table_size() > header.length as u64 {
        return Err(Error::BlobOutOfBounds {
            index: 0,
            reason: format!(
                "index table of {} entries does not fit in {} bytes",
                header.count, header.length
            ),
        });
    }
    stream.check_range(offset, header.length as u64)?;

    for i in 0..header.count {
        let index: BlobIndex =
            stream.read_wire(offset + SuperBlobHeader::index_offset(i), CODESIGN_ENDIAN)?;
        let blob_at = offset + index.offset as u64;
        let magic = stream.read_u32(blob_at, CODESIGN_ENDIAN)?;
        let code_directory = if magic == CSMAGIC_CODEDIRECTORY {
            Some(stream.read_wire::<CodeDirectoryHeader>(blob_at, CODESIGN_ENDIAN)?)
        } else {
            None
        };

        let summary = BlobSummary {
            index: i as usize,
            slot_type: index.slot_type,
            offset: index.offset,
            magic,
            code_directory,
        };
        debug!("{}", summary);
        visit(summary)?;
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order::encode;
    use crate::codesign::constants::*;
    use crate::codesign::superblob::{build_signature_blob, build_superblob, BlobEntry};
    use crate::stream::BufferStream;
    use goblin::mach::header::MH_MAGIC_64;

    fn code_directory() -> Vec<u8> {
        let header = CodeDirectoryHeader {
            magic: CSMAGIC_CODEDIRECTORY,
            length: 44,
            version: 0x20400,
            flags: 0,
            hash_offset: 0x2c,
            ident_offset: 0,
            n_special_slots: 0,
            n_code_slots: 0,
            code_limit: 0,
            hash_size: 32,
            hash_type: CS_HASHTYPE_SHA256,
            platform: 0,
            page_size: 12,
            spare2: 0,
        };
        encode(header, CODESIGN_ENDIAN).unwrap()
    }

    fn image() -> Vec<u8> {
        let mut out = Vec::new();
        for v in [MH_MAGIC_64, 0x0100_000c, 0, 2, 1, 16, 0, 0] {
            out.extend(&v.to_le_bytes());
        }
        for v in [LC_CODE_SIGNATURE, 16, 0x40, 0] {
            out.extend(&v.to_le_bytes());
        }
        out.resize(0x40, 0);
        let sb = build_superblob(&[
            BlobEntry::new(CSSLOT_CODEDIRECTORY, code_directory()),
            BlobEntry::new(CSSLOT_SIGNATURESLOT, build_signature_blob(&[0x30, 0x80])),
        ])
        .unwrap();
        out.extend(&sb);
        out
    }

    #[test]
    fn test_locate() {
        let stream = BufferStream::new(image());
        let slice = Slice::from_thin(&stream).unwrap();
        let cs = CodeSignatureCommand::locate(&stream, &slice).unwrap();
        assert_eq!(cs.dataoff(), 0x40);
        assert_eq!(cs.load_command.offset, 32);
        assert_eq!(code_signature_offset(&stream, &slice).unwrap(), 0x40);
    }

    #[test]
    fn test_missing_code_signature() {
        let mut data = image();
        data[32..36].copy_from_slice(&0x2u32.to_le_bytes());
        let stream = BufferStream::new(data);
        let slice = Slice::from_thin(&stream).unwrap();
        assert!(matches!(
            code_signature_offset(&stream, &slice),
            Err(Error::CodeSignatureLoadCommandNotFound)
        ));
    }

    #[test]
    fn test_walk() {
        let stream = BufferStream::new(image());
        let slice = Slice::from_thin(&stream).unwrap();
        let (header, blobs) = inspect_superblob(&stream, &slice).unwrap();
        assert_eq!(header.count, 2);
        assert_eq!(header.length, 12 + 16 + 44 + 10);
        assert_eq!(blobs[0].code_directory.unwrap().hash_offset, 0x2c);
        assert_eq!(
            blobs[0].to_string(),
            "Blob 1: Code directory blob at 0x1c (magic 0xfade0c02, hash offset 0x2c)."
        );
        assert_eq!(
            blobs[1].to_string(),
            "Blob 2: Signature blob at 0x48 (magic 0xfade0b01)."
        );
        assert_eq!(blobs[1].slot(), "CMS Signature");
    }

    #[test]
    fn test_walk_rejects_wrong_magic() {
        let mut data = image();
        data[0x40 + 3] = 0x00;
        let stream = BufferStream::new(data);
        let slice = Slice::from_thin(&stream).unwrap();
        assert!(matches!(
            inspect_superblob(&stream, &slice),
            Err(Error::InvalidSuperBlobMagic(0xfade0c00))
        ));
    }

    #[test]
    fn test_walk_rejects_oversized_count() {
        let mut data = CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes().to_vec();
        data.extend(&12u32.to_be_bytes());
        data.extend(&u32::MAX.to_be_bytes());
        let stream = BufferStream::new(data);
        assert!(matches!(
            inspect_superblob_at(&stream, 0),
            Err(Error::BlobOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_walk_rejects_length_past_stream() {
        let mut data = image();
        data[0x40 + 4..0x40 + 8].copy_from_slice(&0x10_0000u32.to_be_bytes());
        let stream = BufferStream::new(data);
        assert!(matches!(
            inspect_superblob_at(&stream, 0x40),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_walk_stops_when_visitor_fails() {
        let stream = BufferStream::new(image());
        let mut seen = 0;
        let result = walk_superblob_at(&stream, 0x40, |summary| {
            seen += 1;
            if summary.magic == CSMAGIC_CODEDIRECTORY {
                Err(Error::SlotNotFound(summary.slot_type))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(Error::SlotNotFound(CSSLOT_CODEDIRECTORY))));
        assert_eq!(seen, 1);
    }
}
