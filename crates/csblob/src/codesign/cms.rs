//! Extraction of the raw signature region and its CMS payload.

use super::constants::CSSLOT_SIGNATURESLOT;
use super::decoded::DecodedSuperBlob;
use super::inspect::code_signature_offset;
use super::superblob::{SuperBlobHeader, BLOB_HEADER_SIZE};
use crate::macho::Slice;
use crate::stream::{MemoryStream, MemoryStreamExt, DEFAULT_COPY_CHUNK};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Copy the whole SuperBlob of `slice` to `sink`.
///
/// Exactly `header.length` bytes are written, starting at the signature
/// offset recorded in `LC_CODE_SIGNATURE`. The range is checked against the
/// stream before anything is written.
///
/// # Returns
///
/// The number of bytes written.
pub fn extract_signature<S, W>(
    stream: &S,
    slice: &Slice,
    header: &SuperBlobHeader,
    sink: &mut W,
) -> Result<u64>
where
    S: MemoryStream + ?Sized,
    W: Write + ?Sized,
{
    let offset = code_signature_offset(stream, slice)?;
    let length = header.length as u64;
    stream.check_range(offset, length)?;

    let mut buf = vec![0u8; DEFAULT_COPY_CHUNK.min(length as usize)];
    let mut copied = 0u64;
    while copied < length {
        let n = (length - copied).min(buf.len() as u64) as usize;
        stream.read(offset + copied, &mut buf[..n])?;
        sink.write_all(&buf[..n])?;
        copied += n as u64;
    }
    sink.flush()?;
    Ok(copied)
}

/// Write the SuperBlob of `slice` to a new file at `path`.
pub fn extract_signature_to_path<S: MemoryStream + ?Sized>(
    stream: &S,
    slice: &Slice,
    header: &SuperBlobHeader,
    path: impl AsRef<Path>,
) -> Result<u64> {
    let mut out = BufWriter::new(File::create(path.as_ref())?);
    let written = extract_signature(stream, slice, header, &mut out)?;
    info!(path = %path.as_ref().display(), bytes = written, "Extracted CMS data to file");
    Ok(written)
}

/// The CMS payload of the signature slot, without its blob header.
///
/// # Errors
///
/// Returns [`Error::SlotNotFound`] if there is no signature slot, and
/// [`Error::BlobOutOfBounds`] if the blob is shorter than its header.
pub fn extract_cms_payload(superblob: &DecodedSuperBlob) -> Result<Vec<u8>> {
    let index = superblob
        .position(CSSLOT_SIGNATURESLOT)
        .ok_or(Error::SlotNotFound(CSSLOT_SIGNATURESLOT))?;
    let blob = superblob.blobs()[index].to_vec()?;
    match blob.get(BLOB_HEADER_SIZE as usize..) {
        Some(payload) => Ok(payload.to_vec()),
        None => Err(Error::BlobOutOfBounds {
            index,
            reason: format!("signature blob of {} bytes has no room for its header", blob.len()),
        }),
    }
}
