//! Mutable in-memory form of a SuperBlob.
//!
//! [`DecodedSuperBlob::decode`] copies every blob out of the signature region
//! into its own [`BufferStream`]. The list can then be reordered, extended or
//! pruned, and [`DecodedSuperBlob::encode`] serializes it back with freshly
//! computed offsets.

use super::constants::{is_known_magic, CSMAGIC_EMBEDDED_SIGNATURE};
use super::superblob::{
    build_superblob, BlobEntry, BlobHeader, BlobIndex, SuperBlobHeader, BLOB_HEADER_SIZE,
};
use crate::byte_order::{self, CODESIGN_ENDIAN};
use crate::stream::{BufferStream, MemoryStream, MemoryStreamExt};
use crate::{Error, Result};
use tracing::debug;

/// One blob of a decoded SuperBlob: its slot type and its bytes.
///
/// The stream holds the complete blob, header included.
#[derive(Debug)]
pub struct DecodedBlob {
    slot_type: u32,
    stream: Box<dyn MemoryStream>,
}

impl DecodedBlob {
    /// Create a blob backed by `stream`.
    pub fn new(slot_type: u32, stream: impl MemoryStream + 'static) -> Self {
        Self { slot_type, stream: Box::new(stream) }
    }

    /// Create a blob holding a copy of `data`.
    pub fn from_bytes(slot_type: u32, data: &[u8]) -> Self {
        Self::new(slot_type, BufferStream::from_slice(data))
    }

    /// Slot type the blob is indexed under.
    pub fn slot_type(&self) -> u32 {
        self.slot_type
    }

    /// Move the blob to another slot.
    pub fn set_slot_type(&mut self, slot_type: u32) {
        self.slot_type = slot_type;
    }

    /// The blob's bytes.
    pub fn stream(&self) -> &dyn MemoryStream {
        self.stream.as_ref()
    }

    /// The blob's bytes, mutably.
    pub fn stream_mut(&mut self) -> &mut dyn MemoryStream {
        self.stream.as_mut()
    }

    /// Swap in new contents, returning the old stream to the caller.
    pub fn replace_stream(&mut self, stream: Box<dyn MemoryStream>) -> Box<dyn MemoryStream> {
        std::mem::replace(&mut self.stream, stream)
    }

    /// Detach the contents, leaving the blob empty.
    pub fn take_stream(&mut self) -> Box<dyn MemoryStream> {
        self.replace_stream(Box::new(BufferStream::new(Vec::new())))
    }

    /// Consume the blob, returning its stream.
    pub fn into_stream(self) -> Box<dyn MemoryStream> {
        self.stream
    }

    /// Size of the blob in bytes.
    pub fn len(&self) -> Result<u64> {
        self.stream.checked_size()
    }

    /// Whether the blob holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Magic at the start of the blob.
    pub fn magic(&self) -> Result<u32> {
        self.stream.read_u32(0, CODESIGN_ENDIAN)
    }

    /// Copy the blob's bytes out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.stream.to_vec()
    }

    /// Independent copy of this blob.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            slot_type: self.slot_type,
            stream: self.stream.deep_copy()?,
        })
    }
}

/// Ordered, mutable list of blobs; list order is wire order.
#[derive(Debug, Default)]
pub struct DecodedSuperBlob {
    blobs: Vec<DecodedBlob>,
}

impl DecodedSuperBlob {
    /// An empty SuperBlob.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the SuperBlob starting at absolute `offset` in `stream`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidSuperBlobMagic`] if the magic is not an embedded signature
    /// * [`Error::OutOfBounds`] if the declared length runs past the stream
    /// * [`Error::BlobOutOfBounds`] if an index entry points into the index table
    ///   or past the end of the SuperBlob
    pub fn decode<S: MemoryStream + ?Sized>(stream: &S, offset: u64) -> Result<Self> {
        let header: SuperBlobHeader = stream.read_wire(offset, CODESIGN_ENDIAN)?;
        if header.magic != CSMAGIC_EMBEDDED_SIGNATURE {
            return Err(Error::InvalidSuperBlobMagic(header.magic));
        }
        let bytes = stream.read_bytes(offset, header.length as usize)?;
        Self::from_bytes(&bytes)
    }

    /// Decode a SuperBlob held in memory.
    ///
    /// Bytes past the header's `length` are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: SuperBlobHeader = byte_order::decode(bytes, CODESIGN_ENDIAN)?;
        if header.magic != CSMAGIC_EMBEDDED_SIGNATURE {
            return Err(Error::InvalidSuperBlobMagic(header.magic));
        }
        let length = header.length as u64;
        if length > bytes.len() as u64 {
            return Err(Error::OutOfBounds {
                offset: 0,
                size: length,
                available: bytes.len() as u64,
            });
        }
        let table_size = header.table_size();
        if table_size > length {
            return Err(Error::BlobOutOfBounds {
                index: header.count as usize,
                reason: format!(
                    "index table of {} entries does not fit in {} bytes",
                    header.count, length
                ),
            });
        }
        let bytes = &bytes[..length as usize];

        let mut indices = Vec::with_capacity(header.count as usize);
        for i in 0..header.count {
            let at = SuperBlobHeader::index_offset(i) as usize;
            let index: BlobIndex = byte_order::decode(&bytes[at..], CODESIGN_ENDIAN)?;
            indices.push(index);
        }

        let mut blobs = Vec::with_capacity(indices.len());
        for (i, index) in indices.iter().enumerate() {
            let (start, end) = blob_range(bytes, &indices, i, table_size)?;
            debug!(
                index = i,
                slot = index.slot_type,
                offset = start,
                len = end - start,
                "decoded blob"
            );
            blobs.push(DecodedBlob::from_bytes(index.slot_type, &bytes[start..end]));
        }

        Ok(Self { blobs })
    }

    /// Serialize the list into SuperBlob wire format.
    ///
    /// Offsets and the total length are recomputed from the current list.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let entries = self
            .blobs
            .iter()
            .map(|blob| -> Result<BlobEntry> { Ok(BlobEntry::new(blob.slot_type, blob.to_vec()?)) })
            .collect::<Result<Vec<_>>>()?;
        build_superblob(&entries)
    }

    /// Number of blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Blobs in wire order.
    pub fn blobs(&self) -> &[DecodedBlob] {
        &self.blobs
    }

    /// Blobs in wire order, mutably.
    pub fn blobs_mut(&mut self) -> &mut [DecodedBlob] {
        &mut self.blobs
    }

    /// First blob in `slot`.
    pub fn find_blob(&self, slot: u32) -> Option<&DecodedBlob> {
        self.blobs.iter().find(|b| b.slot_type == slot)
    }

    /// First blob in `slot`, mutably.
    pub fn find_blob_mut(&mut self, slot: u32) -> Option<&mut DecodedBlob> {
        self.blobs.iter_mut().find(|b| b.slot_type == slot)
    }

    /// Position of the first blob in `slot`.
    pub fn position(&self, slot: u32) -> Option<usize> {
        self.blobs.iter().position(|b| b.slot_type == slot)
    }

    /// Insert `blob` so that it ends up at `index`.
    pub fn insert(&mut self, index: usize, blob: DecodedBlob) -> Result<()> {
        if index > self.blobs.len() {
            return Err(Error::BlobIndexOutOfRange { index, count: self.blobs.len() });
        }
        self.blobs.insert(index, blob);
        Ok(())
    }

    /// Append `blob` to the end.
    pub fn push(&mut self, blob: DecodedBlob) {
        self.blobs.push(blob);
    }

    /// Remove and return the blob at `index`.
    pub fn remove(&mut self, index: usize) -> Result<DecodedBlob> {
        if index >= self.blobs.len() {
            return Err(Error::BlobIndexOutOfRange { index, count: self.blobs.len() });
        }
        Ok(self.blobs.remove(index))
    }

    /// Detach the first blob in `slot`.
    pub fn take(&mut self, slot: u32) -> Option<DecodedBlob> {
        let index = self.position(slot)?;
        Some(self.blobs.remove(index))
    }

    /// Exchange the blobs at `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        let count = self.blobs.len();
        for index in [a, b] {
            if index >= count {
                return Err(Error::BlobIndexOutOfRange { index, count });
            }
        }
        self.blobs.swap(a, b);
        Ok(())
    }

    /// Replace the contents of the first blob in `slot`, or append a new blob.
    ///
    /// Returns the replaced stream, if any.
    pub fn set_slot(
        &mut self,
        slot: u32,
        stream: Box<dyn MemoryStream>,
    ) -> Option<Box<dyn MemoryStream>> {
        match self.find_blob_mut(slot) {
            Some(blob) => Some(blob.replace_stream(stream)),
            None => {
                self.blobs.push(DecodedBlob { slot_type: slot, stream });
                None
            }
        }
    }

    /// Stable-sort the blobs by slot type.
    pub fn sort_by_slot(&mut self) {
        self.blobs.sort_by_key(|b| b.slot_type);
    }

    /// Independent copy of the whole list.
    pub fn try_clone(&self) -> Result<Self> {
        let blobs = self
            .blobs
            .iter()
            .map(DecodedBlob::try_clone)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blobs })
    }
}

impl FromIterator<DecodedBlob> for DecodedSuperBlob {
    fn from_iter<I: IntoIterator<Item = DecodedBlob>>(iter: I) -> Self {
        Self { blobs: iter.into_iter().collect() }
    }
}

/// Byte range of blob `i` within the SuperBlob `bytes`.
///
/// A blob spans up to the next-higher index offset, or to the end of the
/// SuperBlob for the last one. An entry that shares its offset with a later
/// entry is empty. Within its span, a blob with a known code-signing magic and
/// a complete header ends at its embedded length.
fn blob_range(
    bytes: &[u8],
    indices: &[BlobIndex],
    i: usize,
    table_size: u64,
) -> Result<(usize, usize)> {
    let length = bytes.len() as u64;
    let start = indices[i].offset as u64;
    let out_of_bounds = |reason: String| Error::BlobOutOfBounds { index: i, reason };

    if start < table_size {
        return Err(out_of_bounds(format!(
            "offset 0x{:x} points into the index table",
            start
        )));
    }
    if start > length {
        return Err(out_of_bounds(format!(
            "offset 0x{:x} is past the superblob end 0x{:x}",
            start, length
        )));
    }

    let span_end = if indices[i + 1..].iter().any(|idx| idx.offset as u64 == start) {
        start
    } else {
        indices
            .iter()
            .map(|idx| idx.offset as u64)
            .filter(|&o| o > start)
            .min()
            .map_or(length, |o| o.min(length))
    };

    let end = match embedded_length(&bytes[start as usize..span_end as usize]) {
        Some(len) => start + len,
        None => span_end,
    };
    Ok((start as usize, end as usize))
}

/// Length a blob declares for itself, if it has a known magic, a complete
/// header and a length that fits inside `span`.
fn embedded_length(span: &[u8]) -> Option<u64> {
    let header: BlobHeader = byte_order::decode(span, CODESIGN_ENDIAN).ok()?;
    let len = header.length as u64;
    let fits = len >= BLOB_HEADER_SIZE as u64 && len <= span.len() as u64;
    (is_known_magic(header.magic) && fits).then_some(len)
}
