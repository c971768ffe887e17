//! Masked, alignment-stepped pattern search.

use super::{MemoryStream, MemoryStreamExt};
use crate::{Error, Result};

/// Search `stream` for `pattern` in `search_offset..search_offset + search_size`.
///
/// Candidate windows start at `search_offset` and advance by `alignment`
/// bytes, so only aligned matches are found. `mask`, if given, has the same
/// length as `pattern`; a byte is compared as `(a & m) == (b & m)`, so a
/// zero mask byte is a wildcard. The search range is clamped to the stream.
///
/// Returns the offset of the first match, or `None`.
pub fn find_memory<S: MemoryStream + ?Sized>(
    stream: &S,
    search_offset: u64,
    search_size: u64,
    pattern: &[u8],
    mask: Option<&[u8]>,
    alignment: u16,
) -> Result<Option<u64>> {
    let step = alignment as usize;
    if step == 0 || pattern.is_empty() || pattern.len() % step != 0 {
        return Err(Error::Config(format!(
            "pattern length {} must be a non-zero multiple of alignment {}",
            pattern.len(),
            alignment
        )));
    }
    if let Some(mask) = mask {
        if mask.len() != pattern.len() {
            return Err(Error::Config("mask length must match pattern length".into()));
        }
    }

    let stream_end = stream.checked_size()?;
    let end = search_offset.saturating_add(search_size).min(stream_end);
    if search_offset >= end {
        return Ok(None);
    }
    let haystack = stream.read_bytes(search_offset, (end - search_offset) as usize)?;

    let mut candidate = 0usize;
    while candidate + pattern.len() <= haystack.len() {
        let window = &haystack[candidate..candidate + pattern.len()];
        if masked_eq(window, pattern, mask) {
            return Ok(Some(search_offset + candidate as u64));
        }
        candidate += step;
    }
    Ok(None)
}

fn masked_eq(a: &[u8], b: &[u8], mask: Option<&[u8]>) -> bool {
    match mask {
        Some(mask) => a
            .iter()
            .zip(b)
            .zip(mask)
            .all(|((x, y), m)| x & m == y & m),
        None => a == b,
    }
}
