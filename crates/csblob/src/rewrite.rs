//! Writing a re-encoded SuperBlob back into its container.
//!
//! The new signature replaces the old one in place, at the offset recorded
//! in `LC_CODE_SIGNATURE`. When it no longer fits the region up to the end
//! of the slice, storage is grown; when it is smaller, the surplus is either
//! trimmed off the end of storage or zero-filled. The load commands and the
//! fat arch table are then updated to describe the new region.
//!
//! # Example
//!
//! ```no_run
//! use csblob::codesign::constants::CSSLOT_SIGNATURESLOT;
//! use csblob::codesign::superblob::build_adhoc_signature_blob;
//! use csblob::{code_signature_offset, rewrite_code_signature, DecodedBlob, DecodedSuperBlob};
//! use csblob::{MachO, RewriteOptions};
//!
//! let mut macho = MachO::open("a.out", true)?;
//! let offset = code_signature_offset(macho.stream(), macho.slice(0)?)?;
//! let mut superblob = DecodedSuperBlob::decode(macho.stream(), offset)?;
//! superblob.take(CSSLOT_SIGNATURESLOT);
//! superblob.push(DecodedBlob::from_bytes(CSSLOT_SIGNATURESLOT, &build_adhoc_signature_blob()));
//!
//! let report = rewrite_code_signature(&mut macho, 0, &superblob, &RewriteOptions::new())?;
//! println!("{report}");
//! # Ok::<(), csblob::Error>(())
//! ```

use crate::codesign::inspect::CodeSignatureCommand;
use crate::codesign::DecodedSuperBlob;
use crate::macho::writer::{
    align_to, find_linkedit, linkedit_vmsize, update_linkedit_data_command, update_linkedit_segment,
};
use crate::macho::MachO;
use crate::stream::{MemoryStreamExt, StreamFlags};
use crate::{Error, ErrorKind, Result};
use std::fmt;
use tracing::{info, warn};

/// Default alignment of the padded signature.
pub const DEFAULT_SIGNATURE_ALIGNMENT: u64 = 16;

/// Largest accepted signature alignment.
pub const MAX_SIGNATURE_ALIGNMENT: u64 = 0x4000;

/// Options for [`rewrite_code_signature`].
///
/// # Example
///
/// ```
/// use csblob::RewriteOptions;
///
/// let options = RewriteOptions::new().alignment(0x10).allow_growth(false);
/// assert!(options.validate().is_ok());
/// assert!(RewriteOptions::new().alignment(24).validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOptions {
    alignment: u64,
    allow_growth: bool,
    trim_surplus: bool,
}

impl RewriteOptions {
    /// Options with 16-byte alignment, growth and trimming enabled.
    pub fn new() -> Self {
        Self {
            alignment: DEFAULT_SIGNATURE_ALIGNMENT,
            allow_growth: true,
            trim_surplus: true,
        }
    }

    /// Pad the encoded signature up to a multiple of `alignment` bytes.
    pub fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Allow storage to grow when the signature is the last thing in it.
    pub fn allow_growth(mut self, allow: bool) -> Self {
        self.allow_growth = allow;
        self
    }

    /// Trim storage when the new signature is smaller and ends the storage.
    ///
    /// When disabled, or when the slice is not last, the surplus is zero-filled.
    pub fn trim_surplus(mut self, trim: bool) -> Self {
        self.trim_surplus = trim;
        self
    }

    /// Validate the options.
    ///
    /// Returns an error if the alignment is not a power of two no larger
    /// than 0x4000.
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() || self.alignment > MAX_SIGNATURE_ALIGNMENT {
            return Err(Error::Config(format!(
                "Signature alignment {} must be a power of two no larger than 0x{:x}",
                self.alignment, MAX_SIGNATURE_ALIGNMENT
            )));
        }
        Ok(())
    }
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// How the storage changed to fit the new signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAction {
    /// The new signature exactly fills the old region.
    Unchanged,
    /// Storage grew by this many bytes.
    Grew(u64),
    /// This many surplus bytes were cut off the end of storage.
    Trimmed(u64),
    /// This many surplus bytes were overwritten with zeros.
    ZeroFilled(u64),
}

/// Outcome of [`rewrite_code_signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteReport {
    pub slice_index: usize,
    /// Absolute offset of the signature.
    pub signature_offset: u64,
    /// `datasize` recorded before the rewrite.
    pub old_size: u64,
    /// Length of the encoded SuperBlob.
    pub encoded_size: u64,
    /// Encoded length after padding; the new `datasize`.
    pub padded_size: u64,
    pub action: ResizeAction,
    /// Size of the slice after the rewrite.
    pub slice_size: u64,
}

impl RewriteReport {
    /// Zero bytes appended after the encoded SuperBlob.
    pub fn padding(&self) -> u64 {
        self.padded_size - self.encoded_size
    }
}

impl fmt::Display for RewriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slice {}: signature at 0x{:x} now {} bytes ({} + {} padding, was {})",
            self.slice_index,
            self.signature_offset,
            self.padded_size,
            self.encoded_size,
            self.padding(),
            self.old_size
        )?;
        match self.action {
            ResizeAction::Unchanged => Ok(()),
            ResizeAction::Grew(n) => write!(f, ", grew storage by {}", n),
            ResizeAction::Trimmed(n) => write!(f, ", trimmed {} bytes", n),
            ResizeAction::ZeroFilled(n) => write!(f, ", zero-filled {} bytes", n),
        }
    }
}

/// Encode `superblob` and write it over the signature of slice `slice_index`.
///
/// Every check runs before storage is resized. An I/O error after that
/// point can leave the storage resized with the load commands still
/// describing the old signature.
///
/// # Arguments
///
/// * `macho` - Container opened over a writable stream
/// * `slice_index` - Slice whose signature is replaced
/// * `superblob` - New signature contents
/// * `options` - Alignment and resize policy
///
/// # Errors
///
/// * [`Error::InsufficientSpace`] if the padded signature does not fit and
///   storage cannot grow
/// * [`Error::ImmutableStream`] if the container was opened read-only
/// * [`Error::InvalidFatHeader`] or [`Error::MalformedLoadCommand`] if the new
///   sizes do not fit the fat arch or a 32-bit `__LINKEDIT`
///
/// Nothing is written in any of these cases.
pub fn rewrite_code_signature(
    macho: &mut MachO,
    slice_index: usize,
    superblob: &DecodedSuperBlob,
    options: &RewriteOptions,
) -> Result<RewriteReport> {
    options.validate()?;
    let encoded = superblob.encode()?;
    let encoded_size = encoded.len() as u64;
    let padded_size = align_to(encoded_size, options.alignment);
    let datasize = u32::try_from(padded_size).map_err(|_| Error::SuperBlobTooLarge(padded_size))?;
    let is_fat = macho.is_fat();

    let (stream, slice) = macho.split_mut(slice_index)?;
    if !stream.flags().contains(StreamFlags::MUTABLE) {
        return Err(Error::ImmutableStream);
    }
    let cs = CodeSignatureCommand::locate(&*stream, slice)?;
    let sig_abs = cs.absolute_offset;
    let slice_end = slice.end();
    if sig_abs > slice_end {
        return Err(Error::OutOfBounds {
            offset: sig_abs,
            size: 0,
            available: slice_end,
        });
    }

    let available = slice_end - sig_abs;
    let at_storage_end = slice_end == stream.checked_size()?;
    if padded_size > available && !(at_storage_end && options.allow_growth) {
        return Err(Error::InsufficientSpace { needed: padded_size, available });
    }

    let relative = cs.dataoff() as u64;
    let resized_slice_size = relative + padded_size;
    if is_fat && padded_size != available && u32::try_from(resized_slice_size).is_err() {
        return Err(Error::InvalidFatHeader(format!(
            "slice size 0x{:x} does not fit a fat arch",
            resized_slice_size
        )));
    }
    let linkedit = match find_linkedit(&*stream, slice)? {
        Some((lc, extent)) if relative + padded_size >= extent.fileoff => {
            let filesize = relative + padded_size - extent.fileoff;
            linkedit_vmsize(&lc, filesize)?;
            Some((lc, filesize))
        }
        Some(_) => {
            warn!("signature lies before __LINKEDIT; segment left unchanged");
            None
        }
        None => {
            warn!("slice has no __LINKEDIT segment");
            None
        }
    };

    let action = if padded_size > available {
        let growth = padded_size - available;
        match stream.expand(0, growth) {
            Ok(()) => ResizeAction::Grew(growth),
            Err(e) if e.kind() == ErrorKind::BackendUnsupported => {
                return Err(Error::InsufficientSpace { needed: padded_size, available });
            }
            Err(e) => return Err(e),
        }
    } else if padded_size < available {
        let surplus = available - padded_size;
        let trimmed = if at_storage_end && options.trim_surplus {
            match stream.trim(0, surplus) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::BackendUnsupported => false,
                Err(e) => return Err(e),
            }
        } else {
            false
        };
        if trimmed {
            ResizeAction::Trimmed(surplus)
        } else {
            stream.write_zeros(sig_abs + padded_size, surplus)?;
            ResizeAction::ZeroFilled(surplus)
        }
    } else {
        ResizeAction::Unchanged
    };

    match action {
        ResizeAction::Grew(_) | ResizeAction::Trimmed(_) => slice.set_size(resized_slice_size),
        ResizeAction::Unchanged | ResizeAction::ZeroFilled(_) => {}
    }

    slice.write_at(stream, relative, &encoded)?;
    stream.write_zeros(sig_abs + encoded_size, padded_size - encoded_size)?;

    update_linkedit_data_command(stream, slice, &cs.load_command, cs.dataoff(), datasize)?;
    if let Some((lc, filesize)) = linkedit {
        update_linkedit_segment(stream, slice, &lc, filesize)?;
    }

    let slice_size = slice.size();
    if is_fat {
        macho.update_fat_arch_size(slice_index, slice_size)?;
    }

    let report = RewriteReport {
        slice_index,
        signature_offset: sig_abs,
        old_size: cs.datasize() as u64,
        encoded_size,
        padded_size,
        action,
        slice_size,
    };
    info!(
        slice = slice_index,
        offset = sig_abs,
        old = report.old_size,
        new = padded_size,
        action = ?action,
        "rewrote code signature"
    );
    Ok(report)
}
