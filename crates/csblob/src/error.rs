//! Error types for csblob operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure in
//! stream I/O, Mach-O parsing, SuperBlob decoding and signature rewriting.
//! Variants are grouped into a coarse [`ErrorKind`] so callers can react to
//! a class of failure (for example "not found") without matching each case.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for csblob operations.
///
/// All fallible functions in this crate return [`crate::Result<T>`].
///
/// # Examples
///
/// ```no_run
/// use csblob::{Error, ErrorKind, MachO};
///
/// match MachO::open("a.out", false) {
///     Ok(macho) => println!("{} slice(s)", macho.slices().len()),
///     Err(e) if e.kind() == ErrorKind::Format => eprintln!("not a Mach-O: {e}"),
///     Err(Error::Io(e)) => eprintln!("IO error: {e}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation on the backing storage failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A fixed-layout wire structure could not be decoded or encoded.
    #[error("Wire format error: {0}")]
    Wire(#[from] scroll::Error),

    /// A header at the given offset carries an unexpected magic.
    #[error("Invalid magic 0x{magic:x} at offset 0x{offset:x}")]
    InvalidMagic {
        /// Magic value found.
        magic: u32,
        /// Absolute offset of the header.
        offset: u64,
    },

    /// `sizeofcmds` is not a multiple of 8.
    #[error("sizeofcmds ({0}) is not a multiple of 8")]
    MisalignedLoadCommands(u32),

    /// `ncmds` is outside `1..=1000`.
    #[error("Invalid number of load commands ({0})")]
    InvalidLoadCommandCount(u32),

    /// A load command header is inconsistent with the header's `sizeofcmds`.
    #[error("Malformed load command #{index}: {reason}")]
    MalformedLoadCommand {
        /// Zero-based position of the command.
        index: u32,
        /// What is wrong with it.
        reason: String,
    },

    /// The fat header is malformed.
    #[error("Invalid fat header: {0}")]
    InvalidFatHeader(String),

    /// The signature region does not start with the embedded-signature magic.
    #[error("Incorrect superblob magic 0x{0:x}")]
    InvalidSuperBlobMagic(u32),

    /// A blob index or blob length points outside the SuperBlob.
    #[error("Blob {index} out of bounds: {reason}")]
    BlobOutOfBounds {
        /// Zero-based position in the index.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// An encoded SuperBlob would not fit the 32-bit length field.
    #[error("SuperBlob of {0} bytes exceeds the 32-bit length field")]
    SuperBlobTooLarge(u64),

    /// A read or write would touch bytes outside the stream.
    #[error("Access of {size} bytes at 0x{offset:x} is out of bounds (stream size {available})")]
    OutOfBounds {
        /// Requested offset.
        offset: u64,
        /// Requested size.
        size: u64,
        /// Current stream size.
        available: u64,
    },

    /// The stream backend does not implement the operation.
    #[error("Operation not supported by this stream backend: {0}")]
    BackendUnsupported(&'static str),

    /// Write attempted on a stream opened without the mutable flag.
    #[error("Stream is not writable")]
    ImmutableStream,

    /// The stream could not report a valid size.
    #[error("Stream size is invalid")]
    InvalidSize,

    /// The slice has no `LC_CODE_SIGNATURE` load command.
    #[error("LC_CODE_SIGNATURE load command not found")]
    CodeSignatureLoadCommandNotFound,

    /// No blob with the requested slot type exists.
    #[error("No blob in slot 0x{0:x}")]
    SlotNotFound(u32),

    /// A position outside the decoded blob list was requested.
    #[error("Blob position {index} out of range (superblob has {count})")]
    BlobIndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Number of blobs present.
        count: usize,
    },

    /// A slice index outside the container was requested.
    #[error("Slice {index} not found (container has {count})")]
    SliceNotFound {
        /// Requested index.
        index: usize,
        /// Number of slices present.
        count: usize,
    },

    /// The rewritten signature does not fit and the storage cannot grow.
    #[error("Insufficient space for code signature: need {needed} bytes, {available} available")]
    InsufficientSpace {
        /// Bytes the padded signature needs.
        needed: u64,
        /// Bytes available before the end of the slice.
        available: u64,
    },

    /// Invalid option value or search pattern.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of [`enum@Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input data; the current parse cannot continue.
    Format,
    /// An offset or length reaches outside the backing storage.
    Bounds,
    /// The stream backend lacks the requested capability.
    BackendUnsupported,
    /// A requested load command, slot or slice is absent.
    NotFound,
    /// A rewrite would not fit.
    InsufficientSpace,
    /// Underlying I/O failure.
    Io,
    /// Invalid caller-supplied configuration.
    Config,
}

impl Error {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Wire(_)
            | Error::InvalidMagic { .. }
            | Error::MisalignedLoadCommands(_)
            | Error::InvalidLoadCommandCount(_)
            | Error::MalformedLoadCommand { .. }
            | Error::InvalidFatHeader(_)
            | Error::InvalidSuperBlobMagic(_)
            | Error::BlobOutOfBounds { .. }
            | Error::SuperBlobTooLarge(_) => ErrorKind::Format,
            Error::OutOfBounds { .. } | Error::BlobIndexOutOfRange { .. } => ErrorKind::Bounds,
            Error::BackendUnsupported(_) | Error::ImmutableStream | Error::InvalidSize => {
                ErrorKind::BackendUnsupported
            }
            Error::CodeSignatureLoadCommandNotFound
            | Error::SlotNotFound(_)
            | Error::SliceNotFound { .. } => ErrorKind::NotFound,
            Error::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}
