//! Reading, editing and rewriting embedded Mach-O code signatures.
//!
//! A [`MachO`] parses the slices of a thin or fat binary over a
//! [`MemoryStream`]. The SuperBlob a slice's `LC_CODE_SIGNATURE` points at
//! can be walked in place with [`inspect_superblob`], decoded into a
//! [`DecodedSuperBlob`] for editing, and written back with
//! [`rewrite_code_signature`].

pub mod byte_order;
pub mod codesign;
pub mod error;
pub mod macho;
pub mod rewrite;
pub mod stream;

pub use codesign::{
    code_signature_offset, extract_cms_payload, extract_signature, extract_signature_to_path,
    inspect_superblob, inspect_superblob_at, walk_superblob_at, BlobSummary, DecodedBlob,
    DecodedSuperBlob, SuperBlobHeader,
};
pub use error::{Error, ErrorKind};
pub use macho::{MachO, Slice};
pub use rewrite::{rewrite_code_signature, ResizeAction, RewriteOptions, RewriteReport};
pub use stream::{BufferStream, FileStream, MemoryStream, MemoryStreamExt, StreamFlags};

pub type Result<T> = std::result::Result<T, Error>;
