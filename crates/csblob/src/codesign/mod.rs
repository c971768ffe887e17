//! Code signature structures: SuperBlob decoding, mutation and encoding.

pub mod cms;
pub mod code_directory;
pub mod constants;
pub mod decoded;
pub mod inspect;
pub mod superblob;

pub use cms::{extract_cms_payload, extract_signature, extract_signature_to_path};
pub use code_directory::CodeDirectoryHeader;
pub use constants::{magic_name, slot_name};
pub use decoded::{DecodedBlob, DecodedSuperBlob};
pub use inspect::{
    code_signature_offset, inspect_superblob, inspect_superblob_at, walk_superblob_at,
    BlobSummary, CodeSignatureCommand,
};
pub use superblob::{BlobHeader, BlobIndex, SuperBlobHeader};
