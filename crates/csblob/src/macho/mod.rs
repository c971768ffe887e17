//! Mach-O container, slice and load-command model.

pub mod load_command;
pub mod parser;
pub mod slice;
pub mod writer;

pub use load_command::{LinkeditDataCommand, LoadCommand, LoadCommandHeader};
pub use parser::MachO;
pub use slice::{ArchDescriptor, MachHeader, Slice};
