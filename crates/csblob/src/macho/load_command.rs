//! Load-command records and the fixed-layout commands the engine touches.

use goblin::mach::load_command::{cmd_to_str, LC_CODE_SIGNATURE};
use scroll::{Pread, Pwrite, SizeWith};

/// Size of the `{cmd, cmdsize}` prefix shared by every load command.
pub const LOAD_COMMAND_HEADER_SIZE: u64 = 8;

/// Size of `LC_CODE_SIGNATURE` (`linkedit_data_command`).
pub const LINKEDIT_DATA_COMMAND_SIZE: u32 = 16;

/// The `{cmd, cmdsize}` header of a load command, as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct LoadCommandHeader {
    /// Command id (`LC_*`).
    pub cmd: u32,
    /// Total size of the command including its trailing data.
    pub cmdsize: u32,
}

/// One entry of a slice's load-command list.
///
/// Only the header is kept; `offset` locates the full command relative to
/// the start of the slice so callers can read the body when they need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommand {
    /// Command id (`LC_*`).
    pub cmd: u32,
    /// Total size of the command.
    pub cmdsize: u32,
    /// Offset of the command relative to the slice base.
    pub offset: u64,
}

impl LoadCommand {
    /// Symbolic name of the command, `"LC_UNKNOWN"` if unrecognized.
    pub fn name(&self) -> &'static str {
        cmd_to_str(self.cmd)
    }

    /// Whether the command id is one goblin knows about.
    pub fn is_known(&self) -> bool {
        self.name() != "LC_UNKNOWN"
    }

    /// Whether this is `LC_CODE_SIGNATURE`.
    pub fn is_code_signature(&self) -> bool {
        self.cmd == LC_CODE_SIGNATURE
    }
}

/// `linkedit_data_command`, the layout of `LC_CODE_SIGNATURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct LinkeditDataCommand {
    /// `LC_CODE_SIGNATURE`.
    pub cmd: u32,
    /// Always 16.
    pub cmdsize: u32,
    /// Offset of the data relative to the slice base.
    pub dataoff: u32,
    /// Size of the data region.
    pub datasize: u32,
}

/// `segment_command_64`, minus the trailing sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct SegmentCommand64 {
    /// `LC_SEGMENT_64`.
    pub cmd: u32,
    /// Size of the command including its section headers.
    pub cmdsize: u32,
    /// NUL-padded segment name, e.g. `__LINKEDIT`.
    pub segname: [u8; 16],
    /// Virtual address the segment is mapped at.
    pub vmaddr: u64,
    /// Size of the mapping, page-rounded.
    pub vmsize: u64,
    /// Offset of the segment's bytes relative to the slice.
    pub fileoff: u64,
    /// Number of bytes mapped from the file.
    pub filesize: u64,
    /// Strongest protection the segment may be given.
    pub maxprot: u32,
    /// Protection at load time.
    pub initprot: u32,
    /// Number of section headers following the command.
    pub nsects: u32,
    /// `SG_*` flags.
    pub flags: u32,
}

/// `segment_command`, the 32-bit variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct SegmentCommand32 {
    /// `LC_SEGMENT`.
    pub cmd: u32,
    /// Size of the command including its section headers.
    pub cmdsize: u32,
    /// NUL-padded segment name, e.g. `__LINKEDIT`.
    pub segname: [u8; 16],
    /// Virtual address the segment is mapped at.
    pub vmaddr: u32,
    /// Size of the mapping, page-rounded.
    pub vmsize: u32,
    /// Offset of the segment's bytes relative to the slice.
    pub fileoff: u32,
    /// Number of bytes mapped from the file.
    pub filesize: u32,
    /// Strongest protection the segment may be given.
    pub maxprot: u32,
    /// Protection at load time.
    pub initprot: u32,
    /// Number of section headers following the command.
    pub nsects: u32,
    /// `SG_*` flags.
    pub flags: u32,
}

/// Compare a NUL-padded segment name with `name`.
pub fn segname_eq(segname: &[u8; 16], name: &str) -> bool {
    let end = segname.iter().position(|&b| b == 0).unwrap_or(segname.len());
    &segname[..end] == name.as_bytes()
}
