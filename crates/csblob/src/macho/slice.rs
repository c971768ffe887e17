//! One architecture's view into a Mach-O container.

use super::load_command::{LoadCommand, LoadCommandHeader, LOAD_COMMAND_HEADER_SIZE};
use crate::byte_order::MACHO_ENDIAN;
use crate::stream::{MemoryStream, MemoryStreamExt};
use crate::{Error, Result};
use goblin::mach::header::{MH_MAGIC, MH_MAGIC_64, SIZEOF_HEADER_32, SIZEOF_HEADER_64};
use scroll::ctx::{SizeWith, TryFromCtx, TryIntoCtx};
use scroll::{Endian, Pread, Pwrite, SizeWith};
use tracing::{debug, warn};

/// Slices with this CPU subtype keep their header but skip load-command parsing.
pub const UNSUPPORTED_CPU_SUBTYPE: u32 = 0x9;

/// Upper bound on `ncmds` accepted from a header.
pub const MAX_LOAD_COMMANDS: u32 = 1000;

/// Alignment given to the synthesized descriptor of a thin file.
pub const THIN_SLICE_ALIGN: u64 = 0x4000;

/// The fixed part of `mach_header` / `mach_header_64`.
///
/// The 64-bit header has a trailing `reserved` word that is never inspected;
/// [`MachHeader::size`] accounts for it when locating the load commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite, SizeWith)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl MachHeader {
    /// Whether this is a 64-bit header.
    pub fn is_64(&self) -> bool {
        self.magic == MH_MAGIC_64
    }

    /// On-disk size of the header, where the load commands begin.
    pub fn size(&self) -> u64 {
        if self.is_64() {
            SIZEOF_HEADER_64 as u64
        } else {
            SIZEOF_HEADER_32 as u64
        }
    }
}

/// Where a slice lives inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchDescriptor {
    pub cputype: u32,
    pub cpusubtype: u32,
    /// Absolute offset of the slice in the container.
    pub offset: u64,
    /// Size of the slice in bytes.
    pub size: u64,
    /// Alignment of the slice in bytes.
    pub align: u64,
}

/// A parsed architecture slice.
///
/// The slice does not hold the stream; every read or write takes the
/// container's stream and goes through [`Slice::absolute_offset`].
#[derive(Debug, Clone)]
pub struct Slice {
    header: MachHeader,
    arch: ArchDescriptor,
    load_commands: Vec<LoadCommand>,
    supported: bool,
}

impl Slice {
    /// Parse the slice described by `arch` from `stream`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidMagic`] if the header magic is not a 32/64-bit Mach-O magic
    /// * [`Error::MisalignedLoadCommands`] if `sizeofcmds` is not a multiple of 8
    /// * [`Error::InvalidLoadCommandCount`] if `ncmds` is outside `1..=1000`
    /// * [`Error::MalformedLoadCommand`] if a command is truncated or overruns `sizeofcmds`
    pub fn from_arch<S: MemoryStream + ?Sized>(stream: &S, arch: ArchDescriptor) -> Result<Self> {
        let magic = stream.read_u32(arch.offset, MACHO_ENDIAN)?;
        if magic != MH_MAGIC_64 && magic != MH_MAGIC {
            return Err(Error::InvalidMagic { magic, offset: arch.offset });
        }

        let mut slice = Self {
            header: stream.read_wire(arch.offset, MACHO_ENDIAN)?,
            arch,
            load_commands: Vec::new(),
            supported: arch.cpusubtype != UNSUPPORTED_CPU_SUBTYPE,
        };

        if slice.header.sizeofcmds % 8 != 0 {
            return Err(Error::MisalignedLoadCommands(slice.header.sizeofcmds));
        }

        if !slice.supported {
            warn!(
                offset = arch.offset,
                cpusubtype = arch.cpusubtype,
                "skipping load commands of unsupported slice"
            );
            return Ok(slice);
        }

        slice.load_commands = slice.parse_load_commands(stream)?;
        debug!(
            offset = arch.offset,
            size = arch.size,
            ncmds = slice.load_commands.len(),
            "parsed slice"
        );
        Ok(slice)
    }

    /// Parse a thin (non-fat) file, which is a single slice spanning the stream.
    pub fn from_thin<S: MemoryStream + ?Sized>(stream: &S) -> Result<Self> {
        let header: MachHeader = stream.read_wire(0, MACHO_ENDIAN)?;
        let arch = ArchDescriptor {
            cputype: header.cputype,
            cpusubtype: header.cpusubtype,
            offset: 0,
            size: stream.checked_size()?,
            align: THIN_SLICE_ALIGN,
        };
        Self::from_arch(stream, arch)
    }

    fn parse_load_commands<S: MemoryStream + ?Sized>(&self, stream: &S) -> Result<Vec<LoadCommand>> {
        let ncmds = self.header.ncmds;
        if !(1..=MAX_LOAD_COMMANDS).contains(&ncmds) {
            return Err(Error::InvalidLoadCommandCount(ncmds));
        }

        let start = self.header.size();
        let end = start + self.header.sizeofcmds as u64;
        let mut commands = Vec::with_capacity(ncmds as usize);
        let mut offset = start;

        for index in 0..ncmds {
            if offset + LOAD_COMMAND_HEADER_SIZE > end {
                return Err(Error::MalformedLoadCommand {
                    index,
                    reason: format!("header at 0x{:x} runs past sizeofcmds", offset),
                });
            }
            let lc: LoadCommandHeader = self.read_wire_at(stream, offset, MACHO_ENDIAN)?;
            if (lc.cmdsize as u64) < LOAD_COMMAND_HEADER_SIZE {
                return Err(Error::MalformedLoadCommand {
                    index,
                    reason: format!("cmdsize {} is smaller than a command header", lc.cmdsize),
                });
            }
            if offset + lc.cmdsize as u64 > end {
                return Err(Error::MalformedLoadCommand {
                    index,
                    reason: format!("cmdsize {} at 0x{:x} runs past sizeofcmds", lc.cmdsize, offset),
                });
            }

            let command = LoadCommand { cmd: lc.cmd, cmdsize: lc.cmdsize, offset };
            if !command.is_known() {
                debug!(index, cmd = lc.cmd, offset, "unknown load command");
            }
            commands.push(command);
            offset += lc.cmdsize as u64;
        }

        Ok(commands)
    }

    /// Decoded Mach header.
    pub fn header(&self) -> &MachHeader {
        &self.header
    }

    /// Placement of the slice in its container.
    pub fn arch(&self) -> &ArchDescriptor {
        &self.arch
    }

    /// Absolute offset of the slice in its container.
    pub fn base(&self) -> u64 {
        self.arch.offset
    }

    /// Size of the slice.
    pub fn size(&self) -> u64 {
        self.arch.size
    }

    /// Absolute offset one past the last byte of the slice.
    pub fn end(&self) -> u64 {
        self.arch.offset + self.arch.size
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.arch.size = size;
    }

    /// False for slices whose load commands were not parsed.
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Load commands in file order.
    pub fn load_commands(&self) -> &[LoadCommand] {
        &self.load_commands
    }

    /// First load command with id `cmd`.
    pub fn find_load_command(&self, cmd: u32) -> Option<&LoadCommand> {
        self.load_commands.iter().find(|lc| lc.cmd == cmd)
    }

    /// Every load command with id `cmd`.
    pub fn find_load_commands(&self, cmd: u32) -> impl Iterator<Item = &LoadCommand> + '_ {
        self.load_commands.iter().filter(move |lc| lc.cmd == cmd)
    }

    /// Translate a slice-relative offset to an absolute container offset.
    pub fn absolute_offset(&self, relative: u64) -> u64 {
        self.arch.offset + relative
    }

    fn check_within(&self, relative: u64, len: u64) -> Result<()> {
        match relative.checked_add(len) {
            Some(end) if end <= self.arch.size => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset: relative,
                size: len,
                available: self.arch.size,
            }),
        }
    }

    /// Read bytes at a slice-relative offset.
    pub fn read_at<S: MemoryStream + ?Sized>(&self, stream: &S, relative: u64, buf: &mut [u8]) -> Result<()> {
        self.check_within(relative, buf.len() as u64)?;
        stream.read(self.absolute_offset(relative), buf)
    }

    /// Write bytes at a slice-relative offset.
    pub fn write_at<S: MemoryStream + ?Sized>(&self, stream: &mut S, relative: u64, data: &[u8]) -> Result<()> {
        self.check_within(relative, data.len() as u64)?;
        stream.write(self.absolute_offset(relative), data)
    }

    /// Decode a wire structure at a slice-relative offset.
    pub fn read_wire_at<S, T>(&self, stream: &S, relative: u64, endian: Endian) -> Result<T>
    where
        S: MemoryStream + ?Sized,
        T: for<'a> TryFromCtx<'a, Endian, Error = scroll::Error> + SizeWith<Endian>,
    {
        self.check_within(relative, T::size_with(&endian) as u64)?;
        stream.read_wire(self.absolute_offset(relative), endian)
    }

    /// Encode a wire structure at a slice-relative offset.
    pub fn write_wire_at<S, T>(&self, stream: &mut S, relative: u64, value: T, endian: Endian) -> Result<()>
    where
        S: MemoryStream + ?Sized,
        T: TryIntoCtx<Endian, Error = scroll::Error> + SizeWith<Endian>,
    {
        self.check_within(relative, T::size_with(&endian) as u64)?;
        stream.write_wire(self.absolute_offset(relative), value, endian)
    }
}
