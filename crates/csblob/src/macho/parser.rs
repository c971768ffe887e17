//! Mach-O container parsing: thin files and fat (universal) archives.

use super::slice::{ArchDescriptor, Slice};
use crate::byte_order::{FAT_ENDIAN, MACHO_ENDIAN};
use crate::stream::{FileStream, MemoryStream, MemoryStreamExt};
use crate::{Error, Result};
use goblin::mach::fat::{FatArch, FatHeader, FAT_MAGIC, SIZEOF_FAT_ARCH, SIZEOF_FAT_HEADER};
use goblin::mach::header::{MH_MAGIC, MH_MAGIC_64};
use std::path::Path;
use tracing::debug;

/// Upper bound on `nfat_arch` accepted from a fat header.
pub const MAX_FAT_ARCHES: u32 = 64;

/// Byte offset of `size` inside a `fat_arch` entry.
const FAT_ARCH_SIZE_FIELD: u64 = 12;

/// A parsed Mach-O container and the stream it was read from.
#[derive(Debug)]
pub struct MachO {
    stream: Box<dyn MemoryStream>,
    is_fat: bool,
    slices: Vec<Slice>,
}

impl MachO {
    /// Open and parse a Mach-O file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to a thin or fat Mach-O file
    /// * `writable` - Open the file read-write so signatures can be rewritten
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let stream = FileStream::open(path.as_ref(), writable)?;
        debug!(path = %path.as_ref().display(), writable, "opened Mach-O");
        Self::from_stream(stream)
    }

    /// Parse a Mach-O container held by any stream.
    pub fn from_stream(stream: impl MemoryStream + 'static) -> Result<Self> {
        let stream: Box<dyn MemoryStream> = Box::new(stream);

        let fat_magic = stream.read_u32(0, FAT_ENDIAN)?;
        let (is_fat, slices) = if fat_magic == FAT_MAGIC {
            (true, Self::parse_fat(stream.as_ref())?)
        } else {
            let magic = stream.read_u32(0, MACHO_ENDIAN)?;
            if magic != MH_MAGIC_64 && magic != MH_MAGIC {
                return Err(Error::InvalidMagic { magic, offset: 0 });
            }
            (false, vec![Slice::from_thin(stream.as_ref())?])
        };

        Ok(Self { stream, is_fat, slices })
    }

    fn parse_fat(stream: &dyn MemoryStream) -> Result<Vec<Slice>> {
        let header: FatHeader = stream.read_wire(0, FAT_ENDIAN)?;
        if header.nfat_arch == 0 || header.nfat_arch > MAX_FAT_ARCHES {
            return Err(Error::InvalidFatHeader(format!(
                "nfat_arch {} outside 1..={}",
                header.nfat_arch, MAX_FAT_ARCHES
            )));
        }

        let file_size = stream.checked_size()?;
        let mut slices = Vec::with_capacity(header.nfat_arch as usize);
        for i in 0..header.nfat_arch as u64 {
            let entry = SIZEOF_FAT_HEADER as u64 + i * SIZEOF_FAT_ARCH as u64;
            let arch: FatArch = stream.read_wire(entry, FAT_ENDIAN)?;

            let end = arch.offset as u64 + arch.size as u64;
            if end > file_size {
                return Err(Error::InvalidFatHeader(format!(
                    "arch {} spans 0x{:x}..0x{:x} beyond file size 0x{:x}",
                    i, arch.offset, end, file_size
                )));
            }
            let align = 1u64.checked_shl(arch.align).ok_or_else(|| {
                Error::InvalidFatHeader(format!("arch {} alignment 2^{} too large", i, arch.align))
            })?;

            let descriptor = ArchDescriptor {
                cputype: arch.cputype,
                cpusubtype: arch.cpusubtype,
                offset: arch.offset as u64,
                size: arch.size as u64,
                align,
            };
            debug!(index = i, offset = descriptor.offset, size = descriptor.size, "fat arch");
            slices.push(Slice::from_arch(stream, descriptor)?);
        }
        Ok(slices)
    }

    /// Whether the container is a fat archive.
    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    /// All slices in container order.
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// The slice at `index`.
    pub fn slice(&self, index: usize) -> Result<&Slice> {
        self.slices.get(index).ok_or(Error::SliceNotFound {
            index,
            count: self.slices.len(),
        })
    }

    /// The underlying stream.
    pub fn stream(&self) -> &dyn MemoryStream {
        self.stream.as_ref()
    }

    /// The underlying stream, mutably.
    pub fn stream_mut(&mut self) -> &mut dyn MemoryStream {
        self.stream.as_mut()
    }

    /// Release the container, returning its stream.
    pub fn into_stream(self) -> Box<dyn MemoryStream> {
        self.stream
    }

    /// Borrow the stream and one slice mutably at the same time.
    pub(crate) fn split_mut(&mut self, index: usize) -> Result<(&mut dyn MemoryStream, &mut Slice)> {
        let count = self.slices.len();
        let slice = self
            .slices
            .get_mut(index)
            .ok_or(Error::SliceNotFound { index, count })?;
        Ok((self.stream.as_mut(), slice))
    }

    /// Rewrite the `size` field of fat arch `index`.
    ///
    /// Does nothing for thin files, whose slice size is the file size.
    pub fn update_fat_arch_size(&mut self, index: usize, size: u64) -> Result<()> {
        self.slice(index)?;
        if !self.is_fat {
            return Ok(());
        }
        let size = u32::try_from(size).map_err(|_| {
            Error::InvalidFatHeader(format!("slice size 0x{:x} does not fit a fat arch", size))
        })?;
        let field = SIZEOF_FAT_HEADER as u64
            + index as u64 * SIZEOF_FAT_ARCH as u64
            + FAT_ARCH_SIZE_FIELD;
        self.stream.write_wire(field, size, FAT_ENDIAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferStream;
    use goblin::mach::load_command::LC_UUID;

    fn thin(cpusubtype: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [MH_MAGIC_64, 0x0100_000c, cpusubtype, 2, 1, 24, 0, 0] {
            out.extend(&v.to_le_bytes());
        }
        out.extend(&LC_UUID.to_le_bytes());
        out.extend(&24u32.to_le_bytes());
        out.resize(64, 0);
        out
    }

    fn fat(slices: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(&FAT_MAGIC.to_be_bytes());
        out.extend(&(slices.len() as u32).to_be_bytes());
        let mut offset = 0x100u32;
        for s in slices {
            for v in [0x0100_000cu32, 0, offset, s.len() as u32, 4] {
                out.extend(&v.to_be_bytes());
            }
            offset += 0x100;
        }
        for (i, s) in slices.iter().enumerate() {
            out.resize(0x100 * (i + 1), 0);
            out.extend(s);
        }
        out
    }

    #[test]
    fn test_parse_minimal() {
        let result = MachO::from_stream(BufferStream::new(vec![0; 100]));
        assert!(matches!(result, Err(Error::InvalidMagic { magic: 0, offset: 0 })));
    }

    #[test]
    fn test_thin_container() {
        let macho = MachO::from_stream(BufferStream::new(thin(0))).unwrap();
        assert!(!macho.is_fat());
        assert_eq!(macho.slices().len(), 1);
        assert_eq!(macho.slice(0).unwrap().size(), 64);
        assert!(matches!(macho.slice(1), Err(Error::SliceNotFound { index: 1, count: 1 })));
    }

    #[test]
    fn test_fat_container() {
        let macho = MachO::from_stream(BufferStream::new(fat(&[thin(0), thin(0)]))).unwrap();
        assert!(macho.is_fat());
        let bases: Vec<u64> = macho.slices().iter().map(|s| s.base()).collect();
        assert_eq!(bases, vec![0x100, 0x200]);
        assert_eq!(macho.slice(1).unwrap().arch().align, 16);
        assert_eq!(macho.slice(1).unwrap().load_commands()[0].offset, 32);
    }

    #[test]
    fn test_fat_arch_out_of_file() {
        let mut image = fat(&[thin(0)]);
        image[8 + 12..8 + 16].copy_from_slice(&0x1000u32.to_be_bytes());
        let err = MachO::from_stream(BufferStream::new(image)).unwrap_err();
        assert!(matches!(err, Error::InvalidFatHeader(_)));
    }

    #[test]
    fn test_too_many_fat_arches() {
        let mut image = fat(&[thin(0)]);
        image[4..8].copy_from_slice(&65u32.to_be_bytes());
        assert!(matches!(
            MachO::from_stream(BufferStream::new(image)),
            Err(Error::InvalidFatHeader(_))
        ));
    }

    #[test]
    fn test_update_fat_arch_size() {
        let mut macho = MachO::from_stream(BufferStream::new(fat(&[thin(0), thin(0)]))).unwrap();
        macho.update_fat_arch_size(1, 0x80).unwrap();
        let raw = macho.stream().read_u32(8 + 20 + 12, FAT_ENDIAN).unwrap();
        assert_eq!(raw, 0x80);
        assert!(macho.update_fat_arch_size(2, 0x80).is_err());
    }
}
