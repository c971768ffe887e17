//! In-place patching of the load commands that describe a code signature.
//!
//! When a signature changes size the slice's metadata must follow it:
//! - `LC_CODE_SIGNATURE` gets the new data size
//! - `__LINKEDIT` grows (or shrinks) to end where the signature ends
//!
//! All writes go through the slice, so they land at the slice's absolute
//! position in the container and are bounded by its size.

use super::load_command::{
    segname_eq, LinkeditDataCommand, LoadCommand, SegmentCommand32, SegmentCommand64,
};
use super::slice::Slice;
use crate::byte_order::MACHO_ENDIAN;
use crate::stream::MemoryStream;
use crate::{Error, Result};
use goblin::mach::load_command::{LC_SEGMENT, LC_SEGMENT_64};
use tracing::debug;

/// Page size `__LINKEDIT`'s `vmsize` is rounded to.
pub const LINKEDIT_PAGE_SIZE: u64 = 0x4000;

const LINKEDIT: &str = "__LINKEDIT";

/// File and memory extent of a segment, independent of its word size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentExtent {
    pub fileoff: u64,
    pub filesize: u64,
    pub vmsize: u64,
}

/// Locate `__LINKEDIT` in `slice`.
///
/// Returns the load command and its current extent, or `None` if the slice
/// has no such segment.
pub fn find_linkedit<S: MemoryStream + ?Sized>(
    stream: &S,
    slice: &Slice,
) -> Result<Option<(LoadCommand, SegmentExtent)>> {
    for lc in slice.load_commands() {
        match lc.cmd {
            LC_SEGMENT_64 => {
                let seg: SegmentCommand64 = slice.read_wire_at(stream, lc.offset, MACHO_ENDIAN)?;
                if segname_eq(&seg.segname, LINKEDIT) {
                    let extent = SegmentExtent {
                        fileoff: seg.fileoff,
                        filesize: seg.filesize,
                        vmsize: seg.vmsize,
                    };
                    return Ok(Some((*lc, extent)));
                }
            }
            LC_SEGMENT => {
                let seg: SegmentCommand32 = slice.read_wire_at(stream, lc.offset, MACHO_ENDIAN)?;
                if segname_eq(&seg.segname, LINKEDIT) {
                    let extent = SegmentExtent {
                        fileoff: seg.fileoff as u64,
                        filesize: seg.filesize as u64,
                        vmsize: seg.vmsize as u64,
                    };
                    return Ok(Some((*lc, extent)));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Rewrite the `dataoff`/`datasize` of a `linkedit_data_command`.
pub fn update_linkedit_data_command<S: MemoryStream + ?Sized>(
    stream: &mut S,
    slice: &Slice,
    lc: &LoadCommand,
    dataoff: u32,
    datasize: u32,
) -> Result<()> {
    let mut cmd: LinkeditDataCommand = slice.read_wire_at(stream, lc.offset, MACHO_ENDIAN)?;
    cmd.dataoff = dataoff;
    cmd.datasize = datasize;
    debug!(offset = lc.offset, dataoff, datasize, "updating linkedit data command");
    slice.write_wire_at(stream, lc.offset, cmd, MACHO_ENDIAN)
}

/// Page-rounded `vmsize` for a `__LINKEDIT` of `new_filesize` bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedLoadCommand`] if `lc` is not a segment, or if
/// either size does not fit a 32-bit segment.
pub fn linkedit_vmsize(lc: &LoadCommand, new_filesize: u64) -> Result<u64> {
    let vmsize = align_to(new_filesize, LINKEDIT_PAGE_SIZE);
    match lc.cmd {
        LC_SEGMENT_64 => Ok(vmsize),
        LC_SEGMENT => {
            for v in [new_filesize, vmsize] {
                if u32::try_from(v).is_err() {
                    return Err(Error::MalformedLoadCommand {
                        index: 0,
                        reason: format!("__LINKEDIT size 0x{:x} does not fit a 32-bit segment", v),
                    });
                }
            }
            Ok(vmsize)
        }
        other => Err(Error::MalformedLoadCommand {
            index: 0,
            reason: format!("load command 0x{:x} is not a segment", other),
        }),
    }
}

/// Set `__LINKEDIT`'s `filesize` and its page-rounded `vmsize`.
///
/// Returns the segment's new extent.
pub fn update_linkedit_segment<S: MemoryStream + ?Sized>(
    stream: &mut S,
    slice: &Slice,
    lc: &LoadCommand,
    new_filesize: u64,
) -> Result<SegmentExtent> {
    let vmsize = linkedit_vmsize(lc, new_filesize)?;
    debug!(offset = lc.offset, filesize = new_filesize, vmsize, "updating __LINKEDIT");

    if lc.cmd == LC_SEGMENT_64 {
        let mut seg: SegmentCommand64 = slice.read_wire_at(stream, lc.offset, MACHO_ENDIAN)?;
        seg.filesize = new_filesize;
        seg.vmsize = vmsize;
        slice.write_wire_at(stream, lc.offset, seg, MACHO_ENDIAN)?;
        Ok(SegmentExtent { fileoff: seg.fileoff, filesize: seg.filesize, vmsize })
    } else {
        let mut seg: SegmentCommand32 = slice.read_wire_at(stream, lc.offset, MACHO_ENDIAN)?;
        seg.filesize = new_filesize as u32;
        seg.vmsize = vmsize as u32;
        slice.write_wire_at(stream, lc.offset, seg, MACHO_ENDIAN)?;
        Ok(SegmentExtent {
            fileoff: seg.fileoff as u64,
            filesize: new_filesize,
            vmsize,
        })
    }
}

/// Aligns a value up to the specified power-of-two alignment.
pub fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BufferStream, MemoryStreamExt};
    use goblin::mach::header::MH_MAGIC_64;
    use goblin::mach::load_command::LC_CODE_SIGNATURE;

    fn image() -> Vec<u8> {
        let mut out = Vec::new();
        for v in [MH_MAGIC_64, 0x0100_000c, 0, 2, 2, 72 + 16, 0, 0] {
            out.extend(&v.to_le_bytes());
        }
        out.extend(&LC_SEGMENT_64.to_le_bytes());
        out.extend(&72u32.to_le_bytes());
        let mut name = [0u8; 16];
        name[..10].copy_from_slice(b"__LINKEDIT");
        out.extend(&name);
        for v in [0x8000u64, 0x4000, 0x100, 0x40] {
            out.extend(&v.to_le_bytes());
        }
        out.extend(&[0u8; 16]);
        for v in [LC_CODE_SIGNATURE, 16, 0x120, 0x20] {
            out.extend(&v.to_le_bytes());
        }
        out.resize(0x140, 0);
        out
    }

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(1, 16), 16);
        assert_eq!(align_to(15, 16), 16);
        assert_eq!(align_to(16, 16), 16);
        assert_eq!(align_to(17, 16), 32);
        assert_eq!(align_to(100, 0x4000), 0x4000);
    }

    #[test]
    fn test_find_and_update_linkedit() {
        let mut stream = BufferStream::new(image());
        let slice = Slice::from_thin(&stream).unwrap();
        let (lc, extent) = find_linkedit(&stream, &slice).unwrap().unwrap();
        assert_eq!(extent, SegmentExtent { fileoff: 0x100, filesize: 0x40, vmsize: 0x4000 });

        let updated = update_linkedit_segment(&mut stream, &slice, &lc, 0x4010).unwrap();
        assert_eq!(updated.vmsize, 0x8000);
        let (_, reread) = find_linkedit(&stream, &slice).unwrap().unwrap();
        assert_eq!(reread, updated);
    }

    #[test]
    fn test_update_code_signature_command() {
        let mut stream = BufferStream::new(image());
        let slice = Slice::from_thin(&stream).unwrap();
        let lc = *slice.find_load_command(LC_CODE_SIGNATURE).unwrap();
        update_linkedit_data_command(&mut stream, &slice, &lc, 0x120, 0x30).unwrap();
        let cmd: LinkeditDataCommand = stream.read_wire(lc.offset, MACHO_ENDIAN).unwrap();
        assert_eq!(cmd.datasize, 0x30);
        assert_eq!(cmd.dataoff, 0x120);
        assert_eq!(cmd.cmdsize, 16);
    }

    #[test]
    fn test_segment_update_rejects_other_commands() {
        let mut stream = BufferStream::new(image());
        let slice = Slice::from_thin(&stream).unwrap();
        let lc = *slice.find_load_command(LC_CODE_SIGNATURE).unwrap();
        assert!(update_linkedit_segment(&mut stream, &slice, &lc, 0x10).is_err());
    }

    #[test]
    fn test_linkedit_vmsize_limits() {
        let seg64 = LoadCommand { cmd: LC_SEGMENT_64, cmdsize: 72, offset: 32 };
        let seg32 = LoadCommand { cmd: LC_SEGMENT, cmdsize: 56, offset: 28 };
        assert_eq!(linkedit_vmsize(&seg64, 0x1_0000_0001).unwrap(), 0x1_0000_4000);
        assert_eq!(linkedit_vmsize(&seg32, 0x4001).unwrap(), 0x8000);
        assert!(matches!(
            linkedit_vmsize(&seg32, 0xffff_ff00),
            Err(Error::MalformedLoadCommand { .. })
        ));
    }
}
