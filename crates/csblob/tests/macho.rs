//! Parsing thin and fat containers from files and buffers.

mod common;

use common::*;
use csblob::macho::writer::find_linkedit;
use csblob::{BufferStream, Error, FileStream, MachO, StreamFlags};
use tempfile::TempDir;

/// A thin image with `ncmds` 8-byte load commands of an unknown type.
fn image_with_commands(ncmds: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for v in [MH_MAGIC_64, CPU_TYPE_ARM64, 0, 2, ncmds, ncmds * 8, 0, 0] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for _ in 0..ncmds {
        out.extend_from_slice(&0x7fu32.to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());
    }
    out.resize(out.len() + 0x100, 0);
    out
}

#[test]
fn test_thin_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(dir.path(), "thin", &signed_thin_image());

    let macho = MachO::open(&path, false).unwrap();
    assert!(!macho.is_fat());
    assert_eq!(macho.slices().len(), 1);

    let slice = macho.slice(0).unwrap();
    assert_eq!(slice.base(), 0);
    assert_eq!(slice.size(), std::fs::metadata(&path).unwrap().len());
    assert_eq!(slice.load_commands().len(), 3);

    let cs = slice.find_load_command(LC_CODE_SIGNATURE).unwrap();
    assert_eq!(cs.offset, CODE_SIGNATURE_COMMAND as u64);
    assert_eq!(slice.find_load_commands(LC_SEGMENT_64).count(), 2);

    let (lc, extent) = find_linkedit(macho.stream(), slice).unwrap().unwrap();
    assert_eq!(lc.offset, LINKEDIT_COMMAND as u64);
    assert_eq!(extent.fileoff, SIGNATURE_OFFSET as u64);
}

#[test]
fn test_fat_from_buffer() {
    let data = signed_fat_image();
    let macho = MachO::from_stream(BufferStream::new(data.clone())).unwrap();
    assert!(macho.is_fat());
    assert_eq!(macho.slices().len(), 2);

    let first = macho.slice(0).unwrap();
    let second = macho.slice(1).unwrap();
    assert_eq!(first.base(), 0x4000);
    assert_eq!(first.arch().align, 0x4000);
    assert_eq!(second.base(), 0x8000);
    assert_eq!(second.end(), data.len() as u64);
    assert_eq!(second.header().cputype, CPU_TYPE_X86_64);

    assert!(matches!(
        macho.slice(2),
        Err(Error::SliceNotFound { index: 2, count: 2 })
    ));
}

#[test]
fn test_fat_slice_view_of_file_range() {
    let dir = TempDir::new().unwrap();
    let data = signed_fat_image();
    let path = write_fixture(dir.path(), "fat", &data);

    let file = std::fs::File::open(&path).unwrap();
    let thin_len = data.len() as u64 - 0x8000;
    let stream = FileStream::from_file_range(file, &path, 0x8000, thin_len, StreamFlags::NONE).unwrap();
    let macho = MachO::from_stream(stream).unwrap();
    assert!(!macho.is_fat());
    assert_eq!(macho.slice(0).unwrap().header().cputype, CPU_TYPE_X86_64);
}

#[test]
fn test_load_command_count_limits() {
    assert!(matches!(
        MachO::from_stream(BufferStream::new(image_with_commands(0))),
        Err(Error::InvalidLoadCommandCount(0))
    ));
    assert!(matches!(
        MachO::from_stream(BufferStream::new(image_with_commands(1001))),
        Err(Error::InvalidLoadCommandCount(1001))
    ));

    let macho = MachO::from_stream(BufferStream::new(image_with_commands(1000))).unwrap();
    let slice = macho.slice(0).unwrap();
    assert_eq!(slice.load_commands().len(), 1000);
    assert!(slice.load_commands().iter().all(|lc| !lc.is_known()));
}

#[test]
fn test_misaligned_sizeofcmds() {
    let mut data = signed_thin_image();
    data[20..24].copy_from_slice(&(72u32 + 72 + 16 + 4).to_le_bytes());
    assert!(matches!(
        MachO::from_stream(BufferStream::new(data)),
        Err(Error::MisalignedLoadCommands(_))
    ));
}

#[test]
fn test_truncated_load_command() {
    let mut data = signed_thin_image();
    // cmdsize of LC_CODE_SIGNATURE reaches past sizeofcmds
    data[CODE_SIGNATURE_COMMAND + 4..CODE_SIGNATURE_COMMAND + 8].copy_from_slice(&24u32.to_le_bytes());
    assert!(matches!(
        MachO::from_stream(BufferStream::new(data)),
        Err(Error::MalformedLoadCommand { index: 2, .. })
    ));
}

#[test]
fn test_unknown_magic() {
    let mut data = signed_thin_image();
    data[..4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
    assert!(matches!(
        MachO::from_stream(BufferStream::new(data)),
        Err(Error::InvalidMagic { magic: 0x1234_5678, offset: 0 })
    ));
}

#[test]
fn test_fat_arch_beyond_file() {
    let mut data = signed_fat_image();
    // size of the second arch
    data[8 + 20 + 12..8 + 20 + 16].copy_from_slice(&0x10_0000u32.to_be_bytes());
    assert!(matches!(
        MachO::from_stream(BufferStream::new(data)),
        Err(Error::InvalidFatHeader(_))
    ));
}

#[test]
fn test_fat_too_many_arches() {
    let mut data = signed_fat_image();
    data[4..8].copy_from_slice(&65u32.to_be_bytes());
    assert!(matches!(
        MachO::from_stream(BufferStream::new(data)),
        Err(Error::InvalidFatHeader(_))
    ));
}

#[test]
fn test_unsupported_subtype_keeps_header() {
    let mut data = signed_fat_image();
    // cpusubtype of the first arch
    data[8 + 4..8 + 8].copy_from_slice(&9u32.to_be_bytes());
    let macho = MachO::from_stream(BufferStream::new(data)).unwrap();
    let slice = macho.slice(0).unwrap();
    assert!(!slice.is_supported());
    assert!(slice.load_commands().is_empty());
    assert!(macho.slice(1).unwrap().is_supported());
}
