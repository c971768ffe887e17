//! Synthetic Mach-O images shared by the integration tests.
//!
//! Each thin image is a minimal arm64 executable:
//! - `__TEXT` covering the header page
//! - `__LINKEDIT` starting at the signature and running to the end of the file
//! - `LC_CODE_SIGNATURE` pointing at a SuperBlob at `SIGNATURE_OFFSET`

#![allow(dead_code)]

use csblob::codesign::constants::*;
use csblob::codesign::superblob::{build_requirements_blob, build_signature_blob, wrap_blob};
use csblob::{DecodedBlob, DecodedSuperBlob};
use std::path::{Path, PathBuf};

pub const MH_MAGIC_64: u32 = 0xfeedfacf;
pub const FAT_MAGIC: u32 = 0xcafebabe;
pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_TYPE_X86_64: u32 = 0x0100_0007;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_CODE_SIGNATURE: u32 = 0x1d;

/// Slice-relative offset of the SuperBlob.
pub const SIGNATURE_OFFSET: u32 = 0x1000;

/// Offset of the `LC_CODE_SIGNATURE` command inside a slice.
pub const CODE_SIGNATURE_COMMAND: usize = 32 + 72 + 72;

/// Offset of the `__LINKEDIT` command inside a slice.
pub const LINKEDIT_COMMAND: usize = 32 + 72;

/// Alignment of the slices in a fat image, as a power of two.
pub const FAT_ALIGN: u32 = 14;

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn segment(out: &mut Vec<u8>, name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64) {
    put_u32(out, LC_SEGMENT_64);
    put_u32(out, 72);
    let mut segname = [0u8; 16];
    segname[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&segname);
    put_u64(out, vmaddr);
    put_u64(out, vmsize);
    put_u64(out, fileoff);
    put_u64(out, filesize);
    put_u32(out, 5);
    put_u32(out, 5);
    put_u32(out, 0);
    put_u32(out, 0);
}

/// A CodeDirectory blob of `len` bytes carrying a recognisable fill.
pub fn code_directory_blob(len: usize) -> Vec<u8> {
    wrap_blob(CSMAGIC_CODEDIRECTORY, &vec![0xcd; len - 8])
}

/// CodeDirectory, requirements and CMS blobs.
pub fn sample_superblob() -> DecodedSuperBlob {
    let mut sb = DecodedSuperBlob::new();
    sb.push(DecodedBlob::from_bytes(CSSLOT_CODEDIRECTORY, &code_directory_blob(0x40)));
    sb.push(DecodedBlob::from_bytes(CSSLOT_REQUIREMENTS, &build_requirements_blob()));
    sb.push(DecodedBlob::from_bytes(CSSLOT_SIGNATURESLOT, &build_signature_blob(&[0x30; 0x20])));
    sb
}

/// A thin arm64 image whose signature region holds `signature`.
pub fn thin_image(cputype: u32, signature: &[u8]) -> Vec<u8> {
    let sig_len = signature.len() as u64;
    let mut out = Vec::new();
    for v in [MH_MAGIC_64, cputype, 0, 2, 3, 72 + 72 + 16, 0, 0] {
        put_u32(&mut out, v);
    }
    segment(&mut out, "__TEXT", 0, 0x4000, 0, SIGNATURE_OFFSET as u64);
    segment(&mut out, "__LINKEDIT", 0x4000, 0x4000, SIGNATURE_OFFSET as u64, sig_len);
    for v in [LC_CODE_SIGNATURE, 16, SIGNATURE_OFFSET, sig_len as u32] {
        put_u32(&mut out, v);
    }
    out.resize(SIGNATURE_OFFSET as usize, 0);
    out.extend_from_slice(signature);
    out
}

/// A thin arm64 image signed with [`sample_superblob`].
pub fn signed_thin_image() -> Vec<u8> {
    let encoded = sample_superblob().encode().expect("encode sample superblob");
    thin_image(CPU_TYPE_ARM64, &encoded)
}

/// Place `slices` in a fat container, each at the next 0x4000 boundary.
pub fn fat_image(slices: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let align = 1usize << FAT_ALIGN;
    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());

    let mut offset = align;
    let mut placed = Vec::new();
    for (cputype, data) in slices {
        for v in [*cputype, 0, offset as u32, data.len() as u32, FAT_ALIGN] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        placed.push((offset, data));
        offset = (offset + data.len() + align - 1) & !(align - 1);
    }
    for (at, data) in placed {
        out.resize(at, 0);
        out.extend_from_slice(data);
    }
    out
}

/// A fat image with a signed arm64 slice followed by a signed x86_64 slice.
pub fn signed_fat_image() -> Vec<u8> {
    let encoded = sample_superblob().encode().expect("encode sample superblob");
    fat_image(&[
        (CPU_TYPE_ARM64, thin_image(CPU_TYPE_ARM64, &encoded)),
        (CPU_TYPE_X86_64, thin_image(CPU_TYPE_X86_64, &encoded)),
    ])
}

/// Read a little-endian `u32` from `data`.
pub fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

/// Read a little-endian `u64` from `data`.
pub fn le_u64(data: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(data[at..at + 8].try_into().unwrap())
}

/// Read a big-endian `u32` from `data`.
pub fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(data[at..at + 4].try_into().unwrap())
}

/// Write `data` to `name` inside `dir`.
pub fn write_fixture(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("write fixture");
    path
}
