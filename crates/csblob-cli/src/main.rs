//! Command-line interface for inspecting and editing Mach-O code signatures.
//!
//! Operates on thin and fat binaries in place. Every subcommand takes an
//! optional `--slice`; without it, every supported slice is processed.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use csblob::byte_order::CODESIGN_ENDIAN;
use csblob::codesign::{magic_name, slot_name, CodeDirectoryHeader};
use csblob::stream::{copy_data, DEFAULT_COPY_CHUNK};
use csblob::{
    code_signature_offset, extract_cms_payload, extract_signature_to_path, walk_superblob_at,
    rewrite_code_signature, BufferStream, DecodedSuperBlob, FileStream, MachO, MemoryStream,
    MemoryStreamExt, RewriteOptions, SuperBlobHeader,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "csblob")]
#[command(about = "Inspect and rewrite embedded Mach-O code signatures")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List slices, load commands and signature blobs
    Inspect {
        /// Mach-O file
        input: PathBuf,

        /// Only this slice
        #[arg(short, long)]
        slice: Option<usize>,
    },
    /// Write the whole SuperBlob of a slice to a file
    Extract {
        /// Mach-O file
        input: PathBuf,

        /// Output file
        #[arg(short, long, default_value = "CMS-Data")]
        output: PathBuf,

        #[arg(short, long, default_value_t = 0)]
        slice: usize,
    },
    /// Write the CMS payload of a slice's signature slot to a file
    ExtractCms {
        /// Mach-O file
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, default_value_t = 0)]
        slice: usize,
    },
    /// Replace the blob in a slot, or add it, and rewrite the signature in place
    Replace {
        /// Mach-O file
        input: PathBuf,

        /// Slot type, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_slot)]
        slot: u32,

        /// File holding the complete blob, header included
        #[arg(long)]
        blob: PathBuf,

        #[command(flatten)]
        rewrite: RewriteArgs,
    },
    /// Remove the blob in a slot and rewrite the signature in place
    Remove {
        /// Mach-O file
        input: PathBuf,

        /// Slot type, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_slot)]
        slot: u32,

        #[command(flatten)]
        rewrite: RewriteArgs,
    },
}

#[derive(clap::Args)]
struct RewriteArgs {
    /// Only this slice
    #[arg(short, long)]
    slice: Option<usize>,

    /// Pad the signature to a multiple of this many bytes
    #[arg(long, default_value_t = 16)]
    alignment: u64,

    /// Zero-fill surplus space instead of truncating the file
    #[arg(long)]
    no_trim: bool,

    /// Fail instead of growing the file
    #[arg(long)]
    no_grow: bool,
}

impl RewriteArgs {
    fn options(&self) -> Result<RewriteOptions> {
        let options = RewriteOptions::new()
            .alignment(self.alignment)
            .allow_growth(!self.no_grow)
            .trim_surplus(!self.no_trim);
        options.validate()?;
        Ok(options)
    }
}

fn parse_slot(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid slot '{}': {}", value, e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { input, slice } => inspect(&input, slice),
        Commands::Extract { input, output, slice } => extract(&input, &output, slice),
        Commands::ExtractCms { input, output, slice } => extract_cms(&input, &output, slice),
        Commands::Replace { input, slot, blob, rewrite } => {
            let options = rewrite.options()?;
            let data = load_blob(&blob)?;
            edit(&input, rewrite.slice, &options, |superblob| {
                let replacement = data.deep_copy()?;
                if superblob.set_slot(slot, replacement).is_none() {
                    info!("added new blob in slot 0x{:x}", slot);
                }
                Ok(())
            })
        }
        Commands::Remove { input, slot, rewrite } => {
            let options = rewrite.options()?;
            edit(&input, rewrite.slice, &options, |superblob| {
                if superblob.take(slot).is_none() {
                    bail!("slot 0x{:x} ({}) is not present", slot, slot_name(slot));
                }
                Ok(())
            })
        }
    }
}

/// Copy a blob file into memory so it can be reused for every slice.
fn load_blob(path: &Path) -> Result<BufferStream> {
    let file = FileStream::open(path, false)
        .with_context(|| format!("Failed to open blob {}", path.display()))?;
    let size = file.checked_size()?;
    let mut data = BufferStream::new(vec![0; size as usize]);
    copy_data(&file, 0, &mut data, 0, size, DEFAULT_COPY_CHUNK)?;
    info!("loaded {} byte blob from {}", size, file.path().display());
    Ok(data)
}

fn open(input: &Path, writable: bool) -> Result<MachO> {
    MachO::open(input, writable).with_context(|| format!("Failed to parse {}", input.display()))
}

/// Indices of the slices to process: the requested one, or every supported slice.
fn selected_slices(macho: &MachO, slice: Option<usize>) -> Result<Vec<usize>> {
    match slice {
        Some(index) => {
            macho.slice(index)?;
            Ok(vec![index])
        }
        None => Ok(macho
            .slices()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_supported())
            .map(|(i, _)| i)
            .collect()),
    }
}

fn inspect(input: &Path, slice: Option<usize>) -> Result<()> {
    let macho = open(input, false)?;
    println!(
        "{}: {} Mach-O, {} slice(s)",
        input.display(),
        if macho.is_fat() { "fat" } else { "thin" },
        macho.slices().len()
    );

    for index in selected_slices(&macho, slice)? {
        let s = macho.slice(index)?;
        println!(
            "\nSlice {}: cputype 0x{:x} subtype 0x{:x} at 0x{:x}, {} bytes",
            index,
            s.header().cputype,
            s.arch().cpusubtype,
            s.base(),
            s.size()
        );
        for (i, lc) in s.load_commands().iter().enumerate() {
            println!("  LC {:>3}: {:<28} cmdsize {:>5} at 0x{:x}", i + 1, lc.name(), lc.cmdsize, lc.offset);
            if !lc.is_known() {
                warn!("Unknown load command at load command {}, 0x{:x}.", i + 1, lc.cmd);
            }
        }

        let offset = match code_signature_offset(macho.stream(), s) {
            Ok(offset) => offset,
            Err(e) => {
                warn!(slice = index, "no readable signature: {}", e);
                continue;
            }
        };
        let stream = macho.stream();
        let walked = walk_superblob_at(stream, offset, |blob| {
            println!("    {} [{}]", blob, blob.slot());
            if let Some(cd) = blob.code_directory {
                let bytes = stream.read_bytes(offset + blob.offset as u64, cd.length as usize)?;
                let cd = CodeDirectoryHeader::parse(&bytes)?;
                println!("      {}", cd);
                if let Some(identifier) = cd.identifier(&bytes) {
                    println!("      identifier {}", identifier);
                }
            }
            Ok(())
        });
        match walked {
            Ok(header) => println!("  SuperBlob: {} bytes, {} blob(s)", header.length, header.count),
            Err(e) => warn!(slice = index, "no readable signature: {}", e),
        }
    }
    Ok(())
}

fn extract(input: &Path, output: &Path, slice: usize) -> Result<()> {
    let macho = open(input, false)?;
    let s = macho.slice(slice)?;
    let offset = code_signature_offset(macho.stream(), s)?;
    let header: SuperBlobHeader = macho.stream().read_wire(offset, CODESIGN_ENDIAN)?;
    let written = extract_signature_to_path(macho.stream(), s, &header, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Extracted {} bytes ({}) to {}", written, magic_name(header.magic), output.display());
    Ok(())
}

fn extract_cms(input: &Path, output: &Path, slice: usize) -> Result<()> {
    let macho = open(input, false)?;
    let s = macho.slice(slice)?;
    let offset = code_signature_offset(macho.stream(), s)?;
    let superblob = DecodedSuperBlob::decode(macho.stream(), offset)?;
    let payload = extract_cms_payload(&superblob)?;
    std::fs::write(output, &payload)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Extracted {} bytes of CMS data to {}", payload.len(), output.display());
    Ok(())
}

/// Decode, edit and rewrite the signature of each selected slice.
fn edit<F>(input: &Path, slice: Option<usize>, options: &RewriteOptions, mut apply: F) -> Result<()>
where
    F: FnMut(&mut DecodedSuperBlob) -> Result<()>,
{
    let mut macho = open(input, true)?;
    for index in selected_slices(&macho, slice)? {
        let offset = code_signature_offset(macho.stream(), macho.slice(index)?)
            .with_context(|| format!("Slice {} has no code signature", index))?;
        let mut superblob = DecodedSuperBlob::decode(macho.stream(), offset)?;
        apply(&mut superblob)?;
        let report = rewrite_code_signature(&mut macho, index, &superblob, options)
            .with_context(|| format!("Failed to rewrite slice {}", index))?;
        println!("{}", report);
    }
    Ok(())
}
