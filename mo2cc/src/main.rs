use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use mo2_core::builder;
use mo2_core::format::container::{ContainerLayoutBuilder, MO2_MAGIC};
use mo2_core::format::macho;
use mo2_core::inject;

mod prompt;
mod toolchain;

use toolchain::Toolchain;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compile a source file and seal it into an MO2 container
    Build {
        source: PathBuf,
        manifest: PathBuf,
        output: PathBuf,
        /// Symbol resolved as the container entry point
        #[clap(long, default_value = "mo2_entry")]
        entry_symbol: String,
        /// Virtual address of the code segment
        #[clap(long, value_parser = parse_addr)]
        code_vaddr: Option<u64>,
        /// Virtual address of the manifest segment
        #[clap(long, value_parser = parse_addr)]
        manifest_vaddr: Option<u64>,
    },
    /// Embed a manifest load command into an existing Mach-O binary
    Inject {
        input: PathBuf,
        manifest: PathBuf,
        output: PathBuf,
    },
    /// Interactively collect a manifest and write it as JSON
    Manifest { output: PathBuf },
    /// Print the manifest embedded in an MO2 container or patched binary
    Info { input: PathBuf },
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address `{}`: {}", s, e))
}

fn build(
    source: &Path,
    manifest: &Path,
    output: &Path,
    entry_symbol: &str,
    code_vaddr: Option<u64>,
    manifest_vaddr: Option<u64>,
) -> Result<()> {
    let toolchain = Toolchain::default();
    let object = output.with_extension("o");

    toolchain.compile(source, &object)?;
    let code = toolchain.extract_section(&object, ".text")?;
    let entry = toolchain.resolve_symbol(&object, entry_symbol)?;
    let _ = std::fs::remove_file(&object);

    let manifest_bytes = std::fs::read(manifest)
        .with_context(|| format!("unable to read manifest {:?}", manifest))?;

    let mut layout = ContainerLayoutBuilder::new();
    if let Some(vaddr) = code_vaddr {
        layout = layout.with_code_vaddr(vaddr);
    }
    if let Some(vaddr) = manifest_vaddr {
        layout = layout.with_manifest_vaddr(vaddr);
    }

    let container = builder::build_with_layout(&code, &manifest_bytes, entry, &layout.get())?;
    let entry = builder::parse_container(&container)?.header.entry;
    std::fs::write(output, container)
        .with_context(|| format!("unable to write {:?}", output))?;

    log::info!("built {:?}, entry @ {:#x}", output, entry);
    Ok(())
}

fn inject_manifest(input: &Path, manifest: &Path, output: &Path) -> Result<()> {
    let original = std::fs::read(input)
        .with_context(|| format!("unable to read binary {:?}", input))?;
    let manifest_bytes = std::fs::read(manifest)
        .with_context(|| format!("unable to read manifest {:?}", manifest))?;

    let patched = inject::inject(&original, &manifest_bytes)?;
    std::fs::write(output, patched)
        .with_context(|| format!("unable to write {:?}", output))?;

    log::info!("wrote {:?}", output);
    Ok(())
}

fn collect_manifest(output: &Path) -> Result<()> {
    let manifest = prompt::prompt_manifest()?;
    std::fs::write(output, manifest.to_bytes())
        .with_context(|| format!("unable to write {:?}", output))?;

    log::info!("wrote {:?}", output);
    Ok(())
}

/// Pull the manifest bytes out of either supported artifact kind.
fn embedded_manifest(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= 4 && data[..4] == MO2_MAGIC.to_le_bytes() {
        let header = builder::parse_container(data)?.header;
        let start = header.manifest_off as usize;
        let end = start + header.manifest_len as usize;
        return data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .context("container manifest range is out of bounds");
    }

    Ok(macho::extract_manifest(data)?)
}

fn info(input: &Path) -> Result<()> {
    let data = std::fs::read(input)
        .with_context(|| format!("unable to read {:?}", input))?;
    let manifest = embedded_manifest(&data)?;
    let text = String::from_utf8_lossy(&manifest);
    if text.trim().is_empty() {
        bail!("embedded manifest is empty");
    }
    println!("{}", text);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    match &args.command {
        Cmd::Build { source, manifest, output, entry_symbol, code_vaddr, manifest_vaddr } => {
            build(source, manifest, output, entry_symbol, *code_vaddr, *manifest_vaddr)
        }
        Cmd::Inject { input, manifest, output } => inject_manifest(input, manifest, output),
        Cmd::Manifest { output } => collect_manifest(output),
        Cmd::Info { input } => info(input),
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut as _;

    #[test]
    fn parse_addr_accepts_hex_and_decimal() {
        assert_eq!(parse_addr("0x400000").unwrap(), 0x40_0000);
        assert_eq!(parse_addr("4096").unwrap(), 4096);
        assert!(parse_addr("0xzz").is_err());
    }

    #[test]
    fn embedded_manifest_reads_a_container() {
        let manifest = b"{\"name\":\"x\"}";
        let container = builder::build(&[0x90, 0xc3], manifest, None).unwrap();
        assert_eq!(embedded_manifest(&container).unwrap(), manifest);
    }

    #[test]
    fn embedded_manifest_reads_a_patched_binary() {
        use mo2_core::format::macho::{MachHeader, MH_MAGIC_64};

        // a minimal Mach-O with a single opaque command
        let mut table = Vec::new();
        table.put_u32_le(0x2a);
        table.put_u32_le(8);
        let mut image = Vec::new();
        MachHeader {
            magic: MH_MAGIC_64,
            cputype: 0x0100_0007,
            cpusubtype: 3,
            filetype: 1,
            ncmds: 1,
            sizeofcmds: table.len() as u32,
            flags: 0,
            reserved: 0,
        }
        .encode(&mut image);
        image.extend_from_slice(&table);

        let manifest = b"{\"name\":\"agent\"}";
        let patched = inject::inject(&image, manifest).unwrap();
        assert_eq!(embedded_manifest(&patched).unwrap(), manifest);
    }
}
