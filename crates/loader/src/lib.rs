// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Firmware image ingestion.
//!
//! Raw binary images become a single segment at a caller-supplied base.
//! ELF files contribute one segment per PT_LOAD program header, using the
//! physical address (what gets flashed) and the ELF entry point.

use anyhow::{anyhow, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use std::path::Path;
use thumbem_core::memory::ProgramImage;
use tracing::{debug, info, warn};

/// Magic prefix distinguishing ELF files from raw images.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.starts_with(&ELF_MAGIC)
}

/// Wraps a raw binary image as a one-segment program at `base`.
pub fn load_bin_bytes(bytes: &[u8], base: u32) -> ProgramImage {
    let mut image = ProgramImage::new(base);
    image.add_segment(base, bytes.to_vec());
    image
}

pub fn load_bin(path: &Path, base: u32) -> Result<ProgramImage> {
    let buffer =
        std::fs::read(path).with_context(|| format!("Failed to read image file: {:?}", path))?;
    Ok(load_bin_bytes(&buffer, base))
}

pub fn load_elf(path: &Path) -> Result<ProgramImage> {
    let buffer = std::fs::read(path)
        .with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    load_elf_bytes(&buffer)
}

pub fn load_elf_bytes(buffer: &[u8]) -> Result<ProgramImage> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    info!("ELF Entry Point: {:#x}", elf.entry);

    if elf.header.e_machine != goblin::elf::header::EM_ARM {
        warn!("Unexpected ELF machine type: {}", elf.header.e_machine);
    }

    let mut image = ProgramImage::new(elf.entry as u32);

    for ph in elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }
        // The physical address (LMA) is what gets flashed.
        let start_addr = ph.p_paddr;
        let size = ph.p_filesz as usize;
        let offset = ph.p_offset as usize;

        if size == 0 {
            continue;
        }

        debug!(
            "Loadable segment: addr={:#x}, size={} bytes, offset={:#x}",
            start_addr, size, offset
        );

        if offset + size > buffer.len() {
            return Err(anyhow!("Segment out of bounds in ELF file"));
        }

        image.add_segment(start_addr as u32, buffer[offset..offset + size].to_vec());
    }

    if image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    Ok(image)
}
