// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Platform assembly: memory map plus reset policy, and the `Machine`
//! facade the front end drives.

use anyhow::{anyhow, Context, Result};

use crate::cpu::{CpuStatus, ThumbCore};
use crate::memory::{AddressSpace, ProgramImage, Region, RegionKind};
use crate::trace::{disassemble, TraceRecord};
use crate::EmuResult;

/// How `reset` assigns the startup PC (and SP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    /// PC starts at the ROM region base.
    RomStart,
    /// SP and PC are loaded from the first two words of the ROM image.
    VectorTable,
}

/// Vector table entries carry the Thumb bit; reset masks it off.
const VECTOR_MASK: u32 = 0xFFFF_FFF2;

#[derive(Debug, Clone)]
pub struct Platform {
    pub name: String,
    pub reset: ResetPolicy,
}

/// One CPU core bound to one address space. All mutable emulator state
/// lives here, owned exclusively; there is no ambient global.
pub struct Machine {
    pub core: ThumbCore,
    pub space: AddressSpace,
    platform: Platform,
}

impl Machine {
    pub fn new(platform: Platform, space: AddressSpace) -> Self {
        Self {
            core: ThumbCore::new(),
            space,
            platform,
        }
    }

    /// Bare platform: a single 64 KiB ROM region, PC reset to its base.
    pub fn bare() -> Self {
        let mut space = AddressSpace::new();
        space.add_region(Region::new(0x0800_0000, 0x1_0000, RegionKind::Rom));
        Self::new(
            Platform {
                name: "bare".to_string(),
                reset: ResetPolicy::RomStart,
            },
            space,
        )
    }

    /// STM32F4-style platform: 1 MiB flash, 128 KiB RAM, vector-table
    /// reset.
    pub fn stm32f4() -> Self {
        let mut space = AddressSpace::new();
        space.add_region(Region::new(0x0800_0000, 0x10_0000, RegionKind::Rom));
        space.add_region(Region::new(0x2000_0000, 0x2_0000, RegionKind::Ram));
        Self::new(
            Platform {
                name: "stm32f4".to_string(),
                reset: ResetPolicy::VectorTable,
            },
            space,
        )
    }

    pub fn platform_name(&self) -> &str {
        &self.platform.name
    }

    /// Zeroes registers 0-14, clears flags and the halt state, and applies
    /// the platform reset policy.
    pub fn reset(&mut self) {
        self.core.reset_state();
        let Some(rom) = self.space.find_region_by_kind(RegionKind::Rom) else {
            return;
        };
        let base = rom.base_address();
        match self.platform.reset {
            ResetPolicy::RomStart => {
                self.core.set_register(15, base);
            }
            ResetPolicy::VectorTable => {
                self.core.set_register(15, base);
                if let Ok(sp) = self.space.read32(base) {
                    self.core.set_register(13, sp & VECTOR_MASK);
                }
                if let Ok(pc) = self.space.read32(base.wrapping_add(4)) {
                    self.core.set_register(15, pc & VECTOR_MASK);
                }
            }
        }
    }

    pub fn step(&mut self) {
        self.core.step(&mut self.space);
    }

    pub fn get_register(&self, n: usize) -> u32 {
        self.core.get_register(n)
    }

    pub fn set_register(&mut self, n: usize, value: u32) {
        self.core.set_register(n, value);
    }

    pub fn get_status(&self) -> CpuStatus {
        self.core.status()
    }

    pub fn halted(&self) -> bool {
        self.get_status().halted
    }

    /// Bulk-initializes a region; defaults to the ROM base.
    pub fn load_memory(&mut self, bytes: &[u8], address: Option<u32>) -> EmuResult<()> {
        self.space.load_memory(bytes, address)
    }

    /// Loads a firmware image segment by segment. Segments outside the
    /// memory map are skipped with a warning rather than aborting the load.
    pub fn load_image(&mut self, image: &ProgramImage) {
        for segment in &image.segments {
            if let Err(e) = self
                .space
                .load_memory(&segment.data, Some(segment.start_addr))
            {
                tracing::warn!(
                    "skipping segment at {:#010x}, outside the memory map: {}",
                    segment.start_addr,
                    e
                );
            }
        }
    }

    pub fn disassemble(&self) -> Vec<TraceRecord> {
        disassemble(&self.space)
    }
}

/// Builds a machine from a parsed platform descriptor.
pub fn build_machine(desc: &thumbem_config::PlatformDescriptor) -> Result<Machine> {
    desc.validate()?;

    let rom_size = thumbem_config::parse_size(&desc.rom.size)
        .with_context(|| format!("invalid rom size in platform '{}'", desc.name))?;
    let mut space = AddressSpace::new();
    space.add_region(Region::new(
        desc.rom.base,
        u32::try_from(rom_size).map_err(|_| anyhow!("rom size too large"))?,
        RegionKind::Rom,
    ));

    if let Some(ram) = &desc.ram {
        let ram_size = thumbem_config::parse_size(&ram.size)
            .with_context(|| format!("invalid ram size in platform '{}'", desc.name))?;
        space.add_region(Region::new(
            ram.base,
            u32::try_from(ram_size).map_err(|_| anyhow!("ram size too large"))?,
            RegionKind::Ram,
        ));
    }

    let reset = match desc.reset {
        thumbem_config::ResetKind::RomStart => ResetPolicy::RomStart,
        thumbem_config::ResetKind::VectorTable => ResetPolicy::VectorTable,
    };

    Ok(Machine::new(
        Platform {
            name: desc.name.clone(),
            reset,
        },
        space,
    ))
}
