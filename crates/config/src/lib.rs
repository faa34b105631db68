// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Platform descriptors: the YAML schema describing a target's memory map
//! and reset policy.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_reset() -> ResetKind {
    ResetKind::RomStart
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    /// PC starts at the ROM base.
    RomStart,
    /// SP and PC come from the first two words of the ROM image.
    VectorTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRange {
    pub base: u32,
    pub size: String, // e.g. "64KB"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default = "default_reset")]
    pub reset: ResetKind,
    pub rom: MemoryRange,
    #[serde(default)]
    pub ram: Option<MemoryRange>,
}

impl PlatformDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read platform file at {:?}", path.as_ref()))?;
        let desc = Self::from_yaml(&content)?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse Platform Descriptor YAML")
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        if self.name.trim().is_empty() {
            anyhow::bail!("Platform 'name' cannot be empty");
        }

        let rom_size = parse_size(&self.rom.size)?;
        if rom_size == 0 {
            anyhow::bail!("ROM size must be greater than zero");
        }

        if let Some(ram) = &self.ram {
            let ram_size = parse_size(&ram.size)?;
            if ram_size == 0 {
                anyhow::bail!("RAM size must be greater than zero");
            }
            let rom_end = self.rom.base as u64 + rom_size;
            let ram_end = ram.base as u64 + ram_size;
            if (self.rom.base as u64) < ram_end && (ram.base as u64) < rom_end {
                anyhow::bail!("ROM and RAM ranges overlap");
            }
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
