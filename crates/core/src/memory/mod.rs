// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::{EmuError, EmuResult};

/// High-water marks grow in fixed steps as data is loaded.
pub const LIMIT_INCREMENT: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Rom,
    Ram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
}

impl AccessWidth {
    pub fn bytes(self) -> u32 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Half => 2,
            AccessWidth::Word => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u32,
    pub data: Vec<u8>,
}

/// A loadable firmware image: an entry point plus one or more segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramImage {
    pub entry_point: u32,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry_point: u32) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
        }
    }

    pub fn add_segment(&mut self, start_addr: u32, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }
}

/// A contiguous addressable block backed by a dense byte store.
///
/// `limit` is the high-water mark of loaded data. It starts at the base,
/// grows only through `load_memory`, and bounds the disassembly scan.
#[derive(Debug, Clone)]
pub struct Region {
    base_address: u32,
    size: u32,
    end_address: u32,
    kind: RegionKind,
    limit: u32,
    bytes: Vec<u8>,
}

impl Region {
    pub fn new(base_address: u32, size: u32, kind: RegionKind) -> Self {
        Self {
            base_address,
            size,
            end_address: base_address.wrapping_add(size),
            kind,
            limit: base_address,
            bytes: vec![0xFF; size as usize],
        }
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn end_address(&self) -> u32 {
        self.end_address
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.base_address && address < self.end_address
    }

    pub fn in_limit(&self, address: u32) -> bool {
        address >= self.base_address && address < self.limit
    }

    fn read8(&self, address: u32) -> u8 {
        self.bytes[(address - self.base_address) as usize]
    }

    fn write8(&mut self, address: u32, value: u8) {
        self.bytes[(address - self.base_address) as usize] = value;
    }

    /// Bulk load, used to flash a firmware image before execution. Grows
    /// `limit` in `LIMIT_INCREMENT` steps, capped at the region end.
    pub fn load_memory(&mut self, bytes: &[u8], address: Option<u32>) -> EmuResult<()> {
        let address = address.unwrap_or(self.base_address);
        let end = address.wrapping_add(bytes.len() as u32);
        if address < self.base_address || end > self.end_address {
            return Err(EmuError::LoadOutOfBounds(address));
        }
        for (i, b) in bytes.iter().enumerate() {
            let addr = address + i as u32;
            self.ensure_space(addr);
            self.write8(addr, *b);
        }
        Ok(())
    }

    fn ensure_space(&mut self, address: u32) {
        while address >= self.limit && self.limit < self.end_address {
            self.limit = self
                .limit
                .saturating_add(LIMIT_INCREMENT)
                .min(self.end_address);
        }
    }
}

/// The memory map: an ordered set of non-overlapping regions with a one-slot
/// cache of the last region hit, so the fetch path avoids the linear scan.
#[derive(Debug, Default)]
pub struct AddressSpace {
    regions: Vec<Region>,
    cached: Cell<Option<usize>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&mut self, region: Region) {
        debug_assert!(
            !self
                .regions
                .iter()
                .any(|r| r.contains(region.base_address())
                    || region.contains(r.base_address())),
            "overlapping memory regions"
        );
        self.regions.push(region);
    }

    pub fn find_region(&self, address: u32) -> Option<&Region> {
        if let Some(idx) = self.cached.get() {
            if self.regions[idx].contains(address) {
                return Some(&self.regions[idx]);
            }
        }
        let idx = self.regions.iter().position(|r| r.contains(address))?;
        self.cached.set(Some(idx));
        Some(&self.regions[idx])
    }

    fn find_region_mut(&mut self, address: u32) -> Option<&mut Region> {
        if let Some(idx) = self.cached.get() {
            if self.regions[idx].contains(address) {
                return Some(&mut self.regions[idx]);
            }
        }
        let idx = self.regions.iter().position(|r| r.contains(address))?;
        self.cached.set(Some(idx));
        Some(&mut self.regions[idx])
    }

    pub fn find_region_by_kind(&self, kind: RegionKind) -> Option<&Region> {
        self.regions.iter().find(|r| r.kind() == kind)
    }

    fn find_region_by_kind_mut(&mut self, kind: RegionKind) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.kind() == kind)
    }

    pub fn in_limit(&self, address: u32) -> bool {
        self.find_region(address)
            .map(|r| r.in_limit(address))
            .unwrap_or(false)
    }

    pub fn read8(&self, address: u32) -> EmuResult<u8> {
        match self.find_region(address) {
            Some(r) => Ok(r.read8(address)),
            None => {
                tracing::warn!("invalid read at {:#010x}", address);
                Err(EmuError::Unmapped(address))
            }
        }
    }

    pub fn read16(&self, address: u32) -> EmuResult<u16> {
        let b0 = self.read8(address)? as u16;
        let b1 = self.read8(address.wrapping_add(1))? as u16;
        Ok(b0 | (b1 << 8))
    }

    pub fn read32(&self, address: u32) -> EmuResult<u32> {
        let lo = self.read16(address)? as u32;
        let hi = self.read16(address.wrapping_add(2))? as u32;
        Ok(lo | (hi << 16))
    }

    /// Store from an executing instruction. ROM-kind regions reject it;
    /// bulk loads go through `load_memory` instead.
    pub fn store(&mut self, address: u32, value: u32, width: AccessWidth) -> EmuResult<()> {
        for i in 0..width.bytes() {
            let addr = address.wrapping_add(i);
            let region = self
                .find_region_mut(addr)
                .ok_or(EmuError::Unmapped(addr))?;
            if region.kind() == RegionKind::Rom {
                return Err(EmuError::ReadOnly(addr));
            }
            region.write8(addr, (value >> (8 * i)) as u8);
        }
        Ok(())
    }

    /// Bulk-initialize a region. Defaults to the ROM region base when no
    /// address is given (the firmware-flash convention).
    pub fn load_memory(&mut self, bytes: &[u8], address: Option<u32>) -> EmuResult<()> {
        match address {
            Some(addr) => self
                .find_region_mut(addr)
                .ok_or(EmuError::Unmapped(addr))?
                .load_memory(bytes, Some(addr)),
            None => self
                .find_region_by_kind_mut(RegionKind::Rom)
                .ok_or(EmuError::Unmapped(0))?
                .load_memory(bytes, None),
        }
    }

    /// Resolve a register-relative data address. Raw addresses that hit a
    /// mapped region are used as-is; anything else is retried once as an
    /// offset from the RAM region base. Instruction fetch and BX/BLX
    /// validation never take the fallback.
    pub fn resolve_data_address(&self, address: u32) -> Option<u32> {
        if self.find_region(address).is_some() {
            return Some(address);
        }
        let ram = self.find_region_by_kind(RegionKind::Ram)?;
        let rebased = ram.base_address().wrapping_add(address);
        ram.contains(rebased).then_some(rebased)
    }
}
