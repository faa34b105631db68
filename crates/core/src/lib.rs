// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod alu;
pub mod cpu;
pub mod decoder;
pub mod memory;
pub mod system;
pub mod trace;

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("unmapped memory access at {0:#010x}")]
    Unmapped(u32),
    #[error("write rejected at {0:#010x} (read-only region)")]
    ReadOnly(u32),
    #[error("bulk load outside region bounds at {0:#010x}")]
    LoadOutOfBounds(u32),
}

pub type EmuResult<T> = Result<T, EmuError>;

pub use cpu::{CpuState, CpuStatus, Exec, Psr, ThumbCore};
pub use memory::{AccessWidth, AddressSpace, ProgramImage, Region, RegionKind, Segment};
pub use system::{Machine, Platform, ResetPolicy};
pub use trace::{disassemble, render_line, TraceRecord};
