// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! CPU state and the two-phase Thumb step engine.
//!
//! Thumb code is fetched two halfwords at a time. The first `step` reads
//! both halfwords, advances PC past the pair, and executes the first; the
//! second `step` executes the pending halfword. A control-flow change in
//! the first halfword invalidates the pending one, which is re-read from
//! `PC - 2` of the new PC (so the instruction at the branch target runs as
//! the "second half" of the current pair). Wide 32-bit encodings consume
//! both halfwords in the first phase and make the second a bookkeeping
//! no-op.

use serde::Serialize;

use crate::alu::{self, AluResult};
use crate::decoder::thumb::{decode_thumb16, decode_thumb32, is_wide, AluOp, Instruction, ShiftOp};
use crate::memory::{AccessWidth, AddressSpace, RegionKind};

bitflags::bitflags! {
    /// Condition flags. Q is reserved by the current opcode coverage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Psr: u8 {
        const N = 1 << 4;
        const Z = 1 << 3;
        const C = 1 << 2;
        const V = 1 << 1;
        const Q = 1 << 0;
    }
}

impl Psr {
    pub fn set_nz(&mut self, value: u32) {
        self.set(Psr::N, (value as i32) < 0);
        self.set(Psr::Z, value == 0);
    }

    pub fn apply(&mut self, r: &AluResult) {
        self.set(Psr::N, r.negative);
        self.set(Psr::Z, r.zero);
        self.set(Psr::C, r.carry);
        self.set(Psr::V, r.overflow);
    }

    fn apply_shift_carry(&mut self, carry: Option<bool>) {
        if let Some(c) = carry {
            self.set(Psr::C, c);
        }
    }
}

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;

#[derive(Debug, Clone)]
pub struct CpuState {
    pub registers: [u32; 16],
    pub psr: Psr,
    pub halted: bool,
    pub invalid_instruction: bool,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            registers: [0; 16],
            psr: Psr::empty(),
            halted: false,
            invalid_instruction: false,
        }
    }
}

/// Read-only snapshot of the CPU, detached from the live state.
#[derive(Debug, Clone, Serialize)]
pub struct CpuStatus {
    pub registers: [u32; 16],
    pub negative: bool,
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
    pub halted: bool,
    pub invalid_instruction: bool,
}

/// Outcome of executing one halfword. `ok: false` is the typed
/// invalid-instruction signal, not an error; `refetch` reports a committed
/// control-flow change within the first halfword of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exec {
    pub ok: bool,
    pub refetch: bool,
}

impl Exec {
    fn ok() -> Self {
        Exec {
            ok: true,
            refetch: false,
        }
    }

    fn fail() -> Self {
        Exec {
            ok: false,
            refetch: false,
        }
    }

    fn branch() -> Self {
        Exec {
            ok: true,
            refetch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    FetchFirst,
    ExecSecond { instr2: u16, consumed: bool },
}

/// The step engine: register file, flags, and the fetch phase.
#[derive(Debug)]
pub struct ThumbCore {
    pub state: CpuState,
    phase: Phase,
}

impl Default for ThumbCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbCore {
    pub fn new() -> Self {
        Self {
            state: CpuState::default(),
            phase: Phase::FetchFirst,
        }
    }

    /// Clears registers, flags, and the halt/phase state. The platform
    /// reset policy assigns PC (and SP) afterwards.
    pub fn reset_state(&mut self) {
        self.state = CpuState::default();
        self.phase = Phase::FetchFirst;
    }

    /// True while the second halfword of the current pair is pending.
    pub fn half(&self) -> bool {
        matches!(self.phase, Phase::ExecSecond { .. })
    }

    pub fn get_register(&self, n: usize) -> u32 {
        self.state.registers[n]
    }

    pub fn set_register(&mut self, n: usize, value: u32) {
        self.state.registers[n] = value;
    }

    pub fn status(&self) -> CpuStatus {
        CpuStatus {
            registers: self.state.registers,
            negative: self.state.psr.contains(Psr::N),
            zero: self.state.psr.contains(Psr::Z),
            carry: self.state.psr.contains(Psr::C),
            overflow: self.state.psr.contains(Psr::V),
            halted: self.state.halted,
            invalid_instruction: self.state.invalid_instruction,
        }
    }

    fn halt_invalid(&mut self) {
        self.state.halted = true;
        self.state.invalid_instruction = true;
        self.phase = Phase::FetchFirst;
    }

    /// Executes one halfword's worth of work. A no-op once halted.
    pub fn step(&mut self, space: &mut AddressSpace) {
        if self.state.halted {
            return;
        }
        match self.phase {
            Phase::FetchFirst => {
                let pc = self.state.registers[REG_PC];
                let (h1, h2) = match (space.read16(pc), space.read16(pc.wrapping_add(2))) {
                    (Ok(a), Ok(b)) => (a, b),
                    _ => {
                        tracing::warn!("fetch fault at {:#010x}", pc);
                        self.halt_invalid();
                        return;
                    }
                };
                self.state.registers[REG_PC] = pc.wrapping_add(4);

                if is_wide(h1) {
                    let instr = decode_thumb32(h1, h2);
                    tracing::debug!("pc={:#010x} wide {:04x} {:04x} {:?}", pc, h1, h2, instr);
                    let res = self.execute(space, instr, 0);
                    if !res.ok {
                        self.halt_invalid();
                        return;
                    }
                    self.phase = Phase::ExecSecond {
                        instr2: h2,
                        consumed: true,
                    };
                    return;
                }

                let instr = decode_thumb16(h1);
                tracing::debug!("pc={:#010x} op={:04x} {:?}", pc, h1, instr);
                let res = self.execute(space, instr, 0);
                if !res.ok {
                    self.halt_invalid();
                    return;
                }
                let mut instr2 = h2;
                if res.refetch {
                    // Control flow changed; the pending halfword now lives
                    // at PC - 2 of the new PC.
                    match space.read16(self.state.registers[REG_PC].wrapping_sub(2)) {
                        Ok(v) => instr2 = v,
                        Err(_) => {
                            tracing::warn!(
                                "refetch fault at {:#010x}",
                                self.state.registers[REG_PC].wrapping_sub(2)
                            );
                            self.halt_invalid();
                            return;
                        }
                    }
                }
                self.phase = Phase::ExecSecond {
                    instr2,
                    consumed: false,
                };
            }
            Phase::ExecSecond { instr2, consumed } => {
                self.phase = Phase::FetchFirst;
                if consumed {
                    return;
                }
                if is_wide(instr2) {
                    // A wide encoding straddling the pair: its partner is
                    // the halfword at the current PC, consumed here.
                    let pc = self.state.registers[REG_PC];
                    let partner = match space.read16(pc) {
                        Ok(v) => v,
                        Err(_) => {
                            self.halt_invalid();
                            return;
                        }
                    };
                    let instr = decode_thumb32(instr2, partner);
                    let res = self.execute(space, instr, 1);
                    if !res.ok {
                        self.halt_invalid();
                        return;
                    }
                    self.state.registers[REG_PC] = pc.wrapping_add(2);
                    return;
                }
                let instr = decode_thumb16(instr2);
                tracing::debug!(
                    "pc={:#010x} op={:04x} {:?} (second half)",
                    self.state.registers[REG_PC],
                    instr2,
                    instr
                );
                let res = self.execute(space, instr, 1);
                if !res.ok {
                    self.halt_invalid();
                }
            }
        }
    }

    /// Conditions wired to execution. The remaining standard codes render
    /// in the listing but execute as not-taken until they are wired up.
    fn condition_taken(&self, cond: u8) -> bool {
        let z = self.state.psr.contains(Psr::Z);
        match cond {
            0 => z,  // EQ
            1 => !z, // NE
            _ => false,
        }
    }

    fn reg(&self, n: u8) -> u32 {
        self.state.registers[n as usize]
    }

    fn set_reg(&mut self, n: u8, value: u32) {
        self.state.registers[n as usize] = value;
    }

    /// Loads through the data path, honoring the RAM-rebase fallback.
    fn load_data(
        &mut self,
        space: &AddressSpace,
        raw_addr: u32,
        width: AccessWidth,
        signed: bool,
        rt: u8,
    ) -> Exec {
        let Some(addr) = space.resolve_data_address(raw_addr) else {
            tracing::warn!("load fault at {:#010x}", raw_addr);
            return Exec::fail();
        };
        let value = match width {
            AccessWidth::Byte => space.read8(addr).map(|v| {
                if signed {
                    v as i8 as i32 as u32
                } else {
                    v as u32
                }
            }),
            AccessWidth::Half => space.read16(addr).map(|v| {
                if signed {
                    v as i16 as i32 as u32
                } else {
                    v as u32
                }
            }),
            AccessWidth::Word => space.read32(addr),
        };
        match value {
            Ok(v) => {
                self.set_reg(rt, v);
                Exec::ok()
            }
            Err(_) => {
                tracing::warn!("load fault at {:#010x}", addr);
                Exec::fail()
            }
        }
    }

    /// Stores through the data path, honoring the RAM-rebase fallback.
    fn store_data(
        &mut self,
        space: &mut AddressSpace,
        raw_addr: u32,
        width: AccessWidth,
        rt: u8,
    ) -> Exec {
        let Some(addr) = space.resolve_data_address(raw_addr) else {
            tracing::warn!("store fault at {:#010x}", raw_addr);
            return Exec::fail();
        };
        match space.store(addr, self.reg(rt), width) {
            Ok(()) => Exec::ok(),
            Err(e) => {
                tracing::warn!("store fault at {:#010x}: {}", addr, e);
                Exec::fail()
            }
        }
    }

    /// Executes a classified instruction. `half` is 0 while executing the
    /// first halfword of a pair, 1 for the second; PC has already advanced
    /// past the pair in both cases.
    fn execute(&mut self, space: &mut AddressSpace, instr: Instruction, half: u32) -> Exec {
        let pc = self.state.registers[REG_PC];
        match instr {
            Instruction::ShiftImm { op, rd, rm, imm5 } => {
                let value = self.reg(rm);
                let (res, carry) = match op {
                    ShiftOp::Lsl => alu::lsl(value, imm5 as u32),
                    ShiftOp::Lsr => alu::lsr(value, imm5 as u32),
                    ShiftOp::Asr => alu::asr(value, imm5 as u32),
                };
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
                self.state.psr.apply_shift_carry(carry);
                Exec::ok()
            }
            Instruction::AddReg { rd, rn, rm } => {
                let r = alu::add(self.reg(rn), self.reg(rm));
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::SubReg { rd, rn, rm } => {
                let r = alu::sub(self.reg(rn), self.reg(rm));
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::AddImm3 { rd, rn, imm } => {
                let r = alu::add(self.reg(rn), imm as u32);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::SubImm3 { rd, rn, imm } => {
                let r = alu::sub(self.reg(rn), imm as u32);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::MovImm { rd, imm } => {
                self.set_reg(rd, imm as u32);
                self.state.psr.set_nz(imm as u32);
                Exec::ok()
            }
            Instruction::CmpImm { rn, imm } => {
                let r = alu::sub(self.reg(rn), imm as u32);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::AddImm8 { rd, imm } => {
                let r = alu::add(self.reg(rd), imm as u32);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::SubImm8 { rd, imm } => {
                let r = alu::sub(self.reg(rd), imm as u32);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::AluReg { op, rd, rm } => {
                self.execute_alu_reg(op, rd, rm);
                Exec::ok()
            }
            Instruction::AddHi { rd, rm } => {
                let res = self.reg(rd).wrapping_add(self.reg(rm));
                self.set_reg(rd, res);
                Exec::ok()
            }
            Instruction::CmpHi { rn, rm } => {
                let r = alu::sub(self.reg(rn), self.reg(rm));
                self.state.psr.apply(&r);
                Exec::ok()
            }
            Instruction::MovHi { rd, rm } => {
                let res = self.reg(rm);
                self.set_reg(rd, res);
                Exec::ok()
            }
            Instruction::Bx { rm } => self.branch_exchange(space, self.reg(rm), false, half),
            Instruction::Blx { rm } => self.branch_exchange(space, self.reg(rm), true, half),
            Instruction::LdrLit { rt, imm8 } => {
                let addr = (pc & !3).wrapping_add(imm8 as u32 * 4);
                match space.read32(addr) {
                    Ok(v) => {
                        self.set_reg(rt, v);
                        Exec::ok()
                    }
                    Err(_) => {
                        tracing::warn!("literal load fault at {:#010x}", addr);
                        Exec::fail()
                    }
                }
            }
            Instruction::MemReg {
                load,
                width,
                signed,
                rt,
                rn,
                rm,
            } => {
                let addr = self.reg(rn).wrapping_add(self.reg(rm));
                if load {
                    self.load_data(space, addr, width, signed, rt)
                } else {
                    self.store_data(space, addr, width, rt)
                }
            }
            Instruction::MemImm {
                load,
                width,
                rt,
                rn,
                imm5,
            } => {
                let addr = self.reg(rn).wrapping_add(imm5 as u32 * width.bytes());
                if load {
                    self.load_data(space, addr, width, false, rt)
                } else {
                    self.store_data(space, addr, width, rt)
                }
            }
            Instruction::MemSp { load, rt, imm8 } => {
                let addr = self.reg(13).wrapping_add(imm8 as u32 * 4);
                if load {
                    self.load_data(space, addr, AccessWidth::Word, false, rt)
                } else {
                    self.store_data(space, addr, AccessWidth::Word, rt)
                }
            }
            Instruction::AddPcSp { sp, rd, imm8 } => {
                let base = if sp { self.reg(13) } else { pc & !3 };
                self.set_reg(rd, base.wrapping_add(imm8 as u32 * 4));
                Exec::ok()
            }
            Instruction::BlockTransfer { load, rn, mask } => {
                self.block_transfer(space, load, rn, mask)
            }
            Instruction::BranchCond { cond, offset } => {
                if self.condition_taken(cond) {
                    self.state.registers[REG_PC] =
                        pc.wrapping_add(((offset + 1) * 2) as u32);
                    Exec::branch()
                } else {
                    Exec::ok()
                }
            }
            Instruction::Reserved { instr } => {
                tracing::warn!("reserved opcode {:#06x}, halting", instr);
                self.state.halted = true;
                self.state.invalid_instruction = true;
                Exec::ok()
            }
            Instruction::Swi { imm } => {
                if imm == 0 {
                    self.state.halted = true;
                }
                Exec::ok()
            }
            Instruction::Branch { offset } => {
                self.state.registers[REG_PC] = pc.wrapping_add(((offset + 1) * 2) as u32);
                Exec::branch()
            }
            Instruction::WideLit { rt, imm12 } => {
                let addr = (pc & !3).wrapping_add(imm12 as u32);
                match space.read32(addr) {
                    Ok(v) => {
                        self.set_reg(rt, v);
                        Exec::ok()
                    }
                    Err(_) => {
                        tracing::warn!("literal load fault at {:#010x}", addr);
                        Exec::fail()
                    }
                }
            }
            Instruction::WideImm12 {
                load,
                width,
                signed,
                rt,
                rn,
                imm12,
            } => {
                let addr = self.reg(rn).wrapping_add(imm12 as u32);
                if load {
                    self.load_data(space, addr, width, signed, rt)
                } else {
                    self.store_data(space, addr, width, rt)
                }
            }
            Instruction::WideNegImm8 {
                load,
                width,
                signed,
                rt,
                rn,
                imm8,
            } => {
                let addr = self.reg(rn).wrapping_sub(imm8 as u32);
                if load {
                    self.load_data(space, addr, width, signed, rt)
                } else {
                    self.store_data(space, addr, width, rt)
                }
            }
            Instruction::WideRegShift {
                load,
                width,
                signed,
                rt,
                rn,
                rm,
                shift,
            } => {
                let addr = self
                    .reg(rn)
                    .wrapping_add(self.reg(rm).wrapping_shl(shift as u32));
                if load {
                    self.load_data(space, addr, width, signed, rt)
                } else {
                    self.store_data(space, addr, width, rt)
                }
            }
            Instruction::Undefined(op) => {
                tracing::warn!("undefined opcode {:#06x}", op);
                Exec::fail()
            }
            Instruction::Undefined32(h1, h2) => {
                tracing::warn!("undefined wide opcode {:#06x} {:#06x}", h1, h2);
                Exec::fail()
            }
        }
    }

    fn execute_alu_reg(&mut self, op: AluOp, rd: u8, rm: u8) {
        let dv = self.reg(rd);
        let mv = self.reg(rm);
        let carry_in = self.state.psr.contains(Psr::C);
        match op {
            AluOp::And => {
                let res = dv & mv;
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
            }
            AluOp::Eor => {
                let res = dv ^ mv;
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
            }
            AluOp::Orr => {
                let res = dv | mv;
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
            }
            AluOp::Bic => {
                let res = dv & !mv;
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
            }
            AluOp::Mvn => {
                let res = !mv;
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
            }
            AluOp::Lsl | AluOp::Lsr | AluOp::Asr | AluOp::Ror => {
                let count = mv & 0xFF;
                let (res, carry) = match op {
                    AluOp::Lsl => alu::lsl(dv, count),
                    AluOp::Lsr => alu::lsr(dv, count),
                    AluOp::Asr => alu::asr(dv, count),
                    _ => alu::ror(dv, count),
                };
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
                self.state.psr.apply_shift_carry(carry);
            }
            AluOp::Adc => {
                let r = alu::adc(dv, mv, carry_in);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
            }
            AluOp::Sbc => {
                let r = alu::sbc(dv, mv, !carry_in);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
            }
            AluOp::Tst => {
                self.state.psr.set_nz(dv & mv);
            }
            AluOp::Neg => {
                let r = alu::neg(mv);
                self.set_reg(rd, r.value);
                self.state.psr.apply(&r);
            }
            AluOp::Cmp => {
                let r = alu::sub(dv, mv);
                self.state.psr.apply(&r);
            }
            AluOp::Cmn => {
                let r = alu::add(dv, mv);
                self.state.psr.apply(&r);
            }
            AluOp::Mul => {
                let res = alu::mul(dv, mv);
                self.set_reg(rd, res);
                self.state.psr.set_nz(res);
            }
        }
    }

    /// BX/BLX: the exchange target must resolve to a ROM-kind region before
    /// PC is touched; otherwise the instruction is invalid and PC is left
    /// alone.
    fn branch_exchange(
        &mut self,
        space: &AddressSpace,
        target: u32,
        link: bool,
        half: u32,
    ) -> Exec {
        let dest = target & !1;
        match space.find_region(dest) {
            Some(r) if r.kind() == RegionKind::Rom => {}
            _ => {
                tracing::warn!("branch exchange to unmapped target {:#010x}", target);
                return Exec::fail();
            }
        }
        let pc = self.state.registers[REG_PC];
        if link {
            // Return address is the halfword after this instruction, with
            // the Thumb bit set.
            let ret = pc.wrapping_sub(2).wrapping_add(2 * half);
            self.state.registers[REG_LR] = ret | 1;
        }
        // From the first slot the pending halfword is refetched at the new
        // PC - 2, so the committed PC sits one halfword past the target.
        let adjust = if half == 0 { 2 } else { 0 };
        self.state.registers[REG_PC] = dest.wrapping_add(adjust);
        Exec::branch()
    }

    fn block_transfer(
        &mut self,
        space: &mut AddressSpace,
        load: bool,
        rn: u8,
        mask: u8,
    ) -> Exec {
        let mut base = self.reg(rn);
        for i in 0..8u8 {
            if mask & (1 << i) == 0 {
                continue;
            }
            if load {
                let Some(addr) = space.resolve_data_address(base) else {
                    return Exec::fail();
                };
                match space.read32(addr) {
                    Ok(v) => self.set_reg(i, v),
                    Err(_) => return Exec::fail(),
                }
            } else {
                let value = self.reg(i);
                let Some(addr) = space.resolve_data_address(base) else {
                    return Exec::fail();
                };
                if space.store(addr, value, AccessWidth::Word).is_err() {
                    return Exec::fail();
                }
            }
            base = base.wrapping_add(4);
        }
        // Writeback, unless the base register was itself reloaded.
        if !(load && mask & (1 << rn) != 0) {
            self.set_reg(rn, base);
        }
        Exec::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Region;

    const ROM_BASE: u32 = 0x0800_0000;
    const RAM_BASE: u32 = 0x2000_0000;

    fn assemble(words: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(words.len() * 2);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bytes
    }

    fn setup(words: &[u16]) -> (ThumbCore, AddressSpace) {
        let mut space = AddressSpace::new();
        space.add_region(Region::new(ROM_BASE, 0x1_0000, RegionKind::Rom));
        space.add_region(Region::new(RAM_BASE, 0x1_0000, RegionKind::Ram));
        space.load_memory(&assemble(words), None).unwrap();

        let mut core = ThumbCore::new();
        core.set_register(REG_PC, ROM_BASE);
        (core, space)
    }

    fn run(core: &mut ThumbCore, space: &mut AddressSpace, max_steps: usize) {
        for _ in 0..max_steps {
            if core.state.halted {
                return;
            }
            core.step(space);
        }
        panic!("program did not halt within {max_steps} steps");
    }

    #[test]
    fn pipeline_advances_pc_by_four_then_holds() {
        let (mut core, mut space) = setup(&[0x2001, 0x2102, 0xDF00, 0xDF00]);
        assert!(!core.half());

        core.step(&mut space);
        assert_eq!(core.get_register(REG_PC), ROM_BASE + 4);
        assert!(core.half());

        core.step(&mut space);
        assert_eq!(core.get_register(REG_PC), ROM_BASE + 4);
        assert!(!core.half());
        assert_eq!(core.get_register(0), 1);
        assert_eq!(core.get_register(1), 2);
    }

    #[test]
    fn add_register_scenario() {
        // R0 = 0, R1 = 5; ADD R0, R0, R1
        let (mut core, mut space) = setup(&[0x1840, 0xDF00]);
        core.set_register(1, 5);
        run(&mut core, &mut space, 16);

        assert_eq!(core.get_register(0), 5);
        let st = core.status();
        assert!(!st.carry && !st.overflow && !st.zero && !st.negative);
        assert!(st.halted);
        assert!(!st.invalid_instruction);
    }

    #[test]
    fn add_immediate_wraps_to_zero_with_carry() {
        // R0 = 0xFFFFFFFF; ADD R0, #1
        let (mut core, mut space) = setup(&[0x3001, 0xDF00]);
        core.set_register(0, 0xFFFF_FFFF);
        run(&mut core, &mut space, 16);

        assert_eq!(core.get_register(0), 0);
        let st = core.status();
        assert!(st.carry);
        assert!(st.zero);
        assert!(!st.overflow);
    }

    #[test]
    fn mov_then_cmp_sets_zero_and_preserves_register() {
        // MOV R0, #0x2A; CMP R0, #0x2A
        let (mut core, mut space) = setup(&[0x202A, 0x282A, 0xDF00, 0xDF00]);
        run(&mut core, &mut space, 16);

        assert_eq!(core.get_register(0), 0x2A);
        let st = core.status();
        assert!(st.zero);
        assert!(st.carry); // no borrow on an equal compare
    }

    #[test]
    fn swi_zero_halts_cleanly() {
        let (mut core, mut space) = setup(&[0xDF00, 0xDF00]);
        run(&mut core, &mut space, 4);
        let st = core.status();
        assert!(st.halted);
        assert!(!st.invalid_instruction);
    }

    #[test]
    fn swi_nonzero_does_not_halt() {
        let (mut core, mut space) = setup(&[0xDF07, 0xDF00, 0xDF00, 0xDF00]);
        core.step(&mut space);
        assert!(!core.state.halted);
        run(&mut core, &mut space, 8);
        assert!(!core.state.invalid_instruction);
    }

    #[test]
    fn reserved_cond14_word_halts_invalid() {
        let (mut core, mut space) = setup(&[0xDE00, 0xDF00]);
        core.step(&mut space);
        let st = core.status();
        assert!(st.halted);
        assert!(st.invalid_instruction);
    }

    #[test]
    fn undefined_opcode_halts_invalid() {
        // PUSH is outside the covered subset
        let (mut core, mut space) = setup(&[0xB501, 0xDF00]);
        core.step(&mut space);
        let st = core.status();
        assert!(st.halted);
        assert!(st.invalid_instruction);
    }

    #[test]
    fn branch_from_first_slot_skips_reserved_word() {
        // B +0 jumps over the reserved word straight to SWI #0.
        let (mut core, mut space) = setup(&[0xE000, 0xDE00, 0xDF00, 0xDF00]);
        run(&mut core, &mut space, 8);
        let st = core.status();
        assert!(st.halted);
        assert!(!st.invalid_instruction);
    }

    #[test]
    fn countdown_loop_terminates_via_bne() {
        // MOV R2, #3
        // loop: SUB R2, #1
        //       CMP R2, #0
        //       BNE loop
        //       SWI #0
        let (mut core, mut space) = setup(&[0x2203, 0x3A01, 0x2A00, 0xD1FC, 0xDF00, 0xDF00]);
        run(&mut core, &mut space, 64);

        assert_eq!(core.get_register(2), 0);
        let st = core.status();
        assert!(st.halted);
        assert!(!st.invalid_instruction);
        assert!(st.zero);
    }

    #[test]
    fn beq_not_taken_falls_through() {
        // CMP R0, #1 (Z clear since R0 == 0); BEQ +4 would skip the SWI
        let (mut core, mut space) = setup(&[0x2801, 0xD002, 0xDF00, 0xDF00]);
        run(&mut core, &mut space, 8);
        let st = core.status();
        assert!(st.halted);
        assert!(!st.invalid_instruction);
    }

    #[test]
    fn bx_to_unmapped_target_rejects_without_moving_pc() {
        let (mut core, mut space) = setup(&[0x4718, 0xDF00]);
        core.set_register(3, 0xDEAD_BEEE);
        core.step(&mut space);

        let st = core.status();
        assert!(st.halted);
        assert!(st.invalid_instruction);
        // PC still points past the fetched pair; the exchange never landed.
        assert_eq!(core.get_register(REG_PC), ROM_BASE + 4);
    }

    #[test]
    fn bx_to_mapped_rom_target_branches() {
        // BX R3 with R3 = (ROM_BASE + 4) | 1 lands on the SWI.
        let (mut core, mut space) = setup(&[0x4718, 0xDE00, 0xDF00, 0xDF00]);
        core.set_register(3, (ROM_BASE + 4) | 1);
        run(&mut core, &mut space, 8);
        let st = core.status();
        assert!(st.halted);
        assert!(!st.invalid_instruction);
    }

    #[test]
    fn blx_links_return_address_with_thumb_bit() {
        let (mut core, mut space) = setup(&[0x4798, 0xDE00, 0xDF00, 0xDF00]);
        core.set_register(3, (ROM_BASE + 4) | 1);
        run(&mut core, &mut space, 8);
        // BLX sits in the first slot; the return address is the following
        // halfword with the Thumb bit set.
        assert_eq!(core.get_register(REG_LR), (ROM_BASE + 2) | 1);
    }

    #[test]
    fn store_and_load_word_through_ram() {
        // STR R0, [R1, #0]; LDR R2, [R1, #0]
        let (mut core, mut space) = setup(&[0x6008, 0x680A, 0xDF00, 0xDF00]);
        core.set_register(0, 42);
        core.set_register(1, RAM_BASE);
        run(&mut core, &mut space, 8);

        assert_eq!(core.get_register(2), 42);
        assert_eq!(space.read32(RAM_BASE).unwrap(), 42);
    }

    #[test]
    fn halfword_store_scales_offset_by_two() {
        // STRH R2, [R3, #2]
        let (mut core, mut space) = setup(&[0x805A, 0xDF00]);
        core.set_register(2, 0xABCD);
        core.set_register(3, RAM_BASE);
        run(&mut core, &mut space, 8);

        assert_eq!(space.read16(RAM_BASE + 2).unwrap(), 0xABCD);
        assert_eq!(space.read16(RAM_BASE).unwrap(), 0xFFFF); // untouched fill
    }

    #[test]
    fn signed_byte_load_sign_extends() {
        // LDRSB R0, [R1, R2]
        let (mut core, mut space) = setup(&[0x5688, 0xDF00]);
        space.store(RAM_BASE + 8, 0x80, AccessWidth::Byte).unwrap();
        core.set_register(1, RAM_BASE);
        core.set_register(2, 8);
        run(&mut core, &mut space, 8);

        assert_eq!(core.get_register(0), 0xFFFF_FF80);
    }

    #[test]
    fn store_to_rom_is_invalid() {
        // STR R0, [R1, #0] with R1 pointing into ROM
        let (mut core, mut space) = setup(&[0x6008, 0xDF00]);
        core.set_register(1, ROM_BASE);
        core.step(&mut space);
        let st = core.status();
        assert!(st.halted);
        assert!(st.invalid_instruction);
    }

    #[test]
    fn unmapped_data_address_rebases_into_ram() {
        // STR R0, [R1, #0] with a small raw address maps to RAM base + addr
        let (mut core, mut space) = setup(&[0x6008, 0xDF00]);
        core.set_register(0, 0x1234_5678);
        core.set_register(1, 0x100);
        run(&mut core, &mut space, 8);

        assert_eq!(space.read32(RAM_BASE + 0x100).unwrap(), 0x1234_5678);
    }

    #[test]
    fn sp_relative_store_and_load() {
        // STR R0, [SP, #4]; LDR R1, [SP, #4]
        let (mut core, mut space) = setup(&[0x9001, 0x9901, 0xDF00, 0xDF00]);
        core.set_register(REG_SP, RAM_BASE + 0x100);
        core.set_register(0, 0xCAFE_F00D);
        run(&mut core, &mut space, 8);

        assert_eq!(core.get_register(1), 0xCAFE_F00D);
        assert_eq!(space.read32(RAM_BASE + 0x104).unwrap(), 0xCAFE_F00D);
    }

    #[test]
    fn add_pc_and_sp_relative() {
        // ADD R1, PC, #8; ADD R2, SP, #16
        let (mut core, mut space) = setup(&[0xA102, 0xAA04, 0xDF00, 0xDF00]);
        core.set_register(REG_SP, RAM_BASE);
        run(&mut core, &mut space, 8);

        // PC was ROM_BASE + 4 (aligned) when the first halfword executed.
        assert_eq!(core.get_register(1), ROM_BASE + 4 + 8);
        assert_eq!(core.get_register(2), RAM_BASE + 16);
    }

    #[test]
    fn stmia_writes_ascending_and_writes_back() {
        // STMIA R2!, {R0, R1}
        let (mut core, mut space) = setup(&[0xC203, 0xDF00]);
        core.set_register(0, 0x1111_1111);
        core.set_register(1, 0x2222_2222);
        core.set_register(2, RAM_BASE);
        run(&mut core, &mut space, 8);

        assert_eq!(space.read32(RAM_BASE).unwrap(), 0x1111_1111);
        assert_eq!(space.read32(RAM_BASE + 4).unwrap(), 0x2222_2222);
        assert_eq!(core.get_register(2), RAM_BASE + 8);
    }

    #[test]
    fn ldmia_reads_ascending_and_writes_back() {
        // LDMIA R2!, {R0, R1}
        let (mut core, mut space) = setup(&[0xCA03, 0xDF00]);
        space
            .store(RAM_BASE, 0xAAAA_AAAA, AccessWidth::Word)
            .unwrap();
        space
            .store(RAM_BASE + 4, 0xBBBB_BBBB, AccessWidth::Word)
            .unwrap();
        core.set_register(2, RAM_BASE);
        run(&mut core, &mut space, 8);

        assert_eq!(core.get_register(0), 0xAAAA_AAAA);
        assert_eq!(core.get_register(1), 0xBBBB_BBBB);
        assert_eq!(core.get_register(2), RAM_BASE + 8);
    }

    #[test]
    fn ldr_literal_loads_from_aligned_pool() {
        // LDR R1, [PC, #4] with the pool word at ROM_BASE + 8
        let (mut core, mut space) = setup(&[0x4901, 0xDF00, 0x0000, 0x0000, 0x3344, 0x1122]);
        run(&mut core, &mut space, 8);
        assert_eq!(core.get_register(1), 0x1122_3344);
    }

    #[test]
    fn wide_literal_load_consumes_both_halfwords() {
        // LDR.W R1, [PC, #4]; pool word at ROM_BASE + 8
        let (mut core, mut space) =
            setup(&[0xF8DF, 0x1004, 0xDF00, 0x0000, 0x3344, 0x1122]);

        core.step(&mut space); // wide executes in the first phase
        assert_eq!(core.get_register(1), 0x1122_3344);
        assert!(core.half());
        core.step(&mut space); // bookkeeping no-op for the consumed half
        assert!(!core.half());
        assert!(!core.state.halted);

        run(&mut core, &mut space, 8); // SWI at ROM_BASE + 4
        assert!(!core.state.invalid_instruction);
    }

    #[test]
    fn wide_imm12_store_and_negative_load() {
        // STR.W R0, [R1, #0x100]; LDR.W R2, [R3, #-4]
        let (mut core, mut space) =
            setup(&[0xF8C1, 0x0100, 0xF853, 0x2C04, 0xDF00, 0xDF00]);
        core.set_register(0, 0xDEAD_BEEF);
        core.set_register(1, RAM_BASE);
        core.set_register(3, RAM_BASE + 0x104);
        run(&mut core, &mut space, 16);

        assert_eq!(space.read32(RAM_BASE + 0x100).unwrap(), 0xDEAD_BEEF);
        assert_eq!(core.get_register(2), 0xDEAD_BEEF);
    }

    #[test]
    fn wide_register_shift_addressing() {
        // LDR.W R1, [R2, R3, LSL #2]
        let (mut core, mut space) = setup(&[0xF852, 0x1023, 0xDF00, 0xDF00]);
        space
            .store(RAM_BASE + 0x20, 0x5555_AAAA, AccessWidth::Word)
            .unwrap();
        core.set_register(2, RAM_BASE);
        core.set_register(3, 8);
        run(&mut core, &mut space, 8);

        assert_eq!(core.get_register(1), 0x5555_AAAA);
    }

    #[test]
    fn wide_prefix_in_second_slot_consumes_partner() {
        // MOV R0, #1 fills the first slot; the wide LDR.W literal starts in
        // the second slot and its partner occupies the next pair's first
        // halfword. Pool word at ROM_BASE + 8.
        let (mut core, mut space) =
            setup(&[0x2001, 0xF8DF, 0x1004, 0xDF00, 0x7788, 0x5566]);

        core.step(&mut space); // MOV
        core.step(&mut space); // wide from the second slot
        assert_eq!(core.get_register(1), 0x5566_7788);
        // The partner halfword was consumed; PC sits on the SWI.
        assert_eq!(core.get_register(REG_PC), ROM_BASE + 6);

        run(&mut core, &mut space, 8);
        assert!(!core.state.invalid_instruction);
    }

    #[test]
    fn register_shift_uses_low_byte_of_count() {
        // LSL R0, R1 (register shift via the ALU group)
        let (mut core, mut space) = setup(&[0x4088, 0xDF00, 0xDF00]);
        core.set_register(0, 1);
        core.set_register(1, 0x0000_0104); // low byte 4
        run(&mut core, &mut space, 8);
        assert_eq!(core.get_register(0), 16);
    }

    #[test]
    fn adc_uses_carry_in() {
        // CMP R0, #0 sets C (no borrow); ADC R2, R3 then adds the carry.
        let (mut core, mut space) = setup(&[0x2800, 0x415A, 0xDF00, 0xDF00]);
        core.set_register(2, 1);
        core.set_register(3, 2);
        run(&mut core, &mut space, 8);
        assert_eq!(core.get_register(2), 4);
    }

    #[test]
    fn neg_and_mul_flags() {
        // NEG R2, R3; MUL R4, R5
        let (mut core, mut space) = setup(&[0x425A, 0x436C, 0xDF00, 0xDF00]);
        core.set_register(3, 1);
        core.set_register(4, 3);
        core.set_register(5, 5);
        run(&mut core, &mut space, 8);

        assert_eq!(core.get_register(2), 0xFFFF_FFFF);
        assert_eq!(core.get_register(4), 15);
        let st = core.status();
        assert!(!st.negative);
        assert!(!st.zero);
    }

    #[test]
    fn fetch_from_unmapped_pc_halts_invalid() {
        let (mut core, mut space) = setup(&[0xDF00]);
        core.set_register(REG_PC, 0xF000_0000);
        core.step(&mut space);
        let st = core.status();
        assert!(st.halted);
        assert!(st.invalid_instruction);
    }

    #[test]
    fn step_is_noop_after_halt() {
        let (mut core, mut space) = setup(&[0xDF00, 0x2001]);
        run(&mut core, &mut space, 4);
        let pc = core.get_register(REG_PC);
        core.step(&mut space);
        core.step(&mut space);
        assert_eq!(core.get_register(REG_PC), pc);
        assert_eq!(core.get_register(0), 0);
    }
}
