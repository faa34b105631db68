// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Decode-only disassembly.
//!
//! The scan walks the ROM region from its base within the loaded `limit`,
//! two halfwords at a time, mirroring the execution fetch order. Wide
//! encodings consume their partner halfword and produce a single record.
//! Nothing here touches CPU state.

use crate::decoder::thumb::{decode_thumb16, decode_thumb32, is_wide, AluOp, Instruction, ShiftOp};
use crate::memory::{AccessWidth, AddressSpace, RegionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub address: u32,
    pub mnemonic: String,
    pub operands: String,
}

const COND_NAMES: [&str; 14] = [
    "EQ", "NE", "CS", "CC", "MI", "PL", "VS", "VC", "HI", "LS", "GE", "LT", "GT", "LE",
];

fn reg_name(n: u8) -> String {
    format!("R{n}")
}

fn alu_mnemonic(op: AluOp) -> &'static str {
    match op {
        AluOp::And => "AND",
        AluOp::Eor => "EOR",
        AluOp::Lsl => "LSL",
        AluOp::Lsr => "LSR",
        AluOp::Asr => "ASR",
        AluOp::Adc => "ADC",
        AluOp::Sbc => "SBC",
        AluOp::Ror => "ROR",
        AluOp::Tst => "TST",
        AluOp::Neg => "NEG",
        AluOp::Cmp => "CMP",
        AluOp::Cmn => "CMN",
        AluOp::Orr => "ORR",
        AluOp::Mul => "MUL",
        AluOp::Bic => "BIC",
        AluOp::Mvn => "MVN",
    }
}

fn mem_mnemonic(load: bool, width: AccessWidth, signed: bool) -> String {
    let base = if load { "LDR" } else { "STR" };
    let suffix = match (width, signed) {
        (AccessWidth::Word, _) => "",
        (AccessWidth::Byte, false) => ".B",
        (AccessWidth::Byte, true) => ".SB",
        (AccessWidth::Half, false) => ".H",
        (AccessWidth::Half, true) => ".SH",
    };
    format!("{base}{suffix}")
}

fn reg_list(mask: u8) -> String {
    let mut s = String::from("{");
    for i in 0..8 {
        if mask & (1 << i) != 0 {
            if s.len() > 1 {
                s.push(',');
            }
            s.push_str(&format!("R{i}"));
        }
    }
    s.push('}');
    s
}

/// Renders one classified instruction. `pc` is the already-advanced PC of
/// the fetch pair; `half` is the slot index, which feeds the displayed
/// branch target.
pub fn format_instruction(instr: &Instruction, pc: u32, half: u32) -> (String, String) {
    match *instr {
        Instruction::ShiftImm { op, rd, rm, imm5 } => {
            let m = match op {
                ShiftOp::Lsl => "LSL",
                ShiftOp::Lsr => "LSR",
                ShiftOp::Asr => "ASR",
            };
            (
                m.to_string(),
                format!("{}, {}, #{}", reg_name(rd), reg_name(rm), imm5),
            )
        }
        Instruction::AddReg { rd, rn, rm } => (
            "ADD".to_string(),
            format!("{}, {}, {}", reg_name(rd), reg_name(rn), reg_name(rm)),
        ),
        Instruction::SubReg { rd, rn, rm } => (
            "SUB".to_string(),
            format!("{}, {}, {}", reg_name(rd), reg_name(rn), reg_name(rm)),
        ),
        Instruction::AddImm3 { rd, rn, imm } => (
            "ADD".to_string(),
            format!("{}, {}, #{}", reg_name(rd), reg_name(rn), imm),
        ),
        Instruction::SubImm3 { rd, rn, imm } => (
            "SUB".to_string(),
            format!("{}, {}, #{}", reg_name(rd), reg_name(rn), imm),
        ),
        Instruction::MovImm { rd, imm } => {
            ("MOV".to_string(), format!("{}, #{}", reg_name(rd), imm))
        }
        Instruction::CmpImm { rn, imm } => {
            ("CMP".to_string(), format!("{}, #{}", reg_name(rn), imm))
        }
        Instruction::AddImm8 { rd, imm } => {
            ("ADD".to_string(), format!("{}, #{}", reg_name(rd), imm))
        }
        Instruction::SubImm8 { rd, imm } => {
            ("SUB".to_string(), format!("{}, #{}", reg_name(rd), imm))
        }
        Instruction::AluReg { op, rd, rm } => (
            alu_mnemonic(op).to_string(),
            format!("{}, {}", reg_name(rd), reg_name(rm)),
        ),
        Instruction::AddHi { rd, rm } => (
            "ADD".to_string(),
            format!("{}, {}", reg_name(rd), reg_name(rm)),
        ),
        Instruction::CmpHi { rn, rm } => (
            "CMP".to_string(),
            format!("{}, {}", reg_name(rn), reg_name(rm)),
        ),
        Instruction::MovHi { rd, rm } => (
            "MOV".to_string(),
            format!("{}, {}", reg_name(rd), reg_name(rm)),
        ),
        Instruction::Bx { rm } => ("BX".to_string(), reg_name(rm)),
        Instruction::Blx { rm } => ("BLX".to_string(), reg_name(rm)),
        Instruction::LdrLit { rt, imm8 } => {
            let off = imm8 as u32 * 4;
            let target = pc.wrapping_add(off);
            (
                "LDR".to_string(),
                format!("{}, [ #0x{:X} ] ;; pc + #{}", reg_name(rt), target, off),
            )
        }
        Instruction::MemReg {
            load,
            width,
            signed,
            rt,
            rn,
            rm,
        } => (
            mem_mnemonic(load, width, signed),
            format!("{}, [{}, {}]", reg_name(rt), reg_name(rn), reg_name(rm)),
        ),
        Instruction::MemImm {
            load,
            width,
            rt,
            rn,
            imm5,
        } => (
            mem_mnemonic(load, width, false),
            format!(
                "{}, [{}, #0x{:X}]",
                reg_name(rt),
                reg_name(rn),
                imm5 as u32 * width.bytes()
            ),
        ),
        Instruction::MemSp { load, rt, imm8 } => (
            mem_mnemonic(load, AccessWidth::Word, false),
            format!("{}, [SP, #0x{:X}]", reg_name(rt), imm8 as u32 * 4),
        ),
        Instruction::AddPcSp { sp, rd, imm8 } => (
            "ADD".to_string(),
            format!(
                "{}, {}, #0x{:X}",
                reg_name(rd),
                if sp { "SP" } else { "PC" },
                imm8 as u32 * 4
            ),
        ),
        Instruction::BlockTransfer { load, rn, mask } => (
            if load { "LDMIA" } else { "STMIA" }.to_string(),
            format!("{}!, {}", reg_name(rn), reg_list(mask)),
        ),
        Instruction::BranchCond { cond, offset } => {
            let target = pc.wrapping_add(((offset + half as i32) * 2) as u32);
            (
                format!("B{}", COND_NAMES[cond as usize]),
                format!("#0x{target:X}"),
            )
        }
        Instruction::Reserved { instr } => (format!("invalid(#0x{instr:x})"), String::new()),
        Instruction::Swi { imm } => ("SWI".to_string(), format!("#0x{imm:X}")),
        Instruction::Branch { offset } => {
            let target = pc.wrapping_add(((offset + half as i32) * 2) as u32);
            ("B".to_string(), format!("#0x{target:X}"))
        }
        Instruction::WideLit { rt, imm12 } => {
            let target = (pc & !3).wrapping_add(imm12 as u32);
            (
                "LDR".to_string(),
                format!("{}, [ #0x{:X} ] ;; pc + {}", reg_name(rt), target, imm12),
            )
        }
        Instruction::WideImm12 {
            load,
            width,
            signed,
            rt,
            rn,
            imm12,
        } => (
            mem_mnemonic(load, width, signed),
            format!("{}, [{} + #0x{:X}]", reg_name(rt), reg_name(rn), imm12),
        ),
        Instruction::WideNegImm8 {
            load,
            width,
            signed,
            rt,
            rn,
            imm8,
        } => (
            mem_mnemonic(load, width, signed),
            format!("{}, [{} - #0x{:X}]", reg_name(rt), reg_name(rn), imm8),
        ),
        Instruction::WideRegShift {
            load,
            width,
            signed,
            rt,
            rn,
            rm,
            shift,
        } => (
            mem_mnemonic(load, width, signed),
            format!(
                "{}, [{} + {} lsl #{}]",
                reg_name(rt),
                reg_name(rn),
                reg_name(rm),
                shift
            ),
        ),
        Instruction::Undefined(op) => ("undef".to_string(), format!("#0x{op:x}")),
        Instruction::Undefined32(h1, h2) => {
            ("undef".to_string(), format!("#0x{h1:04x}{h2:04x}"))
        }
    }
}

/// Scans the ROM region within its loaded limit, producing one record per
/// instruction. Restartable and side-effect free.
pub fn disassemble(space: &AddressSpace) -> Vec<TraceRecord> {
    let Some(rom) = space.find_region_by_kind(RegionKind::Rom) else {
        return Vec::new();
    };
    let mut pc = rom.base_address();
    let mut list = Vec::new();

    loop {
        if !space.in_limit(pc) {
            break;
        }
        let (h1, h2) = match (space.read16(pc), space.read16(pc.wrapping_add(2))) {
            (Ok(a), Ok(b)) => (a, b),
            _ => break,
        };
        pc = pc.wrapping_add(4);

        if is_wide(h1) {
            // The pair is one 32-bit instruction; the second halfword must
            // not be decoded independently.
            list.push(record(decode_thumb32(h1, h2), pc, 0, pc.wrapping_sub(4)));
            continue;
        }
        list.push(record(decode_thumb16(h1), pc, 0, pc.wrapping_sub(4)));

        if is_wide(h2) {
            let Ok(partner) = space.read16(pc) else {
                break;
            };
            list.push(record(
                decode_thumb32(h2, partner),
                pc,
                1,
                pc.wrapping_sub(2),
            ));
            pc = pc.wrapping_add(2);
        } else {
            list.push(record(decode_thumb16(h2), pc, 1, pc.wrapping_sub(2)));
        }
    }
    list
}

fn record(instr: Instruction, pc: u32, half: u32, address: u32) -> TraceRecord {
    let (mnemonic, operands) = format_instruction(&instr, pc, half);
    TraceRecord {
        address,
        mnemonic,
        operands,
    }
}

/// Fixed-width listing line: zero-padded 8-hex-digit uppercase address,
/// mnemonic left-justified to 6 columns, operand string verbatim.
pub fn render_line(record: &TraceRecord) -> String {
    format!(
        "0x{:08X}    {:<6} {}",
        record.address, record.mnemonic, record.operands
    )
}
