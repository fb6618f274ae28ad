//! The scalar-double opcode map: instructions reached through the mandatory
//! F2 prefix and the 0F escape.

use crate::cpu::CpuState;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::flags::Condition;
use crate::hooks::NoHooks;
use crate::memory::MemoryTrait;

/// Outcome of offering an opcode to a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStatus {
    Handled = 0,
    /// Not an opcode of this map. Nothing was consumed or modified.
    Unhandled = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarDoubleOp {
    MovsdLoad,
    MovsdStore,
    Movddup,
    Cvtsi2sd,
    Cvttsd2si,
    Cvtsd2si,
    Sqrtsd,
    Addsd,
    Mulsd,
    Cvtsd2ss,
    Subsd,
    Minsd,
    Divsd,
    Maxsd,
    Pshuflw,
    Haddps,
    Jcc(Condition),
    Cmpsd,
    Addsubps,
    Movdq2q,
    Cvtpd2dq,
    Lddqu,
}

impl ScalarDoubleOp {
    /// Maps the byte after `F2 0F` to its operation.
    pub fn decode(opcode: u8) -> Option<Self> {
        use ScalarDoubleOp::*;
        let op = match opcode {
            0x10 => MovsdLoad,
            0x11 => MovsdStore,
            0x12 => Movddup,
            0x2A => Cvtsi2sd,
            0x2C => Cvttsd2si,
            0x2D => Cvtsd2si,
            0x51 => Sqrtsd,
            0x58 => Addsd,
            0x59 => Mulsd,
            0x5A => Cvtsd2ss,
            0x5C => Subsd,
            0x5D => Minsd,
            0x5E => Divsd,
            0x5F => Maxsd,
            0x70 => Pshuflw,
            0x7C => Haddps,
            0x80..=0x8F => Jcc(Condition::from_code(opcode)),
            0xC2 => Cmpsd,
            0xD0 => Addsubps,
            0xD6 => Movdq2q,
            0xE6 => Cvtpd2dq,
            0xF0 => Lddqu,
            _ => return None,
        };
        Some(op)
    }

    pub fn mnemonic(&self) -> &'static str {
        use ScalarDoubleOp::*;
        match self {
            MovsdLoad | MovsdStore => "movsd",
            Movddup => "movddup",
            Cvtsi2sd => "cvtsi2sd",
            Cvttsd2si => "cvttsd2si",
            Cvtsd2si => "cvtsd2si",
            Sqrtsd => "sqrtsd",
            Addsd => "addsd",
            Mulsd => "mulsd",
            Cvtsd2ss => "cvtsd2ss",
            Subsd => "subsd",
            Minsd => "minsd",
            Divsd => "divsd",
            Maxsd => "maxsd",
            Pshuflw => "pshuflw",
            Haddps => "haddps",
            Jcc(_) => "jcc",
            Cmpsd => "cmpsd",
            Addsubps => "addsubps",
            Movdq2q => "movdq2q",
            Cvtpd2dq => "cvtpd2dq",
            Lddqu => "lddqu",
        }
    }

    /// Size of the immediate that follows the ModRM operand, if any.
    pub fn immediate_bytes(&self) -> usize {
        match self {
            ScalarDoubleOp::Pshuflw | ScalarDoubleOp::Cmpsd => 1,
            _ => 0,
        }
    }
}

/// Runs one scalar-double opcode against `cpu` and `memory` without hooks.
///
/// `opcode` has already been consumed from `cursor`, and `cursor.prefixes`
/// holds the instruction's prefixes.
pub fn execute_scalar_double<M: MemoryTrait>(
    opcode: u8,
    cursor: &mut InstructionCursor<'_>,
    cpu: &mut CpuState,
    memory: &mut M,
) -> Result<MapStatus> {
    ExecutionContext::new(cpu, memory, &mut NoHooks).execute_scalar_double(opcode, cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Register;
    use crate::cursor::Prefixes;
    use crate::flags::{FlagSize, LazyFlags};
    use crate::memory::OwnedMemory;
    use crate::xmm::Xmm;

    fn busy_cpu() -> CpuState {
        let mut cpu = CpuState::new();
        for i in 0..16 {
            cpu.regs[i] = 0x1111_1111_1111_1111u64.wrapping_mul(i as u64 + 1);
            cpu.xmm_regs[i] = Xmm::from_u64s(i as u64, !(i as u64));
        }
        cpu.rip = 0x40_1000;
        cpu.set_lazy_flags(LazyFlags::sub(FlagSize::DWord, 1, 2));
        cpu
    }

    #[test]
    fn decode_covers_the_map() {
        let handled: Vec<u8> = (0..=0xFF).filter(|&b| ScalarDoubleOp::decode(b).is_some()).collect();
        assert_eq!(handled.len(), 21 + 16);
        assert_eq!(ScalarDoubleOp::decode(0x84), Some(ScalarDoubleOp::Jcc(Condition::E)));
        assert_eq!(ScalarDoubleOp::decode(0x5B), None);
        assert_eq!(ScalarDoubleOp::Cmpsd.immediate_bytes(), 1);
        assert_eq!(ScalarDoubleOp::Addsd.immediate_bytes(), 0);
    }

    #[test]
    fn unhandled_opcodes_change_nothing() {
        let mut memory = OwnedMemory::new();
        let bytes = [0xC1, 0x00, 0x00, 0x00];
        for opcode in (0..=0xFFu8).filter(|&b| ScalarDoubleOp::decode(b).is_none()) {
            let mut cpu = busy_cpu();
            let before = cpu.clone();
            let mut cursor = InstructionCursor::new(&bytes, 0x40_1003);
            let status = execute_scalar_double(opcode, &mut cursor, &mut cpu, &mut memory).unwrap();
            assert_eq!(status, MapStatus::Unhandled, "opcode {opcode:#04x}");
            assert_eq!(cursor.position(), 0);
            assert_eq!(cpu, before);
        }
    }

    #[test]
    fn movdq2q_memory_form_is_unhandled() {
        let mut memory = OwnedMemory::new();
        let mut cpu = busy_cpu();
        let before = cpu.clone();
        // movdq2q mm0, [rax]
        let bytes = [0x00];
        let mut cursor = InstructionCursor::new(&bytes, 0x1000);
        let status = execute_scalar_double(0xD6, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(status, MapStatus::Unhandled);
        assert_eq!(cursor.position(), 0);
        assert_eq!(cpu, before);
    }

    #[test]
    fn movdq2q_truncated_memory_form_is_unhandled() {
        let mut memory = OwnedMemory::new();
        let mut cpu = busy_cpu();
        let before = cpu.clone();
        // movdq2q mm0, [rax+disp32] with the displacement cut off
        let bytes = [0x80, 0x00];
        let mut cursor = InstructionCursor::new(&bytes, 0x1000);
        let status = execute_scalar_double(0xD6, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(status, MapStatus::Unhandled);
        assert_eq!(cursor.position(), 0);
        assert_eq!(cpu, before);
    }

    #[test]
    fn addsd_register_form() {
        let mut memory = OwnedMemory::new();
        let mut cpu = CpuState::new();
        cpu.write_xmm(Register::XMM0, Xmm::from_f64s(1.5, 7.0));
        cpu.write_xmm(Register::XMM1, Xmm::from_f64s(2.25, 9.0));
        // addsd xmm0, xmm1
        let bytes = [0xC1];
        let mut cursor = InstructionCursor::new(&bytes, 0x1000);
        let status = execute_scalar_double(0x58, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(status, MapStatus::Handled);
        assert_eq!(cursor.position(), 1);
        assert_eq!(cpu.read_xmm(Register::XMM0), Xmm::from_f64s(3.75, 7.0));
    }

    #[test]
    fn cvtsi2sd_honours_rex_w() {
        let mut memory = OwnedMemory::new();
        let mut cpu = CpuState::new();
        cpu.write_reg(Register::RAX, 0x1_0000_0000);
        let bytes = [0xC0];

        let mut cursor = InstructionCursor::new(&bytes, 0);
        execute_scalar_double(0x2A, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.read_xmm(Register::XMM0).f64(0), 0.0);

        let prefixes = Prefixes {
            rex: Some(crate::cursor::RexPrefix::from_byte(0x48)),
            ..Default::default()
        };
        let mut cursor = InstructionCursor::new(&bytes, 0).with_prefixes(prefixes);
        execute_scalar_double(0x2A, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(cpu.read_xmm(Register::XMM0).f64(0), 4_294_967_296.0);
    }

    #[test]
    fn jcc_applies_displacement_to_rip() {
        let mut memory = OwnedMemory::new();
        let mut cpu = CpuState::new();
        cpu.rip = 0x2000;
        // 1 - 2 borrows, so CF is set once materialized
        cpu.set_lazy_flags(LazyFlags::sub(FlagSize::DWord, 1, 2));
        let bytes = 0x40i32.to_le_bytes();

        let mut cursor = InstructionCursor::new(&bytes, 0x2002);
        // jb
        execute_scalar_double(0x82, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(cursor.position(), 4);
        assert_eq!(cpu.rip, 0x2040);
        assert!(!cpu.lazy_flags.is_pending());

        let mut cursor = InstructionCursor::new(&bytes, 0x2002);
        // jae
        execute_scalar_double(0x83, &mut cursor, &mut cpu, &mut memory).unwrap();
        assert_eq!(cursor.position(), 4);
        assert_eq!(cpu.rip, 0x2040);
    }
}
