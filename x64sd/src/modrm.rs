//! ModRM / SIB / displacement decoding into resolved operands.

use crate::cpu::CpuState;
use crate::cursor::{InstructionCursor, SegmentOverride};
use crate::error::Result;

/// The r/m side of a ModRM byte, fully resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Register number 0-15 (REX.B applied). Which bank it names depends on
    /// the instruction.
    Register(u8),
    /// Linear guest address.
    Memory(u64),
}

impl Operand {
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRm {
    pub byte: u8,
    /// ModRM.reg with REX.R applied.
    pub reg: u8,
    pub rm: Operand,
}

impl ModRm {
    pub fn mod_bits(&self) -> u8 {
        self.byte >> 6
    }
}

/// Decodes the ModRM byte at the cursor plus any SIB and displacement bytes.
///
/// `immediate_bytes` is the size of the immediate that follows the
/// displacement; RIP-relative addresses are relative to the end of the whole
/// instruction, so it has to be known before the immediate is fetched.
pub fn decode_modrm(
    cursor: &mut InstructionCursor<'_>,
    cpu: &CpuState,
    immediate_bytes: usize,
) -> Result<ModRm> {
    let prefixes = cursor.prefixes;
    let byte = cursor.fetch_u8()?;
    let mod_bits = byte >> 6;
    let reg = ((byte >> 3) & 7) | if prefixes.rex_r() { 8 } else { 0 };
    let rm_bits = byte & 7;
    let rex_b = if prefixes.rex_b() { 8 } else { 0 };

    if mod_bits == 3 {
        return Ok(ModRm {
            byte,
            reg,
            rm: Operand::Register(rm_bits | rex_b),
        });
    }

    let mut rip_relative = false;
    let mut address = if rm_bits == 4 {
        let sib = cursor.fetch_u8()?;
        let scale = sib >> 6;
        let index = ((sib >> 3) & 7) | if prefixes.rex_x() { 8 } else { 0 };
        let base = sib & 7;

        let mut address = 0u64;
        // Index 4 without REX.X means no index
        if index != 4 {
            address = cpu.regs[index as usize] << scale;
        }
        if base == 5 && mod_bits == 0 {
            address = address.wrapping_add(cursor.fetch_i32()? as i64 as u64);
        } else {
            address = address.wrapping_add(cpu.regs[(base | rex_b) as usize]);
        }
        address
    } else if rm_bits == 5 && mod_bits == 0 {
        rip_relative = true;
        cursor.fetch_i32()? as i64 as u64
    } else {
        cpu.regs[(rm_bits | rex_b) as usize]
    };

    address = match mod_bits {
        1 => address.wrapping_add(cursor.fetch_i8()? as i64 as u64),
        2 => address.wrapping_add(cursor.fetch_i32()? as i64 as u64),
        _ => address,
    };

    if rip_relative {
        let next_ip = cursor.address().wrapping_add(immediate_bytes as u64);
        address = address.wrapping_add(next_ip);
    }

    if prefixes.address_size_override {
        address &= 0xFFFF_FFFF;
    }

    address = match prefixes.segment {
        Some(SegmentOverride::Fs) => address.wrapping_add(cpu.fs_base),
        Some(SegmentOverride::Gs) => address.wrapping_add(cpu.gs_base),
        // ES/CS/SS/DS have a zero base in long mode
        _ => address,
    };

    Ok(ModRm {
        byte,
        reg,
        rm: Operand::Memory(address),
    })
}
