mod instructions;

use crate::OwnedMemory;
use crate::cpu::{CpuState, Mxcsr, Register};
use crate::cursor::{InstructionCursor, Prefixes, RepPrefix, RexPrefix, SegmentOverride};
use crate::error::{EmulatorError, Result};
use crate::hooks::{HookAction, HookManager, NoHooks};
use crate::memory::{MemoryTrait, Permission};
use crate::modrm::Operand;
use crate::opcode_map::{MapStatus, ScalarDoubleOp};
use crate::xmm::Xmm;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Architectural upper bound on the encoded length of one instruction.
pub const MAX_INSTRUCTION_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stop after this many retired instructions; 0 means no limit.
    pub max_instructions: u64,
    /// MXCSR value installed by [`Engine::with_config`].
    pub mxcsr: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_instructions: 0,
            mxcsr: Mxcsr::DEFAULT.bits(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Engine<M: MemoryTrait = OwnedMemory> {
    pub cpu: CpuState,
    pub memory: M,
    pub config: EngineConfig,
    instruction_count: u64,
}

impl Engine<OwnedMemory> {
    pub fn new() -> Self {
        Self::new_memory(OwnedMemory::new())
    }
}

impl Default for Engine<OwnedMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MemoryTrait> Engine<M> {
    pub fn new_memory(memory: M) -> Self {
        Self::with_config(memory, EngineConfig::default())
    }

    pub fn with_config(memory: M, config: EngineConfig) -> Self {
        let mut cpu = CpuState::new();
        cpu.mxcsr = Mxcsr::from_bits_truncate(config.mxcsr);
        Self {
            cpu,
            memory,
            config,
            instruction_count: 0,
        }
    }

    pub fn reg_read(&self, reg: Register) -> u64 {
        self.cpu.read_reg(reg)
    }

    pub fn reg_write(&mut self, reg: Register, value: u64) {
        self.cpu.write_reg(reg, value)
    }

    pub fn xmm_read(&self, reg: Register) -> Xmm {
        self.cpu.read_xmm(reg)
    }

    pub fn xmm_write(&mut self, reg: Register, value: Xmm) {
        self.cpu.write_xmm(reg, value);
    }

    pub fn context_save(&self) -> CpuState {
        self.cpu.clone()
    }

    pub fn context_restore(&mut self, state: &CpuState) {
        self.cpu = state.clone();
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Start emulation with default no-op hooks
    pub fn emu_start(&mut self, begin: u64, until: u64, count: u64) -> Result<()> {
        self.emu_start_with_hooks(begin, until, count, &mut NoHooks)
    }

    /// Runs from `begin` until RIP reaches `until` (0 disables the check),
    /// `count` instructions retire (0 disables) or a hook asks to stop.
    /// The configured `max_instructions` limit applies on top of `count`.
    pub fn emu_start_with_hooks<H: HookManager<M>>(
        &mut self,
        begin: u64,
        until: u64,
        count: u64,
        hooks: &mut H,
    ) -> Result<()> {
        self.cpu.rip = begin;
        self.instruction_count = 0;

        let limit = match (count, self.config.max_instructions) {
            (0, max) => max,
            (count, 0) => count,
            (count, max) => count.min(max),
        };

        loop {
            if until != 0 && self.cpu.rip == until {
                break;
            }
            if limit != 0 && self.instruction_count >= limit {
                debug!(count = self.instruction_count, "instruction limit reached");
                break;
            }
            if !self.step(hooks)? {
                break;
            }
        }

        Ok(())
    }

    /// Executes one instruction. Returns `Ok(false)` when a hook stopped emulation.
    pub fn step<H: HookManager<M>>(&mut self, hooks: &mut H) -> Result<bool> {
        let rip = self.cpu.rip;

        if hooks.on_code(&self.cpu, rip)? == HookAction::Stop {
            return Ok(false);
        }

        let perms = self.memory.permissions(rip)?;
        if !perms.contains(Permission::EXEC) {
            return Err(EmulatorError::PermissionDenied(rip));
        }

        let mut window = [0u8; MAX_INSTRUCTION_LEN];
        let fetched = self.memory.fetch_code(rip, &mut window);
        let mut cursor = InstructionCursor::new(&window[..fetched], rip);

        let result = ExecutionContext {
            cpu: &mut self.cpu,
            memory: &mut self.memory,
            hooks: &mut *hooks,
        }
        .execute_instruction(&mut cursor);

        let status = match result {
            Err(EmulatorError::TruncatedInstruction(_)) if fetched < MAX_INSTRUCTION_LEN => {
                // The window ended early because the next byte isn't fetchable
                let boundary = rip.wrapping_add(fetched as u64);
                return Err(match self.memory.permissions(boundary) {
                    Ok(_) => EmulatorError::PermissionDenied(boundary),
                    Err(err) => err,
                });
            }
            other => other?,
        };

        match status {
            MapStatus::Handled => {
                // Handlers express taken branches as a displacement on RIP
                let branch = self.cpu.rip.wrapping_sub(rip);
                self.cpu.rip = cursor.address().wrapping_add(branch);
                hooks.on_retired(&self.cpu, rip, &window[..cursor.position()])?;
                self.instruction_count += 1;
                Ok(true)
            }
            MapStatus::Unhandled => {
                warn!(rip = format_args!("{rip:#x}"), "invalid instruction");
                hooks.on_invalid(&self.cpu, &self.memory, rip)?;
                Err(EmulatorError::InvalidInstruction(rip))
            }
        }
    }
}

/// Mutable view of one execution context handed to instruction handlers.
pub struct ExecutionContext<'a, H: HookManager<M>, M: MemoryTrait> {
    pub(crate) cpu: &'a mut CpuState,
    pub(crate) memory: &'a mut M,
    pub(crate) hooks: &'a mut H,
}

impl<'a, H: HookManager<M>, M: MemoryTrait> ExecutionContext<'a, H, M> {
    pub fn new(cpu: &'a mut CpuState, memory: &'a mut M, hooks: &'a mut H) -> Self {
        Self { cpu, memory, hooks }
    }
}

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    /// Decodes prefixes and escape bytes, then hands the opcode to the map
    /// that owns it. Only the F2 0F map is implemented; everything else is
    /// reported as unhandled.
    fn execute_instruction(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<MapStatus> {
        let start = cursor.checkpoint();
        let prefixes = decode_prefixes(cursor)?;
        cursor.prefixes = prefixes;

        let status = match cursor.peek_u8() {
            Some(0x0F) => {
                cursor.fetch_u8()?;
                let opcode = cursor.fetch_u8()?;
                match prefixes.rep {
                    Some(RepPrefix::RepNe) => self.execute_scalar_double(opcode, cursor)?,
                    _ => MapStatus::Unhandled,
                }
            }
            Some(_) => MapStatus::Unhandled,
            None => return Err(EmulatorError::TruncatedInstruction(cursor.address())),
        };

        if status == MapStatus::Unhandled {
            cursor.rewind(start);
        }
        Ok(status)
    }

    /// Runs one opcode of the scalar-double (F2 0F) map.
    ///
    /// The opcode byte has already been consumed. On [`MapStatus::Unhandled`]
    /// the cursor is back where it was on entry and no state has changed.
    /// Relative branches are applied to `cpu.rip` as a displacement; the
    /// caller owns moving RIP past the instruction itself.
    pub fn execute_scalar_double(
        &mut self,
        opcode: u8,
        cursor: &mut InstructionCursor<'_>,
    ) -> Result<MapStatus> {
        let Some(op) = ScalarDoubleOp::decode(opcode) else {
            debug!(opcode = format_args!("{opcode:#04x}"), "unhandled F2 0F opcode");
            return Ok(MapStatus::Unhandled);
        };

        trace!(
            address = format_args!("{:#x}", cursor.address()),
            op = op.mnemonic(),
            "execute"
        );

        use ScalarDoubleOp::*;
        match op {
            MovsdLoad => self.execute_movsd_load(cursor)?,
            MovsdStore => self.execute_movsd_store(cursor)?,
            Movddup => self.execute_movddup(cursor)?,
            Cvtsi2sd => self.execute_cvtsi2sd(cursor)?,
            Cvttsd2si => self.execute_cvttsd2si(cursor)?,
            Cvtsd2si => self.execute_cvtsd2si(cursor)?,
            Sqrtsd => self.execute_sqrtsd(cursor)?,
            Addsd => self.execute_addsd(cursor)?,
            Mulsd => self.execute_mulsd(cursor)?,
            Cvtsd2ss => self.execute_cvtsd2ss(cursor)?,
            Subsd => self.execute_subsd(cursor)?,
            Minsd => self.execute_minsd(cursor)?,
            Divsd => self.execute_divsd(cursor)?,
            Maxsd => self.execute_maxsd(cursor)?,
            Pshuflw => self.execute_pshuflw(cursor)?,
            Haddps => self.execute_haddps(cursor)?,
            Jcc(condition) => self.execute_jcc(cursor, condition)?,
            Cmpsd => self.execute_cmpsd(cursor)?,
            Addsubps => self.execute_addsubps(cursor)?,
            Movdq2q => return self.execute_movdq2q(cursor),
            Cvtpd2dq => self.execute_cvtpd2dq(cursor)?,
            Lddqu => self.execute_lddqu(cursor)?,
        }

        Ok(MapStatus::Handled)
    }

    fn mem_read_with_hooks(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.hooks.on_mem_read(self.cpu, address, buf.len())?;
        self.memory.read(address, buf)
    }

    fn mem_write_with_hooks(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.hooks.on_mem_write(self.cpu, address, data)?;
        self.memory.write(address, data)
    }

    fn read_memory_32(&mut self, addr: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.mem_read_with_hooks(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_memory_64(&mut self, addr: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.mem_read_with_hooks(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_memory_128(&mut self, addr: u64) -> Result<Xmm> {
        let mut buf = [0u8; 16];
        self.mem_read_with_hooks(addr, &mut buf)?;
        Ok(Xmm::from_bytes(buf))
    }

    fn write_memory_64(&mut self, addr: u64, value: u64) -> Result<()> {
        self.mem_write_with_hooks(addr, &value.to_le_bytes())
    }

    fn xmm(&self, index: u8) -> Xmm {
        self.cpu.xmm_regs[index as usize]
    }

    fn set_xmm(&mut self, index: u8, value: Xmm) {
        self.cpu.xmm_regs[index as usize] = value;
    }

    /// Full 128-bit r/m source.
    fn read_xmm_operand(&mut self, operand: Operand) -> Result<Xmm> {
        match operand {
            Operand::Register(index) => Ok(self.xmm(index)),
            Operand::Memory(addr) => self.read_memory_128(addr),
        }
    }

    /// Low 64 bits of an r/m source; memory forms read only 8 bytes.
    fn read_xmm_low64(&mut self, operand: Operand) -> Result<u64> {
        match operand {
            Operand::Register(index) => Ok(self.xmm(index).u64(0)),
            Operand::Memory(addr) => self.read_memory_64(addr),
        }
    }

    fn read_xmm_low_f64(&mut self, operand: Operand) -> Result<f64> {
        self.read_xmm_low64(operand).map(f64::from_bits)
    }

    /// Integer r/m source, sign-extended to 64 bits.
    fn read_gp_signed(&mut self, operand: Operand, wide: bool) -> Result<i64> {
        match (operand, wide) {
            (Operand::Register(index), true) => Ok(self.cpu.regs[index as usize] as i64),
            (Operand::Register(index), false) => Ok(self.cpu.regs[index as usize] as i32 as i64),
            (Operand::Memory(addr), true) => self.read_memory_64(addr).map(|v| v as i64),
            (Operand::Memory(addr), false) => self.read_memory_32(addr).map(|v| v as i32 as i64),
        }
    }
}

/// Consumes legacy prefixes and an optional REX byte. REX only counts when it
/// immediately precedes the opcode; a legacy prefix after it cancels it.
fn decode_prefixes(cursor: &mut InstructionCursor<'_>) -> Result<Prefixes> {
    let mut prefixes = Prefixes::default();

    while let Some(byte) = cursor.peek_u8() {
        match byte {
            0x66 => prefixes.operand_size_override = true,
            0x67 => prefixes.address_size_override = true,
            0x26 => prefixes.segment = Some(SegmentOverride::Es),
            0x2E => prefixes.segment = Some(SegmentOverride::Cs),
            0x36 => prefixes.segment = Some(SegmentOverride::Ss),
            0x3E => prefixes.segment = Some(SegmentOverride::Ds),
            0x64 => prefixes.segment = Some(SegmentOverride::Fs),
            0x65 => prefixes.segment = Some(SegmentOverride::Gs),
            0xF0 => prefixes.lock = true,
            0xF2 => prefixes.rep = Some(RepPrefix::RepNe),
            0xF3 => prefixes.rep = Some(RepPrefix::Rep),
            0x40..=0x4F => {
                cursor.fetch_u8()?;
                prefixes.rex = Some(RexPrefix::from_byte(byte));
                match cursor.peek_u8() {
                    Some(0x40..=0x4F) => continue,
                    Some(
                        0x66 | 0x67 | 0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 | 0xF0 | 0xF2
                        | 0xF3,
                    ) => {
                        prefixes.rex = None;
                        continue;
                    }
                    _ => break,
                }
            }
            _ => break,
        }
        cursor.fetch_u8()?;
    }

    Ok(prefixes)
}
