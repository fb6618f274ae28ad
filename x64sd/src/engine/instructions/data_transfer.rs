use crate::HookManager;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::memory::MemoryTrait;
use crate::modrm::{Operand, decode_modrm};
use crate::opcode_map::MapStatus;
use crate::xmm::Xmm;

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    pub(crate) fn execute_movsd_load(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // MOVSD xmm, xmm/m64
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_xmm_low64(modrm.rm)?;

        let mut dst = self.xmm(modrm.reg);
        dst.set_u64(0, value);
        // Loads from memory clear the upper lane, register moves keep it
        if modrm.rm.is_memory() {
            dst.set_u64(1, 0);
        }
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }

    pub(crate) fn execute_movsd_store(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // MOVSD xmm/m64, xmm
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.xmm(modrm.reg).u64(0);

        match modrm.rm {
            Operand::Register(index) => {
                let mut dst = self.xmm(index);
                dst.set_u64(0, value);
                self.set_xmm(index, dst);
            }
            Operand::Memory(addr) => self.write_memory_64(addr, value)?,
        }
        Ok(())
    }

    pub(crate) fn execute_movddup(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // MOVDDUP xmm, xmm/m64
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_xmm_low64(modrm.rm)?;
        self.set_xmm(modrm.reg, Xmm::from_u64s(value, value));
        Ok(())
    }

    pub(crate) fn execute_lddqu(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // LDDQU xmm, m128; no alignment requirement
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_xmm_operand(modrm.rm)?;
        self.set_xmm(modrm.reg, value);
        Ok(())
    }

    /// MOVDQ2Q mm, xmm. Only the register form exists; a memory operand is
    /// left for the caller to reject.
    pub(crate) fn execute_movdq2q(
        &mut self,
        cursor: &mut InstructionCursor<'_>,
    ) -> Result<MapStatus> {
        // Reject mod != 3 before any SIB or displacement bytes are consumed
        if matches!(cursor.peek_u8(), Some(byte) if byte >> 6 != 0b11) {
            return Ok(MapStatus::Unhandled);
        }

        let start = cursor.checkpoint();
        let modrm = decode_modrm(cursor, self.cpu, 0)?;

        let Operand::Register(src) = modrm.rm else {
            cursor.rewind(start);
            return Ok(MapStatus::Unhandled);
        };

        // MMX registers ignore REX.R
        let value = self.xmm(src).u64(0);
        self.cpu.mm_regs[(modrm.reg & 7) as usize] = value;
        Ok(MapStatus::Handled)
    }
}
