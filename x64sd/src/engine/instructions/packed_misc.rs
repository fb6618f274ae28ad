use crate::HookManager;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::memory::MemoryTrait;
use crate::modrm::decode_modrm;
use crate::opcode_map::ScalarDoubleOp;
use crate::xmm::Xmm;

/// Word shuffle of the low qword. Each 2-bit field of `selector` picks the
/// source word for one destination word; the high qword is the source's.
pub(crate) fn shuffle_low_words(src: Xmm, selector: u8) -> Xmm {
    let mut result = src;
    for lane in 0..4 {
        let pick = ((selector >> (lane * 2)) & 3) as usize;
        result.set_u16(lane, src.u16(pick));
    }
    result
}

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    pub(crate) fn execute_pshuflw(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // PSHUFLW xmm, xmm/m128, imm8
        let modrm = decode_modrm(cursor, self.cpu, ScalarDoubleOp::Pshuflw.immediate_bytes())?;
        let src = self.read_xmm_operand(modrm.rm)?;
        let selector = cursor.fetch_u8()?;

        self.set_xmm(modrm.reg, shuffle_low_words(src, selector));
        Ok(())
    }
}
