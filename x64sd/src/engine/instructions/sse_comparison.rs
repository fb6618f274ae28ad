use crate::HookManager;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::memory::MemoryTrait;
use crate::modrm::decode_modrm;
use crate::opcode_map::ScalarDoubleOp;

/// Evaluates one of the eight SSE compare predicates. Only the low three
/// bits of the immediate are significant.
pub(crate) fn compare_predicate(predicate: u8, a: f64, b: f64) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    match predicate & 7 {
        0 => a == b,
        1 => !unordered && a < b,
        2 => !unordered && a <= b,
        3 => unordered,
        4 => unordered || a != b,
        5 => unordered || a >= b,
        6 => unordered || a > b,
        _ => !unordered,
    }
}

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    pub(crate) fn execute_cmpsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // CMPSD xmm, xmm/m64, imm8
        let modrm = decode_modrm(cursor, self.cpu, ScalarDoubleOp::Cmpsd.immediate_bytes())?;
        let src = self.read_xmm_low_f64(modrm.rm)?;
        let predicate = cursor.fetch_u8()?;

        let mut dst = self.xmm(modrm.reg);
        let mask = if compare_predicate(predicate, dst.f64(0), src) {
            u64::MAX
        } else {
            0
        };
        dst.set_u64(0, mask);
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }
}
