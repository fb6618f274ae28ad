use crate::HookManager;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::memory::MemoryTrait;
use crate::modrm::decode_modrm;

/// Quiet NaN with the sign bit set, the x86 "default NaN".
pub(crate) const NEGATIVE_QNAN: u64 = 0xFFF8_0000_0000_0000;

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    /// Shared body of the scalar-double ops: `op(dst, src)` replaces the low
    /// lane, the high lane is untouched.
    fn scalar_double_operation<F>(&mut self, cursor: &mut InstructionCursor<'_>, op: F) -> Result<()>
    where
        F: Fn(f64, f64) -> f64,
    {
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let src = self.read_xmm_low_f64(modrm.rm)?;

        let mut dst = self.xmm(modrm.reg);
        dst.set_f64(0, op(dst.f64(0), src));
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }

    pub(crate) fn execute_sqrtsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // SQRTSD: -0.0 passes through, anything below zero is the default NaN
        self.scalar_double_operation(cursor, |_, src| {
            if src < 0.0 {
                f64::from_bits(NEGATIVE_QNAN)
            } else {
                src.sqrt()
            }
        })
    }

    pub(crate) fn execute_addsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        self.scalar_double_operation(cursor, |a, b| a + b)
    }

    pub(crate) fn execute_mulsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // MULSD: inf * 0 in either order is pinned to the default NaN
        self.scalar_double_operation(cursor, |a, b| {
            if (a.is_infinite() && b == 0.0) || (b.is_infinite() && a == 0.0) {
                f64::from_bits(NEGATIVE_QNAN)
            } else {
                a * b
            }
        })
    }

    pub(crate) fn execute_subsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        self.scalar_double_operation(cursor, |a, b| a - b)
    }

    pub(crate) fn execute_divsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        self.scalar_double_operation(cursor, |a, b| a / b)
    }

    pub(crate) fn execute_minsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // MINSD: the source wins on any NaN
        self.scalar_double_operation(cursor, |a, b| {
            if a.is_nan() || b.is_nan() || b < a { b } else { a }
        })
    }

    pub(crate) fn execute_maxsd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // MAXSD: the source wins on any NaN
        self.scalar_double_operation(cursor, |a, b| {
            if a.is_nan() || b.is_nan() || b > a { b } else { a }
        })
    }

    pub(crate) fn execute_haddps(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // HADDPS xmm, xmm/m128: sums of adjacent pairs, destination pairs first
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let src = self.read_xmm_operand(modrm.rm)?;
        let dst = self.xmm(modrm.reg);

        let mut result = dst;
        result.set_f32(0, dst.f32(0) + dst.f32(1));
        result.set_f32(1, dst.f32(2) + dst.f32(3));
        result.set_f32(2, src.f32(0) + src.f32(1));
        result.set_f32(3, src.f32(2) + src.f32(3));
        self.set_xmm(modrm.reg, result);
        Ok(())
    }

    pub(crate) fn execute_addsubps(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // ADDSUBPS xmm, xmm/m128: even lanes subtract, odd lanes add
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let src = self.read_xmm_operand(modrm.rm)?;

        let mut dst = self.xmm(modrm.reg);
        for lane in 0..4 {
            let (a, b) = (dst.f32(lane), src.f32(lane));
            dst.set_f32(lane, if lane % 2 == 0 { a - b } else { a + b });
        }
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }
}
