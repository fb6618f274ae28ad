use crate::HookManager;
use crate::cpu::RoundingMode;
use crate::cursor::InstructionCursor;
use crate::engine::ExecutionContext;
use crate::error::Result;
use crate::memory::MemoryTrait;
use crate::modrm::decode_modrm;

/// Rounds to an integral value the way the conversion instructions do.
///
/// `Nearest` adds one half and floors, mirrored for negative inputs, so
/// halfway cases go away from zero instead of to even.
pub(crate) fn round_integral(value: f64, mode: RoundingMode) -> f64 {
    match mode {
        RoundingMode::Nearest if value < 0.0 => -(0.5 - value).floor(),
        RoundingMode::Nearest => (value + 0.5).floor(),
        RoundingMode::Down => value.floor(),
        RoundingMode::Up => value.ceil(),
        RoundingMode::Chop => value.trunc(),
    }
}

/// Integral double to i32, or the integer indefinite value (0x8000_0000)
/// for NaN and out-of-range inputs.
pub(crate) fn to_i32_or_indefinite(value: f64) -> i32 {
    if value.is_nan() || value >= 2_147_483_648.0 || value < -2_147_483_648.0 {
        i32::MIN
    } else {
        value as i32
    }
}

pub(crate) fn to_i64_or_indefinite(value: f64) -> i64 {
    if value.is_nan() || value >= 9_223_372_036_854_775_808.0 || value < -9_223_372_036_854_775_808.0 {
        i64::MIN
    } else {
        value as i64
    }
}

impl<H: HookManager<M>, M: MemoryTrait> ExecutionContext<'_, H, M> {
    pub(crate) fn execute_cvtsi2sd(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // CVTSI2SD xmm, r/m32 or r/m64 with REX.W
        let wide = cursor.prefixes.rex_w();
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_gp_signed(modrm.rm, wide)?;

        let mut dst = self.xmm(modrm.reg);
        dst.set_f64(0, value as f64);
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }

    pub(crate) fn execute_cvttsd2si(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // CVTTSD2SI r32/r64, xmm/m64; always truncates, MXCSR.RC is ignored
        let wide = cursor.prefixes.rex_w();
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_xmm_low_f64(modrm.rm)?;

        self.write_converted_gp(modrm.reg, value.trunc(), wide);
        Ok(())
    }

    pub(crate) fn execute_cvtsd2si(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // CVTSD2SI r32/r64, xmm/m64; rounds per MXCSR.RC
        let wide = cursor.prefixes.rex_w();
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_xmm_low_f64(modrm.rm)?;

        let rounded = round_integral(value, self.cpu.rounding_mode());
        self.write_converted_gp(modrm.reg, rounded, wide);
        Ok(())
    }

    pub(crate) fn execute_cvtsd2ss(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // CVTSD2SS xmm, xmm/m64; only the low single lane is written
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let value = self.read_xmm_low_f64(modrm.rm)?;

        let mut dst = self.xmm(modrm.reg);
        dst.set_f32(0, value as f32);
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }

    pub(crate) fn execute_cvtpd2dq(&mut self, cursor: &mut InstructionCursor<'_>) -> Result<()> {
        // CVTPD2DQ xmm, xmm/m128; two doubles to two dwords, upper qword cleared
        let modrm = decode_modrm(cursor, self.cpu, 0)?;
        let src = self.read_xmm_operand(modrm.rm)?;
        let mode = self.cpu.rounding_mode();

        let mut dst = self.xmm(modrm.reg);
        for lane in 0..2 {
            dst.set_i32(lane, to_i32_or_indefinite(round_integral(src.f64(lane), mode)));
        }
        dst.set_u64(1, 0);
        self.set_xmm(modrm.reg, dst);
        Ok(())
    }

    /// Stores an already integral double into a GPR. 32-bit results clear
    /// the upper half of the register.
    fn write_converted_gp(&mut self, reg: u8, value: f64, wide: bool) {
        self.cpu.regs[reg as usize] = if wide {
            to_i64_or_indefinite(value) as u64
        } else {
            to_i32_or_indefinite(value) as u32 as u64
        };
    }
}
