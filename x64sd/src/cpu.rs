use crate::flags::LazyFlags;
use crate::xmm::Xmm;
use bitflags::bitflags;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    RAX,
    RCX,
    RDX,
    RBX,
    RSP,
    RBP,
    RSI,
    RDI,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    RIP,
    RFLAGS,
    EAX,
    ECX,
    EDX,
    EBX,
    ESP,
    EBP,
    ESI,
    EDI,
    R8D,
    R9D,
    R10D,
    R11D,
    R12D,
    R13D,
    R14D,
    R15D,
    AX,
    CX,
    DX,
    BX,
    SP,
    BP,
    SI,
    DI,
    R8W,
    R9W,
    R10W,
    R11W,
    R12W,
    R13W,
    R14W,
    R15W,
    AL,
    CL,
    DL,
    BL,
    SPL,
    BPL,
    SIL,
    DIL,
    R8B,
    R9B,
    R10B,
    R11B,
    R12B,
    R13B,
    R14B,
    R15B,
    AH,
    CH,
    DH,
    BH,
    XMM0,
    XMM1,
    XMM2,
    XMM3,
    XMM4,
    XMM5,
    XMM6,
    XMM7,
    XMM8,
    XMM9,
    XMM10,
    XMM11,
    XMM12,
    XMM13,
    XMM14,
    XMM15,
    MM0,
    MM1,
    MM2,
    MM3,
    MM4,
    MM5,
    MM6,
    MM7,
}

/// Where a [`Register`] name lives in [`CpuState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Gpr { index: usize, width: u8, high_byte: bool },
    Rip,
    Rflags,
    Xmm(usize),
    Mm(usize),
}

impl Register {
    const GPR64: [Register; 16] = {
        use Register::*;
        [
            RAX, RCX, RDX, RBX, RSP, RBP, RSI, RDI, R8, R9, R10, R11, R12, R13, R14, R15,
        ]
    };

    const XMM: [Register; 16] = {
        use Register::*;
        [
            XMM0, XMM1, XMM2, XMM3, XMM4, XMM5, XMM6, XMM7, XMM8, XMM9, XMM10, XMM11, XMM12,
            XMM13, XMM14, XMM15,
        ]
    };

    /// 64-bit general purpose register by hardware encoding (0 = RAX, 4 = RSP, ...).
    pub fn gpr64(index: usize) -> Register {
        Self::GPR64[index & 0xF]
    }

    pub fn xmm(index: usize) -> Register {
        Self::XMM[index & 0xF]
    }

    fn slot(self) -> Slot {
        use Register::*;
        let d = self as usize;
        let gpr = |base: usize, width: u8| Slot::Gpr {
            index: d - base,
            width,
            high_byte: false,
        };
        match self {
            RAX | RCX | RDX | RBX | RSP | RBP | RSI | RDI | R8 | R9 | R10 | R11 | R12 | R13
            | R14 | R15 => gpr(RAX as usize, 8),
            RIP => Slot::Rip,
            RFLAGS => Slot::Rflags,
            EAX | ECX | EDX | EBX | ESP | EBP | ESI | EDI | R8D | R9D | R10D | R11D | R12D
            | R13D | R14D | R15D => gpr(EAX as usize, 4),
            AX | CX | DX | BX | SP | BP | SI | DI | R8W | R9W | R10W | R11W | R12W | R13W
            | R14W | R15W => gpr(AX as usize, 2),
            AL | CL | DL | BL | SPL | BPL | SIL | DIL | R8B | R9B | R10B | R11B | R12B | R13B
            | R14B | R15B => gpr(AL as usize, 1),
            AH | CH | DH | BH => Slot::Gpr {
                index: d - AH as usize,
                width: 1,
                high_byte: true,
            },
            XMM0 | XMM1 | XMM2 | XMM3 | XMM4 | XMM5 | XMM6 | XMM7 | XMM8 | XMM9 | XMM10
            | XMM11 | XMM12 | XMM13 | XMM14 | XMM15 => Slot::Xmm(d - XMM0 as usize),
            MM0 | MM1 | MM2 | MM3 | MM4 | MM5 | MM6 | MM7 => Slot::Mm(d - MM0 as usize),
        }
    }

    pub fn parent_64(&self) -> Option<Register> {
        match self.slot() {
            Slot::Gpr { index, .. } => Some(Self::gpr64(index)),
            Slot::Rip => Some(Register::RIP),
            Slot::Rflags => Some(Register::RFLAGS),
            Slot::Xmm(_) | Slot::Mm(_) => None,
        }
    }

    pub fn is_xmm(&self) -> bool {
        matches!(self.slot(), Slot::Xmm(_))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u64 {
        const CF = 1 << 0;     // Carry Flag
        const PF = 1 << 2;     // Parity Flag
        const AF = 1 << 4;     // Auxiliary Carry Flag
        const ZF = 1 << 6;     // Zero Flag
        const SF = 1 << 7;     // Sign Flag
        const TF = 1 << 8;     // Trap Flag
        const IF = 1 << 9;     // Interrupt Enable Flag
        const DF = 1 << 10;    // Direction Flag
        const OF = 1 << 11;    // Overflow Flag
        const IOPL = 3 << 12;  // I/O Privilege Level
        const NT = 1 << 14;    // Nested Task
        const RF = 1 << 16;    // Resume Flag
        const VM = 1 << 17;    // Virtual-8086 Mode
        const AC = 1 << 18;    // Alignment Check
        const VIF = 1 << 19;   // Virtual Interrupt Flag
        const VIP = 1 << 20;   // Virtual Interrupt Pending
        const ID = 1 << 21;    // ID Flag

        const ARITHMETIC = Self::CF.bits() | Self::PF.bits() | Self::AF.bits()
            | Self::ZF.bits() | Self::SF.bits() | Self::OF.bits();
    }
}

bitflags! {
    /// SSE control/status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mxcsr: u32 {
        const IE = 1 << 0;     // Invalid Operation
        const DE = 1 << 1;     // Denormal
        const ZE = 1 << 2;     // Divide-by-Zero
        const OE = 1 << 3;     // Overflow
        const UE = 1 << 4;     // Underflow
        const PE = 1 << 5;     // Precision
        const DAZ = 1 << 6;    // Denormals Are Zeros
        const IM = 1 << 7;
        const DM = 1 << 8;
        const ZM = 1 << 9;
        const OM = 1 << 10;
        const UM = 1 << 11;
        const PM = 1 << 12;
        const RC = 3 << 13;    // Rounding Control
        const FZ = 1 << 15;    // Flush To Zero
    }
}

/// MXCSR.RC, in field encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Nearest = 0,
    Down = 1,
    Up = 2,
    Chop = 3,
}

impl Mxcsr {
    /// Power-on value: every exception masked, round to nearest.
    pub const DEFAULT: Mxcsr = Mxcsr::from_bits_truncate(0x1F80);

    pub fn rounding_mode(self) -> RoundingMode {
        match (self.bits() >> 13) & 3 {
            0 => RoundingMode::Nearest,
            1 => RoundingMode::Down,
            2 => RoundingMode::Up,
            _ => RoundingMode::Chop,
        }
    }

    pub fn with_rounding_mode(self, mode: RoundingMode) -> Mxcsr {
        let cleared = self.bits() & !Mxcsr::RC.bits();
        Mxcsr::from_bits_truncate(cleared | ((mode as u32) << 13))
    }
}

impl Default for Mxcsr {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuState {
    pub regs: [u64; 16],
    pub xmm_regs: [Xmm; 16],
    pub mm_regs: [u64; 8],
    pub rip: u64,
    pub rflags: Flags,
    pub lazy_flags: LazyFlags,
    pub mxcsr: Mxcsr,
    pub fs_base: u64,
    pub gs_base: u64,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    pub fn new() -> Self {
        Self {
            regs: [0; 16],
            xmm_regs: [Xmm::ZERO; 16],
            mm_regs: [0; 8],
            rip: 0,
            rflags: Flags::empty(),
            lazy_flags: LazyFlags::default(),
            mxcsr: Mxcsr::DEFAULT,
            fs_base: 0,
            gs_base: 0,
        }
    }

    pub fn read_reg(&self, reg: Register) -> u64 {
        match reg.slot() {
            Slot::Gpr {
                index,
                width,
                high_byte,
            } => {
                let full = self.regs[index];
                match (width, high_byte) {
                    (1, true) => (full >> 8) & 0xFF,
                    (1, false) => full & 0xFF,
                    (2, _) => full & 0xFFFF,
                    (4, _) => full & 0xFFFF_FFFF,
                    _ => full,
                }
            }
            Slot::Rip => self.rip,
            Slot::Rflags => self.flags().bits(),
            Slot::Mm(index) => self.mm_regs[index],
            Slot::Xmm(_) => panic!("Cannot read XMM register as u64, use read_xmm instead"),
        }
    }

    pub fn write_reg(&mut self, reg: Register, value: u64) {
        match reg.slot() {
            Slot::Gpr {
                index,
                width,
                high_byte,
            } => {
                let full = &mut self.regs[index];
                match (width, high_byte) {
                    (1, true) => *full = (*full & !0xFF00) | ((value & 0xFF) << 8),
                    (1, false) => *full = (*full & !0xFF) | (value & 0xFF),
                    (2, _) => *full = (*full & !0xFFFF) | (value & 0xFFFF),
                    // In x86-64, writing to a 32-bit register zeros the upper 32 bits
                    (4, _) => *full = value & 0xFFFF_FFFF,
                    _ => *full = value,
                }
            }
            Slot::Rip => self.rip = value,
            Slot::Rflags => {
                self.lazy_flags = LazyFlags::default();
                self.rflags = Flags::from_bits_truncate(value);
            }
            Slot::Mm(index) => self.mm_regs[index] = value,
            Slot::Xmm(_) => panic!("Cannot write XMM register with u64, use write_xmm instead"),
        }
    }

    pub fn read_xmm(&self, reg: Register) -> Xmm {
        match reg.slot() {
            Slot::Xmm(index) => self.xmm_regs[index],
            _ => panic!("Not an XMM register"),
        }
    }

    pub fn write_xmm(&mut self, reg: Register, value: Xmm) {
        match reg.slot() {
            Slot::Xmm(index) => self.xmm_regs[index] = value,
            _ => panic!("Not an XMM register"),
        }
    }

    /// RFLAGS as the guest would observe it, with any pending computation applied.
    pub fn flags(&self) -> Flags {
        self.lazy_flags.apply(self.rflags)
    }

    /// Folds the pending flag computation into `rflags` and clears it.
    pub fn materialize_flags(&mut self) -> Flags {
        if self.lazy_flags.is_pending() {
            self.rflags = self.lazy_flags.apply(self.rflags);
            self.lazy_flags = LazyFlags::default();
        }
        self.rflags
    }

    pub fn set_lazy_flags(&mut self, lazy: LazyFlags) {
        self.lazy_flags = lazy;
    }

    pub fn rounding_mode(&self) -> RoundingMode {
        self.mxcsr.rounding_mode()
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 8] = ["RAX", "RCX", "RDX", "RBX", "RSP", "RBP", "RSI", "RDI"];

        writeln!(f, "CPU State:")?;
        for (i, name) in NAMES.iter().enumerate() {
            writeln!(
                f,
                "  {name}: {:#018x}  R{:<3} {:#018x}",
                self.regs[i],
                format!("{}:", i + 8),
                self.regs[i + 8]
            )?;
        }
        writeln!(f, "  RIP: {:#018x}", self.rip)?;
        let flags = self.flags();
        writeln!(f, "  RFLAGS: {:#018x} {:?}", flags.bits(), flags)?;
        writeln!(
            f,
            "  MXCSR: {:#010x} ({:?})",
            self.mxcsr.bits(),
            self.rounding_mode()
        )?;
        for (i, xmm) in self.xmm_regs.iter().enumerate() {
            writeln!(f, "  XMM{:<2} {:#034x}", i, xmm.to_u128())?;
        }
        for (i, mm) in self.mm_regs.iter().enumerate() {
            writeln!(f, "  MM{i}: {mm:#018x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_register_writes() {
        let mut cpu = CpuState::new();
        cpu.write_reg(Register::RAX, 0x1122_3344_5566_7788);

        cpu.write_reg(Register::AH, 0xAB);
        assert_eq!(cpu.read_reg(Register::RAX), 0x1122_3344_5566_AB88);

        cpu.write_reg(Register::AX, 0xCDEF);
        assert_eq!(cpu.read_reg(Register::RAX), 0x1122_3344_5566_CDEF);

        cpu.write_reg(Register::EAX, 0xFFFF_0000_1234_5678);
        assert_eq!(cpu.read_reg(Register::RAX), 0x1234_5678);
    }

    #[test]
    fn register_encoding_order() {
        let mut cpu = CpuState::new();
        cpu.write_reg(Register::gpr64(3), 42);
        assert_eq!(cpu.read_reg(Register::RBX), 42);
        assert_eq!(cpu.read_reg(Register::BL), 42);
        assert_eq!(cpu.read_reg(Register::R11D), 0);

        cpu.write_reg(Register::R12B, 0x7F);
        assert_eq!(cpu.regs[12], 0x7F);
        assert_eq!(Register::R12B.parent_64(), Some(Register::R12));
        assert_eq!(Register::xmm(9), Register::XMM9);
    }

    #[test]
    fn rounding_mode_field() {
        let mut cpu = CpuState::new();
        assert_eq!(cpu.rounding_mode(), RoundingMode::Nearest);
        cpu.mxcsr = cpu.mxcsr.with_rounding_mode(RoundingMode::Up);
        assert_eq!(cpu.mxcsr.bits(), 0x5F80);
        assert_eq!(cpu.rounding_mode(), RoundingMode::Up);
        cpu.mxcsr = Mxcsr::from_bits_truncate(0x7F80);
        assert_eq!(cpu.rounding_mode(), RoundingMode::Chop);
    }

    #[test]
    fn display_lists_mmx_registers() {
        let mut cpu = CpuState::new();
        cpu.mm_regs[3] = 0xDEAD_BEEF_0123_4567;
        let text = cpu.to_string();
        assert!(text.contains("  MM3: 0xdeadbeef01234567\n"));
        assert!(text.contains("  MM0: 0x0000000000000000\n"));
        assert!(text.contains("  MM7: "));
    }

    #[test]
    fn rflags_write_discards_pending_flags() {
        let mut cpu = CpuState::new();
        cpu.set_lazy_flags(crate::flags::LazyFlags::sub(
            crate::flags::FlagSize::QWord,
            0,
            1,
        ));
        assert!(cpu.flags().contains(Flags::CF));
        cpu.write_reg(Register::RFLAGS, Flags::ZF.bits());
        assert_eq!(cpu.materialize_flags(), Flags::ZF);
    }
}
