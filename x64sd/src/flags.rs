//! Deferred flag computation and the 16 condition-code predicates.

use crate::cpu::Flags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagSize {
    Byte,
    Word,
    DWord,
    QWord,
}

impl FlagSize {
    pub const fn bits(self) -> u32 {
        match self {
            FlagSize::Byte => 8,
            FlagSize::Word => 16,
            FlagSize::DWord => 32,
            FlagSize::QWord => 64,
        }
    }

    pub const fn mask(self) -> u64 {
        match self {
            FlagSize::QWord => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    pub const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }
}

/// The last flag-producing integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagOp {
    #[default]
    None,
    Add,
    Sub,
    Logic,
    Inc,
    Dec,
}

/// A pending RFLAGS update recorded by an integer handler and only folded
/// into [`Flags`] when something actually reads the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyFlags {
    pub op: FlagOp,
    pub size: FlagSize,
    pub op1: u64,
    pub op2: u64,
    pub result: u64,
}

impl Default for LazyFlags {
    fn default() -> Self {
        Self {
            op: FlagOp::None,
            size: FlagSize::QWord,
            op1: 0,
            op2: 0,
            result: 0,
        }
    }
}

impl LazyFlags {
    fn record(op: FlagOp, size: FlagSize, op1: u64, op2: u64, result: u64) -> Self {
        let mask = size.mask();
        Self {
            op,
            size,
            op1: op1 & mask,
            op2: op2 & mask,
            result: result & mask,
        }
    }

    pub fn add(size: FlagSize, op1: u64, op2: u64) -> Self {
        Self::record(FlagOp::Add, size, op1, op2, op1.wrapping_add(op2))
    }

    pub fn sub(size: FlagSize, op1: u64, op2: u64) -> Self {
        Self::record(FlagOp::Sub, size, op1, op2, op1.wrapping_sub(op2))
    }

    pub fn logic(size: FlagSize, result: u64) -> Self {
        Self::record(FlagOp::Logic, size, 0, 0, result)
    }

    pub fn inc(size: FlagSize, op1: u64) -> Self {
        Self::record(FlagOp::Inc, size, op1, 1, op1.wrapping_add(1))
    }

    pub fn dec(size: FlagSize, op1: u64) -> Self {
        Self::record(FlagOp::Dec, size, op1, 1, op1.wrapping_sub(1))
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.op != FlagOp::None
    }

    fn cf(&self) -> bool {
        match self.op {
            FlagOp::Add => self.result < self.op1,
            FlagOp::Sub => self.op1 < self.op2,
            FlagOp::Logic | FlagOp::Inc | FlagOp::Dec | FlagOp::None => false,
        }
    }

    fn of(&self) -> bool {
        let sign = self.size.sign_bit();
        let (a, b, r) = (self.op1, self.op2, self.result);
        match self.op {
            FlagOp::Add | FlagOp::Inc => ((a ^ r) & (b ^ r) & sign) != 0,
            FlagOp::Sub | FlagOp::Dec => ((a ^ b) & (a ^ r) & sign) != 0,
            FlagOp::Logic | FlagOp::None => false,
        }
    }

    fn af(&self) -> bool {
        match self.op {
            FlagOp::Logic | FlagOp::None => false,
            _ => ((self.op1 ^ self.op2 ^ self.result) & 0x10) != 0,
        }
    }

    /// Folds this computation into `flags`. INC and DEC leave CF as it was.
    pub fn apply(&self, flags: Flags) -> Flags {
        if !self.is_pending() {
            return flags;
        }

        let mut out = flags;
        out.remove(Flags::ARITHMETIC);
        let carry = match self.op {
            FlagOp::Inc | FlagOp::Dec => flags.contains(Flags::CF),
            _ => self.cf(),
        };
        out.set(Flags::CF, carry);
        out.set(Flags::PF, (self.result as u8).count_ones() % 2 == 0);
        out.set(Flags::AF, self.af());
        out.set(Flags::ZF, self.result == 0);
        out.set(Flags::SF, self.result & self.size.sign_bit() != 0);
        out.set(Flags::OF, self.of());
        out
    }
}

/// Condition codes in their 4-bit encoding order (the low nibble of
/// Jcc/SETcc/CMOVcc opcodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    O = 0x0,
    NO = 0x1,
    B = 0x2,
    AE = 0x3,
    E = 0x4,
    NE = 0x5,
    BE = 0x6,
    A = 0x7,
    S = 0x8,
    NS = 0x9,
    P = 0xA,
    NP = 0xB,
    L = 0xC,
    GE = 0xD,
    LE = 0xE,
    G = 0xF,
}

impl Condition {
    pub fn from_code(code: u8) -> Self {
        use Condition::*;
        match code & 0x0F {
            0x0 => O,
            0x1 => NO,
            0x2 => B,
            0x3 => AE,
            0x4 => E,
            0x5 => NE,
            0x6 => BE,
            0x7 => A,
            0x8 => S,
            0x9 => NS,
            0xA => P,
            0xB => NP,
            0xC => L,
            0xD => GE,
            0xE => LE,
            _ => G,
        }
    }

    pub fn evaluate(self, flags: Flags) -> bool {
        let cf = flags.contains(Flags::CF);
        let zf = flags.contains(Flags::ZF);
        let sf = flags.contains(Flags::SF);
        let of = flags.contains(Flags::OF);
        let pf = flags.contains(Flags::PF);

        match self {
            Condition::O => of,
            Condition::NO => !of,
            Condition::B => cf,
            Condition::AE => !cf,
            Condition::E => zf,
            Condition::NE => !zf,
            Condition::BE => cf || zf,
            Condition::A => !cf && !zf,
            Condition::S => sf,
            Condition::NS => !sf,
            Condition::P => pf,
            Condition::NP => !pf,
            Condition::L => sf != of,
            Condition::GE => sf == of,
            Condition::LE => zf || sf != of,
            Condition::G => !zf && sf == of,
        }
    }
}
