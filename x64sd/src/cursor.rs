use crate::error::{EmulatorError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RexPrefix {
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
}

impl RexPrefix {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            w: byte & 0x08 != 0,
            r: byte & 0x04 != 0,
            x: byte & 0x02 != 0,
            b: byte & 0x01 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOverride {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepPrefix {
    /// F3
    Rep,
    /// F2
    RepNe,
}

/// Legacy and REX prefixes seen before the opcode. Fixed for the duration of
/// one instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefixes {
    pub rex: Option<RexPrefix>,
    pub operand_size_override: bool,
    pub address_size_override: bool,
    pub segment: Option<SegmentOverride>,
    pub rep: Option<RepPrefix>,
    pub lock: bool,
}

impl Prefixes {
    /// REX.W: 64-bit operand size.
    pub fn rex_w(&self) -> bool {
        self.rex.is_some_and(|r| r.w)
    }

    pub fn rex_r(&self) -> bool {
        self.rex.is_some_and(|r| r.r)
    }

    pub fn rex_x(&self) -> bool {
        self.rex.is_some_and(|r| r.x)
    }

    pub fn rex_b(&self) -> bool {
        self.rex.is_some_and(|r| r.b)
    }
}

/// Saved cursor position, see [`InstructionCursor::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Reads an instruction byte by byte out of a fetched code window.
#[derive(Debug, Clone)]
pub struct InstructionCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: u64,
    pub prefixes: Prefixes,
}

impl<'a> InstructionCursor<'a> {
    /// `base` is the guest address of `bytes[0]`.
    pub fn new(bytes: &'a [u8], base: u64) -> Self {
        Self {
            bytes,
            pos: 0,
            base,
            prefixes: Prefixes::default(),
        }
    }

    pub fn with_prefixes(mut self, prefixes: Prefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Guest address of the next unread byte.
    pub fn address(&self) -> u64 {
        self.base.wrapping_add(self.pos as u64)
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.pos)
    }

    pub fn rewind(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.0;
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(EmulatorError::TruncatedInstruction(self.address()))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn fetch_u8(&mut self) -> Result<u8> {
        self.take::<1>().map(|b| b[0])
    }

    pub fn fetch_i8(&mut self) -> Result<i8> {
        self.fetch_u8().map(|b| b as i8)
    }

    pub fn fetch_u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }

    pub fn fetch_u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn fetch_i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_le_bytes)
    }
}
