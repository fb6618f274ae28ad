//! 128-bit vector register storage.
//!
//! Every typed view (bytes, words, dwords, qwords, singles, doubles) reads and
//! writes the same 16 little-endian bytes, so a store through one view is
//! visible through all others that cover the same bytes.

use std::fmt;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Xmm([u8; 16]);

macro_rules! lane_accessors {
    ($get:ident, $set:ident, $ty:ty, $width:expr) => {
        #[inline]
        pub fn $get(&self, lane: usize) -> $ty {
            let start = lane * $width;
            let mut buf = [0u8; $width];
            buf.copy_from_slice(&self.0[start..start + $width]);
            <$ty>::from_le_bytes(buf)
        }

        #[inline]
        pub fn $set(&mut self, lane: usize, value: $ty) {
            let start = lane * $width;
            self.0[start..start + $width].copy_from_slice(&value.to_le_bytes());
        }
    };
}

impl Xmm {
    pub const ZERO: Xmm = Xmm([0; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value.to_le_bytes())
    }

    pub fn to_u128(self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    /// Builds a register from two double lanes, low lane first.
    pub fn from_f64s(lo: f64, hi: f64) -> Self {
        let mut xmm = Self::ZERO;
        xmm.set_f64(0, lo);
        xmm.set_f64(1, hi);
        xmm
    }

    pub fn from_f32s(lanes: [f32; 4]) -> Self {
        let mut xmm = Self::ZERO;
        for (i, lane) in lanes.into_iter().enumerate() {
            xmm.set_f32(i, lane);
        }
        xmm
    }

    pub fn from_u64s(lo: u64, hi: u64) -> Self {
        let mut xmm = Self::ZERO;
        xmm.set_u64(0, lo);
        xmm.set_u64(1, hi);
        xmm
    }

    #[inline]
    pub fn u8(&self, lane: usize) -> u8 {
        self.0[lane]
    }

    #[inline]
    pub fn set_u8(&mut self, lane: usize, value: u8) {
        self.0[lane] = value;
    }

    lane_accessors!(u16, set_u16, u16, 2);
    lane_accessors!(u32, set_u32, u32, 4);
    lane_accessors!(i32, set_i32, i32, 4);
    lane_accessors!(u64, set_u64, u64, 8);

    #[inline]
    pub fn f32(&self, lane: usize) -> f32 {
        f32::from_bits(self.u32(lane))
    }

    #[inline]
    pub fn set_f32(&mut self, lane: usize, value: f32) {
        self.set_u32(lane, value.to_bits());
    }

    #[inline]
    pub fn f64(&self, lane: usize) -> f64 {
        f64::from_bits(self.u64(lane))
    }

    #[inline]
    pub fn set_f64(&mut self, lane: usize, value: f64) {
        self.set_u64(lane, value.to_bits());
    }
}

impl From<u128> for Xmm {
    fn from(value: u128) -> Self {
        Self::from_u128(value)
    }
}

impl From<Xmm> for u128 {
    fn from(value: Xmm) -> Self {
        value.to_u128()
    }
}

impl fmt::Debug for Xmm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xmm({:#034x})", self.to_u128())
    }
}
