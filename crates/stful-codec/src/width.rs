//! Width classes of a register table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bits in one hardware SRAM row.
pub const ROW_BITS: u32 = 128;

/// Entry width of a register table.
///
/// Single classes hold one value per entry; the `x2` classes hold a
/// `(lo, hi)` pair, each half as wide as the single class of the same name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidthClass {
    Bit1,
    Bit8,
    Bit8x2,
    Bit16,
    Bit16x2,
    Bit32,
    Bit32x2,
    Bit64,
    Bit64x2,
}

impl WidthClass {
    /// Every width class, narrowest first.
    pub const ALL: [Self; 9] = [
        Self::Bit1,
        Self::Bit8,
        Self::Bit8x2,
        Self::Bit16,
        Self::Bit16x2,
        Self::Bit32,
        Self::Bit32x2,
        Self::Bit64,
        Self::Bit64x2,
    ];

    /// Build a width class from the per-half width and the dual flag.
    #[must_use]
    pub const fn from_parts(bits: u32, dual: bool) -> Option<Self> {
        match (bits, dual) {
            (1, false) => Some(Self::Bit1),
            (8, false) => Some(Self::Bit8),
            (8, true) => Some(Self::Bit8x2),
            (16, false) => Some(Self::Bit16),
            (16, true) => Some(Self::Bit16x2),
            (32, false) => Some(Self::Bit32),
            (32, true) => Some(Self::Bit32x2),
            (64, false) => Some(Self::Bit64),
            (64, true) => Some(Self::Bit64x2),
            _ => None,
        }
    }

    /// Total bits one entry occupies in a row.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bit1 => 1,
            Self::Bit8 => 8,
            Self::Bit8x2 | Self::Bit16 => 16,
            Self::Bit16x2 | Self::Bit32 => 32,
            Self::Bit32x2 | Self::Bit64 => 64,
            Self::Bit64x2 => 128,
        }
    }

    /// Width of a single value (one half of a dual entry).
    #[must_use]
    pub const fn value_bits(self) -> u32 {
        if self.is_dual() {
            self.bits() / 2
        } else {
            self.bits()
        }
    }

    #[must_use]
    pub const fn is_dual(self) -> bool {
        matches!(
            self,
            Self::Bit8x2 | Self::Bit16x2 | Self::Bit32x2 | Self::Bit64x2
        )
    }

    /// Number of entries packed into one 128-bit row.
    #[must_use]
    pub const fn entries_per_row(self) -> u32 {
        ROW_BITS / self.bits()
    }

    /// Left shift that aligns a subword to the 7-bit subword field of a
    /// stateful address (log2 of the entry width).
    #[must_use]
    pub const fn subword_shift(self) -> u32 {
        self.bits().trailing_zeros()
    }

    /// Bits of the subword field actually used by this class.
    #[must_use]
    pub const fn subword_bits(self) -> u32 {
        7 - self.subword_shift()
    }

    /// Whether the class needs a 64-bit capable ALU.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Bit64 | Self::Bit64x2)
    }
}

impl fmt::Display for WidthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dual() {
            write!(f, "{}x2", self.value_bits())
        } else {
            write!(f, "{}", self.value_bits())
        }
    }
}
