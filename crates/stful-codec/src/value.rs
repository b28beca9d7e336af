//! Typed register values.

use serde::{Deserialize, Serialize};

use crate::WidthClass;

/// A register table value.
///
/// Single-width classes only use `lo`. Dual-width classes carry both halves.
/// Values are not masked on construction; the codec masks to the table's
/// width when packing into a row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterValue {
    pub lo: u64,
    #[serde(default)]
    pub hi: u64,
}

impl RegisterValue {
    pub const ZERO: Self = Self { lo: 0, hi: 0 };

    /// Single-width value.
    #[must_use]
    pub const fn new(lo: u64) -> Self {
        Self { lo, hi: 0 }
    }

    /// Dual-width value.
    #[must_use]
    pub const fn dual(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// One-bit value.
    #[must_use]
    pub const fn bit(set: bool) -> Self {
        Self::new(set as u64)
    }

    /// Truncate both halves to the widths used by `width`.
    #[must_use]
    pub const fn masked(self, width: WidthClass) -> Self {
        let mask = value_mask(width.value_bits());
        if width.is_dual() {
            Self {
                lo: self.lo & mask,
                hi: self.hi & mask,
            }
        } else {
            Self {
                lo: self.lo & mask,
                hi: 0,
            }
        }
    }

    /// Compare two values as seen through `width`.
    #[must_use]
    pub const fn same_as(self, other: Self, width: WidthClass) -> bool {
        let a = self.masked(width);
        let b = other.masked(width);
        a.lo == b.lo && a.hi == b.hi
    }

    /// Bit value for one-bit tables.
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.lo & 1 != 0
    }
}

impl From<u64> for RegisterValue {
    fn from(lo: u64) -> Self {
        Self::new(lo)
    }
}

const fn value_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_single() {
        let v = RegisterValue::dual(0x1ff, 7).masked(WidthClass::Bit8);
        assert_eq!(v, RegisterValue::new(0xff));
    }

    #[test]
    fn test_masked_dual() {
        let v = RegisterValue::dual(0x1_2345, 0xabcd_ef01).masked(WidthClass::Bit16x2);
        assert_eq!(v, RegisterValue::dual(0x2345, 0xef01));
    }

    #[test]
    fn test_same_as_ignores_unused_bits() {
        let a = RegisterValue::dual(3, 9);
        let b = RegisterValue::new(1);
        assert!(a.same_as(b, WidthClass::Bit1));
        assert!(!a.same_as(b, WidthClass::Bit8));
    }

    #[test]
    fn test_full_width_mask() {
        let v = RegisterValue::dual(u64::MAX, u64::MAX).masked(WidthClass::Bit64x2);
        assert_eq!(v.lo, u64::MAX);
        assert_eq!(v.hi, u64::MAX);
    }
}
