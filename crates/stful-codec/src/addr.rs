//! Address algebra.
//!
//! A stateful address has the shape
//!
//! ```text
//!  31..24   23    22..17   16..7    6..0
//! [instr ][pfe ][  ram  ][ line  ][subword << shift]
//! ```
//!
//! where `ram` is a RAM selector (logical) or a VPN (virtual), `line` is the
//! 10-bit row within a RAM and the subword field holds the entry offset inside
//! the 128-bit row, left-aligned by the width class's shift. With this layout
//! the low 23 bits of a logical address are simply `index << shift`.

use serde::{Deserialize, Serialize};

use crate::WidthClass;

/// Bits of a RAM line number.
pub const RAM_LINE_BITS: u32 = 10;
/// Rows in one SRAM unit.
pub const RAM_LINES: u32 = 1 << RAM_LINE_BITS;
/// Width of the subword field.
pub const SUBWORD_FIELD_BITS: u32 = 7;
/// Position of the line field.
pub const LINE_SHIFT: u32 = SUBWORD_FIELD_BITS;
/// Position of the RAM / VPN field.
pub const RAM_SHIFT: u32 = LINE_SHIFT + RAM_LINE_BITS;
/// Bits of a VPN.
pub const VPN_BITS: u32 = 6;
/// Largest VPN a stage may assign.
pub const MAX_VPN: u32 = (1 << VPN_BITS) - 1;
/// Per-flow-enable ("present") bit of an ALU pointer.
pub const PRESENT_BIT: u32 = RAM_SHIFT + VPN_BITS;
/// Position of the ALU instruction selector in an ALU pointer.
pub const INSTR_SHIFT: u32 = PRESENT_BIT + 1;
/// Largest ALU instruction selector.
pub const MAX_SALU_INSTR: u8 = 0x3;

const ADDR_MASK: u32 = (1 << PRESENT_BIT) - 1;

/// A logical index split into its row coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexParts {
    /// RAM selector (position in the stage's RAM list).
    pub ram: u32,
    /// Line within the RAM.
    pub line: u32,
    /// Entry offset within the row.
    pub subword: u32,
    /// Shift applied to the subword inside the subword field.
    pub shift: u32,
}

impl IndexParts {
    /// Reassemble the logical address (`ram<<17 | line<<7 | subword<<shift`).
    #[must_use]
    pub const fn address(&self) -> u64 {
        ((self.ram as u64) << RAM_SHIFT)
            | ((self.line as u64) << LINE_SHIFT)
            | ((self.subword as u64) << self.shift)
    }

    /// Row number counted from the start of the stage
    /// (`ram * RAM_LINES + line`).
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.ram * RAM_LINES + self.line
    }
}

/// Split a stage-local index into RAM, line and subword.
#[must_use]
pub const fn decompose_index(width: WidthClass, index: u32) -> IndexParts {
    let shift = width.subword_shift();
    let addr = (index as u64) << shift;
    IndexParts {
        ram: (addr >> RAM_SHIFT) as u32,
        line: ((addr >> LINE_SHIFT) as u32) & (RAM_LINES - 1),
        subword: ((addr as u32) & ((1 << SUBWORD_FIELD_BITS) - 1)) >> shift,
        shift,
    }
}

/// Inverse of [`decompose_index`].
#[must_use]
pub const fn compose_index(width: WidthClass, ram: u32, line: u32, subword: u32) -> u32 {
    let per_row = width.entries_per_row();
    (ram * RAM_LINES + line) * per_row + subword
}

/// CPU row address of one RAM row (`vpn<<10 | line`).
#[must_use]
pub const fn row_addr(vpn: u32, line: u32) -> u32 {
    (vpn << RAM_LINE_BITS) | (line & (RAM_LINES - 1))
}

/// Split a CPU row address back into `(vpn, line)`.
#[must_use]
pub const fn split_row_addr(addr: u32) -> (u32, u32) {
    (addr >> RAM_LINE_BITS, addr & (RAM_LINES - 1))
}

/// A decoded virtual stateful address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtAddr {
    pub vpn: u32,
    pub line: u32,
    pub subword: u32,
    pub present: bool,
}

/// Build the virtual address of one entry.
#[must_use]
pub const fn compose_virt_addr(width: WidthClass, vpn: u32, line: u32, subword: u32) -> u32 {
    debug_assert!(vpn <= MAX_VPN);
    debug_assert!(line < RAM_LINES);
    debug_assert!(subword < width.entries_per_row());
    ((vpn & MAX_VPN) << RAM_SHIFT)
        | ((line & (RAM_LINES - 1)) << LINE_SHIFT)
        | ((subword << width.subword_shift()) & ((1 << SUBWORD_FIELD_BITS) - 1))
}

/// Inverse of [`compose_virt_addr`], also reporting the present bit.
#[must_use]
pub const fn decompose_virt_addr(width: WidthClass, addr: u32) -> VirtAddr {
    let shift = width.subword_shift();
    VirtAddr {
        vpn: (addr >> RAM_SHIFT) & MAX_VPN,
        line: (addr >> LINE_SHIFT) & (RAM_LINES - 1),
        subword: (addr & ((1 << SUBWORD_FIELD_BITS) - 1)) >> shift,
        present: addr & (1 << PRESENT_BIT) != 0,
    }
}

/// Pointer an action/match table stores to reference one stateful entry.
#[must_use]
pub const fn indirect_ptr(width: WidthClass, vpn: u32, line: u32, subword: u32, instr: u8) -> u32 {
    debug_assert!(instr <= MAX_SALU_INSTR);
    (((instr & MAX_SALU_INSTR) as u32) << INSTR_SHIFT)
        | (1 << PRESENT_BIT)
        | (compose_virt_addr(width, vpn, line, subword) & ADDR_MASK)
}

/// Address of a CPU virtual-memory block access: one row of one logical table
/// in one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmemAddr {
    pub stage: u8,
    pub log_tbl: u8,
    pub row: u32,
}

impl VmemAddr {
    #[must_use]
    pub const fn new(stage: u8, log_tbl: u8, row: u32) -> Self {
        Self { stage, log_tbl, row }
    }

    /// Packed form `stage<<24 | log_tbl<<16 | row`.
    #[must_use]
    pub const fn pack(self) -> u64 {
        ((self.stage as u64) << 24) | ((self.log_tbl as u64) << 16) | (self.row as u64 & 0xffff)
    }

    #[must_use]
    pub const fn unpack(packed: u64) -> Self {
        Self {
            stage: (packed >> 24) as u8,
            log_tbl: (packed >> 16) as u8,
            row: (packed & 0xffff) as u32,
        }
    }

    /// Address of the row `count` lines further on.
    #[must_use]
    pub const fn offset(self, count: u32) -> Self {
        Self {
            stage: self.stage,
            log_tbl: self.log_tbl,
            row: self.row + count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_reassembles_shifted_index() {
        for width in WidthClass::ALL {
            for index in [0u32, 1, 7, 127, 128, 1023, 1024, 4095, 131_071, 200_000] {
                let parts = decompose_index(width, index);
                assert_eq!(parts.address(), u64::from(index) << parts.shift, "{width} {index}");
                assert!(parts.line < RAM_LINES);
                assert!(parts.subword < width.entries_per_row());
                assert_eq!(
                    compose_index(width, parts.ram, parts.line, parts.subword),
                    index
                );
            }
        }
    }

    #[test]
    fn test_decompose_16bit_example() {
        // 8 entries per row, so index 1025 is row 128 subword 1
        let parts = decompose_index(WidthClass::Bit16, 1025);
        assert_eq!(parts.ram, 0);
        assert_eq!(parts.line, 128);
        assert_eq!(parts.subword, 1);
        assert_eq!(parts.shift, 4);
        assert_eq!(parts.row(), 128);
    }

    #[test]
    fn test_ram_boundary() {
        // One RAM of 1-bit entries holds 128K entries
        let parts = decompose_index(WidthClass::Bit1, 128 * 1024);
        assert_eq!((parts.ram, parts.line, parts.subword), (1, 0, 0));
        let parts = decompose_index(WidthClass::Bit64x2, 1024);
        assert_eq!((parts.ram, parts.line, parts.subword), (1, 0, 0));
    }

    #[test]
    fn test_virt_addr_inverse() {
        for width in WidthClass::ALL {
            let sub = width.entries_per_row() - 1;
            let addr = compose_virt_addr(width, 37, 999, sub);
            let decoded = decompose_virt_addr(width, addr);
            assert_eq!(
                decoded,
                VirtAddr {
                    vpn: 37,
                    line: 999,
                    subword: sub,
                    present: false
                }
            );
        }
    }

    #[test]
    fn test_indirect_ptr_sets_present_and_instr() {
        let ptr = indirect_ptr(WidthClass::Bit32, 5, 12, 3, 2);
        assert_eq!(ptr >> INSTR_SHIFT, 2);
        let decoded = decompose_virt_addr(WidthClass::Bit32, ptr);
        assert!(decoded.present);
        assert_eq!((decoded.vpn, decoded.line, decoded.subword), (5, 12, 3));
    }

    #[test]
    fn test_row_addr_split() {
        let addr = row_addr(63, 1023);
        assert_eq!(split_row_addr(addr), (63, 1023));
        assert_eq!(row_addr(1, 0), 1024);
    }

    #[test]
    fn test_vmem_pack() {
        let addr = VmemAddr::new(11, 3, row_addr(4, 17));
        assert_eq!(VmemAddr::unpack(addr.pack()), addr);
        assert_eq!(addr.offset(2).row, row_addr(4, 19));
    }
}
