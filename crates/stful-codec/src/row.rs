//! Packing values into 128-bit hardware rows.
//!
//! Entry `i` of a class with `w` bits per entry occupies row bits
//! `[i*w, (i+1)*w)`, bytes little-endian. Dual classes put `lo` in the lower
//! half of that range and `hi` in the upper half.

use crate::{RegisterValue, WidthClass};

/// Bytes in one hardware row.
pub const ROW_BYTES: usize = 16;

/// One hardware row.
pub type Row = [u8; ROW_BYTES];

fn entry_bits(width: WidthClass, value: RegisterValue) -> u128 {
    let v = value.masked(width);
    if width.is_dual() {
        u128::from(v.lo) | (u128::from(v.hi) << width.value_bits())
    } else {
        u128::from(v.lo)
    }
}

fn field_mask(width: WidthClass) -> u128 {
    if width.bits() == 128 {
        u128::MAX
    } else {
        (1u128 << width.bits()) - 1
    }
}

fn checked_offset(width: WidthClass, subword: u32) -> u32 {
    debug_assert!(
        subword < width.entries_per_row(),
        "subword {subword} out of range for {width}-bit entries"
    );
    (subword % width.entries_per_row()) * width.bits()
}

/// Pack `value` into `row` at `subword`, leaving the other entries untouched.
///
/// When `mask` is given, the bytes covering the entry are set to `0xff` so the
/// row can be used as a partial hardware write.
pub fn encode(
    width: WidthClass,
    subword: u32,
    value: RegisterValue,
    row: &mut Row,
    mask: Option<&mut Row>,
) {
    let offset = checked_offset(width, subword);
    let field = field_mask(width) << offset;
    let bits = (entry_bits(width, value) << offset) & field;
    let current = u128::from_le_bytes(*row);
    *row = ((current & !field) | bits).to_le_bytes();

    if let Some(mask) = mask {
        let first = (offset / 8) as usize;
        let last = ((offset + width.bits() - 1) / 8) as usize;
        for byte in &mut mask[first..=last] {
            *byte = 0xff;
        }
    }
}

/// Extract the entry at `subword` from `row`.
#[must_use]
pub fn decode(width: WidthClass, subword: u32, row: &Row) -> RegisterValue {
    let offset = checked_offset(width, subword);
    let bits = (u128::from_le_bytes(*row) >> offset) & field_mask(width);
    if width.is_dual() {
        let half = width.value_bits();
        let half_mask = (1u128 << half) - 1;
        RegisterValue::dual((bits & half_mask) as u64, ((bits >> half) & half_mask) as u64)
    } else {
        RegisterValue::new(bits as u64)
    }
}

/// Fill every entry of `row` with `value`.
pub fn encode_row(width: WidthClass, value: RegisterValue, row: &mut Row) {
    let entry = entry_bits(width, value);
    let mut packed = 0u128;
    for subword in 0..width.entries_per_row() {
        packed |= entry << (subword * width.bits());
    }
    *row = packed.to_le_bytes();
}

/// Row with every entry set to `value`.
#[must_use]
pub fn replicated_row(width: WidthClass, value: RegisterValue) -> Row {
    let mut row = [0u8; ROW_BYTES];
    encode_row(width, value, &mut row);
    row
}

/// Byte mask covering one entry.
#[must_use]
pub fn entry_mask(width: WidthClass, subword: u32) -> Row {
    let mut row = [0u8; ROW_BYTES];
    let mut mask = [0u8; ROW_BYTES];
    encode(width, subword, RegisterValue::ZERO, &mut row, Some(&mut mask));
    mask
}
