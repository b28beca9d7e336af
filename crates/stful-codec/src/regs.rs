//! Per-stage register addresses used by the stateful ALUs.

/// Base of the ALU constant register file.
pub const SALU_CONST_BASE: u32 = 0x0200_0000;
/// Base of the FIFO occupancy counters.
pub const FIFO_COUNTER_BASE: u32 = 0x0300_0000;
/// Register-file slots per ALU.
pub const SALU_CONST_SLOTS: u8 = 4;
/// ALUs per stage.
pub const SALUS_PER_STAGE: u8 = 4;
/// FIFO counters per stage.
pub const FIFO_COUNTERS_PER_STAGE: u8 = 4;

/// Address of one ALU constant register.
///
/// Families that keep 34-bit constants store bits `[33:32]` in a second
/// register selected by `high`.
#[must_use]
pub const fn salu_const_addr(stage: u8, alu: u8, slot: u8, high: bool) -> u32 {
    SALU_CONST_BASE
        | ((stage as u32) << 16)
        | ((alu as u32) << 8)
        | ((slot as u32) << 3)
        | ((high as u32) << 2)
}

/// Address of a FIFO occupancy counter.
#[must_use]
pub const fn fifo_counter_addr(stage: u8, counter: u8) -> u32 {
    FIFO_COUNTER_BASE | ((stage as u32) << 16) | ((counter as u32) << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_addrs_distinct() {
        let mut seen = std::collections::HashSet::new();
        for alu in 0..SALUS_PER_STAGE {
            for slot in 0..SALU_CONST_SLOTS {
                assert!(seen.insert(salu_const_addr(3, alu, slot, false)));
                assert!(seen.insert(salu_const_addr(3, alu, slot, true)));
            }
        }
        assert!(!seen.contains(&fifo_counter_addr(3, 0)));
    }
}
