//! Register parameters: named ALU constants shared by every stage of a table.

use stful_codec::{Instruction, WidthClass, salu_const_addr};
use tracing::debug;

use crate::io::DeviceIo;
use crate::transport::Transport;
use crate::{ChipFamily, ParamHandle, PipeTarget, RegisterParamSpec, Result, StatefulTable, StfulError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RegisterParam {
    pub(crate) handle: ParamHandle,
    pub(crate) name: String,
    pub(crate) slot: u8,
    pub(crate) default: i64,
    /// Last value written, per physical pipe.
    pub(crate) values: Vec<i64>,
}

impl RegisterParam {
    pub(crate) fn from_spec(spec: &RegisterParamSpec, num_pipes: u8) -> Self {
        Self {
            handle: spec.handle,
            name: spec.name.clone(),
            slot: spec.slot,
            default: spec.default,
            values: vec![spec.default; usize::from(num_pipes)],
        }
    }
}

/// Sign-extend the low `bits` of a register readback.
const fn sign_extend(raw: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Register writes that load `value` into one ALU's constant slot.
fn const_writes(family: ChipFamily, stage: u8, alu: u8, slot: u8, value: i64) -> Vec<Instruction> {
    let low = Instruction::SetRegister {
        addr: salu_const_addr(stage, alu, slot, false),
        value: value as u32,
    };
    if !family.splits_const() {
        return vec![low];
    }
    vec![
        low,
        Instruction::SetRegister {
            addr: salu_const_addr(stage, alu, slot, true),
            value: ((value >> 32) & 0x3) as u32,
        },
    ]
}

impl StatefulTable {
    fn param_index(&self, param: ParamHandle) -> Result<usize> {
        if self.width == WidthClass::Bit1 {
            return Err(StfulError::invalid(format!(
                "one-bit table {} has no register parameters",
                self.handle
            )));
        }
        self.params
            .iter()
            .position(|p| p.handle == param)
            .ok_or(StfulError::ParamNotFound {
                handle: self.handle,
                param,
            })
    }

    /// Write a register parameter on every ALU of every stage over the pipes
    /// `target` resolves to. `reset` writes the parameter's default instead.
    pub(crate) fn param_set<T: Transport>(
        &mut self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        param: ParamHandle,
        value: i64,
        reset: bool,
    ) -> Result<()> {
        let idx = self.param_index(param)?;
        let family = io.dev.family;
        let (min, max) = family
            .param_range(self.width)
            .ok_or_else(|| StfulError::invalid("table width has no register file"))?;
        let value = if reset { self.params[idx].default } else { value };
        if value < min || value > max {
            return Err(StfulError::invalid(format!(
                "value {value} for parameter {} outside [{min}, {max}]",
                self.params[idx].name
            )));
        }
        let scope = self.resolve_write(target)?;
        let pipes = self.scope_pipes(scope);
        let slot = self.params[idx].slot;
        debug!(dev = self.dev, tbl = %self.handle, %param, value, ?pipes, "set register parameter");

        for stage in &self.stages {
            let split = family.splits_const();
            if split {
                io.write(pipes, stage.stage_id, &Instruction::AtomicMod { begin: true })?;
            }
            for &alu in &stage.alu_ids {
                for instr in const_writes(family, stage.stage_id, alu, slot, value) {
                    io.write(pipes, stage.stage_id, &instr)?;
                }
            }
            if split {
                io.write(pipes, stage.stage_id, &Instruction::AtomicMod { begin: false })?;
            }
        }

        let cached = &mut self.params[idx].values;
        for pipe in pipes.iter() {
            if let Some(slot) = cached.get_mut(usize::from(pipe)) {
                *slot = value;
            }
        }
        Ok(())
    }

    /// Read a register parameter. Every pipe in the target must agree.
    pub(crate) fn param_get<T: Transport>(
        &self,
        io: &mut DeviceIo<'_, T>,
        target: PipeTarget,
        param: ParamHandle,
    ) -> Result<i64> {
        let idx = self.param_index(param)?;
        let pipes = self.resolve_read(target)?;
        let family = io.dev.family;
        let slot = self.params[idx].slot;
        let stage = &self.stages[0];
        let alu = stage.alu_ids.first().copied().ok_or_else(|| {
            StfulError::invalid(format!(
                "stage {} of table {} has no stateful ALU",
                stage.stage_id, self.handle
            ))
        })?;

        let mut agreed: Option<i64> = None;
        for pipe in pipes.iter() {
            let value = if io.is_virtual() {
                self.params[idx].values[usize::from(pipe)]
            } else {
                let low = io.read_register(pipe, salu_const_addr(stage.stage_id, alu, slot, false))?;
                let raw = if family.splits_const() {
                    let high =
                        io.read_register(pipe, salu_const_addr(stage.stage_id, alu, slot, true))?;
                    (u64::from(high & 0x3) << 32) | u64::from(low)
                } else {
                    u64::from(low)
                };
                sign_extend(raw, family.const_bits())
            };
            match agreed {
                None => agreed = Some(value),
                Some(prev) if prev != value => {
                    return Err(StfulError::invalid(format!(
                        "parameter {} differs between pipes: {prev} and {value} on pipe {pipe}",
                        self.params[idx].name
                    )));
                }
                Some(_) => {}
            }
        }
        agreed.ok_or_else(|| StfulError::invalid("no pipes to read the parameter from"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x3_ffff_ffff, 34), -1);
        assert_eq!(sign_extend(0x1_0000_0000, 34), 1 << 32);
        assert_eq!(sign_extend(0x2_0000_0000, 34), -(1 << 33));
        assert_eq!(sign_extend(0xffff_ffff, 32), -1);
        assert_eq!(sign_extend(0x7fff_ffff, 32), i64::from(i32::MAX));
    }

    #[test]
    fn test_split_const_writes() {
        let writes = const_writes(ChipFamily::Tofino2, 3, 1, 2, -2);
        assert_eq!(
            writes,
            vec![
                Instruction::SetRegister {
                    addr: salu_const_addr(3, 1, 2, false),
                    value: 0xffff_fffe
                },
                Instruction::SetRegister {
                    addr: salu_const_addr(3, 1, 2, true),
                    value: 0x3
                },
            ]
        );
        assert_eq!(const_writes(ChipFamily::Tofino, 3, 1, 2, 5).len(), 1);
    }
}
