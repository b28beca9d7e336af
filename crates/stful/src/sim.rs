//! In-memory ASIC model implementing [`Transport`].
//!
//! [`SimAsic`] keeps the stateful RAM rows and registers of every pipe and
//! applies instructions the way the hardware would: masked row writes, block
//! writes, one-bit ALU programs and FIFO counter updates. Reads are queued
//! per device and completed in push order. Data-plane activity is modeled by
//! poking rows and registers directly.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use stful_codec::{
    FifoOp, Instruction, ROW_BYTES, Row, VmemAddr, WidthClass, decompose_virt_addr,
    fifo_counter_addr, row_addr,
};
use tracing::trace;

use crate::transport::{ReadCompletion, ReadCookie, Transport};
use crate::{DevId, PipeBitmap, TableSpec, TransportError};

/// What a one-bit ALU instruction does to its bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaluProgram {
    SetBit,
    ClearBit,
}

/// One accepted write, as logged by the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimWrite {
    Instr {
        dev: DevId,
        pipes: PipeBitmap,
        stage: u8,
        instr: Instruction,
    },
    Block {
        dev: DevId,
        pipes: PipeBitmap,
        addr: VmemAddr,
        rows: usize,
    },
}

type RamKey = (DevId, u8, u8, u8, u32);

#[derive(Debug)]
struct QueuedRead {
    pipe: u8,
    stage: u8,
    log_tbl: u8,
    addr: u32,
}

/// The modeled device state.
#[derive(Debug, Default)]
pub struct SimAsic {
    /// Rows keyed by `(dev, pipe, stage, log_tbl, row address)`.
    rams: FxHashMap<RamKey, Row>,
    registers: FxHashMap<(DevId, u8, u32), u32>,
    programs: FxHashMap<(DevId, u8, u8, u8), SaluProgram>,
    queued: FxHashMap<DevId, Vec<QueuedRead>>,
    pushed: FxHashMap<DevId, Vec<ReadCompletion>>,
    fifo_counters: FxHashMap<(DevId, u8), u8>,
    log: Vec<SimWrite>,
    fail_next: Option<TransportError>,
}

impl SimAsic {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the one-bit ALU programs and FIFO counter of a table so the
    /// model can execute its instructions.
    pub fn load_programs(&mut self, dev: DevId, spec: &TableSpec) {
        if spec.width == WidthClass::Bit1 {
            for stage in &spec.stages {
                self.programs.insert(
                    (dev, stage.stage_id, stage.log_tbl, stage.set_bit_instr),
                    SaluProgram::SetBit,
                );
                self.programs.insert(
                    (dev, stage.stage_id, stage.log_tbl, stage.clr_bit_instr),
                    SaluProgram::ClearBit,
                );
            }
        }
        if let (Some(fifo), Some(first)) = (spec.fifo, spec.stages.first()) {
            self.fifo_counters.insert((dev, first.stage_id), fifo.counter);
        }
    }

    /// Make the next transport call fail with `err`.
    pub fn inject_failure(&mut self, err: TransportError) {
        self.fail_next = Some(err);
    }

    fn check_failure(&mut self) -> Result<(), TransportError> {
        self.fail_next.take().map_or(Ok(()), Err)
    }

    /// Row contents, zero if never written.
    #[must_use]
    pub fn row(&self, dev: DevId, pipe: u8, stage: u8, log_tbl: u8, addr: u32) -> Row {
        self.rams
            .get(&(dev, pipe, stage, log_tbl, addr))
            .copied()
            .unwrap_or_default()
    }

    /// Overwrite a row as the data plane would.
    pub fn set_row(&mut self, dev: DevId, pipe: u8, stage: u8, log_tbl: u8, addr: u32, data: Row) {
        self.rams.insert((dev, pipe, stage, log_tbl, addr), data);
    }

    /// Register value, zero if never written.
    #[must_use]
    pub fn register(&self, dev: DevId, pipe: u8, addr: u32) -> u32 {
        self.registers.get(&(dev, pipe, addr)).copied().unwrap_or(0)
    }

    pub fn set_register(&mut self, dev: DevId, pipe: u8, addr: u32, value: u32) {
        self.registers.insert((dev, pipe, addr), value);
    }

    /// Every accepted write since the last [`Self::clear_log`].
    #[must_use]
    pub fn writes(&self) -> &[SimWrite] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Reads pushed but not yet completed on `dev`.
    #[must_use]
    pub fn pending_reads(&self, dev: DevId) -> usize {
        self.pushed.get(&dev).map_or(0, Vec::len)
    }

    fn apply(&mut self, dev: DevId, pipe: u8, stage: u8, instr: &Instruction) {
        match *instr {
            Instruction::VirtualWrite {
                log_tbl,
                addr,
                data,
                mask,
            } => {
                let row = self.rams.entry((dev, pipe, stage, log_tbl, addr)).or_default();
                for ((byte, new), keep) in row.iter_mut().zip(data).zip(mask) {
                    *byte = (*byte & !keep) | (new & keep);
                }
            }
            Instruction::RunSalu {
                log_tbl,
                instr,
                addr,
            } => {
                let Some(&program) = self.programs.get(&(dev, stage, log_tbl, instr)) else {
                    trace!(dev, stage, log_tbl, instr, "no program loaded; ignoring");
                    return;
                };
                let virt = decompose_virt_addr(WidthClass::Bit1, addr);
                let key = (dev, pipe, stage, log_tbl, row_addr(virt.vpn, virt.line));
                let row = self.rams.entry(key).or_default();
                let mut bits = u128::from_le_bytes(*row);
                match program {
                    SaluProgram::SetBit => bits |= 1 << virt.subword,
                    SaluProgram::ClearBit => bits &= !(1 << virt.subword),
                }
                *row = bits.to_le_bytes();
            }
            Instruction::SetRegister { addr, value } => {
                self.registers.insert((dev, pipe, addr), value);
            }
            Instruction::FifoAdjust { counter, op, count } => {
                let reg = self.registers.entry((dev, pipe, fifo_counter_addr(stage, counter))).or_insert(0);
                *reg = match op {
                    FifoOp::Push => reg.saturating_add(count),
                    FifoOp::Pop => reg.saturating_sub(count),
                };
            }
            Instruction::FifoReset { counter } => {
                self.registers.insert((dev, pipe, fifo_counter_addr(stage, counter)), 0);
            }
            Instruction::VirtualRead { .. } | Instruction::AtomicMod { .. } => {}
        }
    }

    /// Data-plane push into a CPU-popped FIFO: bump the counter of the
    /// table's first stage.
    pub fn dataplane_fifo_push(&mut self, dev: DevId, pipe: u8, stage: u8, count: u32) {
        let Some(&counter) = self.fifo_counters.get(&(dev, stage)) else {
            return;
        };
        self.apply(
            dev,
            pipe,
            stage,
            &Instruction::FifoAdjust {
                counter,
                op: FifoOp::Push,
                count,
            },
        );
    }
}

/// Shared handle to a [`SimAsic`]; clones observe the same device.
#[derive(Clone, Debug, Default)]
pub struct SimTransport(pub Arc<Mutex<SimAsic>>);

impl SimTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asic(&self) -> parking_lot::MutexGuard<'_, SimAsic> {
        self.0.lock()
    }
}

impl Transport for SimTransport {
    fn enqueue_write(
        &mut self,
        dev: DevId,
        pipes: PipeBitmap,
        stage: u8,
        instr: &Instruction,
    ) -> Result<(), TransportError> {
        let mut asic = self.0.lock();
        asic.check_failure()?;
        for pipe in pipes.iter() {
            asic.apply(dev, pipe, stage, instr);
        }
        asic.log.push(SimWrite::Instr {
            dev,
            pipes,
            stage,
            instr: instr.clone(),
        });
        Ok(())
    }

    fn enqueue_block_write(
        &mut self,
        dev: DevId,
        pipes: PipeBitmap,
        addr: VmemAddr,
        entry_size: usize,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut asic = self.0.lock();
        asic.check_failure()?;
        if entry_size != ROW_BYTES || data.len() % ROW_BYTES != 0 {
            return Err(TransportError::Rejected(format!(
                "block of {} bytes with entry size {entry_size}",
                data.len()
            )));
        }
        let rows = data.len() / ROW_BYTES;
        for pipe in pipes.iter() {
            for (chunk, line) in data.chunks_exact(ROW_BYTES).zip(0u32..) {
                let mut row = [0u8; ROW_BYTES];
                row.copy_from_slice(chunk);
                let target = addr.offset(line);
                asic.rams
                    .insert((dev, pipe, target.stage, target.log_tbl, target.row), row);
            }
        }
        asic.log.push(SimWrite::Block {
            dev,
            pipes,
            addr,
            rows,
        });
        Ok(())
    }

    fn enqueue_read(
        &mut self,
        dev: DevId,
        pipe: u8,
        stage: u8,
        instr: &Instruction,
    ) -> Result<(), TransportError> {
        let mut asic = self.0.lock();
        asic.check_failure()?;
        let &Instruction::VirtualRead { log_tbl, addr } = instr else {
            return Err(TransportError::Rejected(format!(
                "{} is not a read",
                instr.kind()
            )));
        };
        asic.queued.entry(dev).or_default().push(QueuedRead {
            pipe,
            stage,
            log_tbl,
            addr,
        });
        Ok(())
    }

    fn push_reads(&mut self, dev: DevId, cookie: ReadCookie) -> Result<(), TransportError> {
        let mut asic = self.0.lock();
        asic.check_failure()?;
        let queued = asic.queued.remove(&dev).unwrap_or_default();
        let completions: Vec<ReadCompletion> = queued
            .into_iter()
            .map(|read| ReadCompletion {
                cookie,
                pipe: read.pipe,
                stage: read.stage,
                log_tbl: read.log_tbl,
                addr: read.addr,
                data: asic.row(dev, read.pipe, read.stage, read.log_tbl, read.addr),
            })
            .collect();
        asic.pushed.entry(dev).or_default().extend(completions);
        Ok(())
    }

    fn complete_all_reads(&mut self, dev: DevId) -> Result<Vec<ReadCompletion>, TransportError> {
        let mut asic = self.0.lock();
        asic.check_failure()?;
        Ok(asic.pushed.remove(&dev).unwrap_or_default())
    }

    fn read_register(&mut self, dev: DevId, pipe: u8, addr: u32) -> Result<u32, TransportError> {
        let mut asic = self.0.lock();
        asic.check_failure()?;
        Ok(asic.register(dev, pipe, addr))
    }
}
