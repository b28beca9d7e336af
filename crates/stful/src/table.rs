//! Table and instance model.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use stful_codec::{
    FIFO_COUNTERS_PER_STAGE, MAX_SALU_INSTR, MAX_VPN, RAM_LINES, RegisterValue, SALU_CONST_SLOTS,
    SALUS_PER_STAGE, VmemAddr, WidthClass, decompose_index, indirect_ptr, row_addr,
    split_row_addr,
};

use crate::fifo::FifoState;
use crate::param::RegisterParam;
use crate::shadow::DirectEntry;
use crate::sync::SyncState;
use crate::{
    DevId, DeviceConfig, EntryHandle, PipeBitmap, PipeTarget, Result, StfulError, TableHandle,
    TableKind, TableSpec,
};

/// One SRAM unit of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RamUnit {
    pub id: u8,
    pub vpn: u8,
}

/// A table's footprint in one pipeline stage.
#[derive(Debug)]
pub struct StageInfo {
    pub(crate) stage_id: u8,
    pub(crate) log_tbl: u8,
    /// First table index held by this stage.
    pub(crate) base: u32,
    pub(crate) num_entries: u32,
    pub(crate) rams: Vec<RamUnit>,
    pub(crate) spare_rams: Vec<u8>,
    pub(crate) alu_ids: Vec<u8>,
    pub(crate) set_bit_instr: u8,
    pub(crate) clr_bit_instr: u8,
    /// Shadow rows per physical pipe (indirect tables only; empty for pipes
    /// outside the table).
    pub(crate) db: Vec<Vec<u8>>,
}

impl StageInfo {
    #[must_use]
    pub const fn stage_id(&self) -> u8 {
        self.stage_id
    }

    #[must_use]
    pub const fn log_tbl(&self) -> u8 {
        self.log_tbl
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    #[must_use]
    pub const fn num_entries(&self) -> u32 {
        self.num_entries
    }

    #[must_use]
    pub fn rams(&self) -> &[RamUnit] {
        &self.rams
    }

    #[must_use]
    pub fn spare_rams(&self) -> &[u8] {
        &self.spare_rams
    }

    #[must_use]
    pub fn alu_ids(&self) -> &[u8] {
        &self.alu_ids
    }

    /// Rows holding at least one entry.
    pub(crate) const fn rows_used(&self, width: WidthClass) -> u32 {
        self.num_entries.div_ceil(width.entries_per_row())
    }

    /// Rows backed by the stage's RAMs.
    pub(crate) fn row_capacity(&self) -> u32 {
        self.rams.len() as u32 * RAM_LINES
    }

    pub(crate) const fn contains(&self, index: u32) -> bool {
        index >= self.base && index - self.base < self.num_entries
    }

    /// VPN and line of a stage row.
    pub(crate) fn row_location(&self, row: u32) -> Option<(u32, u32)> {
        let ram = self.rams.get((row / RAM_LINES) as usize)?;
        Some((u32::from(ram.vpn), row % RAM_LINES))
    }

    /// CPU row address of a stage row.
    pub(crate) fn row_addr(&self, row: u32) -> Option<u32> {
        self.row_location(row).map(|(vpn, line)| row_addr(vpn, line))
    }

    /// Stage row of a CPU row address.
    pub(crate) fn row_of_addr(&self, addr: u32) -> Option<u32> {
        let (vpn, line) = split_row_addr(addr);
        let ram = self.rams.iter().position(|r| u32::from(r.vpn) == vpn)?;
        Some(ram as u32 * RAM_LINES + line)
    }

    pub(crate) fn vmem_addr(&self, row: u32) -> Option<VmemAddr> {
        self.row_addr(row)
            .map(|addr| VmemAddr::new(self.stage_id, self.log_tbl, addr))
    }
}

/// Pipes sharing one copy of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableInstance {
    /// Lowest pipe of the scope; names the instance.
    pub pipe_id: u8,
    pub pipes: PipeBitmap,
}

/// Pipes a write is applied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteScope {
    /// Every pipe of the table.
    AllPipes,
    /// Every pipe of one instance.
    Instance(usize),
    /// One physical pipe (state restore).
    SinglePipe(u8),
}

/// A register table and all state the manager keeps for it.
#[derive(Debug)]
pub struct StatefulTable {
    pub(crate) dev: DevId,
    pub(crate) handle: TableHandle,
    pub(crate) name: String,
    pub(crate) width: WidthClass,
    pub(crate) direct: bool,
    pub(crate) kind: TableKind,
    pub(crate) symmetric: bool,
    pub(crate) pipes: PipeBitmap,
    pub(crate) scopes: Vec<PipeBitmap>,
    pub(crate) instances: Vec<TableInstance>,
    pub(crate) size: u32,
    pub(crate) num_entries_real: u32,
    pub(crate) initial: RegisterValue,
    pub(crate) stages: Vec<StageInfo>,
    pub(crate) fifo: Option<FifoState>,
    pub(crate) params: Vec<RegisterParam>,
    /// Direct tables: entry handle to shadow value, per physical pipe.
    pub(crate) hdl_to_shdw: Vec<FxHashMap<EntryHandle, DirectEntry>>,
    pub(crate) skip_shadow: bool,
    pub(crate) sync: SyncState,
}

impl StatefulTable {
    /// Validate `spec` against `dev` and build the table with its shadow
    /// allocated but not yet seeded.
    pub(crate) fn from_spec(spec: &TableSpec, dev: &DeviceConfig) -> Result<Self> {
        let width = spec.width;
        if !dev.family.supports_width(width) {
            return Err(StfulError::invalid(format!(
                "{width}-bit tables are not supported on {:?}",
                dev.family
            )));
        }

        let pipes = if spec.pipes.is_empty() {
            dev.pipes()
        } else {
            spec.pipes
        };
        if pipes.is_empty() || !pipes.is_subset_of(dev.pipes()) {
            return Err(StfulError::invalid(format!(
                "pipes {pipes:?} not valid on device {} with {} pipes",
                dev.dev_id, dev.num_pipes
            )));
        }

        if spec.stages.is_empty() {
            return Err(StfulError::invalid("table has no stages"));
        }
        let mut seen_stages = FxHashSet::default();
        let mut stages = Vec::with_capacity(spec.stages.len());
        let mut base = 0u32;
        for stage in &spec.stages {
            if !seen_stages.insert(stage.stage_id) {
                return Err(StfulError::invalid(format!(
                    "stage {} listed twice",
                    stage.stage_id
                )));
            }
            if stage.rams.is_empty() || stage.num_entries == 0 {
                return Err(StfulError::invalid(format!(
                    "stage {} has no entries or no RAMs",
                    stage.stage_id
                )));
            }
            let capacity = u64::from(RAM_LINES)
                * u64::from(width.entries_per_row())
                * stage.rams.len() as u64;
            if u64::from(stage.num_entries) > capacity {
                return Err(StfulError::invalid(format!(
                    "stage {} needs {} entries but its RAMs hold {capacity}",
                    stage.stage_id, stage.num_entries
                )));
            }
            let mut vpns = FxHashSet::default();
            for ram in &stage.rams {
                if u32::from(ram.vpn) > MAX_VPN || !vpns.insert(ram.vpn) {
                    return Err(StfulError::invalid(format!(
                        "stage {} has invalid or duplicate vpn {}",
                        stage.stage_id, ram.vpn
                    )));
                }
            }
            if stage.alu_ids.iter().any(|&alu| alu >= SALUS_PER_STAGE) {
                return Err(StfulError::invalid(format!(
                    "stage {} names an ALU beyond {SALUS_PER_STAGE}",
                    stage.stage_id
                )));
            }
            if stage.set_bit_instr > MAX_SALU_INSTR || stage.clr_bit_instr > MAX_SALU_INSTR {
                return Err(StfulError::invalid(format!(
                    "stage {} uses an ALU instruction beyond {MAX_SALU_INSTR}",
                    stage.stage_id
                )));
            }

            stages.push(StageInfo {
                stage_id: stage.stage_id,
                log_tbl: stage.log_tbl,
                base,
                num_entries: stage.num_entries,
                rams: stage
                    .rams
                    .iter()
                    .map(|r| RamUnit { id: r.id, vpn: r.vpn })
                    .collect(),
                spare_rams: stage.spare_rams.clone(),
                alu_ids: stage.alu_ids.clone(),
                set_bit_instr: stage.set_bit_instr,
                clr_bit_instr: stage.clr_bit_instr,
                db: Vec::new(),
            });
            base = base.checked_add(stage.num_entries).ok_or_else(|| {
                StfulError::invalid("table entry count overflows 32 bits")
            })?;
        }
        let num_entries_real = base;
        if spec.size == 0 || spec.size > num_entries_real {
            return Err(StfulError::invalid(format!(
                "requested size {} does not fit the {num_entries_real} entries of the stages",
                spec.size
            )));
        }

        let fifo = match (spec.kind, spec.fifo) {
            (TableKind::Fifo, Some(fifo)) => {
                if spec.direct {
                    return Err(StfulError::invalid("fifo tables cannot be direct"));
                }
                if fifo.counter >= FIFO_COUNTERS_PER_STAGE {
                    return Err(StfulError::invalid(format!(
                        "fifo counter {} beyond {FIFO_COUNTERS_PER_STAGE}",
                        fifo.counter
                    )));
                }
                Some(FifoState::new(fifo))
            }
            (TableKind::Fifo, None) => {
                return Err(StfulError::invalid("fifo table without fifo settings"));
            }
            (_, Some(_)) => {
                return Err(StfulError::invalid("fifo settings on a non-fifo table"));
            }
            (_, None) => None,
        };

        let mut params = Vec::with_capacity(spec.params.len());
        for param in &spec.params {
            let range = dev.family.param_range(width).ok_or_else(|| {
                StfulError::invalid("one-bit tables have no register parameters")
            })?;
            if param.slot >= SALU_CONST_SLOTS {
                return Err(StfulError::invalid(format!(
                    "parameter {} uses slot {} beyond {SALU_CONST_SLOTS}",
                    param.name, param.slot
                )));
            }
            if param.default < range.0 || param.default > range.1 {
                return Err(StfulError::invalid(format!(
                    "parameter {} default {} outside {range:?}",
                    param.name, param.default
                )));
            }
            if params.iter().any(|p: &RegisterParam| p.handle == param.handle) {
                return Err(StfulError::invalid(format!(
                    "parameter {} listed twice",
                    param.handle
                )));
            }
            params.push(RegisterParam::from_spec(param, dev.num_pipes));
        }

        let scopes = normalize_scopes(pipes, spec.symmetric, &spec.scopes)?;
        let instances = build_instances(&scopes)?;

        let mut table = Self {
            dev: dev.dev_id,
            handle: spec.handle,
            name: spec.name.clone(),
            width,
            direct: spec.direct,
            kind: spec.kind,
            symmetric: spec.symmetric,
            pipes,
            scopes,
            instances,
            size: spec.size,
            num_entries_real,
            initial: spec.initial.masked(width),
            stages,
            fifo,
            params,
            hdl_to_shdw: Vec::new(),
            skip_shadow: false,
            sync: SyncState::Idle,
        };
        if let Some(fifo) = table.fifo.as_mut() {
            fifo.rebuild(table.instances.len());
        }
        table.alloc_shadow(dev.num_pipes)?;
        Ok(table)
    }

    #[must_use]
    pub const fn dev(&self) -> DevId {
        self.dev
    }

    #[must_use]
    pub const fn handle(&self) -> TableHandle {
        self.handle
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn width(&self) -> WidthClass {
        self.width
    }

    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.direct
    }

    #[must_use]
    pub const fn kind(&self) -> TableKind {
        self.kind
    }

    #[must_use]
    pub const fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    #[must_use]
    pub const fn pipes(&self) -> PipeBitmap {
        self.pipes
    }

    #[must_use]
    pub fn scopes(&self) -> &[PipeBitmap] {
        &self.scopes
    }

    #[must_use]
    pub fn instances(&self) -> &[TableInstance] {
        &self.instances
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Entries actually allocated across all stages.
    #[must_use]
    pub const fn num_entries(&self) -> u32 {
        self.num_entries_real
    }

    #[must_use]
    pub const fn initial(&self) -> RegisterValue {
        self.initial
    }

    #[must_use]
    pub fn stages(&self) -> &[StageInfo] {
        &self.stages
    }

    #[must_use]
    pub const fn skip_shadow(&self) -> bool {
        self.skip_shadow
    }

    /// Whether an asynchronous table sync is outstanding.
    #[must_use]
    pub const fn is_syncing(&self) -> bool {
        matches!(self.sync, SyncState::Syncing(_))
    }

    /// Position of `stage_id` in the stage list.
    ///
    /// # Errors
    ///
    /// Returns `StageNotFound` if the table does not use the stage.
    pub fn stage_index_of(&self, stage_id: u8) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.stage_id == stage_id)
            .ok_or(StfulError::StageNotFound {
                handle: self.handle,
                stage: stage_id,
            })
    }

    #[must_use]
    pub const fn is_in_pipe(&self, pipe: u8) -> bool {
        self.pipes.contains(pipe)
    }

    /// Instance whose scope contains `pipe`.
    #[must_use]
    pub fn instance_for_pipe(&self, pipe: u8) -> Option<usize> {
        self.instances.iter().position(|i| i.pipes.contains(pipe))
    }

    /// Stage and stage-local index of a table index.
    pub(crate) fn locate(&self, index: u32) -> Result<(usize, u32)> {
        if index >= self.num_entries_real {
            return Err(StfulError::IndexOutOfRange {
                handle: self.handle,
                index,
                size: self.num_entries_real,
            });
        }
        self.stages
            .iter()
            .position(|s| s.contains(index))
            .map(|i| (i, index - self.stages[i].base))
            .ok_or_else(|| {
                StfulError::unexpected(format!(
                    "index {index} of table {} falls between stages",
                    self.handle
                ))
            })
    }

    pub(crate) fn check_direct(&self, direct: bool) -> Result<()> {
        if self.direct == direct {
            Ok(())
        } else if direct {
            Err(StfulError::invalid(format!(
                "table {} is indirect; use an index",
                self.handle
            )))
        } else {
            Err(StfulError::invalid(format!(
                "table {} is direct; use an entry handle",
                self.handle
            )))
        }
    }

    /// Pipes a write to `target` reaches.
    pub(crate) fn resolve_write(&self, target: PipeTarget) -> Result<WriteScope> {
        match target {
            PipeTarget::All => Ok(WriteScope::AllPipes),
            PipeTarget::Pipe(_) if self.symmetric => Err(StfulError::invalid(format!(
                "table {} is symmetric; writes must target all pipes",
                self.handle
            ))),
            PipeTarget::Pipe(pipe) => self
                .instances
                .iter()
                .position(|i| i.pipe_id == pipe)
                .map(WriteScope::Instance)
                .ok_or_else(|| {
                    StfulError::invalid(format!(
                        "pipe {pipe} does not name a scope of table {}",
                        self.handle
                    ))
                }),
        }
    }

    pub(crate) fn scope_pipes(&self, scope: WriteScope) -> PipeBitmap {
        match scope {
            WriteScope::AllPipes => self.pipes,
            WriteScope::Instance(i) => self.instances[i].pipes,
            WriteScope::SinglePipe(pipe) => PipeBitmap::single(pipe),
        }
    }

    /// Pipes a read of `target` returns values for.
    pub(crate) fn resolve_read(&self, target: PipeTarget) -> Result<PipeBitmap> {
        match target {
            PipeTarget::All => Ok(self.pipes),
            PipeTarget::Pipe(pipe) if !self.pipes.contains(pipe) => Err(StfulError::invalid(
                format!("pipe {pipe} is not used by table {}", self.handle),
            )),
            PipeTarget::Pipe(pipe) if self.symmetric => Ok(PipeBitmap::single(pipe)),
            PipeTarget::Pipe(_) => match self.resolve_write(target)? {
                WriteScope::Instance(i) => Ok(self.instances[i].pipes),
                _ => Err(StfulError::unexpected("pipe target resolved to a non-instance scope")),
            },
        }
    }

    /// Instance an operation on a single logical pipe is aimed at.
    pub(crate) fn resolve_instance(&self, target: PipeTarget) -> Result<usize> {
        match target {
            PipeTarget::All if self.symmetric => Ok(0),
            PipeTarget::All => Err(StfulError::invalid(format!(
                "table {} is asymmetric; name the scope's pipe",
                self.handle
            ))),
            PipeTarget::Pipe(_) => match self.resolve_write(target)? {
                WriteScope::Instance(i) => Ok(i),
                _ => Err(StfulError::unexpected("pipe target resolved to a non-instance scope")),
            },
        }
    }

    /// Replace the instance array for a new mode.
    pub(crate) fn rebuild_instances(&mut self, symmetric: bool, scopes: Vec<PipeBitmap>) -> Result<()> {
        self.instances.clear();
        self.instances = build_instances(&scopes)?;
        self.symmetric = symmetric;
        self.scopes = scopes;
        if let Some(fifo) = self.fifo.as_mut() {
            fifo.rebuild(self.instances.len());
        }
        Ok(())
    }
}

/// Pointer a match table stores to address one stateful entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectPtr {
    pub stage_id: u8,
    pub ptr: u32,
}

impl StatefulTable {
    /// Stateful-ALU pointer to a table index, running ALU instruction `instr`.
    pub(crate) fn indirect_ptr(&self, index: u32, instr: u8) -> Result<IndirectPtr> {
        self.check_direct(false)?;
        if instr > MAX_SALU_INSTR {
            return Err(StfulError::invalid(format!(
                "ALU instruction {instr} beyond {MAX_SALU_INSTR}"
            )));
        }
        let (stage_idx, local) = self.locate(index)?;
        let stage = &self.stages[stage_idx];
        let parts = decompose_index(self.width, local);
        let (vpn, line) = stage.row_location(parts.row()).ok_or_else(|| {
            StfulError::unexpected(format!(
                "row {} beyond the RAMs of stage {}",
                parts.row(),
                stage.stage_id
            ))
        })?;
        Ok(IndirectPtr {
            stage_id: stage.stage_id,
            ptr: indirect_ptr(self.width, vpn, line, parts.subword, instr),
        })
    }
}

/// Scope list for a mode: symmetric tables have one scope of every pipe,
/// asymmetric tables without explicit scopes have one scope per pipe.
pub(crate) fn normalize_scopes(
    pipes: PipeBitmap,
    symmetric: bool,
    scopes: &[PipeBitmap],
) -> Result<Vec<PipeBitmap>> {
    if symmetric {
        return Ok(vec![pipes]);
    }
    if scopes.is_empty() {
        return Ok(pipes.iter().map(PipeBitmap::single).collect());
    }

    let mut covered = PipeBitmap::EMPTY;
    for &scope in scopes {
        if scope.is_empty() || covered.intersects(scope) || !scope.is_subset_of(pipes) {
            return Err(StfulError::invalid(format!(
                "scope {scope:?} is empty, overlaps another scope or leaves the table's pipes {pipes:?}"
            )));
        }
        covered = covered.union(scope);
    }
    if covered != pipes {
        return Err(StfulError::invalid(format!(
            "scopes cover {covered:?} but the table uses {pipes:?}"
        )));
    }
    let mut sorted = scopes.to_vec();
    sorted.sort_by_key(|s| s.lowest());
    Ok(sorted)
}

fn build_instances(scopes: &[PipeBitmap]) -> Result<Vec<TableInstance>> {
    let mut instances = Vec::new();
    instances
        .try_reserve_exact(scopes.len())
        .map_err(|e| StfulError::ResourceExhausted(format!("table instances: {e}")))?;
    for &pipes in scopes {
        let pipe_id = pipes
            .lowest()
            .ok_or_else(|| StfulError::unexpected("empty scope reached instance build"))?;
        instances.push(TableInstance { pipe_id, pipes });
    }
    Ok(instances)
}
