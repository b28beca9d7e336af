//! Device and table configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use stful_codec::{RegisterValue, WidthClass};

use crate::PipeBitmap;

/// Device identifier.
pub type DevId = u8;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

handle_type!(
    /// Register table handle.
    TableHandle
);
handle_type!(
    /// Match-table entry handle owning a direct stateful entry.
    EntryHandle
);
handle_type!(
    /// Register parameter handle.
    ParamHandle
);

/// ASIC family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipFamily {
    #[default]
    Tofino,
    Tofino2,
    Tofino3,
}

impl ChipFamily {
    /// Whether the family has 64-bit stateful ALUs.
    #[must_use]
    pub const fn supports_width(self, width: WidthClass) -> bool {
        !width.is_wide() || !matches!(self, Self::Tofino)
    }

    /// Bits of an ALU register-file constant.
    #[must_use]
    pub const fn const_bits(self) -> u32 {
        match self {
            Self::Tofino => 32,
            Self::Tofino2 | Self::Tofino3 => 34,
        }
    }

    /// Whether a constant is split into a 32-bit low register and a 2-bit
    /// high register.
    #[must_use]
    pub const fn splits_const(self) -> bool {
        self.const_bits() > 32
    }

    /// Signed range of a register parameter on a table of `width`.
    ///
    /// One-bit tables have no register file, so `None`.
    #[must_use]
    pub const fn param_range(self, width: WidthClass) -> Option<(i64, i64)> {
        if matches!(width, WidthClass::Bit1) {
            return None;
        }
        let bits = if width.value_bits() < self.const_bits() {
            width.value_bits()
        } else {
            self.const_bits()
        };
        Some((-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1))
    }
}

/// Static description of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub dev_id: DevId,
    #[serde(default)]
    pub family: ChipFamily,
    pub num_pipes: u8,
    /// Virtual devices have no hardware: only shadow state is kept.
    #[serde(default)]
    pub virtual_device: bool,
}

impl DeviceConfig {
    #[must_use]
    pub const fn new(dev_id: DevId, family: ChipFamily, num_pipes: u8) -> Self {
        Self {
            dev_id,
            family,
            num_pipes,
            virtual_device: false,
        }
    }

    #[must_use]
    pub const fn with_virtual(mut self, virtual_device: bool) -> Self {
        self.virtual_device = virtual_device;
        self
    }

    #[must_use]
    pub const fn pipes(&self) -> PipeBitmap {
        PipeBitmap::first(self.num_pipes)
    }
}

/// Access pattern of a register table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    #[default]
    Normal,
    Fifo,
    Log,
    Stack,
}

/// Side of a FIFO the CPU operates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FifoDirection {
    /// The CPU pushes, the data plane pops.
    Push,
    /// The data plane pushes, the CPU pops.
    Pop,
    /// No data-plane side; the CPU both pushes and pops.
    #[default]
    None,
}

impl FifoDirection {
    #[must_use]
    pub const fn cpu_pushes(self) -> bool {
        matches!(self, Self::Push | Self::None)
    }

    #[must_use]
    pub const fn cpu_pops(self) -> bool {
        matches!(self, Self::Pop | Self::None)
    }
}

/// FIFO settings of a [`TableKind::Fifo`] table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoSpec {
    /// Occupancy counter in the table's first stage.
    pub counter: u8,
    #[serde(default)]
    pub direction: FifoDirection,
}

/// One SRAM unit assigned to a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamSpec {
    pub id: u8,
    pub vpn: u8,
}

/// Geometry of a table in one stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub stage_id: u8,
    pub log_tbl: u8,
    /// Entries this stage holds.
    pub num_entries: u32,
    pub rams: Vec<RamSpec>,
    #[serde(default)]
    pub spare_rams: Vec<u8>,
    #[serde(default)]
    pub alu_ids: Vec<u8>,
    /// ALU instruction that sets a bit of a one-bit table from the CPU.
    #[serde(default)]
    pub set_bit_instr: u8,
    /// ALU instruction that clears a bit of a one-bit table from the CPU.
    #[serde(default = "default_clr_bit_instr")]
    pub clr_bit_instr: u8,
}

const fn default_clr_bit_instr() -> u8 {
    1
}

impl StageSpec {
    /// Stage geometry with sequential VPNs starting at zero.
    #[must_use]
    pub fn new(stage_id: u8, log_tbl: u8, num_entries: u32, ram_ids: &[u8]) -> Self {
        Self {
            stage_id,
            log_tbl,
            num_entries,
            rams: ram_ids
                .iter()
                .zip(0u8..)
                .map(|(&id, vpn)| RamSpec { id, vpn })
                .collect(),
            spare_rams: Vec::new(),
            alu_ids: vec![0],
            set_bit_instr: 0,
            clr_bit_instr: default_clr_bit_instr(),
        }
    }

    #[must_use]
    pub fn with_alus(mut self, alu_ids: &[u8]) -> Self {
        self.alu_ids = alu_ids.to_vec();
        self
    }
}

/// Named ALU constant shared by all stages of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParamSpec {
    pub handle: ParamHandle,
    pub name: String,
    /// Register-file slot.
    pub slot: u8,
    #[serde(default)]
    pub default: i64,
}

/// Everything needed to add a register table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub handle: TableHandle,
    #[serde(default)]
    pub name: String,
    pub width: WidthClass,
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub kind: TableKind,
    #[serde(default = "default_true")]
    pub symmetric: bool,
    /// Pipes the table is instantiated in; empty means every pipe.
    #[serde(default)]
    pub pipes: PipeBitmap,
    /// Scope groups for asymmetric mode; empty means one scope per pipe.
    #[serde(default)]
    pub scopes: Vec<PipeBitmap>,
    /// Requested size; may be below the stages' capacity.
    pub size: u32,
    #[serde(default)]
    pub initial: RegisterValue,
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub fifo: Option<FifoSpec>,
    #[serde(default)]
    pub params: Vec<RegisterParamSpec>,
}

const fn default_true() -> bool {
    true
}

impl TableSpec {
    /// Symmetric indirect table on every pipe.
    #[must_use]
    pub fn new(handle: TableHandle, width: WidthClass, stages: Vec<StageSpec>) -> Self {
        let size = stages.iter().map(|s| s.num_entries).sum();
        Self {
            handle,
            name: String::new(),
            width,
            direct: false,
            kind: TableKind::Normal,
            symmetric: true,
            pipes: PipeBitmap::EMPTY,
            scopes: Vec::new(),
            size,
            initial: RegisterValue::ZERO,
            stages,
            fifo: None,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn with_initial(mut self, initial: RegisterValue) -> Self {
        self.initial = initial;
        self
    }

    #[must_use]
    pub const fn with_direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    /// Asymmetric mode with the given scopes (empty: one per pipe).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<PipeBitmap>) -> Self {
        self.symmetric = false;
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub const fn with_pipes(mut self, pipes: PipeBitmap) -> Self {
        self.pipes = pipes;
        self
    }

    #[must_use]
    pub const fn with_fifo(mut self, fifo: FifoSpec) -> Self {
        self.kind = TableKind::Fifo;
        self.fifo = Some(fifo);
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: RegisterParamSpec) -> Self {
        self.params.push(param);
        self
    }
}
