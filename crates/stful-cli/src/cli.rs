//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use stful::WidthClass;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "stful")]
#[command(about = "Stateful register table manager - scripted table operations on a simulated ASIC")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add the setup's devices and tables, then run its steps
    Run {
        /// Setup file (JSON)
        #[arg(value_name = "SETUP")]
        setup: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Run a setup and save the state of every table
    Snapshot {
        /// Setup file (JSON)
        #[arg(value_name = "SETUP")]
        setup: PathBuf,

        /// State file to write; compressed when it ends in .zst
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Add the setup's devices and tables, then restore a saved state
    Restore {
        /// Setup file (JSON); its steps are not run
        #[arg(value_name = "SETUP")]
        setup: PathBuf,

        /// State file written by `snapshot`
        #[arg(value_name = "STATE")]
        input: PathBuf,
    },
    /// Show where a table index lives in the RAM geometry
    Locate {
        /// Entry width
        #[arg(long, value_enum)]
        width: WidthArg,

        /// Stage-local index
        index: u32,

        /// VPN of the RAM holding the index's row
        #[arg(long, default_value = "0")]
        vpn: u32,

        /// Stateful ALU instruction for the indirect pointer
        #[arg(long, default_value = "0")]
        instr: u8,
    },
}

/// Output format for step results.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Entry width argument.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum WidthArg {
    #[value(name = "1")]
    Bit1,
    #[value(name = "8")]
    Bit8,
    #[value(name = "8x2")]
    Bit8x2,
    #[value(name = "16")]
    Bit16,
    #[value(name = "16x2")]
    Bit16x2,
    #[value(name = "32")]
    Bit32,
    #[value(name = "32x2")]
    Bit32x2,
    #[value(name = "64")]
    Bit64,
    #[value(name = "64x2")]
    Bit64x2,
}

impl From<WidthArg> for WidthClass {
    fn from(arg: WidthArg) -> Self {
        match arg {
            WidthArg::Bit1 => Self::Bit1,
            WidthArg::Bit8 => Self::Bit8,
            WidthArg::Bit8x2 => Self::Bit8x2,
            WidthArg::Bit16 => Self::Bit16,
            WidthArg::Bit16x2 => Self::Bit16x2,
            WidthArg::Bit32 => Self::Bit32,
            WidthArg::Bit32x2 => Self::Bit32x2,
            WidthArg::Bit64 => Self::Bit64,
            WidthArg::Bit64x2 => Self::Bit64x2,
        }
    }
}
