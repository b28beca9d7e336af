//! Command implementations.
//!
//! Each submodule handles a specific CLI command or group of commands.

mod locate;
mod run;
mod state;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Run { .. } => handle_run(cli),
        Commands::Snapshot { .. } => handle_snapshot(cli),
        Commands::Restore { .. } => handle_restore(cli),
        Commands::Locate { .. } => handle_locate(cli),
    }
}

fn handle_run(cli: &Cli) -> i32 {
    let Commands::Run { setup, format } = &cli.command else {
        unreachable!("run command variant mismatch");
    };
    run::cmd_run(setup, *format)
}

fn handle_snapshot(cli: &Cli) -> i32 {
    let Commands::Snapshot { setup, output } = &cli.command else {
        unreachable!("snapshot command variant mismatch");
    };
    state::cmd_snapshot(setup, output)
}

fn handle_restore(cli: &Cli) -> i32 {
    let Commands::Restore { setup, input } = &cli.command else {
        unreachable!("restore command variant mismatch");
    };
    state::cmd_restore(setup, input)
}

fn handle_locate(cli: &Cli) -> i32 {
    let Commands::Locate {
        width,
        index,
        vpn,
        instr,
    } = &cli.command
    else {
        unreachable!("locate command variant mismatch");
    };
    locate::cmd_locate((*width).into(), *index, *vpn, *instr)
}
