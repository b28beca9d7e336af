//! Snapshot and restore commands.

use std::path::Path;

use stful::DevId;
use stful_cli::{Setup, StateFile};
use tracing::{error, info};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::terminal;

fn device_ids(setup: &Setup) -> Vec<DevId> {
    setup.devices.iter().map(|d| d.dev_id).collect()
}

pub fn cmd_snapshot(setup_path: &Path, output: &Path) -> i32 {
    let result = Setup::load(setup_path).and_then(|setup| {
        let mut mgr = setup.build()?;
        setup.run_steps(&mut mgr)?;
        StateFile::capture(&mgr, &device_ids(&setup))
    });
    let state = match result {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "snapshot failed");
            return EXIT_FAILURE;
        }
    };

    if let Err(e) = state.save(output) {
        error!(error = %e, "failed to save state");
        return EXIT_FAILURE;
    }
    info!(
        tables = state.tables.len(),
        values = state.logged_values(),
        "state captured"
    );
    terminal::success(&format!(
        "Saved {} tables to {}",
        state.tables.len(),
        output.display()
    ));
    EXIT_SUCCESS
}

pub fn cmd_restore(setup_path: &Path, input: &Path) -> i32 {
    let state = match StateFile::load(input) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to load state");
            return EXIT_FAILURE;
        }
    };

    let result = Setup::load(setup_path).and_then(|setup| {
        let mut mgr = setup.build()?;
        state.restore(&mut mgr)?;
        StateFile::capture(&mgr, &device_ids(&setup))
    });
    let restored = match result {
        Ok(restored) => restored,
        Err(e) => {
            error!(error = %e, "restore failed");
            return EXIT_FAILURE;
        }
    };

    if restored != state {
        terminal::error("Restored state differs from the state file");
        return EXIT_FAILURE;
    }
    terminal::success(&format!(
        "Restored {} tables ({} values)",
        state.tables.len(),
        state.logged_values()
    ));
    EXIT_SUCCESS
}
