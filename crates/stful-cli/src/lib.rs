//! Setup files, scripted operations and state files for the `stful` binary.

mod error;
pub mod setup;
pub mod state_file;

pub use error::CliError;
pub use setup::{Setup, Step, StepOutput, TableSetup, Target};
pub use state_file::{StateFile, TableState};
