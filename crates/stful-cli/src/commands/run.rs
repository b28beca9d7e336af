//! Run command: execute a setup's steps and print their results.

use std::path::Path;

use stful::{IndexValues, PipeValue, RegisterValue};
use stful_cli::{Setup, StepOutput};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, OutputFormat};
use crate::terminal;

pub fn cmd_run(setup_path: &Path, format: OutputFormat) -> i32 {
    let setup = match Setup::load(setup_path) {
        Ok(setup) => setup,
        Err(e) => {
            error!(error = %e, "failed to load setup");
            return EXIT_FAILURE;
        }
    };
    let mut mgr = match setup.build() {
        Ok(mgr) => mgr,
        Err(e) => {
            error!(error = %e, "failed to add tables");
            return EXIT_FAILURE;
        }
    };
    let outputs = match setup.run_steps(&mut mgr) {
        Ok(outputs) => outputs,
        Err(e) => {
            error!(error = %e, "step failed");
            return EXIT_FAILURE;
        }
    };

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&outputs) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!(error = %e, "failed to encode results");
                return EXIT_FAILURE;
            }
        },
        OutputFormat::Text => {
            for (i, (step, out)) in setup.steps.iter().zip(&outputs).enumerate() {
                println!("[{i}] {}: {}", step.name(), format_output(out));
            }
            terminal::success(&format!("{} steps completed", outputs.len()));
        }
    }
    EXIT_SUCCESS
}

fn format_value(value: RegisterValue) -> String {
    if value.hi == 0 {
        format!("{:#x}", value.lo)
    } else {
        format!("{:#x}/{:#x}", value.lo, value.hi)
    }
}

fn format_pipes(values: &[PipeValue]) -> String {
    values
        .iter()
        .map(|v| format!("p{}={}", v.pipe, format_value(v.value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_indices(values: &[IndexValues]) -> String {
    values
        .iter()
        .map(|v| format!("\n    {}: {}", v.index, format_pipes(&v.values)))
        .collect()
}

fn format_output(out: &StepOutput) -> String {
    match out {
        StepOutput::Done => "ok".to_string(),
        StepOutput::Values(values) => format_indices(values),
        StepOutput::Pipes(values) => format_pipes(values),
        StepOutput::Popped(values) => {
            let popped: Vec<_> = values.iter().copied().map(format_value).collect();
            format!("{} popped [{}]", popped.len(), popped.join(", "))
        }
        StepOutput::Count(count) => count.to_string(),
        StepOutput::Param(value) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(RegisterValue::new(0x2a)), "0x2a");
        assert_eq!(format_value(RegisterValue::dual(1, 2)), "0x1/0x2");
    }

    #[test]
    fn test_format_output() {
        let out = StepOutput::Pipes(vec![
            PipeValue {
                pipe: 0,
                value: RegisterValue::new(7),
            },
            PipeValue {
                pipe: 2,
                value: RegisterValue::new(9),
            },
        ]);
        assert_eq!(format_output(&out), "p0=0x7 p2=0x9");
        assert_eq!(format_output(&StepOutput::Count(12)), "12");
        assert_eq!(
            format_output(&StepOutput::Popped(vec![RegisterValue::new(1)])),
            "1 popped [0x1]"
        );
    }
}
