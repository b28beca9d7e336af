//! Setup files and state files through the CLI library.

use std::path::PathBuf;

use stful::{PipeValue, RegisterValue};
use stful_cli::{CliError, Setup, StateFile, StepOutput};
use tempfile::TempDir;

const SETUP: &str = r#"{
    "devices": [{ "dev_id": 0, "family": "tofino2", "num_pipes": 2 }],
    "tables": [
        {
            "handle": 1,
            "name": "counters",
            "width": "bit32",
            "symmetric": false,
            "size": 1024,
            "stages": [
                { "stage_id": 2, "log_tbl": 1, "num_entries": 1024, "rams": [{ "id": 0, "vpn": 0 }] }
            ]
        },
        {
            "handle": 2,
            "name": "seen",
            "width": "bit1",
            "size": 512,
            "stages": [
                { "stage_id": 4, "log_tbl": 0, "num_entries": 512, "rams": [{ "id": 3, "vpn": 1 }] }
            ]
        }
    ],
    "steps": [
        { "op": "write", "table": 1, "index": 5, "value": { "lo": 7 } },
        { "op": "write", "table": 1, "pipe": { "pipe": 1 }, "index": 6, "value": { "lo": 3 } },
        { "op": "write", "table": 2, "index": 100, "value": { "lo": 1 } },
        { "op": "query", "table": 1, "index": 5, "from": "hardware" }
    ]
}"#;

fn write_setup(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("setup.json");
    std::fs::write(&path, SETUP).expect("write setup");
    path
}

fn captured(setup: &Setup) -> StateFile {
    let mut mgr = setup.build().expect("build");
    setup.run_steps(&mut mgr).expect("steps");
    StateFile::capture(&mgr, &[0]).expect("capture")
}

#[test]
fn test_setup_runs_steps() {
    let dir = TempDir::new().expect("tempdir");
    let setup = Setup::load(&write_setup(&dir)).expect("load setup");
    assert_eq!(setup.tables.len(), 2);

    let mut mgr = setup.build().expect("build");
    let outputs = setup.run_steps(&mut mgr).expect("steps");
    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs[0], StepOutput::Done);

    let StepOutput::Values(values) = &outputs[3] else {
        panic!("query should return values, got {:?}", outputs[3]);
    };
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].index, 5);
    assert_eq!(
        values[0].values,
        vec![
            PipeValue {
                pipe: 0,
                value: RegisterValue::new(7),
            },
            PipeValue {
                pipe: 1,
                value: RegisterValue::new(7),
            },
        ]
    );
}

#[test]
fn test_failing_step_is_named() {
    let dir = TempDir::new().expect("tempdir");
    let mut setup = Setup::load(&write_setup(&dir)).expect("load setup");
    setup.steps.push(
        serde_json::from_str(r#"{ "op": "write", "table": 1, "index": 4096, "value": { "lo": 1 } }"#)
            .expect("step"),
    );

    let mut mgr = setup.build().expect("build");
    let err = setup.run_steps(&mut mgr).expect_err("index is out of range");
    assert!(matches!(err, CliError::Step { step: 4, op: "write", .. }));
}

#[test]
fn test_state_file_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let setup = Setup::load(&write_setup(&dir)).expect("load setup");
    let state = captured(&setup);
    assert_eq!(state.tables.len(), 2);
    assert!(state.logged_values() > 0);

    for name in ["state.json", "state.json.zst"] {
        let path = dir.path().join(name);
        state.save(&path).expect("save state");
        let loaded = StateFile::load(&path).expect("load state");
        assert_eq!(loaded, state, "{name} should load back unchanged");
    }
}

#[test]
fn test_compressed_state_is_smaller() {
    let dir = TempDir::new().expect("tempdir");
    let mut setup = Setup::load(&write_setup(&dir)).expect("load setup");
    for index in 100..300 {
        let step = format!(r#"{{ "op": "write", "table": 1, "index": {index}, "value": {{ "lo": 42 }} }}"#);
        setup.steps.push(serde_json::from_str(&step).expect("step"));
    }
    let state = captured(&setup);

    let plain = dir.path().join("state.json");
    let packed = dir.path().join("state.zst");
    state.save(&plain).expect("save plain");
    state.save(&packed).expect("save packed");

    let plain_len = std::fs::metadata(&plain).expect("metadata").len();
    let packed_len = std::fs::metadata(&packed).expect("metadata").len();
    assert!(packed_len < plain_len);
}

#[test]
fn test_restore_reproduces_state() {
    let dir = TempDir::new().expect("tempdir");
    let setup = Setup::load(&write_setup(&dir)).expect("load setup");
    let state = captured(&setup);

    let mut fresh = setup.build().expect("build");
    state.restore(&mut fresh).expect("restore");
    let restored = StateFile::capture(&fresh, &[0]).expect("capture");
    assert_eq!(restored, state);
}

#[test]
fn test_unsupported_version_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{ "version": 99, "tables": [] }"#).expect("write state");

    let err = StateFile::load(&path).expect_err("version 99 is unknown");
    assert!(matches!(err, CliError::StateFile(_)));
}

#[test]
fn test_missing_setup_reports_path() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.json");
    let err = Setup::load(&path).expect_err("file does not exist");
    assert!(err.to_string().contains("absent.json"));
}
