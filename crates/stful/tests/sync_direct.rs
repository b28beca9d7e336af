//! Table syncs and direct (per match entry) tables.


use std::sync::mpsc;

use stful::{
    ChipFamily, DevTarget, DirectLocation, EntryHandle, PipeBitmap, ReadFrom, RegisterValue,
    StageSpec, StfulError, SyncCallback, TableHandle, TableSpec, WidthClass,
};
use stful_codec::{encode, row_addr};
use test_utils::{DEV, add_table, manager, two_stage};

fn poke(sim: &stful::sim::SimTransport, pipe: u8, stage: u8, log_tbl: u8, line: u32, subword: u32, value: u64) {
    let mut asic = sim.asic();
    let mut row = asic.row(DEV, pipe, stage, log_tbl, row_addr(0, line));
    encode(WidthClass::Bit32, subword, RegisterValue::new(value), &mut row, None);
    asic.set_row(DEV, pipe, stage, log_tbl, row_addr(0, line), row);
}

fn callback() -> (SyncCallback, mpsc::Receiver<Result<(), String>>) {
    let (tx, rx) = mpsc::channel();
    let cb: SyncCallback = Box::new(move |res| {
        let _ = tx.send(res.map_err(|e| e.to_string()));
    });
    (cb, rx)
}

fn direct_spec(handle: u32) -> TableSpec {
    TableSpec::new(
        TableHandle(handle),
        WidthClass::Bit32,
        vec![StageSpec::new(1, 0, 512, &[0]), StageSpec::new(2, 0, 512, &[1])],
    )
    .with_direct(true)
}

#[test]
fn test_blocking_sync_refreshes_shadow() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x50, WidthClass::Bit32, 1024);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;

    // index 1024 + 9: stage 3, line 2, subword 1
    poke(&sim, 1, 3, 1, 2, 1, 41);
    let before = mgr
        .ent_query(DevTarget::all(DEV), h, 1033, ReadFrom::Shadow)
        .expect("query");
    assert!(before.iter().all(|pv| pv.value.lo == 0));

    mgr.sync(DevTarget::all(DEV), h, None).expect("sync");
    let after: Vec<u64> = mgr
        .ent_query(DevTarget::all(DEV), h, 1033, ReadFrom::Shadow)
        .expect("query")
        .into_iter()
        .map(|pv| pv.value.lo)
        .collect();
    assert_eq!(after, vec![0, 41]);
    assert!(!mgr.table(DEV, h).expect("table").is_syncing());
}

#[test]
fn test_async_sync_is_single_flight() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 2);
    let spec = two_stage(0x51, WidthClass::Bit32, 1024);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    poke(&sim, 0, 2, 1, 0, 3, 12);

    let (cb, rx) = callback();
    mgr.sync(DevTarget::all(DEV), h, Some(cb)).expect("start sync");
    assert!(mgr.table(DEV, h).expect("table").is_syncing());
    assert!(matches!(mgr.sync(DevTarget::all(DEV), h, None), Err(StfulError::SyncInProgress(_))));
    assert!(matches!(
        mgr.set_symmetric_mode(DEV, h, false, &[]),
        Err(StfulError::SyncInProgress(_))
    ));
    assert!(rx.try_recv().is_err(), "callback must wait for the reads");

    assert_eq!(mgr.service_reads(DEV).expect("service"), 1);
    assert_eq!(rx.try_recv().expect("callback fired"), Ok(()));
    assert!(!mgr.table(DEV, h).expect("table").is_syncing());
    let got = mgr
        .ent_query(DevTarget::pipe(DEV, 0), h, 3, ReadFrom::Shadow)
        .expect("query");
    assert_eq!(got[0].value.lo, 12);

    // a new sync may start now
    mgr.sync(DevTarget::all(DEV), h, None).expect("second sync");
    assert_eq!(mgr.service_reads(DEV).expect("service"), 0);
}

#[test]
fn test_scope_sync_leaves_other_scopes_alone() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 4);
    let spec = two_stage(0x57, WidthClass::Bit32, 1024).with_scopes(vec![
        PipeBitmap::from_bits(0b0011),
        PipeBitmap::from_bits(0b1100),
    ]);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    // index 3: stage 2, line 0, subword 3
    poke(&sim, 1, 2, 1, 0, 3, 12);
    poke(&sim, 3, 2, 1, 0, 3, 34);
    sim.asic().clear_log();

    mgr.sync(DevTarget::pipe(DEV, 0), h, None).expect("scope sync");
    let shadow: Vec<u64> = mgr
        .ent_query(DevTarget::all(DEV), h, 3, ReadFrom::Shadow)
        .expect("query")
        .into_iter()
        .map(|pv| pv.value.lo)
        .collect();
    assert_eq!(shadow, vec![0, 12, 0, 0]);

    mgr.sync(DevTarget::pipe(DEV, 2), h, None).expect("other scope");
    let shadow: Vec<u64> = mgr
        .ent_query(DevTarget::all(DEV), h, 3, ReadFrom::Shadow)
        .expect("query")
        .into_iter()
        .map(|pv| pv.value.lo)
        .collect();
    assert_eq!(shadow, vec![0, 12, 0, 34]);

    assert!(
        mgr.sync(DevTarget::pipe(DEV, 3), h, None).is_err(),
        "pipe 3 is not the lowest pipe of its scope"
    );
}

#[test]
fn test_blocking_read_stashes_foreign_completions() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 1);
    let a = two_stage(0x52, WidthClass::Bit32, 256);
    let b = two_stage(0x53, WidthClass::Bit32, 256);
    add_table(&mut mgr, &sim, &a);
    add_table(&mut mgr, &sim, &b);

    let (cb, rx) = callback();
    mgr.sync(DevTarget::all(DEV), a.handle, Some(cb)).expect("async sync of a");
    // drains a's completions along with its own
    mgr.sync(DevTarget::all(DEV), b.handle, None).expect("blocking sync of b");
    assert!(rx.try_recv().is_err());
    assert_eq!(sim.asic().pending_reads(DEV), 0);

    assert_eq!(mgr.service_reads(DEV).expect("service"), 1);
    assert_eq!(rx.try_recv().expect("callback fired"), Ok(()));
}

#[test]
fn test_delete_fails_outstanding_sync() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 1);
    let spec = two_stage(0x54, WidthClass::Bit32, 256);
    add_table(&mut mgr, &sim, &spec);

    let (cb, rx) = callback();
    mgr.sync(DevTarget::all(DEV), spec.handle, Some(cb)).expect("start sync");
    mgr.table_del(DEV, spec.handle).expect("delete");
    assert!(rx.try_recv().expect("callback fired").is_err());
    // completions for the deleted table are dropped
    assert_eq!(mgr.service_reads(DEV).expect("service"), 0);
}

#[test]
fn test_ent_sync_reads_one_row() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x55, WidthClass::Bit32, 1024);
    add_table(&mut mgr, &sim, &spec);
    poke(&sim, 0, 2, 1, 1, 2, 99);
    sim.asic().clear_log();

    let got = mgr
        .ent_sync(DevTarget::all(DEV), spec.handle, 6)
        .expect("entry sync");
    assert_eq!(got.iter().map(|pv| pv.value.lo).collect::<Vec<_>>(), vec![99, 0]);
    let shadow = mgr
        .ent_query(DevTarget::pipe(DEV, 0), spec.handle, 6, ReadFrom::Shadow)
        .expect("query");
    assert_eq!(shadow[0].value.lo, 99);
}

#[test]
fn test_virtual_sync_completes_immediately() {
    let sim = stful::sim::SimTransport::new();
    let mut mgr = stful::StfulManager::new(sim);
    mgr.add_device(stful::DeviceConfig::new(DEV, ChipFamily::Tofino, 1).with_virtual(true))
        .expect("device");
    let spec = two_stage(0x56, WidthClass::Bit16, 64);
    mgr.table_add(DEV, &spec).expect("table");
    let (cb, rx) = callback();
    mgr.sync(DevTarget::all(DEV), spec.handle, Some(cb)).expect("sync");
    assert_eq!(rx.try_recv().expect("callback fired"), Ok(()));
}

#[test]
fn test_direct_entry_lifecycle() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = direct_spec(0x60).with_initial(RegisterValue::new(1));
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    let all = DevTarget::all(DEV);
    let entry = EntryHandle(100);

    mgr.direct_ent_add(all, h, entry, DirectLocation::new(2, 5)).expect("add");
    let got = mgr.direct_ent_query(all, h, entry, ReadFrom::Hardware).expect("query");
    assert!(got.iter().all(|pv| pv.value.lo == 1));

    mgr.direct_word_write(all, h, entry, DirectLocation::new(2, 5), RegisterValue::new(33))
        .expect("word write");
    mgr.direct_ent_move(all, h, entry, DirectLocation::new(1, 300)).expect("move");
    // stage 1, line 75, subword 0
    let row = sim.asic().row(DEV, 1, 1, 0, row_addr(0, 75));
    assert_eq!(stful_codec::decode(WidthClass::Bit32, 0, &row), RegisterValue::new(33));
    let got = mgr.direct_ent_query(all, h, entry, ReadFrom::Hardware).expect("query");
    assert!(got.iter().all(|pv| pv.value.lo == 33));

    mgr.table_reset(all, h).expect("reset");
    let got = mgr.direct_ent_query(all, h, entry, ReadFrom::Shadow).expect("query");
    assert!(got.iter().all(|pv| pv.value.lo == 1));

    mgr.direct_ent_del(all, h, entry).expect("delete");
    assert!(matches!(
        mgr.direct_ent_query(all, h, entry, ReadFrom::Shadow),
        Err(StfulError::EntryNotFound { .. })
    ));
    assert!(
        mgr.ent_write(all, h, 0, RegisterValue::new(1)).is_err(),
        "direct tables take entry handles"
    );
}

#[test]
fn test_direct_sync_and_entry_sync() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = direct_spec(0x61);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    let all = DevTarget::all(DEV);
    mgr.direct_ent_add(all, h, EntryHandle(1), DirectLocation::new(2, 5)).expect("add");
    mgr.direct_ent_add(all, h, EntryHandle(2), DirectLocation::new(1, 6)).expect("add");

    // index 5: line 1, subword 1
    poke(&sim, 1, 2, 0, 1, 1, 55);
    mgr.direct_sync(DevTarget::all(DEV), h, None).expect("direct sync");
    let got = mgr
        .direct_ent_query(all, h, EntryHandle(1), ReadFrom::Shadow)
        .expect("query");
    assert_eq!(got.iter().map(|pv| pv.value.lo).collect::<Vec<_>>(), vec![0, 55]);

    // index 6: line 1, subword 2
    poke(&sim, 0, 1, 0, 1, 2, 66);
    let got = mgr
        .direct_ent_sync(DevTarget::all(DEV), h, EntryHandle(2))
        .expect("entry sync");
    assert_eq!(got.iter().map(|pv| pv.value.lo).collect::<Vec<_>>(), vec![66, 0]);

    assert!(
        mgr.sync(DevTarget::all(DEV), h, None).is_err(),
        "direct tables sync through direct_sync"
    );
}

#[test]
fn test_entry_reset_operation() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 1);
    let spec = direct_spec(0x62).with_initial(RegisterValue::new(4));
    add_table(&mut mgr, &sim, &spec);
    let mut ops = stful::OpList::new();
    ops.push(stful::Operation::EntryReset {
        entry: EntryHandle(7),
        location: DirectLocation::new(1, 0),
        pipe: stful::PipeTarget::All,
    })
    .expect("push");
    mgr.process_ops(DEV, spec.handle, &ops).expect("process");
    let got = mgr
        .direct_ent_query(DevTarget::all(DEV), spec.handle, EntryHandle(7), ReadFrom::Hardware)
        .expect("query");
    assert_eq!(got[0].value.lo, 4);
}

#[test]
fn test_empty_direct_sync_fires_callback_at_once() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = direct_spec(0x63);
    add_table(&mut mgr, &sim, &spec);

    let (cb, rx) = callback();
    mgr.direct_sync(DevTarget::all(DEV), spec.handle, Some(cb))
        .expect("direct sync");
    assert_eq!(rx.try_recv().expect("callback fired before returning"), Ok(()));
    assert!(!mgr.table(DEV, spec.handle).expect("table").is_syncing());
    assert_eq!(sim.asic().pending_reads(DEV), 0);
}

#[test]
fn test_async_direct_sync_completes_in_service() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = direct_spec(0x64);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    let all = DevTarget::all(DEV);
    mgr.direct_ent_add(all, h, EntryHandle(9), DirectLocation::new(1, 10)).expect("add");

    // index 10: line 2, subword 2
    poke(&sim, 0, 1, 0, 2, 2, 77);
    let (cb, rx) = callback();
    mgr.direct_sync(all, h, Some(cb)).expect("start direct sync");
    assert!(mgr.table(DEV, h).expect("table").is_syncing());
    assert!(rx.try_recv().is_err(), "callback must wait for the reads");
    let stale = mgr
        .direct_ent_query(all, h, EntryHandle(9), ReadFrom::Shadow)
        .expect("query");
    assert!(stale.iter().all(|pv| pv.value.lo == 0));

    assert_eq!(mgr.service_reads(DEV).expect("service"), 1);
    assert_eq!(rx.try_recv().expect("callback fired"), Ok(()));
    let got = mgr
        .direct_ent_query(all, h, EntryHandle(9), ReadFrom::Shadow)
        .expect("query");
    assert_eq!(got.iter().map(|pv| pv.value.lo).collect::<Vec<_>>(), vec![77, 0]);
}
