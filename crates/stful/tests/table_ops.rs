//! Writes, queries, resets and mode changes against the simulated ASIC.


use stful::{
    ChipFamily, DevTarget, PipeBitmap, PipeTarget, ReadFrom, RegisterValue, StfulError, TableHandle,
    WidthClass,
};
use stful_codec::{ROW_BITS, decode, row_addr};
use test_utils::{DEV, add_table, manager, two_stage};

fn values(mgr: &mut stful::StfulManager<stful::sim::SimTransport>, h: TableHandle, index: u32, from: ReadFrom) -> Vec<u64> {
    mgr.ent_query(DevTarget::all(DEV), h, index, from)
        .expect("query should succeed")
        .into_iter()
        .map(|pv| pv.value.lo)
        .collect()
}

#[test]
fn test_write_lands_in_second_stage() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x10, WidthClass::Bit16, 1024);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;

    mgr.ent_write(DevTarget::all(DEV), h, 1025, RegisterValue::new(7))
        .expect("write should succeed");

    assert_eq!(values(&mut mgr, h, 1025, ReadFrom::Shadow), vec![7, 7]);
    assert_eq!(values(&mut mgr, h, 1024, ReadFrom::Shadow), vec![0, 0]);

    // stage 3, row 0, second 16-bit entry
    for pipe in 0..2 {
        let row = sim.asic().row(DEV, pipe, 3, 1, row_addr(0, 0));
        assert_eq!(decode(WidthClass::Bit16, 1, &row), RegisterValue::new(7));
        assert_eq!(decode(WidthClass::Bit16, 0, &row), RegisterValue::ZERO);
    }
    assert_eq!(values(&mut mgr, h, 1025, ReadFrom::Hardware), vec![7, 7]);
}

#[test]
fn test_write_out_of_range() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 1);
    let spec = two_stage(0x11, WidthClass::Bit32, 512);
    add_table(&mut mgr, &sim, &spec);
    let err = mgr
        .ent_write(DevTarget::all(DEV), spec.handle, 1024, RegisterValue::new(1))
        .expect_err("index beyond the table");
    assert!(matches!(err, StfulError::IndexOutOfRange { index: 1024, size: 1024, .. }));
}

#[test]
fn test_values_are_masked_to_width() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 1);
    let spec = two_stage(0x12, WidthClass::Bit8, 256);
    add_table(&mut mgr, &sim, &spec);
    mgr.ent_write(DevTarget::all(DEV), spec.handle, 3, RegisterValue::new(0x1ff))
        .expect("write should succeed");
    assert_eq!(values(&mut mgr, spec.handle, 3, ReadFrom::Hardware), vec![0xff]);
}

#[test]
fn test_initial_value_seeds_hardware() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x13, WidthClass::Bit32x2, 300).with_initial(RegisterValue::dual(3, 4));
    add_table(&mut mgr, &sim, &spec);
    let got = mgr
        .ent_query_range(DevTarget::all(DEV), spec.handle, 290, 20, ReadFrom::Hardware)
        .expect("range query should succeed");
    assert_eq!(got.len(), 20);
    for iv in got {
        for pv in iv.values {
            assert_eq!(pv.value, RegisterValue::dual(3, 4), "index {} pipe {}", iv.index, pv.pipe);
        }
    }
}

#[test]
fn test_reset_range_matches_hardware() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x14, WidthClass::Bit16, 1024).with_initial(RegisterValue::new(9));
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    let all = DevTarget::all(DEV);

    for index in (0..2048).step_by(7) {
        mgr.ent_write(all, h, index, RegisterValue::new(u64::from(index)))
            .expect("write should succeed");
    }
    // Leading partial row, full rows, trailing partial row, across the stage boundary.
    mgr.table_reset_range(all, h, 1003, 45, None).expect("reset should succeed");

    let shadow = mgr
        .ent_query_range(all, h, 990, 70, ReadFrom::Shadow)
        .expect("shadow query");
    let hw = mgr
        .ent_query_range(all, h, 990, 70, ReadFrom::Hardware)
        .expect("hardware query");
    assert_eq!(shadow, hw);
    for iv in &shadow {
        let expected = if (1003..1048).contains(&iv.index) {
            9
        } else if iv.index % 7 == 0 {
            u64::from(iv.index)
        } else {
            9
        };
        assert!(iv.values.iter().all(|pv| pv.value.lo == expected), "index {}", iv.index);
    }

    mgr.table_reset(all, h).expect("table reset");
    assert_eq!(values(&mut mgr, h, 7, ReadFrom::Hardware), vec![9, 9]);
    assert_eq!(values(&mut mgr, h, 2044, ReadFrom::Hardware), vec![9, 9]);
}

#[test]
fn test_reset_range_to_supplied_value() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x1c, WidthClass::Bit8, 2048).with_initial(RegisterValue::new(1));
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    let all = DevTarget::all(DEV);

    // Values wider than the entry are masked to eight bits.
    mgr.table_reset_range(all, h, 2030, 40, Some(RegisterValue::new(0x1a5)))
        .expect("reset should succeed");

    let shadow = mgr
        .ent_query_range(all, h, 2020, 60, ReadFrom::Shadow)
        .expect("shadow query");
    let hw = mgr
        .ent_query_range(all, h, 2020, 60, ReadFrom::Hardware)
        .expect("hardware query");
    assert_eq!(shadow, hw);
    for iv in &shadow {
        let expected = if (2030..2070).contains(&iv.index) { 0xa5 } else { 1 };
        assert!(iv.values.iter().all(|pv| pv.value.lo == expected), "index {}", iv.index);
    }
}

#[test]
fn test_one_bit_writes_use_alu_programs() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 2);
    let spec = two_stage(0x15, WidthClass::Bit1, 4096);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    let all = DevTarget::all(DEV);

    mgr.ent_write(all, h, 200, RegisterValue::new(1)).expect("set bit");
    mgr.ent_write(all, h, 4096 + 5, RegisterValue::new(1)).expect("set bit");

    let row = sim.asic().row(DEV, 1, 2, 1, row_addr(0, 200 / ROW_BITS));
    assert_eq!(u128::from_le_bytes(row), 1 << (200 % ROW_BITS));
    assert_eq!(values(&mut mgr, h, 200, ReadFrom::Hardware), vec![1, 1]);
    assert_eq!(values(&mut mgr, h, 201, ReadFrom::Hardware), vec![0, 0]);
    assert_eq!(values(&mut mgr, h, 4101, ReadFrom::Hardware), vec![1, 1]);

    mgr.ent_write(all, h, 200, RegisterValue::new(0)).expect("clear bit");
    assert_eq!(values(&mut mgr, h, 200, ReadFrom::Hardware), vec![0, 0]);
}

#[test]
fn test_asymmetric_writes_stay_in_their_scope() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 4);
    let spec = two_stage(0x16, WidthClass::Bit32, 1024).with_scopes(Vec::new());
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;

    mgr.ent_write(DevTarget::pipe(DEV, 2), h, 10, RegisterValue::new(5))
        .expect("pipe write");
    assert_eq!(values(&mut mgr, h, 10, ReadFrom::Shadow), vec![0, 0, 5, 0]);
    assert_eq!(values(&mut mgr, h, 10, ReadFrom::Hardware), vec![0, 0, 5, 0]);

    let one = mgr
        .ent_query(DevTarget::pipe(DEV, 2), h, 10, ReadFrom::Shadow)
        .expect("pipe query");
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].pipe, 2);
}

#[test]
fn test_scoped_instances_share_values() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 4);
    let spec = two_stage(0x17, WidthClass::Bit32, 1024).with_scopes(vec![
        PipeBitmap::from_bits(0b0011),
        PipeBitmap::from_bits(0b1100),
    ]);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;

    mgr.ent_write(DevTarget::pipe(DEV, 2), h, 4, RegisterValue::new(8))
        .expect("scope write");
    assert_eq!(values(&mut mgr, h, 4, ReadFrom::Hardware), vec![0, 0, 8, 8]);
    assert!(
        mgr.ent_write(DevTarget::pipe(DEV, 3), h, 4, RegisterValue::new(1)).is_err(),
        "pipe 3 is not the lowest pipe of its scope"
    );
}

#[test]
fn test_symmetric_mode_round_trip() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x18, WidthClass::Bit32, 1024);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;

    assert!(
        mgr.ent_write(DevTarget::pipe(DEV, 1), h, 3, RegisterValue::new(1)).is_err(),
        "symmetric tables take all-pipe writes only"
    );
    mgr.ent_write(DevTarget::all(DEV), h, 3, RegisterValue::new(4)).expect("write");

    mgr.set_symmetric_mode(DEV, h, false, &[]).expect("go asymmetric");
    let (symmetric, scopes) = mgr.symmetric_mode(DEV, h).expect("mode");
    assert!(!symmetric);
    assert_eq!(scopes, vec![PipeBitmap::single(0), PipeBitmap::single(1)]);
    // mode change resets the table
    assert_eq!(values(&mut mgr, h, 3, ReadFrom::Hardware), vec![0, 0]);

    mgr.ent_write(DevTarget::pipe(DEV, 1), h, 3, RegisterValue::new(6)).expect("pipe write");
    assert_eq!(values(&mut mgr, h, 3, ReadFrom::Shadow), vec![0, 6]);

    // same mode again is a no-op
    mgr.set_symmetric_mode(DEV, h, false, &[]).expect("same mode");
    assert_eq!(values(&mut mgr, h, 3, ReadFrom::Hardware), vec![0, 6]);

    mgr.set_symmetric_mode(DEV, h, true, &[]).expect("back to symmetric");
    let (symmetric, scopes) = mgr.symmetric_mode(DEV, h).expect("mode");
    assert!(symmetric);
    assert_eq!(scopes, vec![PipeBitmap::first(2)]);
    assert_eq!(values(&mut mgr, h, 3, ReadFrom::Hardware), vec![0, 0]);
}

#[test]
fn test_skip_shadow_reads_hardware() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 1);
    let spec = two_stage(0x19, WidthClass::Bit32, 1024);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;
    mgr.set_skip_shadow(DEV, h, true).expect("skip shadow");

    // data plane changes the row behind our back
    let mut row = [0u8; 16];
    stful_codec::encode(WidthClass::Bit32, 1, RegisterValue::new(77), &mut row, None);
    sim.asic().set_row(DEV, 0, 2, 1, row_addr(0, 0), row);

    assert_eq!(values(&mut mgr, h, 1, ReadFrom::Shadow), vec![77]);
}

#[test]
fn test_virtual_device_keeps_shadow_only() {
    let sim = stful::sim::SimTransport::new();
    let mut mgr = stful::StfulManager::new(sim.clone());
    mgr.add_device(stful::DeviceConfig::new(DEV, ChipFamily::Tofino2, 2).with_virtual(true))
        .expect("device");
    let spec = two_stage(0x1a, WidthClass::Bit16, 1024);
    mgr.table_add(DEV, &spec).expect("table");
    mgr.ent_write(DevTarget::all(DEV), spec.handle, 5, RegisterValue::new(3))
        .expect("write");

    assert!(sim.asic().writes().is_empty());
    assert_eq!(values(&mut mgr, spec.handle, 5, ReadFrom::Hardware), vec![3, 3]);
}

#[test]
fn test_indirect_pointer_and_table_lifecycle() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino2, 2);
    let spec = two_stage(0x1b, WidthClass::Bit16, 1024);
    add_table(&mut mgr, &sim, &spec);
    let h = spec.handle;

    let ptr = mgr.indirect_ptr(DEV, h, 1025, 2).expect("pointer");
    assert_eq!(ptr.stage_id, 3);
    assert_ne!(ptr.ptr & (1 << 23), 0, "present bit set");

    assert!(matches!(
        mgr.table_add(DEV, &spec),
        Err(StfulError::TableExists { .. })
    ));
    assert_eq!(mgr.store().handles(DEV), vec![h]);
    mgr.table_del(DEV, h).expect("delete");
    assert!(matches!(
        mgr.ent_query(DevTarget::all(DEV), h, 0, ReadFrom::Shadow),
        Err(StfulError::TableNotFound { .. })
    ));
    mgr.remove_device(DEV).expect("remove device");
    assert!(matches!(
        mgr.table_add(DEV, &spec),
        Err(StfulError::UnknownDevice(0))
    ));
}

#[test]
fn test_process_ops_applies_in_order() {
    let (mut mgr, sim) = manager(ChipFamily::Tofino, 2);
    let spec = two_stage(0x1c, WidthClass::Bit32, 1024);
    add_table(&mut mgr, &sim, &spec);
    let mut ops = stful::OpList::new();
    for value in [1, 2, 3] {
        ops.push(stful::Operation::IndexWrite {
            pipe: PipeTarget::All,
            index: 11,
            value: RegisterValue::new(value),
        })
        .expect("push op");
    }
    mgr.process_ops(DEV, spec.handle, &ops).expect("process");
    assert_eq!(values(&mut mgr, spec.handle, 11, ReadFrom::Hardware), vec![3, 3]);
}
