//! Integration tests across the storage and core crates.

use ancientdb_core::{
    AncientReader, AncientWriter, CoreError, FlatDatabase, Freezer, FreezerConfig,
    ResettableFreezer, TableConfig,
};
use ancientdb_storage::{MemoryVolume, Volume};
use ancientdb_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

fn faulty_freezer(tables: &[(&str, TableConfig)]) -> (Freezer, Arc<Faults>) {
    let faults = Arc::new(Faults::new());
    let inner: Arc<dyn Volume> = Arc::new(MemoryVolume::new());
    let volume: Arc<dyn Volume> = Arc::new(FaultyVolume::new(inner, Arc::clone(&faults)));
    let freezer = Freezer::open_with_volume(volume, tables, FreezerConfig::new()).unwrap();
    (freezer, faults)
}

#[test]
fn failure_on_second_table_rolls_back_first() {
    let tables = [
        ("alpha", TableConfig::new().compressed(false)),
        ("beta", TableConfig::new().compressed(false)),
    ];
    let (freezer, faults) = faulty_freezer(&tables);
    fill_tables(&freezer, &["alpha", "beta"], 0, 3, 16).unwrap();

    faults.set_target("beta.");
    faults.crash_after(0);
    let err = fill_tables(&freezer, &["alpha", "beta"], 3, 4, 16).unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)), "{err}");
    assert!(faults.has_crashed());

    assert_eq!(freezer.ancients().unwrap(), 3);
    assert!(!freezer.has_ancient("alpha", 3).unwrap());
    assert!(freezer.ancient("alpha", 3).unwrap_err().is_not_found());
    verify_tables(&freezer, &["alpha", "beta"], 0..3, 16).unwrap();
    assert_eq!(freezer.stats().snapshot().batches_aborted, 1);

    faults.reset();
    fill_tables(&freezer, &["alpha", "beta"], 3, 4, 16).unwrap();
    assert_eq!(freezer.ancients().unwrap(), 7);
    verify_tables(&freezer, &["alpha", "beta"], 0..7, 16).unwrap();
}

#[test]
fn failed_rollback_is_reported() {
    let tables = [
        ("alpha", TableConfig::new().compressed(false)),
        ("beta", TableConfig::new().compressed(false)),
    ];
    let (freezer, faults) = faulty_freezer(&tables);

    faults.set_target("beta.");
    faults.crash_after(0);
    faults.set_fail_truncate(true);
    let err = fill_tables(&freezer, &["alpha", "beta"], 0, 2, 8).unwrap_err();
    assert!(
        matches!(&err, CoreError::RollbackFailed { table, .. } if table == "alpha"),
        "{err}"
    );
    assert_eq!(freezer.ancients().unwrap(), 0);
}

#[test]
fn rotation_scenario_and_reset() {
    let temp = tempdir().unwrap();
    let dir = temp.path().join("chain");
    let tables = [("data", TableConfig::new().compressed(false))];
    let store =
        ResettableFreezer::open(&dir, &tables, FreezerConfig::new().max_table_size(2048)).unwrap();

    store
        .modify_ancients(&mut |batch| {
            for number in 0..3u64 {
                batch.append_raw("data", number, &[number as u8; 2048])?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(store.ancients().unwrap(), 3);
    for number in 0..3u64 {
        assert_eq!(store.ancient("data", number).unwrap(), vec![number as u8; 2048]);
    }
    for file in ["data.0000.rdat", "data.0001.rdat", "data.0002.rdat"] {
        assert_eq!(std::fs::metadata(dir.join(file)).unwrap().len(), 2048);
    }
    let info = store.table_info().unwrap();
    assert_eq!(info[0].tail_file, 0);
    assert_eq!(info[0].head_file, 2);

    store.reset().unwrap();
    assert_eq!(store.ancients().unwrap(), 0);
    assert!(store.ancient("data", 0).unwrap_err().is_not_found());
    assert!(!dir.join("data.0001.rdat").exists());

    store
        .modify_ancients(&mut |batch| batch.append_raw("data", 0, b"fresh"))
        .unwrap();
    assert_eq!(store.ancient("data", 0).unwrap(), b"fresh");
}

#[test]
fn prune_shrinks_prunable_tables() {
    let fixture = TestFreezer::with_tables(
        test_tables(),
        FreezerConfig::new().max_table_size(256),
    );
    fill_blocks(&*fixture, 0, 40, 64).unwrap();
    let before = fixture.ancient_size(BODIES).unwrap();
    let headers_before = fixture.ancient_size(HEADERS).unwrap();

    assert_eq!(fixture.truncate_tail(30).unwrap(), 0);
    assert!(fixture.ancient(BODIES, 29).unwrap_err().is_not_found());
    assert_eq!(fixture.ancient(HEADERS, 29).unwrap(), item_bytes(HEADERS, 29, 64));

    fixture.prune().unwrap();
    assert!(fixture.ancient_size(BODIES).unwrap() < before);
    assert_eq!(fixture.ancient_size(HEADERS).unwrap(), headers_before);
    verify_tables(&*fixture, &[BODIES], 30..40, 64).unwrap();

    let pruned = fixture.ancient_size(BODIES).unwrap();
    fixture.prune().unwrap();
    assert_eq!(fixture.ancient_size(BODIES).unwrap(), pruned);
}

#[test]
fn pruned_tail_survives_reopen() {
    let mut fixture = TestFreezer::with_tables(
        test_tables(),
        FreezerConfig::new().max_table_size(256),
    );
    fill_blocks(&*fixture, 0, 20, 64).unwrap();
    fixture.truncate_tail(12).unwrap();
    fixture.prune().unwrap();

    fixture.reopen().unwrap();
    assert_eq!(fixture.tail().unwrap(), 12);
    assert_eq!(fixture.ancients().unwrap(), 20);
    verify_tables(&*fixture, &[BODIES], 12..20, 64).unwrap();
    verify_tables(&*fixture, &[HEADERS, HASHES], 0..20, 64).unwrap();
}

#[test]
fn read_only_reopen_reads_items() {
    let mut fixture = TestFreezer::new();
    fill_blocks(&*fixture, 0, 6, 32).unwrap();
    fixture.reopen_with(FreezerConfig::new().read_only(true)).unwrap();

    verify_tables(&*fixture, &[HEADERS, HASHES, BODIES], 0..6, 32).unwrap();
    assert!(matches!(
        fill_blocks(&*fixture, 6, 1, 32),
        Err(CoreError::ReadOnly)
    ));
}

#[test]
fn crash_harness_passes() {
    let mut harness = CrashRecoveryHarness::new().unwrap();
    harness.run_all();
    harness.print_summary();
    assert!(harness.all_passed());
}

#[test]
fn flat_database_exports_freezer_items() {
    let freezer = memory_freezer();
    fill_blocks(&freezer, 0, 5, 24).unwrap();

    let temp = tempdir().unwrap();
    let path = temp.path().join("headers.flat");
    let flat = FlatDatabase::create(&path).unwrap();
    let mut batch = flat.new_batch();
    for number in 0..5u64 {
        let mut key = HEADERS.as_bytes().to_vec();
        key.extend_from_slice(&number.to_be_bytes());
        batch.put(&key, &freezer.ancient(HEADERS, number).unwrap()).unwrap();
    }
    batch.write().unwrap();
    flat.commit().unwrap();

    let exported: Vec<_> = flat
        .iter(HEADERS.as_bytes(), &2u64.to_be_bytes())
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(exported.len(), 3);
    assert_eq!(exported[0].1, item_bytes(HEADERS, 2, 24));
}

fn apply(fixture: &mut TestFreezer, model: &mut TableModel, op: &TableOp) -> Result<(), TestCaseError> {
    match op {
        TableOp::Append { items } => {
            let from = model.head();
            fixture
                .modify_ancients(&mut |batch| {
                    for (i, item) in items.iter().enumerate() {
                        batch.append_raw("items", from + i as u64, item)?;
                    }
                    Ok(())
                })
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            model.append(items);
        }
        TableOp::TruncateHead { keep } => {
            let keep = model.truncate_head(*keep);
            fixture
                .truncate_head(keep)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        TableOp::TruncateTail { tail } => {
            let tail = model.truncate_tail(*tail);
            fixture
                .truncate_tail(tail)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        TableOp::Prune => fixture
            .prune()
            .map_err(|e| TestCaseError::fail(e.to_string()))?,
        TableOp::Reopen => fixture
            .reopen()
            .map_err(|e| TestCaseError::fail(e.to_string()))?,
    }
    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn freezer_matches_model(
        config in table_config_strategy(),
        cap in file_cap_strategy(),
        ops in table_op_sequence_strategy(1, 16),
    ) {
        let config = config.prunable(true);
        let mut fixture = TestFreezer::with_tables(
            vec![("items", config)],
            FreezerConfig::new().max_table_size(cap),
        );
        let mut model = TableModel::new();

        for op in &ops {
            apply(&mut fixture, &mut model, op)?;
            prop_assert_eq!(fixture.ancients().unwrap(), model.head());
            prop_assert_eq!(fixture.tail().unwrap(), model.tail());
        }

        for number in 0..model.head() {
            match model.get(number) {
                Some(expected) => {
                    prop_assert_eq!(fixture.ancient("items", number).unwrap(), expected.to_vec());
                }
                None => prop_assert!(fixture.ancient("items", number).unwrap_err().is_not_found()),
            }
        }
        prop_assert!(fixture.ancient("items", model.head()).unwrap_err().is_not_found());
    }
}
