//! End-to-end tests for the building store and its log driver

use super::*;
use crate::wal::{encode_frame, LogEntry};
use portfolio_model::{Equipment, EquipmentStatus, Point, Room};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Helper to open a store in a fresh directory
fn test_store(building_id: &str) -> (BuildingStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = BuildingStore::open(
        &Context::background(),
        building_id,
        dir.path().join(STORE_FILE_NAME),
    )
    .unwrap();
    (store, dir)
}

fn plan(name: &str, equipment: &[(&str, f64, f64)]) -> FloorPlan {
    let mut plan = FloorPlan::new(name, 1);
    for (id, x, y) in equipment {
        plan = plan.with_equipment(Equipment::new(*id, *id, Point::planar(*x, *y)));
    }
    plan
}

fn equipment_ids(rows: &Rows) -> Vec<String> {
    let mut ids: Vec<String> = rows
        .iter()
        .filter_map(|row| match row {
            Row::Equipment { equipment, .. } => Some(equipment.id.clone()),
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}

fn append_raw(path: &std::path::Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

// ============================================================================
// Save / query / reopen
// ============================================================================

#[test]
fn test_saved_plan_survives_reopen() {
    let ctx = Context::background();
    let (store, dir) = test_store("b-1");
    store
        .save_floor_plan(&ctx, &plan("L1", &[("AHU-1", 10.0, 20.0)]))
        .unwrap();
    store.close().unwrap();

    let reopened =
        BuildingStore::open(&ctx, "b-1", dir.path().join(STORE_FILE_NAME)).unwrap();
    let rows = reopened.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows), vec!["AHU-1"]);

    let plans = reopened.floor_plans(&ctx).unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].equipment[0].location, Point::planar(10.0, 20.0));
}

#[test]
fn test_same_name_replaces_plan() {
    let ctx = Context::background();
    let (store, _dir) = test_store("b-1");
    store.save_floor_plan(&ctx, &plan("L1", &[("A", 0.0, 0.0)])).unwrap();
    store.save_floor_plan(&ctx, &plan("L1", &[("B", 0.0, 0.0)])).unwrap();

    let rows = store.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows), vec!["B"]);
    assert_eq!(store.query(&ctx, &StoreQuery::FloorPlans).unwrap().len(), 1);
}

#[test]
fn test_invalid_plan_is_rejected_without_write() {
    let ctx = Context::background();
    let (store, dir) = test_store("b-1");
    let before = std::fs::metadata(dir.path().join(STORE_FILE_NAME)).unwrap().len();

    let err = store
        .save_floor_plan(&ctx, &plan("L1", &[("A", 0.0, 0.0), ("A", 1.0, 1.0)]))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidFloorPlan(_)));

    let after = std::fs::metadata(dir.path().join(STORE_FILE_NAME)).unwrap().len();
    assert_eq!(before, after);
}

#[test]
fn test_close_is_idempotent() {
    let ctx = Context::background();
    let (store, _dir) = test_store("b-1");
    assert!(store.is_open());
    store.close().unwrap();
    store.close().unwrap();
    assert!(!store.is_open());

    assert!(matches!(
        store.query(&ctx, &StoreQuery::AllEquipment),
        Err(StoreError::Closed { .. })
    ));
    assert!(matches!(
        store.save_floor_plan(&ctx, &plan("L1", &[])),
        Err(StoreError::Closed { .. })
    ));

    store.reopen(&ctx).unwrap();
    store.reopen(&ctx).unwrap();
    assert!(store.is_open());
}

#[test]
fn test_driver_refuses_second_path() {
    let ctx = Context::background();
    let dir = tempdir().unwrap();
    let mut driver = LogDriver::new("b-1");
    driver.connect(&ctx, &dir.path().join("a.db")).unwrap();
    driver.connect(&ctx, &dir.path().join("a.db")).unwrap();

    let err = driver.connect(&ctx, &dir.path().join("b.db")).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyConnected { .. }));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_stores_with_identical_schema_stay_isolated() {
    let ctx = Context::background();
    let (a, _da) = test_store("building-a");
    let (b, _db) = test_store("building-b");
    a.save_floor_plan(&ctx, &plan("L1", &[("A-1", 0.0, 0.0)])).unwrap();
    b.save_floor_plan(&ctx, &plan("L1", &[("B-1", 0.0, 0.0)])).unwrap();

    let rows_a = a.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    let rows_b = b.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows_a), vec!["A-1"]);
    assert_eq!(equipment_ids(&rows_b), vec!["B-1"]);
}

#[test]
fn test_foreign_log_is_refused() {
    let ctx = Context::background();
    let (store, dir) = test_store("building-a");
    store.close().unwrap();

    let err = BuildingStore::open(&ctx, "building-b", dir.path().join(STORE_FILE_NAME))
        .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable { .. }));
    assert!(err.is_open_failure());
}

// ============================================================================
// Crash recovery
// ============================================================================

#[test]
fn test_uncommitted_transaction_is_invisible() {
    let ctx = Context::background();
    let (store, dir) = test_store("b-1");
    store.save_floor_plan(&ctx, &plan("L1", &[("A", 0.0, 0.0)])).unwrap();
    store.close().unwrap();

    let path = dir.path().join(STORE_FILE_NAME);
    let mut dangling = encode_frame(&LogEntry::BeginTx {
        tx_id: 99,
        timestamp: 0,
    })
    .unwrap();
    dangling.extend(
        encode_frame(&LogEntry::PutFloorPlan {
            tx_id: 99,
            plan: plan("L2", &[("GHOST", 0.0, 0.0)]),
        })
        .unwrap(),
    );
    append_raw(&path, &dangling);

    let reopened = BuildingStore::open(&ctx, "b-1", &path).unwrap();
    let rows = reopened.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows), vec!["A"]);

    // later transactions still commit normally
    reopened
        .save_floor_plan(&ctx, &plan("L3", &[("C", 0.0, 0.0)]))
        .unwrap();
    reopened.close().unwrap();
    let again = BuildingStore::open(&ctx, "b-1", &path).unwrap();
    let rows = again.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows), vec!["A", "C"]);
}

#[test]
fn test_torn_tail_is_truncated() {
    let ctx = Context::background();
    let (store, dir) = test_store("b-1");
    store.save_floor_plan(&ctx, &plan("L1", &[("A", 0.0, 0.0)])).unwrap();
    store.close().unwrap();

    let path = dir.path().join(STORE_FILE_NAME);
    let good_len = std::fs::metadata(&path).unwrap().len();
    let frame = encode_frame(&LogEntry::CommitTx { tx_id: 7 }).unwrap();
    append_raw(&path, &frame[..frame.len() - 3]);

    let reopened = BuildingStore::open(&ctx, "b-1", &path).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    let rows = reopened.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows), vec!["A"]);
}

#[test]
fn test_corrupt_frame_refuses_open() {
    let ctx = Context::background();
    let (store, dir) = test_store("b-1");
    store.save_floor_plan(&ctx, &plan("L1", &[("A", 0.0, 0.0)])).unwrap();
    store.close().unwrap();

    let path = dir.path().join(STORE_FILE_NAME);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = BuildingStore::open(&ctx, "b-1", &path).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
}

#[test]
fn test_garbage_file_refuses_open() {
    let ctx = Context::background();
    let dir = tempdir().unwrap();
    let path = dir.path().join(STORE_FILE_NAME);
    std::fs::write(&path, b"not a building log, definitely not").unwrap();

    assert!(BuildingStore::open(&ctx, "b-1", &path).is_err());
}

#[test]
fn test_missing_directory_is_unavailable() {
    let dir = tempdir().unwrap();
    let err = BuildingStore::open(
        &Context::background(),
        "b-1",
        dir.path().join("no-such-dir").join(STORE_FILE_NAME),
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable { .. }));
}

// ============================================================================
// Compaction
// ============================================================================

#[test]
fn test_compaction_preserves_committed_state() {
    let ctx = Context::background();
    let dir = tempdir().unwrap();
    let path = dir.path().join(STORE_FILE_NAME);
    let driver = LogDriver::new("b-1").with_compact_after(8);
    let store = BuildingStore::open_with_driver(&ctx, "b-1", &path, Box::new(driver)).unwrap();

    for i in 0..10 {
        let status = if i % 2 == 0 {
            EquipmentStatus::Normal
        } else {
            EquipmentStatus::Failed
        };
        let plan = FloorPlan::new(format!("L{}", i % 3), i)
            .with_equipment(
                Equipment::new(format!("EQ-{i}"), "unit", Point::planar(i as f64, 0.0))
                    .with_status(status),
            )
            .with_room(Room::new(format!("R-{i}"), "room", Point::planar(0.0, i as f64)));
        store.save_floor_plan(&ctx, &plan).unwrap();
    }
    store.compact(&ctx).unwrap();
    store.close().unwrap();

    let reopened = BuildingStore::open(&ctx, "b-1", &path).unwrap();
    let rows = reopened.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    // L0 <- 9, L1 <- 7, L2 <- 8
    assert_eq!(equipment_ids(&rows), vec!["EQ-7", "EQ-8", "EQ-9"]);
    let failed = reopened
        .query(&ctx, &StoreQuery::EquipmentByStatus(EquipmentStatus::Failed))
        .unwrap();
    assert_eq!(equipment_ids(&failed), vec!["EQ-7", "EQ-9"]);
}

#[test]
fn test_saves_after_compaction_land_in_live_log() {
    let ctx = Context::background();
    let (store, dir) = test_store("b-1");
    let path = dir.path().join(STORE_FILE_NAME);
    store
        .save_floor_plan(&ctx, &plan("L1", &[("AHU-1", 1.0, 1.0)]))
        .unwrap();
    store.compact(&ctx).unwrap();
    let compacted_len = std::fs::metadata(&path).unwrap().len();

    store
        .save_floor_plan(&ctx, &plan("L2", &[("AHU-2", 2.0, 2.0)]))
        .unwrap();
    assert!(std::fs::metadata(&path).unwrap().len() > compacted_len);
    store.close().unwrap();

    let reopened = BuildingStore::open(&ctx, "b-1", &path).unwrap();
    let rows = reopened.query(&ctx, &StoreQuery::AllEquipment).unwrap();
    assert_eq!(equipment_ids(&rows), vec!["AHU-1", "AHU-2"]);
}

// ============================================================================
// Deadlines and failing drivers
// ============================================================================

#[test]
fn test_expired_context_fails_fast() {
    let (store, _dir) = test_store("b-1");
    let ctx = Context::with_timeout(Duration::ZERO);
    assert!(matches!(
        store.query(&ctx, &StoreQuery::AllEquipment),
        Err(StoreError::DeadlineExceeded { .. })
    ));
}

#[test]
fn test_lock_wait_is_bounded_by_deadline() {
    let (store, _dir) = test_store("b-1");
    let store = Arc::new(store);

    let guard = store.driver.write();
    let waiter = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            let ctx = Context::with_timeout(Duration::from_millis(50));
            store.query(&ctx, &StoreQuery::AllEquipment)
        })
    };
    let result = waiter.join().unwrap();
    drop(guard);

    assert!(matches!(result, Err(StoreError::DeadlineExceeded { .. })));
}

/// Driver whose saves always fail after connecting.
struct FailingDriver {
    connected: bool,
}

impl StorageDriver for FailingDriver {
    fn connect(&mut self, _ctx: &Context, _path: &std::path::Path) -> Result<(), StoreError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn query(&self, _ctx: &Context, _query: &StoreQuery) -> Result<Rows, StoreError> {
        Ok(Vec::new())
    }

    fn save_floor_plan(&mut self, _ctx: &Context, _plan: &FloorPlan) -> Result<(), StoreError> {
        Err(StoreError::io(
            "save_floor_plan",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        ))
    }

    fn floor_plans(&self, _ctx: &Context) -> Result<Vec<FloorPlan>, StoreError> {
        Ok(Vec::new())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.connected = false;
        Ok(())
    }
}

#[test]
fn test_custom_driver_errors_propagate() {
    let ctx = Context::background();
    let store = BuildingStore::open_with_driver(
        &ctx,
        "b-1",
        "unused.db",
        Box::new(FailingDriver { connected: false }),
    )
    .unwrap();

    let err = store.save_floor_plan(&ctx, &plan("L1", &[])).unwrap_err();
    assert!(matches!(err, StoreError::Io { op: "save_floor_plan", .. }));
    assert!(store.floor_plans(&ctx).unwrap().is_empty());
}
