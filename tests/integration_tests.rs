//! Integration tests for the complete portfolio pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Config file → Manager → Portfolio → Building
//! - FloorPlan → BuildingStore log → reload → SpatialIndex
//! - JSON query → federated fan-out → per-building outcomes
//!
//! Run with: cargo test --test integration_tests

use portfolio_manager::{
    BuildingSpec, Context, Equipment, EquipmentStatus, FloorPlan, Manager, ManagerConfig, Point,
    QueryOutcome, Row, StoreQuery,
};
use portfolio_storage::{BuildingStore, STORE_FILE_NAME};
use tempfile::tempdir;

fn ids(outcome: &QueryOutcome) -> Vec<String> {
    let mut ids: Vec<String> = outcome
        .rows()
        .into_iter()
        .flatten()
        .filter_map(|row| match row {
            Row::Equipment { equipment, .. } => Some(equipment.id.clone()),
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}

// ============================================================================
// Full lifecycle
// ============================================================================

#[test]
fn test_lifecycle_from_config_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("manager.json");
    let base = dir.path().join("data");
    std::fs::write(
        &config_path,
        serde_json::to_string(&serde_json::json!({
            "base_dir": base,
            "spatial_cell_size": 5.0,
            "compact_after_frames": 8,
        }))?,
    )?;

    let config = ManagerConfig::from_json_file(&config_path)?;
    let manager = Manager::new(config.clone())?;
    let portfolio = manager.create_portfolio("Acme", "jane")?;
    let tower = manager.add_building(BuildingSpec::new("Tower A").with_size(10_000.0, 5))?;

    // Enough saves to force at least one compaction of the building log.
    for level in 0..6 {
        let plan = FloorPlan::new(format!("Level {level}"), level).with_equipment(
            Equipment::new(format!("EQ-{level}"), "unit", Point::new(10.0, 20.0, level as f64))
                .with_status(if level % 2 == 0 {
                    EquipmentStatus::Normal
                } else {
                    EquipmentStatus::NeedsRepair
                }),
        );
        manager.add_floor_plan(tower.id(), plan)?;
    }
    manager.close()?;

    let fresh = Manager::new(config)?;
    fresh.load_portfolio(portfolio.id())?;
    let hits = fresh
        .find_equipment_nearby(&Context::background(), 10.0, 20.0, 0.0)?
        .locations;
    assert_eq!(hits.len(), 6);
    assert!(hits.iter().all(|h| h.building_name == "Tower A"));

    let stats = fresh.portfolio_statistics()?;
    assert_eq!(stats.status.get(EquipmentStatus::NeedsRepair), 3);
    assert_eq!(stats.floor_plans, 6);
    Ok(())
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_buildings_with_identical_plans_stay_isolated() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let manager = Manager::new(ManagerConfig::new(dir.path()))?;
    manager.create_portfolio("Acme", "jane")?;
    let a = manager.add_building(BuildingSpec::new("A"))?;
    let b = manager.add_building(BuildingSpec::new("B"))?;

    manager.add_floor_plan(
        a.id(),
        FloorPlan::new("L1", 1).with_equipment(Equipment::new("ONLY-A", "a", Point::planar(0.0, 0.0))),
    )?;
    manager.add_floor_plan(
        b.id(),
        FloorPlan::new("L1", 1).with_equipment(Equipment::new("ONLY-B", "b", Point::planar(0.0, 0.0))),
    )?;

    let results = manager.query_across_portfolio(&Context::background(), &StoreQuery::AllEquipment)?;
    assert_eq!(ids(&results[0].outcome), vec!["ONLY-A"]);
    assert_eq!(ids(&results[1].outcome), vec!["ONLY-B"]);

    // A's log cannot be opened on behalf of B.
    manager.close()?;
    let foreign = BuildingStore::open(
        &Context::background(),
        b.id().to_string(),
        a.dir().join(STORE_FILE_NAME),
    );
    assert!(foreign.is_err());
    Ok(())
}

// ============================================================================
// Queries arriving as JSON
// ============================================================================

#[test]
fn test_json_query_fans_out() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let manager = Manager::new(ManagerConfig::new(dir.path()))?;
    manager.create_portfolio("Acme", "jane")?;
    let a = manager.add_building(BuildingSpec::new("A"))?;
    manager.add_floor_plan(
        a.id(),
        FloorPlan::new("L1", 1)
            .with_equipment(Equipment::new("AHU-1", "ahu", Point::planar(1.0, 1.0)).with_type("HVAC"))
            .with_equipment(Equipment::new("PNL-1", "panel", Point::planar(2.0, 1.0)).with_type("electrical")),
    )?;

    let query: StoreQuery = serde_json::from_str(r#"{ "kind": "equipment_by_type", "arg": "hvac" }"#)?;
    let results = manager.query_across_portfolio(&Context::background(), &query)?;
    assert_eq!(ids(&results[0].outcome), vec!["AHU-1"]);
    Ok(())
}

#[test]
fn test_radius_boundary_through_manager() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let manager = Manager::new(ManagerConfig::new(dir.path()))?;
    manager.create_portfolio("Acme", "jane")?;
    let a = manager.add_building(BuildingSpec::new("A"))?;
    manager.add_floor_plan(
        a.id(),
        FloorPlan::new("L1", 1).with_equipment(Equipment::new("E", "e", Point::planar(3.0, 4.0))),
    )?;

    let ctx = Context::background();
    let at_edge = manager.find_equipment_nearby(&ctx, 0.0, 0.0, 5.0)?;
    assert!(at_edge.is_complete());
    assert_eq!(at_edge.locations.len(), 1);
    approx::assert_relative_eq!(at_edge.locations[0].distance, 5.0);
    assert!(manager
        .find_equipment_nearby(&ctx, 0.0, 0.0, 5.0 - 1e-6)?
        .locations
        .is_empty());
    Ok(())
}
