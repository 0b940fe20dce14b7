//! Concurrent callers against one manager

use portfolio_manager::{
    BuildingSpec, Context, Equipment, FloorPlan, Manager, ManagerConfig, Point, StoreQuery,
};
use std::sync::Arc;
use std::thread;

fn plan(level: i32, prefix: &str, count: usize) -> FloorPlan {
    let mut plan = FloorPlan::new(format!("Level {level}"), level);
    for i in 0..count {
        plan = plan.with_equipment(Equipment::new(
            format!("{prefix}-{level}-{i}"),
            "unit",
            Point::planar(i as f64, level as f64),
        ));
    }
    plan
}

#[test]
fn concurrent_building_additions_all_persist() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = Arc::new(Manager::new(ManagerConfig::new(dir.path()))?);
    let portfolio = manager.create_portfolio("Acme", "jane")?;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.add_building(BuildingSpec::new(format!("Building {i}"))))
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }
    assert_eq!(portfolio.building_count(), 8);
    manager.close()?;

    let fresh = Manager::new(ManagerConfig::new(dir.path()))?;
    let reloaded = fresh.load_portfolio(portfolio.id())?;
    assert_eq!(reloaded.building_count(), 8);
    Ok(())
}

#[test]
fn floor_plan_writers_and_federated_readers_interleave() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = Arc::new(Manager::new(ManagerConfig::new(dir.path()).with_compact_after(16))?);
    manager.create_portfolio("Acme", "jane")?;
    let buildings: Vec<_> = (0..3)
        .map(|i| manager.add_building(BuildingSpec::new(format!("B{i}"))))
        .collect::<Result<_, _>>()?;

    let mut handles = Vec::new();
    for (b, building) in buildings.iter().enumerate() {
        for writer in 0..2 {
            let manager = Arc::clone(&manager);
            let id = building.id();
            let prefix = format!("b{b}w{writer}");
            handles.push(thread::spawn(move || -> anyhow::Result<()> {
                for level in 0..5 {
                    // Distinct plan names per writer keep equipment ids unique.
                    let level = writer * 10 + level;
                    manager.add_floor_plan(id, plan(level, &prefix, 4))?;
                }
                Ok(())
            }));
        }
    }
    for _ in 0..2 {
        let manager = Arc::clone(&manager);
        handles.push(thread::spawn(move || -> anyhow::Result<()> {
            for _ in 0..20 {
                let results = manager
                    .query_across_portfolio(&Context::background(), &StoreQuery::AllEquipment)?;
                assert_eq!(results.len(), 3);
                assert!(results.iter().all(|r| r.outcome.is_ok()));
                let nearby = manager.find_equipment_nearby(&Context::background(), 1.0, 1.0, 3.0)?;
                assert!(nearby.is_complete());
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    for building in &buildings {
        assert_eq!(building.floor_plan_count(), 10);
        assert_eq!(building.with_index(|index| index.equipment_count()), 40);
    }
    let stats = manager.portfolio_statistics()?;
    assert_eq!(stats.equipment, 120);
    Ok(())
}

#[test]
fn concurrent_loads_of_one_portfolio_share_one_instance() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = ManagerConfig::new(dir.path()).with_compact_after(4);
    let (portfolio_id, building_id) = {
        let manager = Manager::new(config.clone())?;
        let portfolio = manager.create_portfolio("Acme", "jane")?;
        let building = manager.add_building(BuildingSpec::new("Tower A"))?;
        manager.add_floor_plan(building.id(), plan(1, "eq", 3))?;
        manager.close()?;
        (portfolio.id(), building.id())
    };

    let manager = Arc::new(Manager::new(config.clone())?);
    let barrier = Arc::new(std::sync::Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.load_portfolio(portfolio_id)
            })
        })
        .collect();
    let mut loaded = Vec::new();
    for handle in handles {
        loaded.push(handle.join().expect("worker panicked")?);
    }
    assert!(loaded.iter().all(|p| Arc::ptr_eq(p, &loaded[0])));

    // Saves past the compaction threshold go through the single live handle.
    for level in 2..6 {
        manager.add_floor_plan(building_id, plan(level, "eq", 3))?;
    }
    manager.close()?;

    let fresh = Manager::new(config)?;
    fresh.load_portfolio(portfolio_id)?;
    let building = fresh.get_building(building_id)?;
    assert_eq!(building.floor_plan_count(), 5);
    assert_eq!(building.with_index(|index| index.equipment_count()), 15);
    Ok(())
}
