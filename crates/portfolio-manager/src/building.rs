//! A building: its store, its floor plans and the spatial index derived from
//! them.
//!
//! Lock order inside a building is `state` before the store's driver lock.
//! Nothing in a building ever reaches up into its portfolio.

use crate::config::ManagerConfig;
use crate::error::{PortfolioError, Result};
use crate::federation::{BuildingStats, EquipmentLocation, StatusCounts};
use crate::records::{write_json_atomic, BuildingInfo, BuildingRecord, BUILDING_FILE};
use crate::{BuildingId, PortfolioId};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard};
use portfolio_model::{BuildingSpec, FloorPlan};
use portfolio_spatial::{within_radius, SpatialError, SpatialIndex};
use portfolio_storage::{BuildingStore, Context, LogDriver, StoreError, STORE_FILE_NAME};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

struct BuildingState {
    floor_plans: BTreeMap<String, FloorPlan>,
    metadata: serde_json::Map<String, serde_json::Value>,
    last_updated: DateTime<Utc>,
    index: SpatialIndex,
    /// Equipment id to the floor plan that holds it.
    plan_of: HashMap<String, String>,
    /// Set when the index could not be rebuilt on load; proximity queries
    /// then scan the floor plans directly.
    index_stale: bool,
}

pub struct Building {
    info: BuildingInfo,
    dir: PathBuf,
    cell_size: f64,
    store: BuildingStore,
    state: RwLock<BuildingState>,
}

impl std::fmt::Debug for Building {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Building")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("dir", &self.dir)
            .field("store", &self.store)
            .finish()
    }
}

fn log_driver(id: BuildingId, config: &ManagerConfig) -> Box<LogDriver> {
    Box::new(LogDriver::new(id.to_string()).with_compact_after(config.compact_after_frames))
}

fn build_index(
    plans: &BTreeMap<String, FloorPlan>,
    cell_size: f64,
) -> std::result::Result<(SpatialIndex, HashMap<String, String>), SpatialError> {
    let mut plan_of = HashMap::new();
    let mut equipment = Vec::new();
    let mut rooms = Vec::new();
    for plan in plans.values() {
        for eq in &plan.equipment {
            plan_of.insert(eq.id.clone(), plan.name.clone());
            equipment.push(eq.clone());
        }
        rooms.extend(plan.rooms.iter().cloned());
    }
    let index = SpatialIndex::from_items(cell_size, equipment, rooms)?;
    Ok((index, plan_of))
}

impl Building {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create building `id` in `dir` (which must already exist) and open
    /// its store.
    pub(crate) fn create(
        ctx: &Context,
        id: BuildingId,
        portfolio_id: PortfolioId,
        dir: PathBuf,
        spec: BuildingSpec,
        config: &ManagerConfig,
    ) -> Result<Self> {
        let now = Utc::now();
        let info = BuildingInfo {
            id,
            portfolio_id,
            name: spec.name,
            address: spec.address,
            building_type: spec.building_type,
            square_feet: spec.square_feet,
            floors: spec.floors,
            year_built: spec.year_built,
            created_at: now,
        };
        let store = BuildingStore::open_with_driver(
            ctx,
            id.to_string(),
            dir.join(STORE_FILE_NAME),
            log_driver(id, config),
        )
        .map_err(|e| PortfolioError::from_store(id, "add_building", e))?;

        let cell_size = config.spatial_cell_size;
        Ok(Self {
            info,
            dir,
            cell_size,
            store,
            state: RwLock::new(BuildingState {
                floor_plans: BTreeMap::new(),
                metadata: spec.metadata,
                last_updated: now,
                index: SpatialIndex::with_cell_size(cell_size),
                plan_of: HashMap::new(),
                index_stale: false,
            }),
        })
    }

    /// Rebuild a building from its metadata record. Never fails: a store
    /// that cannot be opened leaves the building degraded (queries against it
    /// report the store error) and an index that cannot be rebuilt is marked
    /// stale.
    ///
    /// Floor plans are reconciled with the store: committed plans the
    /// metadata lacks or disagrees with are adopted from the store, and
    /// metadata plans missing from the store are written back to it. The
    /// returned flag is true when the metadata changed.
    pub(crate) fn restore(
        ctx: &Context,
        record: BuildingRecord,
        dir: PathBuf,
        config: &ManagerConfig,
    ) -> (Self, bool) {
        let id = record.info.id;
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!(building_id = %id, path = %dir.display(), error = %err, "failed to recreate building directory");
        }

        let path = dir.join(STORE_FILE_NAME);
        let store = match BuildingStore::open_with_driver(
            ctx,
            id.to_string(),
            &path,
            log_driver(id, config),
        ) {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(building_id = %id, path = %path.display(), error = %err, "building store unavailable, loading degraded");
                BuildingStore::detached(id.to_string(), &path, log_driver(id, config))
            }
        };

        let mut floor_plans = record.floor_plans;
        let mut changed = false;
        if store.is_open() {
            match store.floor_plans(ctx) {
                Ok(stored) => {
                    let stored: BTreeMap<String, FloorPlan> =
                        stored.into_iter().map(|p| (p.name.clone(), p)).collect();
                    for (name, plan) in &floor_plans {
                        if stored.contains_key(name) {
                            continue;
                        }
                        match store.save_floor_plan(ctx, plan) {
                            Ok(()) => tracing::info!(building_id = %id, floor_plan = %name, "restored floor plan into store"),
                            Err(err) => tracing::warn!(building_id = %id, floor_plan = %name, error = %err, "failed to restore floor plan into store"),
                        }
                    }
                    for (name, plan) in stored {
                        if floor_plans.get(&name) != Some(&plan) {
                            tracing::info!(building_id = %id, floor_plan = %name, "adopting floor plan from store");
                            floor_plans.insert(name, plan);
                            changed = true;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(building_id = %id, error = %err, "failed to read floor plans from store");
                }
            }
        }

        let cell_size = config.spatial_cell_size;
        let (index, plan_of, index_stale) = match build_index(&floor_plans, cell_size) {
            Ok((index, plan_of)) => (index, plan_of, false),
            Err(err) => {
                tracing::warn!(building_id = %id, error = %err, "spatial index rebuild failed, marking stale");
                (SpatialIndex::with_cell_size(cell_size), HashMap::new(), true)
            }
        };

        let building = Self {
            info: record.info,
            dir,
            cell_size,
            store,
            state: RwLock::new(BuildingState {
                floor_plans,
                metadata: record.metadata,
                last_updated: record.last_updated,
                index,
                plan_of,
                index_stale,
            }),
        };
        (building, changed)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> BuildingId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &BuildingInfo {
        &self.info
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &BuildingStore {
        &self.store
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.state.read().last_updated
    }

    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        self.state.read().metadata.clone()
    }

    pub fn floor_plan(&self, name: &str) -> Option<FloorPlan> {
        self.state.read().floor_plans.get(name).cloned()
    }

    /// All floor plans in name order.
    pub fn floor_plans(&self) -> Vec<FloorPlan> {
        self.state.read().floor_plans.values().cloned().collect()
    }

    pub fn floor_plan_count(&self) -> usize {
        self.state.read().floor_plans.len()
    }

    pub fn is_index_stale(&self) -> bool {
        self.state.read().index_stale
    }

    /// Run `f` against the current spatial index.
    pub fn with_index<R>(&self, f: impl FnOnce(&SpatialIndex) -> R) -> R {
        f(&self.state.read().index)
    }

    /// Snapshot of everything persisted for this building.
    pub fn record(&self) -> BuildingRecord {
        let state = self.state.read();
        BuildingRecord {
            info: self.info.clone(),
            metadata: state.metadata.clone(),
            floor_plans: state.floor_plans.clone(),
            last_updated: state.last_updated,
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Validate `plan`, index it, commit it to the store and only then make
    /// it visible. A plan with an existing name replaces the old one.
    pub fn add_floor_plan(&self, ctx: &Context, mut plan: FloorPlan) -> Result<()> {
        let building_id = self.info.id;
        plan.validate()
            .map_err(|source| PortfolioError::InvalidFloorPlan {
                building_id,
                source,
            })?;

        let mut state = self.state.write();
        if let Some(existing) = state.floor_plans.get(&plan.name) {
            plan.created_at = existing.created_at;
            plan.updated_at = Utc::now();
        }
        let mut plans = state.floor_plans.clone();
        plans.insert(plan.name.clone(), plan.clone());
        let (index, plan_of) = build_index(&plans, self.cell_size)
            .map_err(|source| PortfolioError::IndexRebuild {
                building_id,
                source,
            })?;

        self.store
            .save_floor_plan(ctx, &plan)
            .map_err(|e| PortfolioError::from_store(building_id, "add_floor_plan", e))?;

        state.floor_plans = plans;
        state.index = index;
        state.plan_of = plan_of;
        state.index_stale = false;
        state.last_updated = Utc::now();
        tracing::info!(
            building_id = %building_id,
            floor_plan = %plan.name,
            equipment = plan.equipment.len(),
            rooms = plan.rooms.len(),
            "floor plan added"
        );
        Ok(())
    }

    /// Retry a failed index rebuild.
    pub fn reindex(&self) -> Result<()> {
        let mut state = self.state.write();
        let (index, plan_of) =
            build_index(&state.floor_plans, self.cell_size).map_err(|source| {
                PortfolioError::IndexRebuild {
                    building_id: self.info.id,
                    source,
                }
            })?;
        state.index = index;
        state.plan_of = plan_of;
        state.index_stale = false;
        Ok(())
    }

    /// Rewrite `building.json` from current state.
    pub fn write_mirror(&self) -> Result<()> {
        write_json_atomic(&self.dir.join(BUILDING_FILE), &self.record())
    }

    pub fn close(&self) -> Result<()> {
        self.store
            .close()
            .map_err(|e| PortfolioError::from_store(self.info.id, "close", e))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn read_state(
        &self,
        ctx: &Context,
        op: &'static str,
    ) -> std::result::Result<RwLockReadGuard<'_, BuildingState>, StoreError> {
        ctx.check(op)?;
        match ctx.remaining() {
            None => Ok(self.state.read()),
            Some(wait) => self
                .state
                .try_read_for(wait)
                .ok_or(StoreError::DeadlineExceeded { op }),
        }
    }

    /// Equipment within `radius` of `(x, y)`, nearest first.
    pub fn find_equipment_nearby(
        &self,
        ctx: &Context,
        x: f64,
        y: f64,
        radius: f64,
    ) -> std::result::Result<Vec<EquipmentLocation>, StoreError> {
        let state = self.read_state(ctx, "find_equipment_nearby")?;
        let locate = |floor_plan: String, equipment: portfolio_model::Equipment| {
            let distance = equipment.location.distance_2d(x, y);
            EquipmentLocation {
                building_id: self.info.id,
                building_name: self.info.name.clone(),
                floor_plan,
                equipment,
                distance,
            }
        };

        let mut found = Vec::new();
        if state.index_stale {
            for plan in state.floor_plans.values() {
                for eq in &plan.equipment {
                    if within_radius(&eq.location, x, y, radius) {
                        found.push(locate(plan.name.clone(), eq.clone()));
                    }
                }
            }
        } else {
            for eq in state.index.find_nearby_equipment(x, y, radius) {
                let plan = state.plan_of.get(&eq.id).cloned().unwrap_or_default();
                found.push(locate(plan, eq));
            }
        }
        drop(state);
        ctx.check("find_equipment_nearby")?;
        crate::federation::sort_locations(&mut found);
        Ok(found)
    }

    pub fn stats(&self) -> BuildingStats {
        let state = self.state.read();
        let mut status = StatusCounts::default();
        let mut equipment = 0;
        let mut rooms = 0;
        for plan in state.floor_plans.values() {
            equipment += plan.equipment.len();
            rooms += plan.rooms.len();
            for eq in &plan.equipment {
                status.record(eq.status);
            }
        }
        BuildingStats {
            building_id: self.info.id,
            name: self.info.name.clone(),
            square_feet: self.info.square_feet,
            floor_plans: state.floor_plans.len(),
            equipment,
            rooms,
            status,
            store_open: self.store.is_open(),
            index_stale: state.index_stale,
        }
    }
}
