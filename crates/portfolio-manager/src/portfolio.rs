//! A portfolio: a named group of buildings sharing one metadata document.
//!
//! Lock order: `persist_lock`, then `state`, then a building's own state.
//! Metadata writes are serialised by `persist_lock` so concurrent additions
//! never interleave their snapshots of `portfolio.json`.

use crate::building::Building;
use crate::config::ManagerConfig;
use crate::error::{EntityKind, PortfolioError, Result};
use crate::federation::PortfolioStats;
use crate::records::{read_json, write_json_atomic, PortfolioRecord, PORTFOLIO_FILE};
use crate::{BuildingId, PortfolioId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use portfolio_model::{BuildingSpec, FloorPlan};
use portfolio_storage::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

struct PortfolioState {
    buildings: HashMap<BuildingId, Arc<Building>>,
    active_building: Option<BuildingId>,
    updated_at: DateTime<Utc>,
}

pub struct Portfolio {
    id: PortfolioId,
    name: String,
    owner: String,
    created_at: DateTime<Utc>,
    dir: PathBuf,
    config: Arc<ManagerConfig>,
    state: RwLock<PortfolioState>,
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for Portfolio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portfolio")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("dir", &self.dir)
            .finish()
    }
}

fn create_dir(path: &Path, op: &'static str, kind: EntityKind, id: Uuid) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(PortfolioError::AlreadyExists {
            kind,
            id: id.to_string(),
        }),
        Err(source) => Err(PortfolioError::DirectoryCreateFailed {
            path: path.to_path_buf(),
            op,
            source,
        }),
    }
}

fn remove_dir_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_dir_all(path) {
        tracing::warn!(path = %path.display(), error = %err, "failed to clean up directory");
    }
}

impl Portfolio {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create `<base_dir>/<new id>/` and write the initial metadata.
    pub(crate) fn create(
        config: Arc<ManagerConfig>,
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let dir = config.base_dir.join(id.to_string());
        create_dir(&dir, "create_portfolio", EntityKind::Portfolio, id)?;

        let now = Utc::now();
        let portfolio = Self {
            id,
            name: name.into(),
            owner: owner.into(),
            created_at: now,
            dir,
            config,
            state: RwLock::new(PortfolioState {
                buildings: HashMap::new(),
                active_building: None,
                updated_at: now,
            }),
            persist_lock: Mutex::new(()),
        };
        if let Err(err) = portfolio.persist() {
            remove_dir_quietly(&portfolio.dir);
            return Err(err);
        }
        tracing::info!(portfolio_id = %id, name = %portfolio.name, "portfolio created");
        Ok(portfolio)
    }

    /// Rebuild a portfolio and its buildings from `portfolio.json`.
    pub(crate) fn load(ctx: &Context, config: Arc<ManagerConfig>, id: PortfolioId) -> Result<Self> {
        let dir = config.base_dir.join(id.to_string());
        let path = dir.join(PORTFOLIO_FILE);
        let record: PortfolioRecord = read_json(&path, EntityKind::Portfolio, &id.to_string())?;
        if record.id != id {
            return Err(PortfolioError::CorruptMetadata {
                path,
                reason: format!("document describes portfolio {}", record.id),
            });
        }

        let mut buildings = HashMap::new();
        let mut reconciled = false;
        for (building_id, building) in record.buildings {
            if building.info.id != building_id {
                return Err(PortfolioError::CorruptMetadata {
                    path,
                    reason: format!(
                        "building entry {building_id} describes building {}",
                        building.info.id
                    ),
                });
            }
            let building_dir = dir.join(building_id.to_string());
            let (building, changed) = Building::restore(ctx, building, building_dir, &config);
            reconciled |= changed;
            if let Err(err) = building.write_mirror() {
                tracing::warn!(building_id = %building_id, error = %err, "failed to regenerate building metadata");
            }
            buildings.insert(building_id, Arc::new(building));
        }

        let active_building = record
            .active_building
            .filter(|id| buildings.contains_key(id));
        let portfolio = Self {
            id,
            name: record.name,
            owner: record.owner,
            created_at: record.created_at,
            dir,
            config,
            state: RwLock::new(PortfolioState {
                buildings,
                active_building,
                updated_at: record.updated_at,
            }),
            persist_lock: Mutex::new(()),
        };
        if reconciled {
            portfolio.touch();
            portfolio.persist()?;
        }
        tracing::info!(
            portfolio_id = %id,
            buildings = portfolio.building_count(),
            reconciled,
            "portfolio loaded"
        );
        Ok(portfolio)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> PortfolioId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().updated_at
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn building_count(&self) -> usize {
        self.state.read().buildings.len()
    }

    pub fn building(&self, id: BuildingId) -> Result<Arc<Building>> {
        self.state
            .read()
            .buildings
            .get(&id)
            .cloned()
            .ok_or_else(|| PortfolioError::building_not_found(id))
    }

    /// Buildings in name order.
    pub fn buildings(&self) -> Vec<Arc<Building>> {
        let mut buildings: Vec<_> = self.state.read().buildings.values().cloned().collect();
        buildings.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(&b.id())));
        buildings
    }

    pub fn active_building(&self) -> Result<Arc<Building>> {
        let state = self.state.read();
        state
            .active_building
            .and_then(|id| state.buildings.get(&id).cloned())
            .ok_or(PortfolioError::BuildingNotActive {
                portfolio_id: self.id,
            })
    }

    /// Snapshot of the metadata document.
    pub fn record(&self) -> PortfolioRecord {
        let state = self.state.read();
        PortfolioRecord {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner.clone(),
            created_at: self.created_at,
            updated_at: state.updated_at,
            active_building: state.active_building,
            buildings: state
                .buildings
                .iter()
                .map(|(id, b)| (*id, b.record()))
                .collect(),
        }
    }

    pub fn statistics(&self) -> PortfolioStats {
        let per_building = self.buildings().iter().map(|b| b.stats()).collect();
        PortfolioStats::aggregate(self.id, self.name.clone(), self.owner.clone(), per_building)
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    fn touch(&self) {
        self.state.write().updated_at = Utc::now();
    }

    /// Write `portfolio.json` from current state.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock();
        write_json_atomic(&self.dir.join(PORTFOLIO_FILE), &self.record())
    }

    /// Create a building directory and store, then record it in metadata.
    /// Any failure removes what was created.
    pub fn add_building(&self, ctx: &Context, spec: BuildingSpec) -> Result<Arc<Building>> {
        let id = Uuid::new_v4();
        let dir = self.dir.join(id.to_string());
        create_dir(&dir, "add_building", EntityKind::Building, id)?;

        let building = match Building::create(ctx, id, self.id, dir.clone(), spec, &self.config) {
            Ok(building) => Arc::new(building),
            Err(err) => {
                remove_dir_quietly(&dir);
                return Err(err);
            }
        };

        {
            let mut state = self.state.write();
            state.buildings.insert(id, Arc::clone(&building));
            state.updated_at = Utc::now();
        }
        if let Err(err) = self.persist() {
            self.state.write().buildings.remove(&id);
            if let Err(close_err) = building.close() {
                tracing::warn!(building_id = %id, error = %close_err, "failed to close store during rollback");
            }
            remove_dir_quietly(&dir);
            return Err(err);
        }
        if let Err(err) = building.write_mirror() {
            tracing::warn!(building_id = %id, error = %err, "failed to write building metadata mirror");
        }

        tracing::info!(portfolio_id = %self.id, building_id = %id, name = %building.name(), "building added");
        Ok(building)
    }

    /// Add (or replace) a floor plan on building `id` and persist metadata.
    ///
    /// Once the building has committed the plan to its store the change is
    /// made: a failed metadata write is only logged, and the next load adopts
    /// the plan from the store.
    pub fn add_floor_plan(&self, ctx: &Context, id: BuildingId, plan: FloorPlan) -> Result<()> {
        let building = self.building(id)?;
        building.add_floor_plan(ctx, plan)?;
        self.touch();
        if let Err(err) = self.persist() {
            tracing::warn!(portfolio_id = %self.id, building_id = %id, error = %err, "failed to persist portfolio metadata after floor plan commit");
        }
        if let Err(err) = building.write_mirror() {
            tracing::warn!(building_id = %id, error = %err, "failed to write building metadata mirror");
        }
        Ok(())
    }

    pub fn set_active_building(&self, id: BuildingId) -> Result<()> {
        {
            let mut state = self.state.write();
            if !state.buildings.contains_key(&id) {
                return Err(PortfolioError::building_not_found(id));
            }
            state.active_building = Some(id);
        }
        if let Err(err) = self.persist() {
            tracing::warn!(portfolio_id = %self.id, error = %err, "failed to persist active building");
        }
        Ok(())
    }

    /// Close every open building store ahead of a reload and return the
    /// buildings that were open, for [`Portfolio::resume_stores`].
    pub(crate) fn suspend_stores(&self) -> Vec<Arc<Building>> {
        let open: Vec<_> = self
            .buildings()
            .into_iter()
            .filter(|b| b.store().is_open())
            .collect();
        for building in &open {
            if let Err(err) = building.close() {
                tracing::warn!(building_id = %building.id(), error = %err, "failed to close building store before reload");
            }
        }
        open
    }

    /// Reopen stores closed by [`Portfolio::suspend_stores`].
    pub(crate) fn resume_stores(&self, ctx: &Context, buildings: &[Arc<Building>]) {
        for building in buildings {
            if let Err(err) = building.store().reopen(ctx) {
                tracing::warn!(building_id = %building.id(), error = %err, "failed to reopen building store");
            }
        }
    }

    /// Close every building store. Errors are logged and the first returned.
    pub fn close(&self) -> Result<()> {
        let mut first = None;
        for building in self.buildings() {
            if let Err(err) = building.close() {
                tracing::warn!(building_id = %building.id(), error = %err, "failed to close building store");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
