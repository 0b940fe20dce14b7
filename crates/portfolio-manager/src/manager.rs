//! Top-level registry of portfolios with federated queries.

use crate::building::Building;
use crate::config::{LoadOptions, ManagerConfig};
use crate::error::{EntityKind, PortfolioError, Result};
use crate::federation::{
    sort_results, BuildingFailure, NearbyResult, PortfolioStats, QueryOutcome, QueryResult,
};
use crate::portfolio::Portfolio;
use crate::records::{read_json, PortfolioRecord, PORTFOLIO_FILE};
use crate::{BuildingId, PortfolioId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use portfolio_model::{BuildingSpec, FloorPlan};
use portfolio_storage::{Context, StoreQuery};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct Registry {
    portfolios: HashMap<PortfolioId, Arc<Portfolio>>,
    active: Option<PortfolioId>,
}

/// A portfolio found under the base directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub id: PortfolioId,
    pub name: String,
    pub owner: String,
    pub buildings: usize,
    pub updated_at: DateTime<Utc>,
    /// Whether this manager currently holds it in memory.
    pub loaded: bool,
}

/// Entry point: owns every loaded portfolio and tracks the active one.
///
/// All methods take `&self`; a `Manager` can be shared across threads behind
/// an `Arc`.
pub struct Manager {
    config: Arc<ManagerConfig>,
    registry: RwLock<Registry>,
    /// Per-portfolio gates held across a load.
    loading: Mutex<HashMap<PortfolioId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("Manager")
            .field("base_dir", &self.config.base_dir)
            .field("portfolios", &registry.portfolios.len())
            .field("active", &registry.active)
            .finish()
    }
}

impl Manager {
    /// Create a manager rooted at `config.base_dir`, creating the directory
    /// if needed.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir).map_err(|source| {
            PortfolioError::DirectoryCreateFailed {
                path: config.base_dir.clone(),
                op: "new",
                source,
            }
        })?;
        tracing::debug!(base_dir = %config.base_dir.display(), "portfolio manager ready");
        Ok(Self {
            config: Arc::new(config),
            registry: RwLock::new(Registry::default()),
            loading: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Context for calls that take none from the caller.
    fn op_context(&self) -> Context {
        Context::background().or_timeout(self.config.query_timeout())
    }

    // ========================================================================
    // Portfolios
    // ========================================================================

    /// Create a portfolio on disk, register it and make it active.
    pub fn create_portfolio(
        &self,
        name: impl Into<String>,
        owner: impl Into<String>,
    ) -> Result<Arc<Portfolio>> {
        let portfolio = Arc::new(Portfolio::create(Arc::clone(&self.config), name, owner)?);
        let mut registry = self.registry.write();
        registry.portfolios.insert(portfolio.id(), Arc::clone(&portfolio));
        registry.active = Some(portfolio.id());
        Ok(portfolio)
    }

    /// Load with the configured reload policy.
    pub fn load_portfolio(&self, id: PortfolioId) -> Result<Arc<Portfolio>> {
        self.load_portfolio_with(
            id,
            LoadOptions {
                force_reload: self.config.force_reload,
            },
        )
    }

    /// Return the in-memory portfolio, or rebuild it from disk. With
    /// `force_reload` the in-memory copy is replaced, but only once the
    /// reload has succeeded. Either way the portfolio becomes active.
    ///
    /// Loads of one id are serialised, so a building store is never opened
    /// by two loads at once.
    pub fn load_portfolio_with(&self, id: PortfolioId, options: LoadOptions) -> Result<Arc<Portfolio>> {
        let gate = self.load_gate(id);
        let _loading = gate.lock();

        let previous = {
            let mut registry = self.registry.write();
            match registry.portfolios.get(&id).cloned() {
                Some(existing) if !options.force_reload => {
                    registry.active = Some(id);
                    return Ok(existing);
                }
                previous => previous,
            }
        };

        // At most one open connection per building store: release the old
        // handles before the reload opens new ones.
        let suspended = previous
            .as_ref()
            .map(|p| p.suspend_stores())
            .unwrap_or_default();

        let ctx = self.op_context();
        let loaded = match Portfolio::load(&ctx, Arc::clone(&self.config), id) {
            Ok(loaded) => Arc::new(loaded),
            Err(err) => {
                if let Some(previous) = &previous {
                    tracing::warn!(portfolio_id = %id, error = %err, "reload failed, keeping loaded portfolio");
                    previous.resume_stores(&self.op_context(), &suspended);
                }
                return Err(err);
            }
        };

        let mut registry = self.registry.write();
        registry.portfolios.insert(id, Arc::clone(&loaded));
        registry.active = Some(id);
        Ok(loaded)
    }

    fn load_gate(&self, id: PortfolioId) -> Arc<Mutex<()>> {
        Arc::clone(self.loading.lock().entry(id).or_default())
    }

    pub fn get_portfolio(&self, id: PortfolioId) -> Result<Arc<Portfolio>> {
        self.registry
            .read()
            .portfolios
            .get(&id)
            .cloned()
            .ok_or_else(|| PortfolioError::portfolio_not_found(id))
    }

    /// Make a portfolio active, loading it from disk if needed.
    pub fn set_active_portfolio(&self, id: PortfolioId) -> Result<Arc<Portfolio>> {
        {
            let mut registry = self.registry.write();
            if let Some(portfolio) = registry.portfolios.get(&id).cloned() {
                registry.active = Some(id);
                return Ok(portfolio);
            }
        }
        self.load_portfolio_with(id, LoadOptions::default())
    }

    pub fn active_portfolio(&self) -> Result<Arc<Portfolio>> {
        self.active_for("active_portfolio")
    }

    fn active_for(&self, op: &'static str) -> Result<Arc<Portfolio>> {
        let registry = self.registry.read();
        registry
            .active
            .and_then(|id| registry.portfolios.get(&id).cloned())
            .ok_or(PortfolioError::PortfolioNotActive { op })
    }

    /// Every portfolio under the base directory, by name. Unreadable
    /// documents are skipped with a warning.
    pub fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>> {
        let base = &self.config.base_dir;
        let entries = std::fs::read_dir(base).map_err(|source| PortfolioError::MetadataIo {
            path: base.clone(),
            source,
        })?;
        let loaded = self.registry.read().portfolios.clone();

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            if let Some(portfolio) = loaded.get(&id) {
                summaries.push(PortfolioSummary {
                    id,
                    name: portfolio.name().to_string(),
                    owner: portfolio.owner().to_string(),
                    buildings: portfolio.building_count(),
                    updated_at: portfolio.updated_at(),
                    loaded: true,
                });
                continue;
            }
            let path = entry.path().join(PORTFOLIO_FILE);
            match read_json::<PortfolioRecord>(&path, EntityKind::Portfolio, &id.to_string()) {
                Ok(record) => summaries.push(PortfolioSummary {
                    id,
                    name: record.name,
                    owner: record.owner,
                    buildings: record.buildings.len(),
                    updated_at: record.updated_at,
                    loaded: false,
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable portfolio");
                }
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    // ========================================================================
    // Buildings (active portfolio)
    // ========================================================================

    pub fn add_building(&self, spec: BuildingSpec) -> Result<Arc<Building>> {
        let portfolio = self.active_for("add_building")?;
        portfolio.add_building(&self.op_context(), spec)
    }

    pub fn add_floor_plan(&self, building_id: BuildingId, plan: FloorPlan) -> Result<()> {
        let portfolio = self.active_for("add_floor_plan")?;
        portfolio.add_floor_plan(&self.op_context(), building_id, plan)
    }

    pub fn get_building(&self, id: BuildingId) -> Result<Arc<Building>> {
        self.active_for("get_building")?.building(id)
    }

    pub fn set_active_building(&self, id: BuildingId) -> Result<()> {
        self.active_for("set_active_building")?.set_active_building(id)
    }

    pub fn active_building(&self) -> Result<Arc<Building>> {
        self.active_for("active_building")?.active_building()
    }

    // ========================================================================
    // Federated queries
    // ========================================================================

    /// Run `query` against every building of the active portfolio in
    /// parallel. A failing building yields a `Failed` outcome; the call as a
    /// whole still succeeds. Results come back in building-name order.
    pub fn query_across_portfolio(
        &self,
        ctx: &Context,
        query: &StoreQuery,
    ) -> Result<Vec<QueryResult>> {
        let portfolio = self.active_for("query_across_portfolio")?;
        let ctx = ctx.or_timeout(self.config.query_timeout());

        let mut results: Vec<QueryResult> = portfolio
            .buildings()
            .par_iter()
            .map(|building| {
                let outcome = match building.store().query(&ctx, query) {
                    Ok(rows) => QueryOutcome::Rows(rows),
                    Err(err) => {
                        tracing::warn!(building_id = %building.id(), error = %err, "building query failed");
                        QueryOutcome::Failed(err)
                    }
                };
                QueryResult {
                    building_id: building.id(),
                    building_name: building.name().to_string(),
                    outcome,
                }
            })
            .collect();
        sort_results(&mut results);
        tracing::debug!(portfolio_id = %portfolio.id(), buildings = results.len(), "federated query complete");
        Ok(results)
    }

    /// Equipment within `radius` of `(x, y)` in every building of the
    /// active portfolio, nearest first. Buildings that cannot answer are
    /// reported in `failed` rather than failing the call.
    pub fn find_equipment_nearby(
        &self,
        ctx: &Context,
        x: f64,
        y: f64,
        radius: f64,
    ) -> Result<NearbyResult> {
        let portfolio = self.active_for("find_equipment_nearby")?;
        let ctx = ctx.or_timeout(self.config.query_timeout());

        let per_building: Vec<_> = portfolio
            .buildings()
            .into_par_iter()
            .map(|building| {
                let found = building.find_equipment_nearby(&ctx, x, y, radius);
                (building, found)
            })
            .collect();

        let mut result = NearbyResult::default();
        for (building, found) in per_building {
            match found {
                Ok(mut locations) => result.locations.append(&mut locations),
                Err(error) => {
                    tracing::warn!(building_id = %building.id(), error = %error, "building proximity search failed");
                    result.failed.push(BuildingFailure {
                        building_id: building.id(),
                        building_name: building.name().to_string(),
                        error,
                    });
                }
            }
        }
        result.sort();
        Ok(result)
    }

    pub fn portfolio_statistics(&self) -> Result<PortfolioStats> {
        Ok(self.active_for("portfolio_statistics")?.statistics())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close every building store of every loaded portfolio and forget them.
    /// Errors are logged; the first one is returned after all stores have
    /// been attempted.
    pub fn close(&self) -> Result<()> {
        let portfolios: Vec<_> = {
            let mut registry = self.registry.write();
            registry.active = None;
            registry.portfolios.drain().map(|(_, p)| p).collect()
        };
        let mut first = None;
        for portfolio in portfolios {
            if let Err(err) = portfolio.close() {
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
