//! Portfolio Storage: one durable store per building
//!
//! ```text
//!   BuildingStore ──► RwLock<Box<dyn StorageDriver>> ──► LogDriver ──► building.db
//!        │
//!        └── every call takes a Context (optional deadline)
//! ```
//!
//! `BuildingStore` is the handle a building owns for its whole life. It binds
//! a driver to one building ID and one file path, guards it with a lock whose
//! acquisition is bounded by the caller's deadline, and keeps `close`
//! idempotent.
//!
//! ## Key Features
//!
//! - **Transactional saves**: a floor plan becomes visible completely or not
//!   at all, on disk and in memory
//! - **Isolation**: a log file records its owning building and refuses to be
//!   opened on behalf of any other
//! - **Bounded waits**: lock waits and I/O are checked against the deadline,
//!   surfacing `DeadlineExceeded` instead of hanging

pub mod context;
pub mod driver;
pub mod error;
pub mod query;
pub mod wal;

#[cfg(test)]
mod tests;

pub use context::Context;
pub use driver::StorageDriver;
pub use error::StoreError;
pub use query::{FloorPlanSummary, Row, Rows, StoreQuery};
pub use wal::{LogDriver, DEFAULT_COMPACT_AFTER_FRAMES};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use portfolio_model::FloorPlan;
use std::path::{Path, PathBuf};

/// File name of the per-building log inside a building directory.
pub const STORE_FILE_NAME: &str = "building.db";

// ============================================================================
// Building Store
// ============================================================================

/// Durable handle owning one building's storage connection.
pub struct BuildingStore {
    building_id: String,
    path: PathBuf,
    driver: RwLock<Box<dyn StorageDriver>>,
}

impl std::fmt::Debug for BuildingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildingStore")
            .field("building_id", &self.building_id)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl BuildingStore {
    /// Open (creating if needed) the log file at `path` for `building_id`.
    pub fn open(
        ctx: &Context,
        building_id: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, StoreError> {
        let building_id = building_id.into();
        let driver = LogDriver::new(building_id.clone());
        Self::open_with_driver(ctx, building_id, path, Box::new(driver))
    }

    /// Open with a caller-supplied driver.
    pub fn open_with_driver(
        ctx: &Context,
        building_id: impl Into<String>,
        path: impl AsRef<Path>,
        mut driver: Box<dyn StorageDriver>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        driver.connect(ctx, &path)?;
        Ok(Self {
            building_id: building_id.into(),
            path,
            driver: RwLock::new(driver),
        })
    }

    /// Build a handle around a driver without connecting it. The store
    /// reports `Closed` until [`BuildingStore::reopen`] succeeds.
    pub fn detached(
        building_id: impl Into<String>,
        path: impl AsRef<Path>,
        driver: Box<dyn StorageDriver>,
    ) -> Self {
        Self {
            building_id: building_id.into(),
            path: path.as_ref().to_path_buf(),
            driver: RwLock::new(driver),
        }
    }

    pub fn building_id(&self) -> &str {
        &self.building_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.driver.read().is_connected()
    }

    // ========================================================================
    // Lock helpers
    // ========================================================================

    fn read_driver(
        &self,
        ctx: &Context,
        op: &'static str,
    ) -> Result<RwLockReadGuard<'_, Box<dyn StorageDriver>>, StoreError> {
        ctx.check(op)?;
        match ctx.remaining() {
            None => Ok(self.driver.read()),
            Some(wait) => self
                .driver
                .try_read_for(wait)
                .ok_or(StoreError::DeadlineExceeded { op }),
        }
    }

    fn write_driver(
        &self,
        ctx: &Context,
        op: &'static str,
    ) -> Result<RwLockWriteGuard<'_, Box<dyn StorageDriver>>, StoreError> {
        ctx.check(op)?;
        match ctx.remaining() {
            None => Ok(self.driver.write()),
            Some(wait) => self
                .driver
                .try_write_for(wait)
                .ok_or(StoreError::DeadlineExceeded { op }),
        }
    }

    fn closed(&self) -> StoreError {
        StoreError::Closed {
            building_id: self.building_id.clone(),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Reconnect after `close`. A no-op while the store is open.
    pub fn reopen(&self, ctx: &Context) -> Result<(), StoreError> {
        let mut driver = self.write_driver(ctx, "reopen")?;
        driver.connect(ctx, &self.path)
    }

    pub fn save_floor_plan(&self, ctx: &Context, plan: &FloorPlan) -> Result<(), StoreError> {
        let mut driver = self.write_driver(ctx, "save_floor_plan")?;
        if !driver.is_connected() {
            return Err(self.closed());
        }
        driver.save_floor_plan(ctx, plan)
    }

    /// Run `query` against this building only. Rows produced after the
    /// deadline has passed are discarded.
    pub fn query(&self, ctx: &Context, query: &StoreQuery) -> Result<Rows, StoreError> {
        let driver = self.read_driver(ctx, "query")?;
        if !driver.is_connected() {
            return Err(self.closed());
        }
        let rows = driver.query(ctx, query)?;
        ctx.check("query")?;
        Ok(rows)
    }

    pub fn floor_plans(&self, ctx: &Context) -> Result<Vec<FloorPlan>, StoreError> {
        let driver = self.read_driver(ctx, "floor_plans")?;
        if !driver.is_connected() {
            return Err(self.closed());
        }
        driver.floor_plans(ctx)
    }

    pub fn compact(&self, ctx: &Context) -> Result<(), StoreError> {
        let mut driver = self.write_driver(ctx, "compact")?;
        if !driver.is_connected() {
            return Err(self.closed());
        }
        driver.compact(ctx)
    }

    /// Close the connection. Calling it again is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut driver = self.driver.write();
        if !driver.is_connected() {
            return Ok(());
        }
        tracing::debug!(building_id = %self.building_id, "closing building store");
        driver.close()
    }
}
