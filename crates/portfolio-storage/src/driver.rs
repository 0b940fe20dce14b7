//! Storage driver interface.

use crate::context::Context;
use crate::error::StoreError;
use crate::query::{Rows, StoreQuery};
use portfolio_model::FloorPlan;
use std::path::Path;

/// The CRUD surface a per-building storage engine has to provide.
///
/// A driver is bound to one building for its whole life. `connect` on a
/// driver that is already connected to the same path is a no-op; a different
/// path is refused with [`StoreError::AlreadyConnected`]. `close` must be
/// idempotent.
pub trait StorageDriver: Send + Sync {
    fn connect(&mut self, ctx: &Context, path: &Path) -> Result<(), StoreError>;

    fn is_connected(&self) -> bool;

    fn query(&self, ctx: &Context, query: &StoreQuery) -> Result<Rows, StoreError>;

    /// Persist one plan, replacing any committed plan with the same name.
    /// Either the whole plan becomes visible or nothing does.
    fn save_floor_plan(&mut self, ctx: &Context, plan: &FloorPlan) -> Result<(), StoreError>;

    /// Every committed plan, for rebuilding derived state on load.
    fn floor_plans(&self, ctx: &Context) -> Result<Vec<FloorPlan>, StoreError>;

    /// Rewrite the backing file as one snapshot. Drivers without a log may
    /// keep the default no-op.
    fn compact(&mut self, _ctx: &Context) -> Result<(), StoreError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError>;
}
