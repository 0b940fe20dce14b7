//! Portfolio Spatial: per-building equipment and room index
//!
//! ```text
//!   FloorPlan ─┬─ equipment ──► GridLayer<Equipment> ─┐
//!              └─ rooms ──────► GridLayer<Room> ──────┴─► SpatialIndex
//! ```
//!
//! The index is a cache derived from a building's floor plans and is never
//! persisted. Every replacement (`index_equipment`, `index_rooms`,
//! `rebuild`) builds the new layer completely before swapping it in, so a
//! failed replacement leaves the previous contents untouched.
//!
//! Radius queries are exhaustive and boundary inclusive. The grid only
//! prunes candidates; the inclusion test is [`within_radius`], the same
//! predicate used by the reference scan [`scan_nearby_equipment`].

pub mod error;
mod grid;

pub use error::{Result, SpatialError};
pub use grid::{within_radius, Located};

use grid::GridLayer;
use portfolio_model::{Equipment, Point, Room};

/// Default grid cell edge, in building units (feet).
pub const DEFAULT_CELL_SIZE: f64 = 10.0;

// ============================================================================
// Spatial Index
// ============================================================================

/// In-memory proximity index for one building.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    equipment: GridLayer<Equipment>,
    rooms: GridLayer<Room>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::with_cell_size(DEFAULT_CELL_SIZE)
    }

    /// Non-positive or non-finite sizes fall back to [`DEFAULT_CELL_SIZE`].
    pub fn with_cell_size(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            equipment: GridLayer::empty(cell_size),
            rooms: GridLayer::empty(cell_size),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    // ========================================================================
    // Replacement
    // ========================================================================

    /// Replace every equipment entry.
    pub fn index_equipment(&mut self, items: Vec<Equipment>) -> Result<()> {
        self.equipment = GridLayer::build(items, self.cell_size)?;
        Ok(())
    }

    /// Replace every room entry.
    pub fn index_rooms(&mut self, items: Vec<Room>) -> Result<()> {
        self.rooms = GridLayer::build(items, self.cell_size)?;
        Ok(())
    }

    /// Replace both collections, or neither.
    pub fn rebuild(&mut self, equipment: Vec<Equipment>, rooms: Vec<Room>) -> Result<()> {
        let equipment = GridLayer::build(equipment, self.cell_size)?;
        let rooms = GridLayer::build(rooms, self.cell_size)?;
        self.equipment = equipment;
        self.rooms = rooms;
        Ok(())
    }

    /// Build a populated index in one call.
    pub fn from_items(cell_size: f64, equipment: Vec<Equipment>, rooms: Vec<Room>) -> Result<Self> {
        let mut index = Self::with_cell_size(cell_size);
        index.rebuild(equipment, rooms)?;
        Ok(index)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every equipment item whose center lies within `radius` of `(x, y)`,
    /// boundary included. Order is unspecified.
    pub fn find_nearby_equipment(&self, x: f64, y: f64, radius: f64) -> Vec<Equipment> {
        self.equipment
            .within_radius(x, y, radius)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn find_nearby_rooms(&self, x: f64, y: f64, radius: f64) -> Vec<Room> {
        self.rooms
            .within_radius(x, y, radius)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Closest equipment item on the x/y plane and its distance. Ties go to
    /// the smaller id.
    pub fn find_nearest_equipment(&self, x: f64, y: f64) -> Option<(Equipment, f64)> {
        self.equipment
            .items()
            .iter()
            .map(|eq| (eq, eq.location.distance_2d(x, y)))
            .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)))
            .map(|(eq, d)| (eq.clone(), d))
    }

    /// Equipment whose center lies inside the inclusive x/y box.
    pub fn find_equipment_in_bounds(&self, min: Point, max: Point) -> Vec<Equipment> {
        self.equipment
            .within_bounds(min, max)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn equipment_in_room(&self, room_id: &str) -> Vec<Equipment> {
        self.equipment
            .items()
            .iter()
            .filter(|eq| eq.room_id.as_deref() == Some(room_id))
            .cloned()
            .collect()
    }

    pub fn get_equipment(&self, id: &str) -> Option<&Equipment> {
        self.equipment.get(id)
    }

    pub fn get_room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn equipment(&self) -> &[Equipment] {
        self.equipment.items()
    }

    pub fn rooms(&self) -> &[Room] {
        self.rooms.items()
    }

    pub fn equipment_count(&self) -> usize {
        self.equipment.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equipment.len() == 0 && self.rooms.len() == 0
    }
}

/// Exhaustive reference scan with the same inclusion rule as the index.
pub fn scan_nearby_equipment(items: &[Equipment], x: f64, y: f64, radius: f64) -> Vec<Equipment> {
    items
        .iter()
        .filter(|eq| within_radius(&eq.location, x, y, radius))
        .cloned()
        .collect()
}
