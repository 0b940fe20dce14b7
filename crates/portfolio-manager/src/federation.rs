//! Result types for queries that fan out across a portfolio's buildings.

use crate::{BuildingId, PortfolioId};
use portfolio_model::{Equipment, EquipmentStatus};
use portfolio_storage::{Rows, StoreError};
use serde::Serialize;

// ============================================================================
// Store queries
// ============================================================================

/// What one building contributed to a federated store query.
#[derive(Debug)]
pub enum QueryOutcome {
    Rows(Rows),
    Failed(StoreError),
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&Rows> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StoreError> {
        match self {
            Self::Rows(_) => None,
            Self::Failed(err) => Some(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Rows(_))
    }
}

#[derive(Debug)]
pub struct QueryResult {
    pub building_id: BuildingId,
    pub building_name: String,
    pub outcome: QueryOutcome,
}

/// Stable order: building name, then id.
pub(crate) fn sort_results(results: &mut [QueryResult]) {
    results.sort_by(|a, b| {
        a.building_name
            .cmp(&b.building_name)
            .then_with(|| a.building_id.cmp(&b.building_id))
    });
}

// ============================================================================
// Spatial queries
// ============================================================================

/// One match from a portfolio-wide proximity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquipmentLocation {
    pub building_id: BuildingId,
    pub building_name: String,
    pub floor_plan: String,
    pub equipment: Equipment,
    /// Planar distance from the query point.
    pub distance: f64,
}

/// Nearest first; ties broken by building name then equipment id.
pub(crate) fn sort_locations(locations: &mut [EquipmentLocation]) {
    locations.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.building_name.cmp(&b.building_name))
            .then_with(|| a.equipment.id.cmp(&b.equipment.id))
    });
}

/// A building that could not answer a proximity search.
#[derive(Debug)]
pub struct BuildingFailure {
    pub building_id: BuildingId,
    pub building_name: String,
    pub error: StoreError,
}

/// Matches from every building that answered, plus the ones that did not.
/// An empty `locations` only means "nothing nearby" when `failed` is empty.
#[derive(Debug, Default)]
pub struct NearbyResult {
    pub locations: Vec<EquipmentLocation>,
    pub failed: Vec<BuildingFailure>,
}

impl NearbyResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        sort_locations(&mut self.locations);
        self.failed.sort_by(|a, b| {
            a.building_name
                .cmp(&b.building_name)
                .then_with(|| a.building_id.cmp(&b.building_id))
        });
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub normal: usize,
    pub needs_repair: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: EquipmentStatus) {
        match status {
            EquipmentStatus::Normal => self.normal += 1,
            EquipmentStatus::NeedsRepair => self.needs_repair += 1,
            EquipmentStatus::Failed => self.failed += 1,
        }
    }

    pub fn get(&self, status: EquipmentStatus) -> usize {
        match status {
            EquipmentStatus::Normal => self.normal,
            EquipmentStatus::NeedsRepair => self.needs_repair,
            EquipmentStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.normal + self.needs_repair + self.failed
    }

    fn merge(&mut self, other: &StatusCounts) {
        self.normal += other.normal;
        self.needs_repair += other.needs_repair;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingStats {
    pub building_id: BuildingId,
    pub name: String,
    pub square_feet: f64,
    pub floor_plans: usize,
    pub equipment: usize,
    pub rooms: usize,
    pub status: StatusCounts,
    pub store_open: bool,
    pub index_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub portfolio_id: PortfolioId,
    pub name: String,
    pub owner: String,
    pub buildings: usize,
    pub floor_plans: usize,
    pub equipment: usize,
    pub rooms: usize,
    pub square_feet: f64,
    pub status: StatusCounts,
    /// Sorted by building name.
    pub per_building: Vec<BuildingStats>,
}

impl PortfolioStats {
    pub(crate) fn aggregate(
        portfolio_id: PortfolioId,
        name: String,
        owner: String,
        mut per_building: Vec<BuildingStats>,
    ) -> Self {
        per_building.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.building_id.cmp(&b.building_id))
        });
        let mut stats = Self {
            portfolio_id,
            name,
            owner,
            buildings: per_building.len(),
            floor_plans: 0,
            equipment: 0,
            rooms: 0,
            square_feet: 0.0,
            status: StatusCounts::default(),
            per_building: Vec::new(),
        };
        for b in &per_building {
            stats.floor_plans += b.floor_plans;
            stats.equipment += b.equipment;
            stats.rooms += b.rooms;
            stats.square_feet += b.square_feet;
            stats.status.merge(&b.status);
        }
        stats.per_building = per_building;
        stats
    }
}
