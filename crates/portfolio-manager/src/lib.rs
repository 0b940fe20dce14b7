//! Portfolio Manager: many buildings, one registry
//!
//! ```text
//!   Manager ──► Portfolio (portfolio.json) ──► Building ──┬─► BuildingStore (building.db)
//!      │                                                  ├─► SpatialIndex (in memory)
//!      │                                                  └─► building.json (mirror)
//!      │
//!      └── query_across_portfolio / find_equipment_nearby fan out over
//!          every building of the active portfolio (rayon) and merge
//! ```
//!
//! Each building owns its own store; nothing in one building's directory is
//! ever read on behalf of another. Portfolio metadata is the authoritative
//! record of which buildings exist and is rewritten atomically after every
//! change. Spatial indexes are derived state and are rebuilt on load.
//!
//! ## Key Features
//!
//! - **Isolation**: per-building stores bound to their building id
//! - **Partial failure**: a federated query reports each building's outcome
//!   separately instead of failing as a whole
//! - **Recovery**: loading reconciles metadata with committed store contents
//!   and keeps buildings whose store cannot be opened, in a degraded state
//! - **Deadlines**: federated calls honour a [`Context`] deadline, defaulting
//!   to the configured query timeout

pub mod building;
pub mod config;
pub mod error;
pub mod federation;
pub mod manager;
pub mod portfolio;
pub mod records;


pub use building::Building;
pub use config::{LoadOptions, ManagerConfig};
pub use error::{EntityKind, PortfolioError, Result};
pub use federation::{
    BuildingFailure, BuildingStats, EquipmentLocation, NearbyResult, PortfolioStats, QueryOutcome,
    QueryResult, StatusCounts,
};
pub use manager::{Manager, PortfolioSummary};
pub use portfolio::Portfolio;
pub use records::{BuildingInfo, BuildingRecord, PortfolioRecord};

pub use portfolio_model::{
    BuildingSpec, Equipment, EquipmentStatus, FloorPlan, Point, Room, ValidationError,
};
pub use portfolio_storage::{Context, Row, Rows, StoreError, StoreQuery};

pub type PortfolioId = uuid::Uuid;
pub type BuildingId = uuid::Uuid;
