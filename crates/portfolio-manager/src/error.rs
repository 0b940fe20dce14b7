//! Portfolio manager error taxonomy.

use crate::{BuildingId, PortfolioId};
use portfolio_model::ValidationError;
use portfolio_spatial::SpatialError;
use portfolio_storage::StoreError;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Portfolio,
    Building,
    FloorPlan,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Portfolio => "portfolio",
            Self::Building => "building",
            Self::FloorPlan => "floor plan",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    /// The building's store could not be opened.
    #[error("storage unavailable for building {building_id} during {op}: {source}")]
    StorageUnavailable {
        building_id: BuildingId,
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A query or save failed on an open store.
    #[error("storage I/O failed for building {building_id} during {op}: {source}")]
    StorageIo {
        building_id: BuildingId,
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("corrupt metadata at {}: {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    #[error("failed to create directory {} during {op}: {source}", path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no active portfolio for {op}")]
    PortfolioNotActive { op: &'static str },

    #[error("no active building in portfolio {portfolio_id}")]
    BuildingNotActive { portfolio_id: PortfolioId },

    #[error("invalid floor plan for building {building_id}: {source}")]
    InvalidFloorPlan {
        building_id: BuildingId,
        #[source]
        source: ValidationError,
    },

    #[error("spatial index rebuild failed for building {building_id}: {source}")]
    IndexRebuild {
        building_id: BuildingId,
        #[source]
        source: SpatialError,
    },

    #[error("failed to write metadata {}: {source}", path.display())]
    MetadataIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl PortfolioError {
    /// Classify a store failure for `building_id`.
    pub fn from_store(building_id: BuildingId, op: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::InvalidFloorPlan(source) => Self::InvalidFloorPlan {
                building_id,
                source,
            },
            err if err.is_open_failure() || matches!(err, StoreError::Closed { .. }) => {
                Self::StorageUnavailable {
                    building_id,
                    op,
                    source: err,
                }
            }
            err => Self::StorageIo {
                building_id,
                op,
                source: err,
            },
        }
    }

    pub(crate) fn building_not_found(id: BuildingId) -> Self {
        Self::NotFound {
            kind: EntityKind::Building,
            id: id.to_string(),
        }
    }

    pub(crate) fn portfolio_not_found(id: PortfolioId) -> Self {
        Self::NotFound {
            kind: EntityKind::Portfolio,
            id: id.to_string(),
        }
    }
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;
