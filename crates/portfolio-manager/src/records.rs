//! On-disk metadata documents.
//!
//! ```text
//!   <base>/<portfolio id>/portfolio.json          authoritative portfolio + buildings
//!   <base>/<portfolio id>/<building id>/building.json   mirror of one building record
//!   <base>/<portfolio id>/<building id>/building.db     building store (log)
//! ```
//!
//! Both JSON documents are written to a temp file in the target directory and
//! renamed over the old one, so a crash leaves either the old or the new
//! document and never a torn one.

use crate::error::{EntityKind, PortfolioError, Result};
use crate::{BuildingId, PortfolioId};
use chrono::{DateTime, Utc};
use portfolio_model::FloorPlan;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub const PORTFOLIO_FILE: &str = "portfolio.json";
pub const BUILDING_FILE: &str = "building.json";

/// Immutable identity of a building, fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingInfo {
    pub id: BuildingId,
    pub portfolio_id: PortfolioId,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub building_type: String,
    #[serde(default)]
    pub square_feet: f64,
    #[serde(default)]
    pub floors: u32,
    #[serde(default)]
    pub year_built: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// A building as written to metadata: identity plus mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
    #[serde(flatten)]
    pub info: BuildingInfo,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub floor_plans: BTreeMap<String, FloorPlan>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub id: PortfolioId,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub active_building: Option<BuildingId>,
    #[serde(default)]
    pub buildings: BTreeMap<BuildingId, BuildingRecord>,
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let io_err = |source| PortfolioError::MetadataIo {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| io_err(e.into()))?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Read a JSON document. A missing file is `NotFound`; anything unreadable
/// or unparsable is `CorruptMetadata`.
pub fn read_json<T: DeserializeOwned>(path: &Path, kind: EntityKind, id: &str) -> Result<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PortfolioError::NotFound {
                kind,
                id: id.to_string(),
            })
        }
        Err(e) => {
            return Err(PortfolioError::CorruptMetadata {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| PortfolioError::CorruptMetadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
