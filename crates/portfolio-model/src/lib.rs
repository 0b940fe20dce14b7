//! Portfolio Model: floor plans, equipment and rooms
//!
//! Plain value types shared by the spatial index, the per-building store and
//! the portfolio manager. Nothing here owns a resource; everything is
//! `Clone + Serialize + Deserialize` so it can travel through the JSON
//! metadata files and the binary building log alike.
//!
//! Types that are written to the binary log must not use
//! `skip_serializing_if`: bincode is not self-describing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Geometry
// ============================================================================

/// A 2D/3D coordinate in building space (feet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Euclidean distance ignoring `z`.
    pub fn distance_2d(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }

    pub fn distance_3d(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ============================================================================
// Equipment
// ============================================================================

/// Operational status of a piece of equipment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    #[default]
    Normal,
    NeedsRepair,
    Failed,
}

impl EquipmentStatus {
    pub const ALL: [EquipmentStatus; 3] = [Self::Normal, Self::NeedsRepair, Self::Failed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::NeedsRepair => "needs_repair",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown equipment status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for EquipmentStatus {
    type Err = UnknownStatus;

    /// Accepts the snake_case names as well as the upper-case spellings used
    /// by older floor-plan exports.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "operational" => Ok(Self::Normal),
            "needs_repair" | "needs-repair" | "degraded" => Ok(Self::NeedsRepair),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A piece of equipment placed on a floor plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    pub equipment_type: String,
    #[serde(default)]
    pub room_id: Option<String>,
    pub location: Point,
    #[serde(default)]
    pub status: EquipmentStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Equipment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: Point) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            equipment_type: String::new(),
            room_id: None,
            location,
            status: EquipmentStatus::Normal,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, equipment_type: impl Into<String>) -> Self {
        self.equipment_type = equipment_type.into();
        self
    }

    pub fn with_status(mut self, status: EquipmentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

// ============================================================================
// Rooms and Floor Plans
// ============================================================================

/// A room footprint, reduced to its center point for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub center: Point,
    #[serde(default)]
    pub area_sqft: Option<f64>,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>, center: Point) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            center,
            area_sqft: None,
        }
    }
}

/// Equipment and room layout for one level of a building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorPlan {
    pub name: String,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub equipment: Vec<Equipment>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FloorPlan {
    pub fn new(name: impl Into<String>, level: i32) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            level,
            equipment: Vec::new(),
            rooms: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_equipment(mut self, equipment: Equipment) -> Self {
        self.equipment.push(equipment);
        self
    }

    pub fn with_room(mut self, room: Room) -> Self {
        self.rooms.push(room);
        self
    }

    /// Check the plan before it is handed to a store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let mut seen = HashSet::new();
        for eq in &self.equipment {
            if eq.id.trim().is_empty() {
                return Err(ValidationError::EmptyId { kind: "equipment" });
            }
            if !seen.insert(eq.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    kind: "equipment",
                    id: eq.id.clone(),
                });
            }
            if !eq.location.is_finite() {
                return Err(ValidationError::NonFiniteCoordinate { id: eq.id.clone() });
            }
        }

        seen.clear();
        for room in &self.rooms {
            if room.id.trim().is_empty() {
                return Err(ValidationError::EmptyId { kind: "room" });
            }
            if !seen.insert(room.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    kind: "room",
                    id: room.id.clone(),
                });
            }
            if !room.center.is_finite() {
                return Err(ValidationError::NonFiniteCoordinate {
                    id: room.id.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("floor plan name is empty")]
    EmptyName,
    #[error("{kind} with empty id")]
    EmptyId { kind: &'static str },
    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("non-finite coordinate on {id}")]
    NonFiniteCoordinate { id: String },
}

// ============================================================================
// Building Specification
// ============================================================================

/// Caller-supplied description of a new building.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingSpec {
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
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl BuildingSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, square_feet: f64, floors: u32) -> Self {
        self.square_feet = square_feet;
        self.floors = floors;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}
