//! Store queries and the rows they return.

use chrono::{DateTime, Utc};
use portfolio_model::{Equipment, EquipmentStatus, FloorPlan, Room};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A read against one building's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg", rename_all = "snake_case")]
pub enum StoreQuery {
    AllEquipment,
    EquipmentByStatus(EquipmentStatus),
    /// Case-insensitive match on `equipment_type`.
    EquipmentByType(String),
    EquipmentInRoom(String),
    /// Case-insensitive lookup by equipment id.
    Equipment(String),
    Rooms,
    FloorPlans,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorPlanSummary {
    pub name: String,
    pub level: i32,
    pub equipment_count: usize,
    pub room_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&FloorPlan> for FloorPlanSummary {
    fn from(plan: &FloorPlan) -> Self {
        Self {
            name: plan.name.clone(),
            level: plan.level,
            equipment_count: plan.equipment.len(),
            room_count: plan.rooms.len(),
            updated_at: plan.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Row {
    Equipment {
        floor_plan: String,
        equipment: Equipment,
    },
    Room {
        floor_plan: String,
        room: Room,
    },
    FloorPlan(FloorPlanSummary),
}

pub type Rows = Vec<Row>;

impl StoreQuery {
    /// Evaluate against a building's committed floor plans. Rows come out in
    /// plan-name order, then in the order items appear in each plan.
    pub fn evaluate(&self, plans: &BTreeMap<String, FloorPlan>) -> Rows {
        match self {
            StoreQuery::FloorPlans => plans
                .values()
                .map(|p| Row::FloorPlan(FloorPlanSummary::from(p)))
                .collect(),
            StoreQuery::Rooms => plans
                .values()
                .flat_map(|p| {
                    p.rooms.iter().map(move |room| Row::Room {
                        floor_plan: p.name.clone(),
                        room: room.clone(),
                    })
                })
                .collect(),
            _ => plans
                .values()
                .flat_map(|p| {
                    p.equipment
                        .iter()
                        .filter(|eq| self.matches(eq))
                        .map(move |eq| Row::Equipment {
                            floor_plan: p.name.clone(),
                            equipment: eq.clone(),
                        })
                })
                .collect(),
        }
    }

    fn matches(&self, eq: &Equipment) -> bool {
        match self {
            StoreQuery::AllEquipment => true,
            StoreQuery::EquipmentByStatus(status) => eq.status == *status,
            StoreQuery::EquipmentByType(t) => eq.equipment_type.eq_ignore_ascii_case(t),
            StoreQuery::EquipmentInRoom(room) => eq.room_id.as_deref() == Some(room.as_str()),
            StoreQuery::Equipment(id) => eq.id.eq_ignore_ascii_case(id),
            StoreQuery::Rooms | StoreQuery::FloorPlans => false,
        }
    }
}
