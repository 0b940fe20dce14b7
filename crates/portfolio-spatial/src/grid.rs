//! Uniform grid bucketing for one collection of located items.
//!
//! Items are bucketed by the cell containing their x/y center. Queries walk
//! the cells overlapping the query square (widened by one cell on every side
//! so items sitting exactly on a rounded boundary are never missed) and then
//! apply the exact predicate to each candidate. When the covering would touch
//! more cells than there are items, the layer scans every item instead.

use crate::error::{Result, SpatialError};
use ahash::{AHashMap, AHashSet};
use portfolio_model::{Equipment, Point, Room};

/// Anything the index can bucket: an identity and a center.
pub trait Located: Clone {
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn center(&self) -> Point;
}

impl Located for Equipment {
    const KIND: &'static str = "equipment";

    fn id(&self) -> &str {
        &self.id
    }

    fn center(&self) -> Point {
        self.location
    }
}

impl Located for Room {
    const KIND: &'static str = "room";

    fn id(&self) -> &str {
        &self.id
    }

    fn center(&self) -> Point {
        self.center
    }
}

/// Boundary-inclusive 2D radius test shared by the grid and the reference
/// scan. Compares [`Point::distance_2d`] itself, so an item is always found
/// at the distance reported for it. Negative or NaN radii match nothing.
#[inline]
pub fn within_radius(point: &Point, x: f64, y: f64, radius: f64) -> bool {
    radius >= 0.0 && point.distance_2d(x, y) <= radius
}

type CellKey = (i64, i64);

#[derive(Debug, Clone)]
pub(crate) struct GridLayer<T> {
    items: Vec<T>,
    by_id: AHashMap<String, usize>,
    cells: AHashMap<CellKey, Vec<usize>>,
    cell_size: f64,
}

impl<T: Located> GridLayer<T> {
    pub(crate) fn empty(cell_size: f64) -> Self {
        Self {
            items: Vec::new(),
            by_id: AHashMap::new(),
            cells: AHashMap::new(),
            cell_size,
        }
    }

    /// Build a fresh layer. Fails without side effects on the first invalid
    /// item.
    pub(crate) fn build(items: Vec<T>, cell_size: f64) -> Result<Self> {
        let mut by_id = AHashMap::with_capacity(items.len());
        let mut cells: AHashMap<CellKey, Vec<usize>> = AHashMap::new();

        for (slot, item) in items.iter().enumerate() {
            let center = item.center();
            if !center.is_finite() {
                return Err(SpatialError::NonFiniteCoordinate {
                    kind: T::KIND,
                    id: item.id().to_string(),
                });
            }
            if by_id.insert(item.id().to_string(), slot).is_some() {
                return Err(SpatialError::DuplicateId {
                    kind: T::KIND,
                    id: item.id().to_string(),
                });
            }
            cells
                .entry(cell_of(center.x, center.y, cell_size))
                .or_default()
                .push(slot);
        }

        Ok(Self {
            items,
            by_id,
            cells,
            cell_size,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn items(&self) -> &[T] {
        &self.items
    }

    pub(crate) fn get(&self, id: &str) -> Option<&T> {
        self.by_id.get(id).map(|&slot| &self.items[slot])
    }

    pub(crate) fn within_radius(&self, x: f64, y: f64, radius: f64) -> Vec<&T> {
        if !(radius >= 0.0) || !x.is_finite() || !y.is_finite() {
            return Vec::new();
        }
        self.candidates(x - radius, y - radius, x + radius, y + radius)
            .into_iter()
            .filter(|item| within_radius(&item.center(), x, y, radius))
            .collect()
    }

    /// Inclusive axis-aligned box query on x/y.
    pub(crate) fn within_bounds(&self, min: Point, max: Point) -> Vec<&T> {
        if !(min.x <= max.x && min.y <= max.y) {
            return Vec::new();
        }
        self.candidates(min.x, min.y, max.x, max.y)
            .into_iter()
            .filter(|item| {
                let c = item.center();
                c.x >= min.x && c.x <= max.x && c.y >= min.y && c.y <= max.y
            })
            .collect()
    }

    /// Every item whose cell overlaps the widened query square.
    fn candidates(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<&T> {
        let (lo_x, lo_y) = cell_of(min_x, min_y, self.cell_size);
        let (hi_x, hi_y) = cell_of(max_x, max_y, self.cell_size);
        let (lo_x, lo_y) = (lo_x.saturating_sub(1), lo_y.saturating_sub(1));
        let (hi_x, hi_y) = (hi_x.saturating_add(1), hi_y.saturating_add(1));

        let span_x = (hi_x as i128 - lo_x as i128 + 1) as u128;
        let span_y = (hi_y as i128 - lo_y as i128 + 1) as u128;
        if span_x.saturating_mul(span_y) > self.cells.len() as u128 {
            return self.items.iter().collect();
        }

        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        for cx in lo_x..=hi_x {
            for cy in lo_y..=hi_y {
                if let Some(slots) = self.cells.get(&(cx, cy)) {
                    for &slot in slots {
                        if seen.insert(slot) {
                            out.push(&self.items[slot]);
                        }
                    }
                }
            }
        }
        out
    }
}

fn cell_of(x: f64, y: f64, cell_size: f64) -> CellKey {
    // `as` saturates for out-of-range floats.
    ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64)
}
