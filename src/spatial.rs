use crate::models::{AreaOfInterest, Vector3};
use dashmap::DashMap;
use log::*;

pub const DEFAULT_CELL_SIZE: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player,
    Npc,
}

/// Minimal entity view the index needs for relevance queries.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub id: String,
    pub position: Vector3,
    pub kind: EntityKind,
}

type Cell = (i64, i64, i64);

/// Partitions the world into named spherical areas. Point location goes
/// through a sparse cubical grid; a linear scan over all areas is the
/// fallback for points whose cell is unclaimed.
pub struct AoiIndex {
    cell_size: f32,
    areas: DashMap<String, AreaOfInterest>,
    grid: DashMap<Cell, String>,
    entity_areas: DashMap<String, (String, EntityKind)>,
    entity_positions: DashMap<String, Vector3>,
}

impl AoiIndex {
    pub fn new() -> Self {
        Self::with_cell_size(DEFAULT_CELL_SIZE)
    }

    pub fn with_cell_size(cell_size: f32) -> Self {
        Self {
            cell_size,
            areas: DashMap::new(),
            grid: DashMap::new(),
            entity_areas: DashMap::new(),
            entity_positions: DashMap::new(),
        }
    }

    fn cell_of(&self, point: &Vector3) -> Cell {
        (
            (point.x / self.cell_size).floor() as i64,
            (point.y / self.cell_size).floor() as i64,
            (point.z / self.cell_size).floor() as i64,
        )
    }

    fn cell_center(&self, cell: Cell) -> Vector3 {
        Vector3::new(
            (cell.0 as f32 + 0.5) * self.cell_size,
            (cell.1 as f32 + 0.5) * self.cell_size,
            (cell.2 as f32 + 0.5) * self.cell_size,
        )
    }

    pub fn create_area(
        &self,
        id: &str,
        name: &str,
        center: Vector3,
        radius: f32,
        capacity_limit: u32,
    ) -> AreaOfInterest {
        let area = AreaOfInterest {
            id: id.to_string(),
            name: name.to_string(),
            center,
            radius,
            capacity_limit,
            stats: Default::default(),
        };
        self.claim_cells(&area);
        self.areas.insert(id.to_string(), area.clone());
        info!(
            "Registered area {} ({}) at {:?} r={}",
            id, name, center, radius
        );
        area
    }

    /// Assign every cell whose center lies within
    /// `radius + cell * sqrt(3)/2` of the area center.
    fn claim_cells(&self, area: &AreaOfInterest) {
        let reach = area.radius + self.cell_size * 3.0f32.sqrt() / 2.0;
        let min = self.cell_of(&area.center.sub(&Vector3::new(reach, reach, reach)));
        let max = self.cell_of(&area.center.add(&Vector3::new(reach, reach, reach)));
        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    let cell = (x, y, z);
                    if self.cell_center(cell).distance(&area.center) <= reach {
                        self.grid.insert(cell, area.id.clone());
                    }
                }
            }
        }
    }

    pub fn remove_area(&self, id: &str) -> bool {
        let removed = self.areas.remove(id).is_some();
        if removed {
            self.grid.retain(|_, area_id| area_id != id);
            self.entity_areas.retain(|_, (area_id, _)| area_id != id);
        }
        removed
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn areas(&self) -> Vec<AreaOfInterest> {
        self.areas.iter().map(|a| a.value().clone()).collect()
    }

    pub fn get_area(&self, id: &str) -> Option<AreaOfInterest> {
        self.areas.get(id).map(|a| a.clone())
    }

    pub fn entity_area_id(&self, entity_id: &str) -> Option<String> {
        self.entity_areas
            .get(entity_id)
            .map(|e| e.value().0.clone())
    }

    /// Which area contains `point`? Grid fast-path first; linear scan as
    /// fallback. Overlapping areas are a configuration error (first hit
    /// wins).
    pub fn area_at(&self, point: &Vector3) -> Option<AreaOfInterest> {
        if let Some(area_id) = self.grid.get(&self.cell_of(point)) {
            if let Some(area) = self.areas.get(area_id.value()) {
                if area.contains(point) {
                    return Some(area.clone());
                }
            }
        }
        self.areas
            .iter()
            .find(|a| a.contains(point))
            .map(|a| a.clone())
    }

    fn adjust_count(&self, area_id: &str, kind: EntityKind, delta: i64) {
        let Some(mut area) = self.areas.get_mut(area_id) else {
            // departure from an area deleted underneath us is fine
            return;
        };
        let count = match kind {
            EntityKind::Player => &mut area.stats.player_count,
            EntityKind::Npc => &mut area.stats.npc_count,
        };
        if delta < 0 && *count == 0 {
            error!("AOI counter underflow in {} ({:?}), clamping", area_id, kind);
            return;
        }
        *count = (*count as i64 + delta) as u32;
        if delta > 0 && area.entity_count() > area.capacity_limit {
            warn!(
                "Area {} over capacity: {} entities (limit {})",
                area_id,
                area.entity_count(),
                area.capacity_limit
            );
        }
    }

    /// Register an entity at a position. Returns the containing area id,
    /// if any.
    pub fn register_entity(
        &self,
        entity_id: &str,
        position: Vector3,
        kind: EntityKind,
    ) -> Option<String> {
        self.entity_positions.insert(entity_id.to_string(), position);
        let area = self.area_at(&position)?;
        self.adjust_count(&area.id, kind, 1);
        self.entity_areas
            .insert(entity_id.to_string(), (area.id.clone(), kind));
        Some(area.id)
    }

    /// Move an entity. Counter deltas are applied only when the
    /// containing area actually changes.
    pub fn update_position(&self, entity_id: &str, position: Vector3, kind: EntityKind) {
        self.entity_positions.insert(entity_id.to_string(), position);
        let new_area_id = self.area_at(&position).map(|a| a.id);
        let old_area_id = self.entity_area_id(entity_id);
        if new_area_id == old_area_id {
            return;
        }
        if let Some(old) = &old_area_id {
            self.adjust_count(old, kind, -1);
        }
        match new_area_id {
            Some(new) => {
                self.adjust_count(&new, kind, 1);
                self.entity_areas
                    .insert(entity_id.to_string(), (new, kind));
            }
            None => {
                self.entity_areas.remove(entity_id);
            }
        }
    }

    pub fn remove_entity(&self, entity_id: &str, kind: EntityKind) {
        self.entity_positions.remove(entity_id);
        if let Some((_, (area_id, _))) = self.entity_areas.remove(entity_id) {
            self.adjust_count(&area_id, kind, -1);
        }
    }

    /// Entities relevant to an observer: the observer itself, everything
    /// sharing its area, plus everything within the area's radius of the
    /// observer regardless of area. Empty if the observer is not
    /// registered anywhere.
    pub fn relevant_entities(&self, observer_id: &str, all_entities: &[EntityRef]) -> Vec<EntityRef> {
        let Some(observer_area_id) = self.entity_area_id(observer_id) else {
            return Vec::new();
        };
        let Some(observer_pos) = self.entity_positions.get(observer_id).map(|p| *p) else {
            return Vec::new();
        };
        let radius = self
            .areas
            .get(&observer_area_id)
            .map(|a| a.radius)
            .unwrap_or(0.0);

        all_entities
            .iter()
            .filter(|e| {
                if e.id == observer_id {
                    return true;
                }
                if self.entity_area_id(&e.id).as_deref() == Some(observer_area_id.as_str()) {
                    return true;
                }
                e.position.distance(&observer_pos) <= radius
            })
            .cloned()
            .collect()
    }

    /// Rebuild the grid and re-register every entity; used when the
    /// resize policy is `reregister`.
    pub fn rebuild(&self) {
        self.grid.clear();
        for area in self.areas.iter() {
            self.claim_cells(&area);
        }
        let entities: Vec<(String, Vector3, EntityKind)> = self
            .entity_areas
            .iter()
            .filter_map(|e| {
                let pos = self.entity_positions.get(e.key())?;
                Some((e.key().clone(), *pos, e.value().1))
            })
            .collect();
        for mut area in self.areas.iter_mut() {
            area.stats.player_count = 0;
            area.stats.npc_count = 0;
        }
        self.entity_areas.clear();
        for (id, pos, kind) in entities {
            self.register_entity(&id, pos, kind);
        }
        info!("Rebuilt AOI grid: {} areas", self.areas.len());
    }

    /// Apply a new radius to an existing area, reclaiming grid cells.
    pub fn resize_area(&self, id: &str, radius: f32) -> bool {
        let Some(mut area) = self.areas.get_mut(id) else {
            return false;
        };
        area.radius = radius;
        let area = area.clone();
        self.claim_cells(&area);
        true
    }
}

impl Default for AoiIndex {
    fn default() -> Self {
        Self::new()
    }
}
