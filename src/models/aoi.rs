use super::Vector3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AoiStats {
    pub player_count: u32,
    pub npc_count: u32,
    pub load: f32,
    pub latency: f32,
}

/// A named spherical region limiting per-client state replication.
/// `capacity_limit` is advisory: overruns log and degrade, never reject.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaOfInterest {
    pub id: String,
    pub name: String,
    pub center: Vector3,
    pub radius: f32,
    pub capacity_limit: u32,
    #[serde(default)]
    pub stats: AoiStats,
}

impl AreaOfInterest {
    pub fn contains(&self, point: &Vector3) -> bool {
        self.center.distance(point) <= self.radius
    }

    pub fn entity_count(&self) -> u32 {
        self.stats.player_count + self.stats.npc_count
    }
}
