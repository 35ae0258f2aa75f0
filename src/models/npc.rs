use super::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NpcShipType {
    Enemy,
    Transport,
    Civilian,
    Mining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NpcStatus {
    Hostile,
    EnRoute,
    Passive,
    Working,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AiState {
    Idle,
    Patrolling,
    Attacking,
    Fleeing,
    Mining,
    Docking,
    Trading,
    Escorting,
    WaypointFollowing,
    FormationKeeping,
    ObstacleAvoidance,
}

impl AiState {
    /// Status is a pure function of the AI state.
    pub fn status(&self) -> NpcStatus {
        match self {
            AiState::Attacking => NpcStatus::Hostile,
            AiState::Patrolling | AiState::Docking => NpcStatus::EnRoute,
            AiState::Mining => NpcStatus::Working,
            _ => NpcStatus::Passive,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NavState {
    #[default]
    None,
    Pathfinding,
    Waypoint,
    Formation,
    Mission,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AvoidanceState {
    #[default]
    None,
    Active,
    Recovering,
}

/// A navigation target: arrival radius, optional speed cap and dwell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcWaypoint {
    pub position: Vector3,
    pub radius: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<f32>,
    #[serde(default)]
    pub optional: bool,
}

impl NpcWaypoint {
    pub fn new(position: Vector3, radius: f32) -> Self {
        Self {
            position,
            radius,
            max_speed: None,
            wait_time: None,
            optional: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcShip {
    pub id: u64,
    pub fleet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub ship_type: NpcShipType,
    pub status: NpcStatus,
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Quaternion,
    pub ai_state: AiState,
    #[serde(default)]
    pub nav_state: NavState,
    #[serde(default)]
    pub avoidance_state: AvoidanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_body_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<NpcWaypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formation_slot: Option<u32>,
    pub path_completion_pct: f32,
    // engine-internal bookkeeping, persisted but never on the wire
    #[serde(default)]
    pub waypoints_completed: u32,
    #[serde(default)]
    pub dwell_remaining: f32,
}

impl NpcShip {
    pub fn entity_id(&self) -> String {
        format!("npc-{}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcFleet {
    pub fleet_id: String,
    pub fleet_type: NpcShipType,
    pub status: NpcStatus,
    pub ship_count: u32,
    pub location_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_body_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_mission_id: Option<String>,
}

/// Behavioural parameter bundle bound to ships at spawn time.
/// Immutable during a tick; owned by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipTemplate {
    pub id: String,
    pub name: String,
    pub max_speed: f32,
    pub max_acceleration: f32,
    pub turn_rate: f32,
    pub detection_range: f32,
    pub attack_range: f32,
    pub flee_threshold: f32,
    pub waypoint_arrival_distance: f32,
    pub obstacle_avoidance_distance: f32,
    pub formation_keeping_tolerance: f32,
    pub pathfinding_update_interval_ms: u64,
}

impl ShipTemplate {
    /// Baseline parameters when a ship carries no template binding.
    pub fn default_for(ship_type: NpcShipType) -> Self {
        let (max_speed, max_acceleration, detection_range, attack_range) = match ship_type {
            NpcShipType::Enemy => (120.0, 40.0, 3000.0, 800.0),
            NpcShipType::Transport => (80.0, 20.0, 2000.0, 0.0),
            NpcShipType::Civilian => (60.0, 15.0, 1500.0, 0.0),
            NpcShipType::Mining => (50.0, 18.0, 1800.0, 0.0),
        };
        Self {
            id: format!("default-{}", ship_type),
            name: format!("Default {}", ship_type),
            max_speed,
            max_acceleration,
            turn_rate: 1.5,
            detection_range,
            attack_range,
            flee_threshold: 0.25,
            waypoint_arrival_distance: 100.0,
            obstacle_avoidance_distance: 500.0,
            formation_keeping_tolerance: 25.0,
            pathfinding_update_interval_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_ai_state() {
        assert_eq!(AiState::Attacking.status(), NpcStatus::Hostile);
        assert_eq!(AiState::Patrolling.status(), NpcStatus::EnRoute);
        assert_eq!(AiState::Docking.status(), NpcStatus::EnRoute);
        assert_eq!(AiState::Mining.status(), NpcStatus::Working);
        assert_eq!(AiState::Idle.status(), NpcStatus::Passive);
        assert_eq!(AiState::Fleeing.status(), NpcStatus::Passive);
    }

    #[test]
    fn test_ship_serde_camel_case() {
        let ship = NpcShip {
            id: 3,
            fleet_id: "f".into(),
            template_id: None,
            ship_type: NpcShipType::Mining,
            status: NpcStatus::Working,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            rotation: Quaternion::IDENTITY,
            ai_state: AiState::Mining,
            nav_state: NavState::None,
            avoidance_state: AvoidanceState::None,
            target_id: None,
            nearest_body_id: Some(4),
            waypoints: vec![],
            formation_slot: None,
            path_completion_pct: 0.0,
            waypoints_completed: 0,
            dwell_remaining: 0.0,
        };
        let json = serde_json::to_value(&ship).unwrap();
        assert_eq!(json["shipType"], "mining");
        assert_eq!(json["aiState"], "MINING");
        assert_eq!(json["nearestBodyId"], 4);
        let back: NpcShip = serde_json::from_value(json).unwrap();
        assert_eq!(back.ai_state, AiState::Mining);
    }
}
