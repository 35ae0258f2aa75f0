pub mod steering;
pub mod transitions;

use crate::models::{
    AiState, AvoidanceState, NavState, NpcFleet, NpcShip, NpcShipType, NpcStatus, NpcWaypoint,
    Quaternion, ShipTemplate, Vector3,
};
use dashmap::DashMap;
use log::*;
use rand::prelude::IndexedRandom as _;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use steering::{LeaderView, Obstacle};

const FLEET_SPAWN_RADIUS: f32 = 300.0;
const FLEET_SPAWN_HEIGHT: f32 = 50.0;
const INITIAL_SPEED_FRACTION: f32 = 0.3;

/// A celestial body as the NPC engine sees it: an attractor and an
/// obstacle.
#[derive(Debug, Clone, Copy)]
pub struct BodyView {
    pub id: u32,
    pub position: Vector3,
    pub radius: f32,
    pub mass: f32,
}

#[derive(Clone)]
struct ShipSnapshot {
    id: u64,
    fleet_id: String,
    position: Vector3,
    velocity: Vector3,
    rotation: Quaternion,
    formation_slot: Option<u32>,
    nav_state: NavState,
}

/// Per-NPC physics, AI state machine and waypoint/formation/avoidance
/// navigation. Mutated only from the simulation tick.
pub struct NpcEngine {
    ships: DashMap<u64, NpcShip>,
    fleets: DashMap<String, NpcFleet>,
    templates: DashMap<String, ShipTemplate>,
    next_ship_id: AtomicU64,
}

impl Default for NpcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NpcEngine {
    pub fn new() -> Self {
        Self {
            ships: DashMap::new(),
            fleets: DashMap::new(),
            templates: DashMap::new(),
            next_ship_id: AtomicU64::new(1),
        }
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    pub fn fleet_count(&self) -> usize {
        self.fleets.len()
    }

    pub fn ships(&self) -> Vec<NpcShip> {
        self.ships.iter().map(|s| s.clone()).collect()
    }

    pub fn get_ship(&self, id: u64) -> Option<NpcShip> {
        self.ships.get(&id).map(|s| s.clone())
    }

    pub fn fleets(&self) -> Vec<NpcFleet> {
        self.fleets.iter().map(|f| f.clone()).collect()
    }

    pub fn get_fleet(&self, fleet_id: &str) -> Option<NpcFleet> {
        self.fleets.get(fleet_id).map(|f| f.clone())
    }

    pub fn fleet_ships(&self, fleet_id: &str) -> Vec<NpcShip> {
        self.ships
            .iter()
            .filter(|s| s.fleet_id == fleet_id)
            .map(|s| s.clone())
            .collect()
    }

    pub fn upsert_template(&self, template: ShipTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn insert_ship(&self, ship: NpcShip) {
        self.next_ship_id.fetch_max(ship.id + 1, Ordering::SeqCst);
        self.ships.insert(ship.id, ship);
    }

    pub fn insert_fleet(&self, fleet: NpcFleet) {
        self.fleets.insert(fleet.fleet_id.clone(), fleet);
    }

    fn params_for(&self, ship: &NpcShip) -> ShipTemplate {
        ship.template_id
            .as_ref()
            .and_then(|id| self.templates.get(id).map(|t| t.clone()))
            .unwrap_or_else(|| ShipTemplate::default_for(ship.ship_type))
    }

    /// Spawn `count` ships in a jittered circle around the given body,
    /// each with a small random initial velocity.
    pub fn create_fleet(
        &self,
        fleet_type: NpcShipType,
        count: u32,
        location_label: &str,
        nearest_body: Option<&BodyView>,
    ) -> NpcFleet {
        let fleet_id = uuid::Uuid::new_v4().to_string();
        let center = nearest_body.map(|b| b.position).unwrap_or(Vector3::ZERO);
        let params = ShipTemplate::default_for(fleet_type);
        let mut rng = rand::rng();

        for i in 0..count {
            let theta = std::f32::consts::TAU * i as f32 / count.max(1) as f32
                + rng.random_range(-0.3..0.3);
            let radius = FLEET_SPAWN_RADIUS * rng.random_range(0.8..1.2);
            let position = center.add(&Vector3::new(
                theta.cos() * radius,
                theta.sin() * radius,
                rng.random_range(-FLEET_SPAWN_HEIGHT..FLEET_SPAWN_HEIGHT),
            ));
            let velocity =
                steering::random_unit(&mut rng).scale(params.max_speed * INITIAL_SPEED_FRACTION);
            let id = self.next_ship_id.fetch_add(1, Ordering::SeqCst);
            let initial_state = match fleet_type {
                NpcShipType::Mining => AiState::Mining,
                _ => AiState::Patrolling,
            };
            self.ships.insert(
                id,
                NpcShip {
                    id,
                    fleet_id: fleet_id.clone(),
                    template_id: None,
                    ship_type: fleet_type,
                    status: initial_state.status(),
                    position,
                    velocity,
                    rotation: Quaternion::IDENTITY,
                    ai_state: initial_state,
                    nav_state: NavState::None,
                    avoidance_state: AvoidanceState::None,
                    target_id: None,
                    nearest_body_id: nearest_body.map(|b| b.id),
                    waypoints: Vec::new(),
                    formation_slot: None,
                    path_completion_pct: 0.0,
                    waypoints_completed: 0,
                    dwell_remaining: 0.0,
                },
            );
        }

        let fleet = NpcFleet {
            fleet_id: fleet_id.clone(),
            fleet_type,
            status: NpcStatus::Passive,
            ship_count: count,
            location_label: location_label.to_string(),
            nearest_body_id: nearest_body.map(|b| b.id),
            assigned_mission_id: None,
        };
        self.fleets.insert(fleet_id.clone(), fleet.clone());
        info!(
            "Created {} fleet {} with {} ships at {}",
            fleet_type, fleet_id, count, location_label
        );
        fleet
    }

    pub fn remove_fleet(&self, fleet_id: &str) -> bool {
        let removed = self.fleets.remove(fleet_id).is_some();
        if removed {
            self.ships.retain(|_, s| s.fleet_id != fleet_id);
        }
        removed
    }

    /// Put a ship on an explicit waypoint path.
    pub fn set_waypoints(&self, ship_id: u64, waypoints: Vec<NpcWaypoint>) -> bool {
        self.set_waypoints_with_nav(ship_id, waypoints, NavState::Waypoint)
    }

    pub fn set_waypoints_with_nav(
        &self,
        ship_id: u64,
        waypoints: Vec<NpcWaypoint>,
        nav_state: NavState,
    ) -> bool {
        let Some(mut ship) = self.ships.get_mut(&ship_id) else {
            return false;
        };
        ship.waypoints = waypoints;
        ship.waypoints_completed = 0;
        ship.path_completion_pct = 0.0;
        ship.dwell_remaining = 0.0;
        ship.ai_state = AiState::WaypointFollowing;
        ship.nav_state = nav_state;
        ship.status = ship.ai_state.status();
        true
    }

    /// Arrange a fleet around a leader: the leader keeps flying, the
    /// rest take numbered formation slots.
    pub fn set_fleet_formation(&self, fleet_id: &str, leader_id: u64) -> bool {
        if !self.ships.contains_key(&leader_id) {
            return false;
        }
        let member_ids: Vec<u64> = self
            .ships
            .iter()
            .filter(|s| s.fleet_id == fleet_id)
            .map(|s| s.id)
            .collect();
        if !member_ids.contains(&leader_id) {
            return false;
        }
        let mut slot = 0;
        for id in member_ids {
            let Some(mut ship) = self.ships.get_mut(&id) else {
                continue;
            };
            if id == leader_id {
                ship.formation_slot = None;
                ship.nav_state = NavState::Formation;
            } else {
                ship.formation_slot = Some(slot);
                ship.nav_state = NavState::Formation;
                ship.ai_state = AiState::FormationKeeping;
                ship.status = ship.ai_state.status();
                slot += 1;
            }
        }
        true
    }

    /// First ship of a fleet with no formation slot; with a formation
    /// set up this is the leader, otherwise an arbitrary stable pick.
    pub fn fleet_leader(&self, fleet_id: &str) -> Option<NpcShip> {
        let mut ships = self.fleet_ships(fleet_id);
        ships.sort_by_key(|s| s.id);
        ships
            .iter()
            .find(|s| s.formation_slot.is_none())
            .or(ships.first())
            .cloned()
    }

    /// Reset every ship of a fleet to patrolling/passive and clear any
    /// navigation orders. Used when a mission releases the fleet.
    pub fn reset_fleet(&self, fleet_id: &str) {
        for mut ship in self.ships.iter_mut() {
            if ship.fleet_id != fleet_id {
                continue;
            }
            ship.ai_state = AiState::Patrolling;
            ship.status = NpcStatus::Passive;
            ship.nav_state = NavState::None;
            ship.avoidance_state = AvoidanceState::None;
            ship.waypoints.clear();
            ship.formation_slot = None;
            ship.target_id = None;
            ship.path_completion_pct = 0.0;
        }
        if let Some(mut fleet) = self.fleets.get_mut(fleet_id) {
            fleet.status = NpcStatus::Passive;
            fleet.assigned_mission_id = None;
        }
    }

    pub fn set_fleet_mission(&self, fleet_id: &str, mission_id: Option<String>) {
        if let Some(mut fleet) = self.fleets.get_mut(fleet_id) {
            fleet.assigned_mission_id = mission_id;
        }
    }

    /// Advance every ship by `dt` seconds against the given celestial
    /// snapshot. Single-writer: called only from the simulation tick.
    pub fn update(&self, dt: f32, bodies: &[BodyView]) {
        if dt <= 0.0 {
            return;
        }
        let snapshots: Vec<ShipSnapshot> = self
            .ships
            .iter()
            .map(|s| ShipSnapshot {
                id: s.id,
                fleet_id: s.fleet_id.clone(),
                position: s.position,
                velocity: s.velocity,
                rotation: s.rotation,
                formation_slot: s.formation_slot,
                nav_state: s.nav_state,
            })
            .collect();
        let mut rng = rand::rng();

        for snapshot in &snapshots {
            let Some(mut ship) = self.ships.get_mut(&snapshot.id).map(|s| s.clone()) else {
                continue;
            };
            let params = self.params_for(&ship);
            self.update_ship(&mut ship, &params, dt, bodies, &snapshots, &mut rng);
            if let Some(mut entry) = self.ships.get_mut(&snapshot.id) {
                *entry = ship;
            }
        }
    }

    fn update_ship(
        &self,
        ship: &mut NpcShip,
        params: &ShipTemplate,
        dt: f32,
        bodies: &[BodyView],
        snapshots: &[ShipSnapshot],
        rng: &mut impl Rng,
    ) {
        // nearest body feeds both gravity and mining behavior
        let nearest = bodies
            .iter()
            .min_by(|a, b| {
                a.position
                    .distance(&ship.position)
                    .total_cmp(&b.position.distance(&ship.position))
            })
            .copied();
        ship.nearest_body_id = nearest.map(|b| b.id);

        let gravity = match &nearest {
            Some(body) => steering::gravity_accel(&ship.position, &body.position, body.mass)
                .clamp_length(params.max_acceleration * 0.5),
            None => Vector3::ZERO,
        };

        // returning from an avoidance push: fall back to whatever the
        // nav state says the ship was doing
        if ship.avoidance_state == AvoidanceState::Recovering {
            ship.avoidance_state = AvoidanceState::None;
            ship.ai_state = match ship.nav_state {
                NavState::Waypoint | NavState::Mission | NavState::Pathfinding => {
                    // the detour may have overshot optional stops
                    while ship.waypoints.first().map(|w| w.optional).unwrap_or(false) {
                        ship.waypoints.remove(0);
                        ship.waypoints_completed += 1;
                    }
                    AiState::WaypointFollowing
                }
                NavState::Formation => {
                    if ship.formation_slot.is_some() {
                        AiState::FormationKeeping
                    } else {
                        AiState::WaypointFollowing
                    }
                }
                NavState::None => AiState::Patrolling,
            };
        }

        let obstacles = self.collect_obstacles(ship, params, bodies, snapshots);

        let behavior = match ship.ai_state {
            AiState::Patrolling => steering::patrol_accel(params, rng),
            AiState::Mining => match &nearest {
                Some(body) => {
                    steering::mining_accel(ship, params, &body.position, body.radius)
                }
                None => Vector3::ZERO,
            },
            AiState::WaypointFollowing => steering::waypoint_accel(ship, params, dt),
            AiState::FormationKeeping => {
                match self.leader_view(ship, snapshots) {
                    Some(leader) => steering::formation_accel(ship, params, &leader),
                    None => {
                        // leaderless formation dissolves
                        ship.ai_state = AiState::Patrolling;
                        ship.nav_state = NavState::None;
                        ship.formation_slot = None;
                        Vector3::ZERO
                    }
                }
            }
            AiState::ObstacleAvoidance => {
                match steering::avoidance_accel(ship, params, &obstacles) {
                    Some(accel) => accel,
                    None => {
                        ship.avoidance_state = AvoidanceState::Recovering;
                        Vector3::ZERO
                    }
                }
            }
            AiState::Idle => steering::brake_accel(ship, params),
            // combat maneuvers reserved; no forced movement
            AiState::Attacking | AiState::Fleeing => Vector3::ZERO,
            AiState::Docking | AiState::Trading | AiState::Escorting => {
                steering::brake_accel(ship, params)
            }
        };

        // pre-emptive collision check before committing the tick
        if ship.ai_state != AiState::ObstacleAvoidance
            && ship.avoidance_state == AvoidanceState::None
            && steering::on_collision_course(ship, &obstacles, params.obstacle_avoidance_distance)
        {
            ship.ai_state = AiState::ObstacleAvoidance;
            ship.avoidance_state = AvoidanceState::Active;
        }

        // integrate
        let accel = behavior.add(&gravity);
        ship.velocity = ship
            .velocity
            .add(&accel.scale(dt))
            .clamp_length(params.max_speed);
        ship.position = ship.position.add(&ship.velocity.scale(dt));

        // face along travel
        if ship.velocity.length() > 1.0 {
            ship.rotation = facing_rotation(&ship.velocity);
        }

        // occasional sampled AI transition; ships under navigation
        // orders keep them
        if ship.nav_state == NavState::None
            && rng.random::<f64>() < transitions::TRANSITION_CHANCE
        {
            if let Some(next) =
                transitions::sample_transition(ship.ship_type, ship.ai_state, rng.random())
            {
                ship.ai_state = next;
            }
        }

        // attackers track the closest ship in detection range
        if ship.ai_state == AiState::Attacking {
            ship.target_id = snapshots
                .iter()
                .filter(|s| s.id != ship.id)
                .map(|s| (s.id, s.position.distance(&ship.position)))
                .filter(|(_, dist)| *dist <= params.detection_range)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| format!("npc-{}", id));
        } else if ship.target_id.is_some() {
            ship.target_id = None;
        }
        ship.status = ship.ai_state.status();
    }

    fn collect_obstacles(
        &self,
        ship: &NpcShip,
        params: &ShipTemplate,
        bodies: &[BodyView],
        snapshots: &[ShipSnapshot],
    ) -> Vec<Obstacle> {
        let mut obstacles = Vec::new();
        for body in bodies {
            if body.position.distance(&ship.position)
                <= params.obstacle_avoidance_distance + body.radius
            {
                obstacles.push(Obstacle {
                    position: body.position,
                    radius: body.radius,
                });
            }
        }
        for other in snapshots {
            if other.id == ship.id {
                continue;
            }
            if other.position.distance(&ship.position) <= params.obstacle_avoidance_distance {
                obstacles.push(Obstacle {
                    position: other.position,
                    radius: 10.0,
                });
            }
        }
        obstacles
    }

    fn leader_view(&self, ship: &NpcShip, snapshots: &[ShipSnapshot]) -> Option<LeaderView> {
        let leader = snapshots
            .iter()
            .find(|s| s.fleet_id == ship.fleet_id && s.formation_slot.is_none())?;
        let follower_count = snapshots
            .iter()
            .filter(|s| s.fleet_id == ship.fleet_id && s.formation_slot.is_some())
            .count() as u32;
        Some(LeaderView {
            position: leader.position,
            velocity: leader.velocity,
            rotation: leader.rotation,
            follower_count,
        })
    }

    /// Pick a random unassigned fleet of one of the given types.
    pub fn find_unassigned_fleet(&self, eligible: &[NpcShipType]) -> Option<NpcFleet> {
        let candidates: Vec<NpcFleet> = self
            .fleets
            .iter()
            .filter(|f| f.assigned_mission_id.is_none() && eligible.contains(&f.fleet_type))
            .map(|f| f.clone())
            .collect();
        candidates.choose(&mut rand::rng()).cloned()
    }
}

/// Rotation taking the +Z forward axis onto the travel direction.
fn facing_rotation(velocity: &Vector3) -> Quaternion {
    let forward = Vector3::new(0.0, 0.0, 1.0);
    let dir = velocity.normalize();
    let dot = forward.dot(&dir).clamp(-1.0, 1.0);
    if dot > 1.0 - 1e-6 {
        return Quaternion::IDENTITY;
    }
    if dot < -1.0 + 1e-6 {
        // 180 degrees: any axis perpendicular to forward works
        return Quaternion::from_axis_angle(&Vector3::new(0.0, 1.0, 0.0), std::f32::consts::PI);
    }
    let axis = forward.cross(&dir);
    Quaternion::from_axis_angle(&axis, dot.acos())
}
