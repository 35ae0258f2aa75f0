use crate::models::{Mission, MissionStatus, MissionType, NpcShipType, NpcWaypoint};
use crate::npc::{BodyView, NpcEngine};
use dashmap::DashMap;
use log::*;
use maplit::hashmap;
use rand::prelude::IndexedRandom as _;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Leader counts as on-site within this multiple of the target body's
/// radius.
const ARRIVAL_RADIUS_FACTOR: f32 = 3.0;

const NAME_ADJECTIVES: &[&str] = &[
    "Silent", "Crimson", "Broken", "Distant", "Hollow", "Iron", "Radiant", "Stray", "Pale",
    "Violet",
];
const NAME_NOUNS: &[&str] = &[
    "Vector", "Accord", "Harvest", "Passage", "Beacon", "Reach", "Covenant", "Horizon", "Ledger",
    "Lantern",
];

/// Cumulative weighted draw over mission types. `roll` in [0,1).
pub fn pick_mission_type(roll: f64) -> MissionType {
    let weights = [
        (MissionType::Combat, 0.20),
        (MissionType::Trade, 0.15),
        (MissionType::Delivery, 0.15),
        (MissionType::Mining, 0.15),
        (MissionType::Escort, 0.10),
        (MissionType::Patrol, 0.10),
        (MissionType::Rescue, 0.075),
        (MissionType::Exploration, 0.075),
    ];
    let mut acc = 0.0;
    for (mission_type, weight) in weights {
        acc += weight;
        if roll < acc {
            return mission_type;
        }
    }
    MissionType::Exploration
}

/// Which fleet types may take a mission of the given type.
pub fn eligible_fleet_types(mission_type: MissionType) -> &'static [NpcShipType] {
    use NpcShipType::*;
    match mission_type {
        MissionType::Combat => &[Enemy],
        MissionType::Trade | MissionType::Delivery => &[Transport],
        MissionType::Mining => &[Mining],
        MissionType::Escort | MissionType::Patrol => &[Enemy, Transport],
        MissionType::Rescue => &[Transport, Civilian],
        MissionType::Exploration => &[Civilian],
    }
}

fn progress_target(mission_type: MissionType, difficulty: u8) -> f32 {
    let d = difficulty as f32;
    match mission_type {
        MissionType::Combat => 5.0 * d,
        MissionType::Mining => 10.0 * d,
        MissionType::Trade => 2.0 * d,
        MissionType::Delivery => 1.0,
        _ => 2.0 * d,
    }
}

fn on_site_progress(mission_type: MissionType) -> f32 {
    match mission_type {
        MissionType::Patrol => 0.05,
        MissionType::Mining => 0.2,
        MissionType::Combat => 0.1,
        _ => 0.1,
    }
}

/// Generates missions, assigns eligible fleets, tracks progress and
/// retires expired or finished missions.
pub struct MissionManager {
    engine: Arc<NpcEngine>,
    active: DashMap<String, Mission>,
    completed: Mutex<Vec<Mission>>,
    failed: Mutex<Vec<Mission>>,
    reward_base: HashMap<MissionType, u32>,
    duration_secs: HashMap<MissionType, u64>,
}

impl MissionManager {
    pub fn new(engine: Arc<NpcEngine>) -> Self {
        Self {
            engine,
            active: DashMap::new(),
            completed: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            reward_base: hashmap! {
                MissionType::Combat => 500,
                MissionType::Trade => 250,
                MissionType::Delivery => 200,
                MissionType::Mining => 300,
                MissionType::Escort => 400,
                MissionType::Patrol => 150,
                MissionType::Rescue => 450,
                MissionType::Exploration => 350,
            },
            duration_secs: hashmap! {
                MissionType::Combat => 600,
                MissionType::Trade => 900,
                MissionType::Delivery => 450,
                MissionType::Mining => 1200,
                MissionType::Escort => 900,
                MissionType::Patrol => 600,
                MissionType::Rescue => 450,
                MissionType::Exploration => 1800,
            },
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_missions(&self) -> Vec<Mission> {
        self.active.iter().map(|m| m.clone()).collect()
    }

    pub fn get_mission(&self, mission_id: &str) -> Option<Mission> {
        self.active.get(mission_id).map(|m| m.clone())
    }

    pub fn completed_missions(&self) -> Vec<Mission> {
        self.completed.lock().unwrap().clone()
    }

    pub fn failed_missions(&self) -> Vec<Mission> {
        self.failed.lock().unwrap().clone()
    }

    /// Procedurally generate one mission between two distinct bodies.
    /// None when fewer than two bodies exist.
    pub fn generate_mission(&self, bodies: &[BodyView], now_ms: u64) -> Option<Mission> {
        if bodies.len() < 2 {
            return None;
        }
        let mut rng = rand::rng();
        let mission_type = pick_mission_type(rng.random());
        let start = bodies.choose(&mut rng)?;
        let end = loop {
            let candidate = bodies.choose(&mut rng)?;
            if candidate.id != start.id {
                break candidate;
            }
        };
        let difficulty: u8 = rng.random_range(1..=5);
        let reward = self.reward_base.get(&mission_type).copied().unwrap_or(100)
            * difficulty as u32;
        let duration = self
            .duration_secs
            .get(&mission_type)
            .copied()
            .unwrap_or(600);
        let adjective = NAME_ADJECTIVES.choose(&mut rng).unwrap();
        let noun = NAME_NOUNS.choose(&mut rng).unwrap();

        let mission = Mission {
            mission_id: uuid::Uuid::new_v4().to_string(),
            name: format!("{} {}", adjective, noun),
            description: format!(
                "{} operation from body {} to body {}",
                mission_type, start.id, end.id
            ),
            mission_type,
            status: MissionStatus::Active,
            reward,
            difficulty,
            start_body_id: start.id,
            end_body_id: end.id,
            assigned_fleet_id: None,
            progress_value: 0.0,
            progress_target: progress_target(mission_type, difficulty),
            start_time: now_ms,
            expiry_time: now_ms + duration * 1000,
            complete_time: None,
            failure_reason: None,
        };
        debug!(
            "Generated {} mission {} ({} -> {})",
            mission_type, mission.name, start.id, end.id
        );
        self.active
            .insert(mission.mission_id.clone(), mission.clone());
        Some(mission)
    }

    pub fn generate_initial(&self, count: usize, bodies: &[BodyView], now_ms: u64) {
        for _ in 0..count {
            self.generate_mission(bodies, now_ms);
        }
        info!("Generated {} initial missions", self.active.len());
    }

    /// External progress injection (combat kills, cargo events).
    pub fn add_progress(&self, mission_id: &str, amount: f32) {
        if let Some(mut mission) = self.active.get_mut(mission_id) {
            mission.progress_value =
                (mission.progress_value + amount).min(mission.progress_target);
        }
    }

    /// The 5-second pass over all active missions.
    pub fn update_missions(&self, bodies: &[BodyView], now_ms: u64) {
        let ids: Vec<String> = self.active.iter().map(|m| m.mission_id.clone()).collect();
        for id in ids {
            let Some(mission) = self.active.get(&id).map(|m| m.clone()) else {
                continue;
            };
            if now_ms > mission.expiry_time {
                self.fail_mission(&id, "expired");
                continue;
            }
            if mission.progress_value >= mission.progress_target {
                self.complete_mission(&id, now_ms);
                continue;
            }
            match &mission.assigned_fleet_id {
                None => {
                    self.try_assign_fleet(&id, bodies);
                }
                Some(fleet_id) => {
                    self.advance_progress(&id, fleet_id, &mission, bodies);
                }
            }
        }
    }

    fn try_assign_fleet(&self, mission_id: &str, bodies: &[BodyView]) {
        let Some(mission) = self.active.get(mission_id).map(|m| m.clone()) else {
            return;
        };
        let Some(fleet) = self
            .engine
            .find_unassigned_fleet(eligible_fleet_types(mission.mission_type))
        else {
            return;
        };
        let Some(leader) = self.engine.fleet_leader(&fleet.fleet_id) else {
            return;
        };
        let Some(end_body) = bodies.iter().find(|b| b.id == mission.end_body_id) else {
            return;
        };

        self.engine
            .set_fleet_mission(&fleet.fleet_id, Some(mission_id.to_string()));
        // leader flies to the destination; the rest fall in behind it
        self.engine.set_fleet_formation(&fleet.fleet_id, leader.id);
        self.engine.set_waypoints_with_nav(
            leader.id,
            vec![NpcWaypoint::new(
                end_body.position,
                end_body.radius * ARRIVAL_RADIUS_FACTOR,
            )],
            crate::models::NavState::Mission,
        );
        if let Some(mut mission) = self.active.get_mut(mission_id) {
            mission.assigned_fleet_id = Some(fleet.fleet_id.clone());
        }
        info!(
            "Assigned fleet {} to mission {} ({})",
            fleet.fleet_id, mission_id, mission.mission_type
        );
    }

    fn advance_progress(
        &self,
        mission_id: &str,
        fleet_id: &str,
        mission: &Mission,
        bodies: &[BodyView],
    ) {
        // exploration earns progress even while traveling
        if mission.mission_type == MissionType::Exploration {
            self.add_progress(mission_id, 0.03);
        }
        let Some(leader) = self.engine.fleet_leader(fleet_id) else {
            warn!(
                "Mission {} lost its fleet {}, unassigning",
                mission_id, fleet_id
            );
            if let Some(mut mission) = self.active.get_mut(mission_id) {
                mission.assigned_fleet_id = None;
            }
            return;
        };
        let Some(end_body) = bodies.iter().find(|b| b.id == mission.end_body_id) else {
            return;
        };
        let distance = leader.position.distance(&end_body.position);
        if distance > end_body.radius * ARRIVAL_RADIUS_FACTOR {
            return;
        }
        match mission.mission_type {
            MissionType::Trade | MissionType::Delivery => {
                // arrival is the whole job
                if let Some(mut mission) = self.active.get_mut(mission_id) {
                    mission.progress_value = mission.progress_target;
                }
            }
            other => self.add_progress(mission_id, on_site_progress(other)),
        }
    }

    fn complete_mission(&self, mission_id: &str, now_ms: u64) {
        let Some((_, mut mission)) = self.active.remove(mission_id) else {
            return;
        };
        mission.status = MissionStatus::Completed;
        mission.complete_time = Some(now_ms);
        if let Some(fleet_id) = &mission.assigned_fleet_id {
            self.engine.reset_fleet(fleet_id);
        }
        info!(
            "Mission {} ({}) completed, reward {}",
            mission.name, mission.mission_type, mission.reward
        );
        self.completed.lock().unwrap().push(mission);
    }

    fn fail_mission(&self, mission_id: &str, reason: &str) {
        let Some((_, mut mission)) = self.active.remove(mission_id) else {
            return;
        };
        mission.status = MissionStatus::Failed;
        mission.failure_reason = Some(reason.to_string());
        if let Some(fleet_id) = &mission.assigned_fleet_id {
            self.engine.reset_fleet(fleet_id);
        }
        warn!("Mission {} ({}) failed: {}", mission.name, mission.mission_type, reason);
        self.failed.lock().unwrap().push(mission);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiState, NpcStatus, Vector3};

    fn two_bodies() -> Vec<BodyView> {
        vec![
            BodyView {
                id: 1,
                position: Vector3::ZERO,
                radius: 1000.0,
                mass: 1.0e6,
            },
            BodyView {
                id: 2,
                position: Vector3::new(50_000.0, 0.0, 0.0),
                radius: 800.0,
                mass: 5.0e5,
            },
        ]
    }

    #[test]
    fn test_pick_mission_type_cumulative() {
        assert_eq!(pick_mission_type(0.0), MissionType::Combat);
        assert_eq!(pick_mission_type(0.19), MissionType::Combat);
        assert_eq!(pick_mission_type(0.21), MissionType::Trade);
        assert_eq!(pick_mission_type(0.999), MissionType::Exploration);
    }

    #[test]
    fn test_eligibility_table() {
        assert_eq!(
            eligible_fleet_types(MissionType::Combat),
            &[NpcShipType::Enemy]
        );
        assert!(eligible_fleet_types(MissionType::Rescue).contains(&NpcShipType::Civilian));
        assert!(eligible_fleet_types(MissionType::Patrol).contains(&NpcShipType::Transport));
        assert_eq!(
            eligible_fleet_types(MissionType::Exploration),
            &[NpcShipType::Civilian]
        );
    }

    #[test]
    fn test_generation_invariants() {
        let manager = MissionManager::new(Arc::new(NpcEngine::new()));
        let bodies = two_bodies();
        for _ in 0..50 {
            let mission = manager.generate_mission(&bodies, 1000).unwrap();
            assert_ne!(mission.start_body_id, mission.end_body_id);
            assert!(mission.progress_target > 0.0);
            assert!(mission.progress_value <= mission.progress_target);
            assert!((1..=5).contains(&mission.difficulty));
            assert!(mission.expiry_time > mission.start_time);
            assert!(mission.reward > 0);
            assert!(!mission.name.is_empty());
        }
        assert_eq!(manager.active_count(), 50);
    }

    #[test]
    fn test_generation_needs_two_bodies() {
        let manager = MissionManager::new(Arc::new(NpcEngine::new()));
        assert!(manager.generate_mission(&[], 0).is_none());
        assert!(manager
            .generate_mission(&two_bodies()[..1], 0)
            .is_none());
    }

    #[test]
    fn test_expired_mission_fails() {
        let manager = MissionManager::new(Arc::new(NpcEngine::new()));
        let bodies = two_bodies();
        let mission = manager.generate_mission(&bodies, 1000).unwrap();
        let after_expiry = mission.expiry_time + 1;
        manager.update_missions(&bodies, after_expiry);
        assert_eq!(manager.active_count(), 0);
        let failed = manager.failed_missions();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, MissionStatus::Failed);
        assert_eq!(failed[0].failure_reason.as_deref(), Some("expired"));
    }

    #[test]
    fn test_combat_mission_lifecycle() {
        let engine = Arc::new(NpcEngine::new());
        let manager = MissionManager::new(engine.clone());
        let bodies = two_bodies();
        let fleet = engine.create_fleet(NpcShipType::Enemy, 3, "staging", None);

        // force a combat mission rather than rolling the dice
        let mut mission = Mission {
            mission_id: "m-combat".to_string(),
            name: "Crimson Vector".to_string(),
            description: "test".to_string(),
            mission_type: MissionType::Combat,
            status: MissionStatus::Active,
            reward: 500,
            difficulty: 1,
            start_body_id: 1,
            end_body_id: 2,
            assigned_fleet_id: None,
            progress_value: 0.0,
            progress_target: 5.0,
            start_time: 0,
            expiry_time: u64::MAX,
            complete_time: None,
            failure_reason: None,
        };
        mission.progress_target = progress_target(MissionType::Combat, 1);
        manager.active.insert(mission.mission_id.clone(), mission);

        // first pass assigns the enemy fleet and points the leader at
        // the destination
        manager.update_missions(&bodies, 1000);
        let mission = manager.get_mission("m-combat").unwrap();
        assert_eq!(mission.assigned_fleet_id.as_deref(), Some(fleet.fleet_id.as_str()));
        let leader = engine.fleet_leader(&fleet.fleet_id).unwrap();
        assert_eq!(leader.ai_state, AiState::WaypointFollowing);
        assert!(!leader.waypoints.is_empty());

        // inject five progress ticks and let the next pass retire it
        for _ in 0..5 {
            manager.add_progress("m-combat", 1.0);
        }
        manager.update_missions(&bodies, 2000);
        assert_eq!(manager.active_count(), 0);
        let completed = manager.completed_missions();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, MissionStatus::Completed);

        // fleet released: ships reset to patrolling/passive
        for ship in engine.fleet_ships(&fleet.fleet_id) {
            assert_eq!(ship.ai_state, AiState::Patrolling);
            assert_eq!(ship.status, NpcStatus::Passive);
        }
        assert_eq!(
            engine.get_fleet(&fleet.fleet_id).unwrap().assigned_mission_id,
            None
        );
    }

    #[test]
    fn test_trade_completes_on_arrival() {
        let engine = Arc::new(NpcEngine::new());
        let manager = MissionManager::new(engine.clone());
        let bodies = two_bodies();
        let fleet = engine.create_fleet(
            NpcShipType::Transport,
            2,
            "dock",
            Some(&bodies[1]),
        );
        let mission = Mission {
            mission_id: "m-trade".to_string(),
            name: "Pale Ledger".to_string(),
            description: "test".to_string(),
            mission_type: MissionType::Trade,
            status: MissionStatus::Active,
            reward: 250,
            difficulty: 2,
            start_body_id: 1,
            end_body_id: 2,
            assigned_fleet_id: None,
            progress_value: 0.0,
            progress_target: 4.0,
            start_time: 0,
            expiry_time: u64::MAX,
            complete_time: None,
            failure_reason: None,
        };
        manager.active.insert(mission.mission_id.clone(), mission);

        manager.update_missions(&bodies, 1000);
        // fleet spawned around body 2, so the leader is already on site:
        // trade completes in full on the next pass
        manager.update_missions(&bodies, 2000);
        manager.update_missions(&bodies, 3000);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.completed_missions().len(), 1);
        let _ = fleet;
    }

    #[test]
    fn test_no_eligible_fleet_stays_unassigned() {
        let engine = Arc::new(NpcEngine::new());
        let manager = MissionManager::new(engine.clone());
        let bodies = two_bodies();
        engine.create_fleet(NpcShipType::Civilian, 2, "nowhere", None);
        let mission = Mission {
            mission_id: "m-combat2".to_string(),
            name: "Iron Reach".to_string(),
            description: "test".to_string(),
            mission_type: MissionType::Combat,
            status: MissionStatus::Active,
            reward: 500,
            difficulty: 1,
            start_body_id: 1,
            end_body_id: 2,
            assigned_fleet_id: None,
            progress_value: 0.0,
            progress_target: 5.0,
            start_time: 0,
            expiry_time: u64::MAX,
            complete_time: None,
            failure_reason: None,
        };
        manager.active.insert(mission.mission_id.clone(), mission);
        manager.update_missions(&bodies, 1000);
        assert_eq!(
            manager.get_mission("m-combat2").unwrap().assigned_fleet_id,
            None
        );
    }
}
