use crate::celestial::CelestialSimulator;
use crate::models::{
    Player, Quaternion, ServerSettings, SimAiState, SimulatedPlayer, Vector3,
};
use crate::net::UdpTransport;
use crate::npc::{BodyView, NpcEngine};
use crate::protocol::{EntityState, NpcState, Payload};
use crate::spatial::{AoiIndex, EntityKind, EntityRef};
use crate::store::{PersistQueue, RecordKind};
use crate::util::now_ms;
use dashmap::DashMap;
use log::*;
use rand::prelude::IndexedRandom as _;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Ceiling on a single tick's delta, to survive pauses without a
/// spiral of death.
const MAX_TICK_DELTA: f32 = 0.25;

/// Unconditional caps applied to simulated players.
const SIM_VELOCITY_CAP: f32 = 1000.0;
const WORLD_BOUNDARY: f32 = 2_000_000.0;

const SIM_ACCELERATION: f32 = 120.0;
const SIM_STATE_SWITCH_CHANCE: f64 = 0.005;

/// Hard sanity ceilings for client-reported state.
const SANITY_MAX_SPEED: f32 = 10_000.0;
const SANITY_MAX_ACCEL: f32 = 5_000.0;

/// Owns the player tables and the per-tick update pass: NPC engine,
/// simulated players, AOI membership and the per-client state packets.
pub struct GameStateManager {
    pub aoi: Arc<AoiIndex>,
    pub npc: Arc<NpcEngine>,
    pub celestial: Arc<CelestialSimulator>,
    transport: UdpTransport,
    persist: PersistQueue,
    settings: Arc<RwLock<ServerSettings>>,

    players: DashMap<String, Player>,
    sim_players: DashMap<u64, SimulatedPlayer>,
    next_player_id: AtomicU64,
    next_sim_id: AtomicU64,
    last_tick: Mutex<Option<Instant>>,
    last_tick_ms: Mutex<f64>,
}

impl GameStateManager {
    pub fn new(
        aoi: Arc<AoiIndex>,
        npc: Arc<NpcEngine>,
        celestial: Arc<CelestialSimulator>,
        transport: UdpTransport,
        persist: PersistQueue,
        settings: Arc<RwLock<ServerSettings>>,
    ) -> Self {
        Self {
            aoi,
            npc,
            celestial,
            transport,
            persist,
            settings,
            players: DashMap::new(),
            sim_players: DashMap::new(),
            next_player_id: AtomicU64::new(1),
            next_sim_id: AtomicU64::new(1),
            last_tick: Mutex::new(None),
            last_tick_ms: Mutex::new(0.0),
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn sim_player_count(&self) -> usize {
        self.sim_players.len()
    }

    pub fn players(&self) -> Vec<Player> {
        self.players.iter().map(|p| p.clone()).collect()
    }

    pub fn get_player(&self, client_id: &str) -> Option<Player> {
        self.players.get(client_id).map(|p| p.clone())
    }

    pub fn last_tick_ms(&self) -> f64 {
        *self.last_tick_ms.lock().unwrap()
    }

    pub fn add_player(&self, client_id: &str, username: &str, address: &str, port: u16) -> Player {
        let id = self.next_player_id.fetch_add(1, Ordering::SeqCst);
        let mut player = Player::new(id, client_id, username, address, port);
        player.last_update = now_ms();
        self.players.insert(client_id.to_string(), player.clone());
        self.aoi
            .register_entity(client_id, player.position, EntityKind::Player);
        self.persist
            .enqueue(RecordKind::Players, &id.to_string(), &player);
        player
    }

    /// Mark offline and persist the final state; used on disconnect
    /// before removal.
    pub fn mark_disconnected(&self, client_id: &str) {
        if let Some(mut player) = self.players.get_mut(client_id) {
            player.is_connected = false;
            player.last_update = now_ms();
            let id = player.id.to_string();
            let snapshot = player.clone();
            drop(player);
            self.persist.enqueue(RecordKind::Players, &id, &snapshot);
        }
    }

    pub fn remove_player(&self, client_id: &str) {
        self.aoi.remove_entity(client_id, EntityKind::Player);
        if let Some((_, player)) = self.players.remove(client_id) {
            self.persist
                .enqueue_delete(RecordKind::Players, &player.id.to_string());
        }
    }

    /// Apply an accepted CLIENT_STATE_UPDATE: coarse sanity checks (with
    /// probability 1/sanityCheckFrequency), in-memory mutation, AOI
    /// membership, fire-and-forget persistence.
    pub fn update_player_state(
        &self,
        client_id: &str,
        position: Vector3,
        velocity: Vector3,
        rotation: Quaternion,
    ) {
        let Some(mut player) = self.players.get_mut(client_id) else {
            return;
        };
        let frequency = self.settings.read().unwrap().sanity_check_frequency.max(1);
        let mut position = position;
        let mut velocity = velocity;
        if rand::rng().random_range(0..frequency) == 0 {
            let now = now_ms();
            let dt = ((now.saturating_sub(player.last_update)) as f32 / 1000.0).max(0.001);
            let accel = velocity.sub(&player.velocity).length() / dt;
            if velocity.length() > SANITY_MAX_SPEED {
                warn!(
                    "Sanity: client {} velocity {} over cap, clamping",
                    client_id,
                    velocity.length()
                );
                velocity = velocity.clamp_length(SANITY_MAX_SPEED);
            }
            if accel > SANITY_MAX_ACCEL {
                warn!("Sanity: client {} acceleration {} over cap", client_id, accel);
            }
            if position.length() > WORLD_BOUNDARY {
                warn!(
                    "Sanity: client {} position {:?} outside world, clamping",
                    client_id, position
                );
                position = position.clamp_length(WORLD_BOUNDARY);
            }
        }

        player.position = position;
        player.velocity = velocity;
        player.rotation = rotation.normalize();
        player.last_update = now_ms();
        if let Some((body_id, _)) = self.celestial.nearest_body(&position) {
            player.nearest_body_id = Some(body_id);
        }
        let id = player.id.to_string();
        let snapshot = player.clone();
        drop(player);

        self.aoi
            .update_position(client_id, position, EntityKind::Player);
        self.persist.enqueue(RecordKind::Players, &id, &snapshot);
    }

    /// Spawn operator-requested simulated players, optionally inside a
    /// named area.
    pub fn create_simulated_players(&self, count: u32, area_id: Option<&str>) -> u32 {
        let center = area_id
            .and_then(|id| self.aoi.get_area(id))
            .map(|a| a.center)
            .unwrap_or(Vector3::ZERO);
        let mut rng = rand::rng();
        for _ in 0..count {
            let id = self.next_sim_id.fetch_add(1, Ordering::SeqCst);
            let jitter = Vector3::new(
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
                rng.random_range(-500.0..500.0),
            );
            let sim = SimulatedPlayer::new(id, center.add(&jitter));
            self.aoi
                .register_entity(&sim.entity_id(), sim.position, EntityKind::Player);
            self.sim_players.insert(id, sim);
        }
        info!("Created {} simulated players", count);
        count
    }

    pub fn remove_simulated_players(&self) -> u32 {
        let removed = self.sim_players.len() as u32;
        for sim in self.sim_players.iter() {
            self.aoi
                .remove_entity(&sim.entity_id(), EntityKind::Player);
        }
        self.sim_players.clear();
        info!("Removed {} simulated players", removed);
        removed
    }

    /// One simulation tick: clamp the delta, drive the NPC engine and
    /// the simulated players, refresh AOI membership.
    pub fn tick(&self) -> f32 {
        let started = Instant::now();
        let dt = {
            let mut last = self.last_tick.lock().unwrap();
            let dt = match *last {
                Some(prev) => started.duration_since(prev).as_secs_f32(),
                None => 0.0,
            };
            *last = Some(started);
            dt.min(MAX_TICK_DELTA)
        };
        if dt > 0.0 {
            let bodies = self.body_views();
            self.npc.update(dt, &bodies);
            self.update_simulated_players(dt, &bodies);
            self.refresh_npc_membership();
        }
        *self.last_tick_ms.lock().unwrap() = started.elapsed().as_secs_f64() * 1000.0;
        dt
    }

    pub fn body_views(&self) -> Vec<BodyView> {
        self.celestial
            .bodies()
            .iter()
            .map(|b| BodyView {
                id: b.id,
                position: b.cached_position,
                radius: b.radius,
                mass: b.mass,
            })
            .collect()
    }

    fn refresh_npc_membership(&self) {
        for ship in self.npc.ships() {
            self.aoi
                .update_position(&ship.entity_id(), ship.position, EntityKind::Npc);
        }
    }

    /// The coarse state machine mirroring NPC behavior for operator
    /// load testing: exploring / orbiting / traveling / mining / combat.
    fn update_simulated_players(&self, dt: f32, bodies: &[BodyView]) {
        let player_positions: Vec<(String, Vector3)> = self
            .players
            .iter()
            .filter(|p| p.is_connected)
            .map(|p| (p.client_id.clone(), p.position))
            .collect();
        let body_ids: Vec<u32> = bodies.iter().map(|b| b.id).collect();
        let mut rng = rand::rng();

        for mut sim in self.sim_players.iter_mut() {
            if rng.random::<f64>() < SIM_STATE_SWITCH_CHANCE {
                sim.ai_state = *[
                    SimAiState::Exploring,
                    SimAiState::Orbiting,
                    SimAiState::Traveling,
                    SimAiState::Mining,
                    SimAiState::Combat,
                ]
                .choose(&mut rng)
                .unwrap();
                if matches!(
                    sim.ai_state,
                    SimAiState::Orbiting | SimAiState::Traveling | SimAiState::Mining
                ) && sim.target_body_id.is_none()
                {
                    sim.target_body_id = body_ids.choose(&mut rng).copied();
                }
            }

            let accel = match sim.ai_state {
                SimAiState::Exploring => {
                    if rng.random::<f64>() < 0.01 {
                        random_direction(&mut rng).scale(SIM_ACCELERATION * 0.5)
                    } else {
                        Vector3::ZERO
                    }
                }
                SimAiState::Traveling => match self.sim_target(&sim, bodies) {
                    Some(body) => {
                        let to_body = body.position.sub(&sim.position);
                        if to_body.length() <= body.radius * 3.0 {
                            sim.ai_state = SimAiState::Orbiting;
                            Vector3::ZERO
                        } else {
                            to_body.normalize().scale(SIM_ACCELERATION)
                        }
                    }
                    None => Vector3::ZERO,
                },
                SimAiState::Orbiting | SimAiState::Mining => {
                    match self.sim_target(&sim, bodies) {
                        Some(body) => orbit_band_accel(&sim.position, body),
                        None => Vector3::ZERO,
                    }
                }
                SimAiState::Combat => {
                    let nearest = player_positions
                        .iter()
                        .min_by(|a, b| {
                            a.1.distance(&sim.position)
                                .total_cmp(&b.1.distance(&sim.position))
                        });
                    match nearest {
                        Some((_, target)) => {
                            target.sub(&sim.position).normalize().scale(SIM_ACCELERATION)
                        }
                        None => {
                            sim.ai_state = SimAiState::Exploring;
                            Vector3::ZERO
                        }
                    }
                }
            };

            sim.velocity = sim
                .velocity
                .add(&accel.scale(dt))
                .clamp_length(SIM_VELOCITY_CAP);
            sim.position = sim.position.add(&sim.velocity.scale(dt));

            // outer boundary: bounce back toward the middle of the world
            if sim.position.length() > WORLD_BOUNDARY {
                sim.position = sim.position.clamp_length(WORLD_BOUNDARY);
                sim.velocity = sim
                    .position
                    .normalize()
                    .scale(-sim.velocity.length().max(SIM_ACCELERATION));
            }
            sim.last_update = now_ms();
            let entity_id = sim.entity_id();
            let position = sim.position;
            drop(sim);
            self.aoi
                .update_position(&entity_id, position, EntityKind::Player);
        }
    }

    fn sim_target<'a>(
        &self,
        sim: &SimulatedPlayer,
        bodies: &'a [BodyView],
    ) -> Option<&'a BodyView> {
        let target_id = sim.target_body_id?;
        bodies.iter().find(|b| b.id == target_id)
    }

    /// Every connected entity with kinematics, for relevance filtering
    /// and packet assembly.
    fn entity_table(&self) -> HashMap<String, (EntityState, EntityKind)> {
        let mut table = HashMap::new();
        for player in self.players.iter() {
            table.insert(
                player.client_id.clone(),
                (
                    EntityState {
                        entity_id: player.client_id.clone(),
                        entity_type: "player".to_string(),
                        position: player.position,
                        velocity: player.velocity,
                        rotation: player.rotation,
                    },
                    EntityKind::Player,
                ),
            );
        }
        for sim in self.sim_players.iter() {
            table.insert(
                sim.entity_id(),
                (
                    EntityState {
                        entity_id: sim.entity_id(),
                        entity_type: "player".to_string(),
                        position: sim.position,
                        velocity: sim.velocity,
                        rotation: sim.rotation,
                    },
                    EntityKind::Player,
                ),
            );
        }
        for ship in self.npc.ships() {
            table.insert(
                ship.entity_id(),
                (
                    EntityState {
                        entity_id: ship.entity_id(),
                        entity_type: "npc".to_string(),
                        position: ship.position,
                        velocity: ship.velocity,
                        rotation: ship.rotation,
                    },
                    EntityKind::Npc,
                ),
            );
        }
        table
    }

    /// Build one SERVER_STATE_UPDATE per connected player from its
    /// relevance set, excluding the observer itself.
    pub fn assemble_state_updates(&self) -> Vec<(String, Payload)> {
        let table = self.entity_table();
        let refs: Vec<EntityRef> = table
            .values()
            .map(|(entity, kind)| EntityRef {
                id: entity.entity_id.clone(),
                position: entity.position,
                kind: *kind,
            })
            .collect();
        let server_time = now_ms();

        self.players
            .iter()
            .filter(|p| p.is_connected)
            .map(|player| {
                let client_id = player.client_id.clone();
                let relevant = self.aoi.relevant_entities(&client_id, &refs);
                let entities: Vec<EntityState> = relevant
                    .iter()
                    .filter(|e| e.id != client_id)
                    .filter_map(|e| table.get(&e.id).map(|(entity, _)| entity.clone()))
                    .collect();
                let aoi_id = self.aoi.entity_area_id(&client_id).unwrap_or_default();
                (
                    client_id,
                    Payload::ServerStateUpdate {
                        entities,
                        aoi_id,
                        server_time,
                    },
                )
            })
            .collect()
    }

    pub async fn broadcast_state_updates(&self) {
        for (client_id, payload) in self.assemble_state_updates() {
            self.transport.send(&client_id, payload).await;
        }
    }

    /// NPC detail packets: only ships within the observer's current AOI
    /// radius.
    pub fn assemble_npc_updates(&self) -> Vec<(String, Payload)> {
        let ships = self.npc.ships();
        self.players
            .iter()
            .filter(|p| p.is_connected)
            .filter_map(|player| {
                let area = self
                    .aoi
                    .entity_area_id(&player.client_id)
                    .and_then(|id| self.aoi.get_area(&id))?;
                let npcs: Vec<NpcState> = ships
                    .iter()
                    .filter(|s| s.position.distance(&player.position) <= area.radius)
                    .map(|s| NpcState {
                        entity: EntityState {
                            entity_id: s.entity_id(),
                            entity_type: "npc".to_string(),
                            position: s.position,
                            velocity: s.velocity,
                            rotation: s.rotation,
                        },
                        npc_type: s.ship_type.to_string(),
                        status: s.status.to_string(),
                        target_id: s.target_id.clone(),
                    })
                    .collect();
                Some((
                    player.client_id.clone(),
                    Payload::ServerNpcUpdate { npcs },
                ))
            })
            .collect()
    }

    pub async fn broadcast_npc_updates(&self) {
        for (client_id, payload) in self.assemble_npc_updates() {
            self.transport.send(&client_id, payload).await;
        }
    }
}

fn random_direction(rng: &mut impl Rng) -> Vector3 {
    crate::npc::steering::random_unit(rng)
}

/// Hold a loose band around a body, drifting tangentially inside it.
fn orbit_band_accel(position: &Vector3, body: &BodyView) -> Vector3 {
    let from_body = position.sub(&body.position);
    let dist = from_body.length();
    if dist < 1.0 {
        return Vector3::new(SIM_ACCELERATION, 0.0, 0.0);
    }
    let band = body.radius * 2.0;
    let radial = from_body.normalize();
    let err = dist - band;
    if err.abs() > band * 0.25 {
        radial.scale(-err.signum() * SIM_ACCELERATION * 0.6)
    } else {
        radial
            .cross(&Vector3::new(0.0, 1.0, 0.0))
            .normalize()
            .scale(SIM_ACCELERATION * 0.3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TransportSettings;
    use crate::store::{MemoryStore, SharedStore};
    use tokio::sync::mpsc;

    async fn test_manager() -> GameStateManager {
        let (tx, _rx) = mpsc::channel(16);
        let transport = UdpTransport::bind(0, TransportSettings::default(), tx)
            .await
            .unwrap();
        let store: SharedStore = Arc::new(MemoryStore::new());
        let persist = PersistQueue::start(store);
        GameStateManager::new(
            Arc::new(AoiIndex::new()),
            Arc::new(NpcEngine::new()),
            Arc::new(CelestialSimulator::new(1.0)),
            transport,
            persist,
            Arc::new(RwLock::new(ServerSettings::default())),
        )
    }

    #[tokio::test]
    async fn test_add_update_remove_player() {
        let manager = test_manager().await;
        manager
            .aoi
            .create_area("a", "A", Vector3::ZERO, 1000.0, 400);
        let player = manager.add_player("c1", "ada", "127.0.0.1", 5555);
        assert_eq!(player.id, 1);
        assert_eq!(player.position, Vector3::ZERO);
        assert_eq!(manager.aoi.get_area("a").unwrap().stats.player_count, 1);

        manager.update_player_state(
            "c1",
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Quaternion::IDENTITY,
        );
        assert_eq!(
            manager.get_player("c1").unwrap().position,
            Vector3::new(10.0, 0.0, 0.0)
        );

        manager.remove_player("c1");
        assert_eq!(manager.player_count(), 0);
        assert_eq!(manager.aoi.get_area("a").unwrap().stats.player_count, 0);
    }

    #[tokio::test]
    async fn test_aoi_transition_scenario() {
        let manager = test_manager().await;
        manager
            .aoi
            .create_area("a", "A", Vector3::ZERO, 1000.0, 400);
        manager
            .aoi
            .create_area("b", "B", Vector3::new(5000.0, 0.0, 0.0), 1000.0, 400);

        manager.add_player("p1", "one", "127.0.0.1", 1111);
        manager.add_player("p2", "two", "127.0.0.1", 2222);
        manager.update_player_state(
            "p2",
            Vector3::new(5200.0, 0.0, 0.0),
            Vector3::ZERO,
            Quaternion::IDENTITY,
        );

        // far apart in different areas: neither sees the other
        let updates: HashMap<String, Payload> =
            manager.assemble_state_updates().into_iter().collect();
        for id in ["p1", "p2"] {
            match &updates[id] {
                Payload::ServerStateUpdate { entities, .. } => {
                    assert!(entities.is_empty(), "{} should see nobody", id)
                }
                other => panic!("unexpected payload {:?}", other),
            }
        }

        // p1 moves within 1000 of p2: the distance rule kicks in
        manager.update_player_state(
            "p1",
            Vector3::new(4800.0, 0.0, 0.0),
            Vector3::ZERO,
            Quaternion::IDENTITY,
        );
        let updates: HashMap<String, Payload> =
            manager.assemble_state_updates().into_iter().collect();
        match &updates["p1"] {
            Payload::ServerStateUpdate {
                entities, aoi_id, ..
            } => {
                assert!(entities.iter().any(|e| e.entity_id == "p2"));
                // the observer itself is excluded
                assert!(!entities.iter().any(|e| e.entity_id == "p1"));
                assert_eq!(aoi_id, "b");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_simulated_players_respect_caps() {
        let manager = test_manager().await;
        manager
            .aoi
            .create_area("a", "A", Vector3::ZERO, 5000.0, 400);
        manager.create_simulated_players(5, Some("a"));
        assert_eq!(manager.sim_player_count(), 5);

        let bodies = manager.body_views();
        for _ in 0..100 {
            manager.update_simulated_players(0.05, &bodies);
        }
        for sim in manager.sim_players.iter() {
            assert!(sim.velocity.length() <= SIM_VELOCITY_CAP + 1e-3);
            assert!(sim.position.length() <= WORLD_BOUNDARY + 1.0);
        }

        assert_eq!(manager.remove_simulated_players(), 5);
        assert_eq!(manager.sim_player_count(), 0);
        assert_eq!(manager.aoi.get_area("a").unwrap().stats.player_count, 0);
    }

    #[tokio::test]
    async fn test_boundary_bounce() {
        let manager = test_manager().await;
        manager.create_simulated_players(1, None);
        {
            let mut sim = manager.sim_players.iter_mut().next().unwrap();
            sim.position = Vector3::new(WORLD_BOUNDARY + 10_000.0, 0.0, 0.0);
            sim.velocity = Vector3::new(900.0, 0.0, 0.0);
            sim.ai_state = SimAiState::Exploring;
        }
        manager.update_simulated_players(0.05, &[]);
        let sim = manager.sim_players.iter().next().unwrap();
        assert!(sim.position.length() <= WORLD_BOUNDARY + 1.0);
        // pointed back inward
        assert!(sim.velocity.x < 0.0);
    }

    #[tokio::test]
    async fn test_npc_updates_limited_to_aoi_radius() {
        let manager = test_manager().await;
        manager
            .aoi
            .create_area("a", "A", Vector3::ZERO, 1000.0, 400);
        manager.add_player("p1", "one", "127.0.0.1", 1111);

        let fleet = manager
            .npc
            .create_fleet(crate::models::NpcShipType::Enemy, 2, "near", None);
        // move one ship far outside the radius
        let ships = manager.npc.fleet_ships(&fleet.fleet_id);
        {
            let far_id = ships[0].id;
            let mut far = manager.npc.ships().into_iter().find(|s| s.id == far_id).unwrap();
            far.position = Vector3::new(50_000.0, 0.0, 0.0);
            manager.npc.insert_ship(far);
        }

        let updates = manager.assemble_npc_updates();
        assert_eq!(updates.len(), 1);
        match &updates[0].1 {
            Payload::ServerNpcUpdate { npcs } => {
                assert_eq!(npcs.len(), 1);
                assert!(npcs[0].entity.position.length() <= 1000.0);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
