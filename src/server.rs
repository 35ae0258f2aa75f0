use crate::celestial::CelestialSimulator;
use crate::config::{AoiResizePolicy, CONFIG};
use crate::game_state::GameStateManager;
use crate::missions::MissionManager;
use crate::models::{
    AreaOfInterest, CelestialBody, LogLevel, NpcFleet, NpcShip, ServerSettings, ShipTemplate,
    StatsSample, User, Vector3,
};
use crate::net::{DisconnectReason, TransportEvent, TransportSettings, UdpTransport};
use crate::npc::NpcEngine;
use crate::protocol::{AoiState, CelestialState, Payload};
use crate::spatial::AoiIndex;
use crate::store::{PersistQueue, RecordKind, SharedStore, TypedStore};
use crate::telemetry::EventLog;
use crate::util::now_ms;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Clients must share this major version to be admitted.
const PROTOCOL_MAJOR_VERSION: &str = "1";

/// Admission decision hook. The default trusts every connect; deploys
/// that need credentials swap in their own implementation.
pub trait ConnectHook: Send + Sync {
    fn authorize(&self, username: &str, version: &str) -> Result<(), String>;
}

struct TrustOnConnect;

impl ConnectHook for TrustOnConnect {
    fn authorize(&self, _username: &str, _version: &str) -> Result<(), String> {
        Ok(())
    }
}

const CELESTIAL_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const CELESTIAL_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
const NPC_BROADCAST_INTERVAL: Duration = Duration::from_millis(500);
const MISSION_UPDATE_INTERVAL: Duration = Duration::from_secs(5);
const MISSION_GENERATE_INTERVAL: Duration = Duration::from_secs(60);
const STATS_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_MISSION_COUNT: usize = 10;

/// Wires the transport, stores, simulators and managers together and
/// owns the schedulers.
pub struct Server {
    pub settings: Arc<RwLock<ServerSettings>>,
    pub store: SharedStore,
    pub transport: UdpTransport,
    pub aoi: Arc<AoiIndex>,
    pub celestial: Arc<CelestialSimulator>,
    pub npc: Arc<NpcEngine>,
    pub game: Arc<GameStateManager>,
    pub missions: Arc<MissionManager>,
    pub event_log: EventLog,
    pub persist: PersistQueue,
    started_at: Instant,
    emergency_stopped: AtomicBool,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    connect_hook: RwLock<Arc<dyn ConnectHook>>,
}

impl Server {
    pub async fn new(store: SharedStore) -> std::io::Result<Arc<Server>> {
        Self::new_with_port(store, CONFIG.udp_port).await
    }

    pub async fn new_with_port(store: SharedStore, udp_port: u16) -> std::io::Result<Arc<Server>> {
        store.load_world().await;

        let settings: ServerSettings = store
            .get_as(RecordKind::Settings, "server")
            .await
            .unwrap_or_default();
        store
            .put_record(RecordKind::Settings, "server", &settings)
            .await;

        let transport_settings = TransportSettings {
            resend_interval_ms: settings.reliable_resend_interval,
            max_attempts: settings.max_reliable_resends,
            disconnect_timeout_ms: settings.disconnect_timeout,
            ..TransportSettings::default()
        };
        let (event_tx, event_rx) = mpsc::channel(1024);
        let transport = UdpTransport::bind(udp_port, transport_settings, event_tx).await?;

        let celestial = Arc::new(CelestialSimulator::new(settings.simulation_speed));
        let bodies: Vec<CelestialBody> = store.list_as(RecordKind::CelestialBodies).await;
        if bodies.is_empty() {
            celestial.seed_default_system();
            for body in celestial.bodies() {
                store
                    .put_record(RecordKind::CelestialBodies, &body.id.to_string(), &body)
                    .await;
            }
        } else {
            for body in bodies {
                celestial.add_body(body);
            }
        }
        celestial.update();

        let aoi = Arc::new(AoiIndex::new());
        let areas: Vec<AreaOfInterest> = store.list_as(RecordKind::AreasOfInterest).await;
        if areas.is_empty() {
            Self::seed_default_areas(&aoi, &celestial, settings.aoi_radius);
            for area in aoi.areas() {
                store
                    .put_record(RecordKind::AreasOfInterest, &area.id, &area)
                    .await;
            }
        } else {
            for area in areas {
                aoi.create_area(
                    &area.id,
                    &area.name,
                    area.center,
                    area.radius,
                    area.capacity_limit,
                );
            }
        }

        let npc = Arc::new(NpcEngine::new());
        for template in store
            .list_as::<ShipTemplate>(RecordKind::ShipTemplates)
            .await
        {
            npc.upsert_template(template);
        }
        for fleet in store.list_as::<NpcFleet>(RecordKind::NpcFleets).await {
            npc.insert_fleet(fleet);
        }
        for ship in store.list_as::<NpcShip>(RecordKind::NpcShips).await {
            npc.insert_ship(ship);
        }

        let persist = PersistQueue::start(store.clone());
        let settings = Arc::new(RwLock::new(settings));
        let game = Arc::new(GameStateManager::new(
            aoi.clone(),
            npc.clone(),
            celestial.clone(),
            transport.clone(),
            persist.clone(),
            settings.clone(),
        ));
        let missions = Arc::new(MissionManager::new(npc.clone()));
        missions.generate_initial(INITIAL_MISSION_COUNT, &game.body_views(), now_ms());

        Ok(Arc::new(Server {
            settings,
            store,
            transport,
            aoi,
            celestial,
            npc,
            game,
            missions,
            event_log: EventLog::new(),
            persist,
            started_at: Instant::now(),
            emergency_stopped: AtomicBool::new(false),
            events: Mutex::new(Some(event_rx)),
            connect_hook: RwLock::new(Arc::new(TrustOnConnect)),
        }))
    }

    pub fn set_connect_hook(&self, hook: Arc<dyn ConnectHook>) {
        *self.connect_hook.write().unwrap() = hook;
    }

    /// One area around the origin plus one per planet, at the planet's
    /// current position.
    fn seed_default_areas(aoi: &AoiIndex, celestial: &CelestialSimulator, radius: f32) {
        aoi.create_area("aoi-core", "Core", Vector3::ZERO, radius, 400);
        for body in celestial.bodies() {
            if body.body_type == crate::models::CelestialBodyType::Planet {
                aoi.create_area(
                    &format!("aoi-{}", body.id),
                    &format!("{} Sector", body.name),
                    body.cached_position,
                    radius,
                    400,
                );
            }
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped.load(Ordering::SeqCst)
    }

    /// Run every scheduler and the transport event loop until shutdown.
    pub async fn run(self: &Arc<Self>) {
        self.transport.start();

        {
            let server = self.clone();
            tokio::spawn(async move {
                crate::web_api_server::run(server).await;
            });
        }

        self.spawn_tick_loop();
        self.spawn_interval(CELESTIAL_UPDATE_INTERVAL, |server| async move {
            server.celestial.update();
        });
        self.spawn_interval(CELESTIAL_BROADCAST_INTERVAL, |server| async move {
            server.broadcast_celestial().await;
        });
        self.spawn_interval(NPC_BROADCAST_INTERVAL, |server| async move {
            if !server.is_emergency_stopped() {
                server.game.broadcast_npc_updates().await;
            }
        });
        self.spawn_interval(MISSION_UPDATE_INTERVAL, |server| async move {
            if !server.is_emergency_stopped() {
                server
                    .missions
                    .update_missions(&server.game.body_views(), now_ms());
            }
        });
        self.spawn_interval(MISSION_GENERATE_INTERVAL, |server| async move {
            if !server.is_emergency_stopped() {
                server
                    .missions
                    .generate_mission(&server.game.body_views(), now_ms());
            }
        });
        self.spawn_interval(STATS_INTERVAL, |server| async move {
            server.sample_stats();
        });

        let mut events = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("Server::run called twice");

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    self.shutdown().await;
                    break;
                }
            }
        }
    }

    fn spawn_tick_loop(self: &Arc<Self>) {
        let server = self.clone();
        tokio::spawn(async move {
            let tick_rate = server.settings.read().unwrap().tick_rate.max(1);
            let mut interval =
                tokio::time::interval(Duration::from_millis(1000 / tick_rate as u64));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if server.is_emergency_stopped() {
                    continue;
                }
                server.game.tick();
                server.game.broadcast_state_updates().await;
            }
        });
    }

    fn spawn_interval<F, Fut>(self: &Arc<Self>, period: Duration, job: F)
    where
        F: Fn(Arc<Server>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let server = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                job(server.clone()).await;
            }
        });
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connect {
                client_id,
                username,
                version,
                addr,
            } => {
                self.handle_connect(&client_id, &username, &version, addr)
                    .await;
            }
            TransportEvent::Message { client_id, frame } => {
                self.handle_message(&client_id, frame.payload).await;
            }
            TransportEvent::Disconnect { client_id, reason } => {
                self.handle_disconnect(&client_id, reason).await;
            }
        }
    }

    async fn handle_connect(
        &self,
        client_id: &str,
        username: &str,
        version: &str,
        addr: std::net::SocketAddr,
    ) {
        if self.is_emergency_stopped() {
            self.transport
                .disconnect_client(client_id, DisconnectReason::Kicked)
                .await;
            return;
        }
        let max_players = self.settings.read().unwrap().max_players;
        if self.game.player_count() as u32 >= max_players {
            self.event_log.log(
                LogLevel::Warn,
                format!("Rejecting {}: server full", username),
            );
            self.transport
                .disconnect_client(client_id, DisconnectReason::ServerFull)
                .await;
            return;
        }
        if version.split('.').next() != Some(PROTOCOL_MAJOR_VERSION) {
            self.event_log.log(
                LogLevel::Warn,
                format!("Rejecting {}: version {} unsupported", username, version),
            );
            self.transport
                .disconnect_client(client_id, DisconnectReason::VersionMismatch)
                .await;
            return;
        }
        let hook = self.connect_hook.read().unwrap().clone();
        if let Err(reason) = hook.authorize(username, version) {
            self.event_log.log(
                LogLevel::Warn,
                format!("Rejecting {}: {}", username, reason),
            );
            self.transport
                .disconnect_client(client_id, DisconnectReason::Kicked)
                .await;
            return;
        }

        self.find_or_create_user(username).await;
        let player = self
            .game
            .add_player(client_id, username, &addr.ip().to_string(), addr.port());
        self.event_log.log(
            LogLevel::Info,
            format!("Player {} connected as {}", username, client_id),
        );

        self.transport
            .send_reliable(
                client_id,
                Payload::ServerAccept {
                    assigned_client_id: client_id.to_string(),
                    server_time: now_ms(),
                    initial_position: player.position,
                    initial_velocity: player.velocity,
                    initial_rotation: player.rotation,
                },
            )
            .await;

        // the fresh client gets the world picture immediately
        self.transport
            .send(client_id, self.celestial_payload())
            .await;
        let aoi_payload = self.aoi_payload(client_id);
        self.transport.send(client_id, aoi_payload).await;
    }

    async fn find_or_create_user(&self, username: &str) {
        let users: Vec<User> = self.store.list_as(RecordKind::Users).await;
        if let Some(user) = users.iter().find(|u| u.username == username) {
            let mut user = user.clone();
            user.last_seen_ms = now_ms();
            self.persist
                .enqueue(RecordKind::Users, &user.id.to_string(), &user);
            return;
        }
        let id = self.store.next_id(RecordKind::Users).await;
        let user = User {
            id,
            username: username.to_string(),
            created_ms: now_ms(),
            last_seen_ms: now_ms(),
        };
        self.persist
            .enqueue(RecordKind::Users, &id.to_string(), &user);
    }

    async fn handle_message(&self, client_id: &str, payload: Payload) {
        match payload {
            Payload::ClientStateUpdate {
                position,
                velocity,
                rotation,
                input_sequence: _,
            } => {
                self.game
                    .update_player_state(client_id, position, velocity, rotation);
            }
            other => {
                debug!(
                    "Ignoring {} from {}",
                    other.message_type(),
                    client_id
                );
            }
        }
    }

    async fn handle_disconnect(&self, client_id: &str, reason: DisconnectReason) {
        self.event_log.log(
            LogLevel::Info,
            format!("Player {} disconnected: {}", client_id, reason),
        );
        self.game.mark_disconnected(client_id);
        self.game.remove_player(client_id);
    }

    pub fn celestial_payload(&self) -> Payload {
        let bodies: Vec<CelestialState> = self
            .celestial
            .bodies()
            .iter()
            .map(|b| CelestialState {
                id: b.id,
                radius: b.radius,
                mass: b.mass,
                orbit_progress: b.orbit_progress,
                reserved: [0.0, 0.0],
                name: b.name.clone(),
                body_type: b.body_type.to_string(),
                color: b.color.clone(),
                position: b.cached_position,
                velocity: b.cached_velocity,
            })
            .collect();
        Payload::ServerCelestialUpdate {
            bodies,
            simulation_time: self.celestial.simulation_time(),
        }
    }

    pub fn aoi_payload(&self, client_id: &str) -> Payload {
        let areas: Vec<AoiState> = self
            .aoi
            .areas()
            .iter()
            .map(|a| AoiState {
                id: a.id.clone(),
                name: a.name.clone(),
                center: a.center,
                radius: a.radius,
                player_count: a.stats.player_count.min(u16::MAX as u32) as u16,
                npc_count: a.stats.npc_count.min(u16::MAX as u32) as u16,
            })
            .collect();
        Payload::ServerAoiUpdate {
            areas,
            current_aoi_id: self.aoi.entity_area_id(client_id).unwrap_or_default(),
        }
    }

    async fn broadcast_celestial(&self) {
        if self.is_emergency_stopped() {
            return;
        }
        let payload = self.celestial_payload();
        for client_id in self.transport.client_ids() {
            self.transport.send(&client_id, payload.clone()).await;
        }
    }

    fn sample_stats(&self) {
        let sample = StatsSample {
            timestamp_ms: now_ms(),
            player_count: self.game.player_count() as u32,
            npc_count: self.npc.ship_count() as u32,
            fleet_count: self.npc.fleet_count() as u32,
            mission_count: self.missions.active_count() as u32,
            tick_ms: self.game.last_tick_ms(),
        };
        self.event_log.record_stats(sample.clone());
        self.persist
            .enqueue(RecordKind::ServerStats, &sample.timestamp_ms.to_string(), &sample);
    }

    /// Apply a partial settings update, fanning the live knobs out to
    /// the components that own them.
    pub fn apply_settings(&self, updated: ServerSettings) {
        let old = self.settings.read().unwrap().clone();
        if (updated.simulation_speed - old.simulation_speed).abs() > f64::EPSILON {
            self.celestial.set_simulation_speed(updated.simulation_speed);
        }
        if (updated.aoi_radius - old.aoi_radius).abs() > f32::EPSILON {
            match CONFIG.aoi_resize_policy {
                AoiResizePolicy::Keep => {
                    warn!(
                        "aoiRadius changed {} -> {}: existing areas keep their radius (resize policy: keep)",
                        old.aoi_radius, updated.aoi_radius
                    );
                }
                AoiResizePolicy::Reregister => {
                    for area in self.aoi.areas() {
                        self.aoi.resize_area(&area.id, updated.aoi_radius);
                    }
                    self.aoi.rebuild();
                }
            }
        }
        *self.settings.write().unwrap() = updated.clone();
        self.persist
            .enqueue(RecordKind::Settings, "server", &updated);
    }

    async fn disconnect_all(&self, reason: DisconnectReason) {
        let disconnects = self
            .transport
            .client_ids()
            .into_iter()
            .map(|client_id| {
                let transport = self.transport.clone();
                async move { transport.disconnect_client(&client_id, reason).await }
            })
            .collect::<Vec<_>>();
        futures::future::join_all(disconnects).await;
    }

    /// Operator red button: disconnect everyone, halt the tick work.
    pub async fn emergency_stop(&self) {
        self.event_log
            .log(LogLevel::Error, "EMERGENCY STOP requested");
        self.emergency_stopped.store(true, Ordering::SeqCst);
        self.disconnect_all(DisconnectReason::ServerShutdown).await;
    }

    /// Graceful shutdown: disconnect every client, flush pending writes,
    /// persist the world.
    pub async fn shutdown(&self) {
        self.disconnect_all(DisconnectReason::ServerShutdown).await;
        self.persist.flush().await;
        for ship in self.npc.ships() {
            self.store
                .put_record(RecordKind::NpcShips, &ship.id.to_string(), &ship)
                .await;
        }
        for fleet in self.npc.fleets() {
            self.store
                .put_record(RecordKind::NpcFleets, &fleet.fleet_id, &fleet)
                .await;
        }
        for area in self.aoi.areas() {
            self.store
                .put_record(RecordKind::AreasOfInterest, &area.id, &area)
                .await;
        }
        self.store.save_world().await;
        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::client_frame;
    use crate::protocol::decode_frame;
    use crate::store::MemoryStore;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    async fn test_server() -> Arc<Server> {
        // port 0 via env would race between tests; bind directly instead
        let store: SharedStore = Arc::new(MemoryStore::new());
        store
            .put_record(
                RecordKind::Settings,
                "server",
                &ServerSettings {
                    max_players: 2,
                    ..ServerSettings::default()
                },
            )
            .await;
        Server::new_with_port(store, 0).await.unwrap()
    }

    async fn connect(
        server: &Arc<Server>,
        username: &str,
        version: &str,
    ) -> (UdpSocket, Vec<Payload>) {
        let port = server.transport.local_addr().unwrap().port();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(("127.0.0.1", port)).await.unwrap();
        let frame = client_frame(
            "",
            0,
            Payload::ClientConnect {
                username: username.to_string(),
                version: version.to_string(),
            },
        );
        client.send(&frame).await.unwrap();

        // collect the handshake burst; early state updates may
        // interleave with the accept/celestial/aoi pushes
        let mut payloads = Vec::new();
        let mut buf = vec![0u8; 65536];
        while payloads.len() < 8 {
            match timeout(Duration::from_millis(700), client.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    let frame = decode_frame(&buf[..len]).unwrap();
                    let is_reject = matches!(frame.payload, Payload::ServerReject { .. });
                    payloads.push(frame.payload);
                    if is_reject {
                        break;
                    }
                }
                _ => break,
            }
        }
        (client, payloads)
    }

    #[tokio::test]
    async fn test_accept_and_ping() {
        let server = test_server().await;
        let run_server = server.clone();
        tokio::spawn(async move { run_server.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (client, payloads) = connect(&server, "A", "1.0.0").await;
        let accept = payloads
            .iter()
            .find_map(|p| match p {
                Payload::ServerAccept {
                    assigned_client_id,
                    initial_position,
                    initial_rotation,
                    ..
                } => Some((
                    assigned_client_id.clone(),
                    *initial_position,
                    *initial_rotation,
                )),
                _ => None,
            })
            .expect("no SERVER_ACCEPT");
        assert!(!accept.0.is_empty());
        assert_eq!(accept.1, Vector3::ZERO);
        assert_eq!(accept.2, crate::models::Quaternion::IDENTITY);
        // celestial and AOI pushes ride along with the accept
        assert!(payloads
            .iter()
            .any(|p| matches!(p, Payload::ServerCelestialUpdate { .. })));

        let ping = client_frame(&accept.0, 1, Payload::ClientPing { ping_id: 42 });
        client.send(&ping).await.unwrap();
        let mut buf = vec![0u8; 65536];
        let pong = loop {
            let len = timeout(Duration::from_secs(2), client.recv(&mut buf))
                .await
                .expect("no pong")
                .unwrap();
            match decode_frame(&buf[..len]).unwrap().payload {
                Payload::ServerPong { ping_id } => break ping_id,
                _ => continue, // state updates may interleave
            }
        };
        assert_eq!(pong, 42);
    }

    #[tokio::test]
    async fn test_version_reject() {
        let server = test_server().await;
        let run_server = server.clone();
        tokio::spawn(async move { run_server.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_client, payloads) = connect(&server, "B", "0.9").await;
        let reason = payloads
            .iter()
            .find_map(|p| match p {
                Payload::ServerReject { reason } => Some(reason.clone()),
                _ => None,
            })
            .expect("no SERVER_REJECT");
        assert!(reason.contains("version"), "reason: {}", reason);
        assert_eq!(server.game.player_count(), 0);
    }

    #[tokio::test]
    async fn test_server_full_reject() {
        let server = test_server().await;
        let run_server = server.clone();
        tokio::spawn(async move { run_server.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_c1, _) = connect(&server, "one", "1.0.0").await;
        let (_c2, _) = connect(&server, "two", "1.0.0").await;
        assert_eq!(server.game.player_count(), 2);

        let (_c3, payloads) = connect(&server, "three", "1.0.0").await;
        assert!(payloads
            .iter()
            .any(|p| matches!(p, Payload::ServerReject { .. })));
        assert_eq!(server.game.player_count(), 2);
    }

    #[tokio::test]
    async fn test_state_update_flows_to_game_state() {
        let server = test_server().await;
        let run_server = server.clone();
        tokio::spawn(async move { run_server.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (client, payloads) = connect(&server, "mover", "1.0.0").await;
        let client_id = payloads
            .iter()
            .find_map(|p| match p {
                Payload::ServerAccept {
                    assigned_client_id, ..
                } => Some(assigned_client_id.clone()),
                _ => None,
            })
            .unwrap();

        let update = client_frame(
            &client_id,
            1,
            Payload::ClientStateUpdate {
                position: Vector3::new(123.0, 0.0, 0.0),
                velocity: Vector3::ZERO,
                rotation: crate::models::Quaternion::IDENTITY,
                input_sequence: 1,
            },
        );
        client.send(&update).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            server.game.get_player(&client_id).unwrap().position,
            Vector3::new(123.0, 0.0, 0.0)
        );
    }

    #[tokio::test]
    async fn test_emergency_stop_disconnects_all() {
        let server = test_server().await;
        let run_server = server.clone();
        tokio::spawn(async move { run_server.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_client, _) = connect(&server, "doomed", "1.0.0").await;
        assert_eq!(server.transport.client_count(), 1);
        server.emergency_stop().await;
        assert!(server.is_emergency_stopped());
        assert_eq!(server.transport.client_count(), 0);
    }
}
