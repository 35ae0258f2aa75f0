use crate::config::CONFIG;
use crate::models::{CelestialBody, LogLevel, NpcShipType, ServerSettings};
use crate::server::Server;
use crate::store::{RecordKind, TypedStore};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Json;
use log::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Uniform `{success, data?, error?}` envelope.
fn ok<T: serde::Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn err(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "error": message.into() }))
}

async fn status_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    let settings = server.settings.read().unwrap().clone();
    ok(json!({
        "status": if server.is_emergency_stopped() { "stopped" } else { "online" },
        "version": env!("CARGO_PKG_VERSION"),
        "playerCount": server.game.player_count(),
        "maxPlayers": settings.max_players,
        "uptimeSeconds": server.uptime_seconds(),
    }))
}

async fn celestial_list_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    ok(server.celestial.bodies())
}

async fn celestial_get_handler(
    State(server): State<Arc<Server>>,
    Path(id): Path<u32>,
) -> Json<Value> {
    match server.celestial.get_body(id) {
        Some(body) => ok(body),
        None => err(format!("no celestial body {}", id)),
    }
}

async fn celestial_create_handler(
    State(server): State<Arc<Server>>,
    Json(mut body): Json<CelestialBody>,
) -> Json<Value> {
    if body.id == 0 {
        body.id = server.store.next_id(RecordKind::CelestialBodies).await as u32;
    } else if server.celestial.get_body(body.id).is_some() {
        return err(format!("celestial body {} already exists", body.id));
    }
    server
        .store
        .put_record(RecordKind::CelestialBodies, &body.id.to_string(), &body)
        .await;
    server.celestial.add_body(body.clone());
    ok(body)
}

async fn celestial_update_handler(
    State(server): State<Arc<Server>>,
    Path(id): Path<u32>,
    Json(mut body): Json<CelestialBody>,
) -> Json<Value> {
    if server.celestial.get_body(id).is_none() {
        return err(format!("no celestial body {}", id));
    }
    body.id = id;
    server
        .store
        .put_record(RecordKind::CelestialBodies, &id.to_string(), &body)
        .await;
    server.celestial.add_body(body.clone());
    ok(body)
}

async fn celestial_delete_handler(
    State(server): State<Arc<Server>>,
    Path(id): Path<u32>,
) -> Json<Value> {
    if !server.celestial.remove_body(id) {
        return err(format!("no celestial body {}", id));
    }
    server
        .store
        .delete(RecordKind::CelestialBodies, &id.to_string())
        .await;
    ok(json!({ "removed": id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationSpeedRequest {
    speed: Option<f64>,
    simulation_speed: Option<f64>,
}

async fn simulation_speed_handler(
    State(server): State<Arc<Server>>,
    Json(request): Json<SimulationSpeedRequest>,
) -> Json<Value> {
    let Some(speed) = request.speed.or(request.simulation_speed) else {
        return err("missing speed");
    };
    let applied = server.celestial.set_simulation_speed(speed);
    {
        let mut settings = server.settings.write().unwrap();
        settings.simulation_speed = applied;
    }
    ok(json!({ "simulationSpeed": applied }))
}

async fn fleets_list_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    ok(server.npc.fleets())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFleetRequest {
    #[serde(rename = "type")]
    fleet_type: String,
    count: u32,
    location: String,
    nearest_celestial_body_id: Option<u32>,
}

async fn fleets_create_handler(
    State(server): State<Arc<Server>>,
    Json(request): Json<CreateFleetRequest>,
) -> Json<Value> {
    let Ok(fleet_type) = NpcShipType::from_str(&request.fleet_type) else {
        return err(format!("unknown fleet type {}", request.fleet_type));
    };
    if request.count == 0 || request.count > 200 {
        return err("count must be in 1..=200");
    }
    let bodies = server.game.body_views();
    let nearest = request
        .nearest_celestial_body_id
        .and_then(|id| bodies.iter().find(|b| b.id == id));
    let fleet = server
        .npc
        .create_fleet(fleet_type, request.count, &request.location, nearest);
    server
        .persist
        .enqueue(RecordKind::NpcFleets, &fleet.fleet_id, &fleet);
    for ship in server.npc.fleet_ships(&fleet.fleet_id) {
        server
            .persist
            .enqueue(RecordKind::NpcShips, &ship.id.to_string(), &ship);
    }
    ok(fleet)
}

async fn players_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    ok(server.game.players())
}

async fn aoi_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    ok(server.aoi.areas())
}

#[derive(Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
    level: Option<String>,
}

async fn logs_handler(
    State(server): State<Arc<Server>>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let min_level = match &query.level {
        Some(level) => match LogLevel::from_str(level) {
            Ok(level) => Some(level),
            Err(_) => return err(format!("unknown log level {}", level)),
        },
        None => None,
    };
    ok(server
        .event_log
        .recent_logs(query.limit.unwrap_or(100), min_level))
}

#[derive(Deserialize)]
struct StatsQuery {
    limit: Option<usize>,
}

async fn stats_handler(
    State(server): State<Arc<Server>>,
    Query(query): Query<StatsQuery>,
) -> Json<Value> {
    ok(server.event_log.recent_stats(query.limit.unwrap_or(100)))
}

async fn settings_get_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    let settings = server.settings.read().unwrap().clone();
    ok(settings)
}

/// Partial update: merge the supplied fields over the current settings.
async fn settings_put_handler(
    State(server): State<Arc<Server>>,
    Json(patch): Json<Value>,
) -> Json<Value> {
    let Value::Object(patch) = patch else {
        return err("settings patch must be an object");
    };
    let current = server.settings.read().unwrap().clone();
    let mut merged = match serde_json::to_value(&current) {
        Ok(Value::Object(map)) => map,
        _ => return err("settings serialization failed"),
    };
    for (key, value) in patch {
        merged.insert(key, value);
    }
    match serde_json::from_value::<ServerSettings>(Value::Object(merged)) {
        Ok(updated) => {
            server.apply_settings(updated.clone());
            ok(updated)
        }
        Err(e) => err(format!("invalid settings: {}", e)),
    }
}

async fn emergency_stop_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    server.emergency_stop().await;
    ok(json!({ "stopped": true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatedPlayersRequest {
    count: u32,
    area_id: Option<String>,
}

async fn simulated_players_create_handler(
    State(server): State<Arc<Server>>,
    Json(request): Json<SimulatedPlayersRequest>,
) -> Json<Value> {
    if request.count == 0 || request.count > 2000 {
        return err("count must be in 1..=2000");
    }
    let created = server
        .game
        .create_simulated_players(request.count, request.area_id.as_deref());
    ok(json!({ "created": created }))
}

async fn simulated_players_delete_handler(State(server): State<Arc<Server>>) -> Json<Value> {
    ok(json!({ "removed": server.game.remove_simulated_players() }))
}

pub fn router(server: Arc<Server>) -> axum::Router {
    axum::Router::new()
        .route("/api/status", get(status_handler))
        .route(
            "/api/celestial",
            get(celestial_list_handler).post(celestial_create_handler),
        )
        .route("/api/celestial/simulation", put(simulation_speed_handler))
        .route(
            "/api/celestial/{id}",
            get(celestial_get_handler)
                .put(celestial_update_handler)
                .delete(celestial_delete_handler),
        )
        .route(
            "/api/npc/fleets",
            get(fleets_list_handler).post(fleets_create_handler),
        )
        .route("/api/players", get(players_handler))
        .route("/api/aoi", get(aoi_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/stats", get(stats_handler))
        .route(
            "/api/settings",
            get(settings_get_handler).put(settings_put_handler),
        )
        .route("/api/emergency-stop", post(emergency_stop_handler))
        .route(
            "/api/simulated-players",
            post(simulated_players_create_handler).delete(simulated_players_delete_handler),
        )
        .with_state(server)
        .layer(CorsLayer::permissive())
}

pub async fn run(server: Arc<Server>) {
    let app = router(server);
    let addr = ("0.0.0.0", CONFIG.http_port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(
                "Failed to bind HTTP control plane on {}: {}",
                CONFIG.http_port, e
            );
            return;
        }
    };
    info!(
        "Control plane listening on {}",
        listener.local_addr().unwrap()
    );
    if let Err(e) = axum::serve(listener, app).await {
        error!("Control plane server error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_request_deserializes_api_shape() {
        let request: CreateFleetRequest = serde_json::from_str(
            r#"{"type": "mining", "count": 5, "location": "outer belt", "nearestCelestialBodyId": 3}"#,
        )
        .unwrap();
        assert_eq!(request.fleet_type, "mining");
        assert_eq!(request.count, 5);
        assert_eq!(request.nearest_celestial_body_id, Some(3));
        assert!(NpcShipType::from_str(&request.fleet_type).is_ok());
    }

    #[test]
    fn test_simulation_speed_accepts_both_keys() {
        let a: SimulationSpeedRequest = serde_json::from_str(r#"{"speed": 5.0}"#).unwrap();
        assert_eq!(a.speed, Some(5.0));
        let b: SimulationSpeedRequest =
            serde_json::from_str(r#"{"simulationSpeed": 7.0}"#).unwrap();
        assert_eq!(b.simulation_speed, Some(7.0));
    }
}
