use log::*;
use smo::config::{StoreBackend, CONFIG};
use smo::server::Server;
use smo::store::{JsonFileStore, MemoryStore, SharedStore};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    pretty_env_logger::init_timed();

    info!("Starting space MMO server core");
    info!("Loaded config: {:?}", *CONFIG);

    let store: SharedStore = match CONFIG.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::JsonFile => {
            info!("Persisting world to {}", CONFIG.data_dir);
            Arc::new(JsonFileStore::new(&CONFIG.data_dir))
        }
    };

    let server = match Server::new(store).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind UDP port {}: {}", CONFIG.udp_port, e);
            std::process::exit(1);
        }
    };

    info!(
        "World ready: {} celestial bodies, {} areas, {} fleets",
        server.celestial.body_count(),
        server.aoi.area_count(),
        server.npc.fleet_count()
    );
    server.run().await;
}
