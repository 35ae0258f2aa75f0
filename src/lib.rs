pub mod models;
pub mod protocol;

pub mod net;
pub mod store;

pub mod celestial;
pub mod config;
pub mod game_state;
pub mod missions;
pub mod npc;
pub mod server;
pub mod spatial;
pub mod telemetry;
pub mod util;
pub mod web_api_server;
