mod aoi;
mod celestial;
mod mission;
mod npc;
mod player;
mod settings;
mod telemetry;
mod vector;

pub use aoi::*;
pub use celestial::*;
pub use mission::*;
pub use npc::*;
pub use player::*;
pub use settings::*;
pub use telemetry::*;
pub use vector::*;
