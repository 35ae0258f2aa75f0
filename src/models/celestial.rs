use super::Vector3;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CelestialBodyType {
    Star,
    Planet,
    Moon,
    Asteroid,
    Station,
}

/// Keplerian orbital elements. `period` is in simulation seconds,
/// `phase` in radians, `inclination` in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orbit {
    pub semi_major: f64,
    pub eccentricity: f64,
    pub inclination: f64,
    pub period: f64,
    pub phase: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelestialBody {
    pub id: u32,
    pub name: String,
    pub body_type: CelestialBodyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u32>,
    pub mass: f32,
    pub radius: f32,
    pub orbit: Orbit,
    pub color: String,
    #[serde(default)]
    pub cached_position: Vector3,
    #[serde(default)]
    pub cached_velocity: Vector3,
    #[serde(default)]
    pub orbit_progress: f32,
}

impl CelestialBody {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
