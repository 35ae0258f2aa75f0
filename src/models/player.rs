use super::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Canonical record for a connected human. Created on accepted connect,
/// mutated on every accepted state update, deleted on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: u64,
    pub client_id: String,
    pub username: String,
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Quaternion,
    pub is_connected: bool,
    pub last_update: u64,
    pub address: String,
    pub port: u16,
    pub nearest_body_id: Option<u32>,
}

impl Player {
    pub fn new(id: u64, client_id: &str, username: &str, address: &str, port: u16) -> Self {
        Self {
            id,
            client_id: client_id.to_string(),
            username: username.to_string(),
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
            rotation: Quaternion::IDENTITY,
            is_connected: true,
            last_update: 0,
            address: address.to_string(),
            port,
            nearest_body_id: None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SimAiState {
    Exploring,
    Orbiting,
    Traveling,
    Mining,
    Combat,
}

/// Same shape as Player plus a coarse AI state. Never carries a live
/// network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedPlayer {
    pub id: u64,
    pub username: String,
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Quaternion,
    pub ai_state: SimAiState,
    pub target_body_id: Option<u32>,
    pub last_update: u64,
}

impl SimulatedPlayer {
    pub fn new(id: u64, position: Vector3) -> Self {
        Self {
            id,
            username: format!("sim-{}", id),
            position,
            velocity: Vector3::ZERO,
            rotation: Quaternion::IDENTITY,
            ai_state: SimAiState::Exploring,
            target_body_id: None,
            last_update: 0,
        }
    }

    pub fn entity_id(&self) -> String {
        format!("sim-{}", self.id)
    }
}
