use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MissionType {
    Combat,
    Trade,
    Delivery,
    Mining,
    Escort,
    Patrol,
    Rescue,
    Exploration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MissionStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub mission_id: String,
    pub name: String,
    pub description: String,
    pub mission_type: MissionType,
    pub status: MissionStatus,
    pub reward: u32,
    pub difficulty: u8,
    pub start_body_id: u32,
    pub end_body_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_fleet_id: Option<String>,
    pub progress_value: f32,
    pub progress_target: f32,
    pub start_time: u64,
    pub expiry_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}
