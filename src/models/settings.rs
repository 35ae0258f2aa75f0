use serde::{Deserialize, Serialize};

/// Runtime-tunable server settings, persisted as `settings.json` and
/// partially updatable through the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub max_players: u32,
    pub tick_rate: u32,
    pub simulation_speed: f64,
    pub aoi_radius: f32,
    pub aoi_max_entities: u32,
    pub sanity_check_frequency: u32,
    pub reliable_resend_interval: u64,
    pub max_reliable_resends: u32,
    pub disconnect_timeout: u64,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_players: 2000,
            tick_rate: 20,
            simulation_speed: 10.0,
            aoi_radius: 5000.0,
            aoi_max_entities: 400,
            sanity_check_frequency: 10,
            reliable_resend_interval: 1000,
            max_reliable_resends: 5,
            disconnect_timeout: 30000,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let settings: ServerSettings =
            serde_json::from_str(r#"{"maxPlayers": 100, "tickRate": 10}"#).unwrap();
        assert_eq!(settings.max_players, 100);
        assert_eq!(settings.tick_rate, 10);
        assert_eq!(settings.disconnect_timeout, 30000);
        assert_eq!(settings.simulation_speed, 10.0);
    }
}
