use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::LocalPresenceState;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub api_base_url: String,
    pub token: String,
    pub connection_type: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://discord.com/api/v9".to_string(),
            token: String::new(),
            connection_type: "spotify".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_base_url: String,
    pub token_ttl_secs: u64,
    pub duration_tolerance_ms: u64,
    pub max_artists: usize,
    pub request_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.spotify.com".to_string(),
            token_ttl_secs: 600,
            duration_tolerance_ms: 10_000,
            max_artists: 5,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub ports: Vec<u16>,
    pub allowed_origins: Vec<String>,
    pub ipc_socket: Option<PathBuf>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ports: (6463..=6472).collect(),
            allowed_origins: vec!["https://desktop.tidal.com".to_string()],
            ipc_socket: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:6480/gateway".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceDefaults {
    pub status: String,
    pub afk: bool,
    pub since: i64,
    pub activities: Vec<serde_json::Value>,
}

impl Default for PresenceDefaults {
    fn default() -> Self {
        Self {
            status: "online".to_string(),
            afk: false,
            since: 0,
            activities: Vec::new(),
        }
    }
}

impl PresenceDefaults {
    pub fn base_state(&self) -> LocalPresenceState {
        LocalPresenceState {
            status: self.status.clone(),
            since: self.since,
            activities: self.activities.clone(),
            afk: self.afk,
            broadcast: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub log_level: String,
    pub host: HostConfig,
    pub search: SearchConfig,
    pub listener: ListenerConfig,
    pub gateway: GatewayConfig,
    pub presence: PresenceDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: "info".to_string(),
            host: HostConfig::default(),
            search: SearchConfig::default(),
            listener: ListenerConfig::default(),
            gateway: GatewayConfig::default(),
            presence: PresenceDefaults::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PresenceDefaults;
    use serde_json::json;

    #[test]
    fn configured_activities_become_base_state() {
        let defaults = PresenceDefaults {
            status: "idle".to_string(),
            activities: vec![json!({"type": 0, "name": "Editor"})],
            ..PresenceDefaults::default()
        };
        let state = defaults.base_state();
        assert_eq!(state.status, "idle");
        assert_eq!(state.activities, vec![json!({"type": 0, "name": "Editor"})]);
        assert!(state.broadcast.is_none());
    }
}
