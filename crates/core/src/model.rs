use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const RICH_PRESENCE_CMD: &str = "TIDAL_RICH_PRESENCE";

// issued_at == None means invalidated: stale regardless of elapsed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub issued_at: Option<Instant>,
    pub subject_id: String,
    pub subject_type: String,
}

impl Credential {
    pub fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        match self.issued_at {
            Some(at) => now.saturating_duration_since(at) > ttl,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingEvent {
    #[serde(rename = "fullName")]
    pub track_name: String,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    #[serde(rename = "isPaused", default)]
    pub is_paused: bool,
    #[serde(rename = "position", default)]
    pub position_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTrack {
    pub title: String,
    pub album_name: String,
    pub album_id: String,
    pub album_image_id: Option<String>,
    pub artist_names: Vec<String>,
    pub artist_ids: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalPresenceState {
    pub status: String,
    pub since: i64,
    pub activities: Vec<serde_json::Value>,
    pub afk: bool,
    pub broadcast: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    pub cmd: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub nonce: Option<serde_json::Value>,
}
