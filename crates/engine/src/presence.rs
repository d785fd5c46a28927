use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tidal_presence_core::{LocalPresenceState, NowPlayingEvent, ResolvedTrack};
use tracing::debug;

pub const ACTIVITY_TYPE_LISTENING: u8 = 2;
pub const ACTIVITY_NAME: &str = "Spotify";
pub const LISTENING_PARTY_ID: &str = "spotify:751436182252027936";
pub const DEFAULT_MAX_ARTISTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    pub large_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTimestamps {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityParty {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMetadata {
    pub album_id: String,
    pub artist_ids: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub button_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: u8,
    pub name: String,
    pub assets: ActivityAssets,
    pub details: String,
    pub state: String,
    pub timestamps: ActivityTimestamps,
    pub party: ActivityParty,
    pub sync_id: String,
    pub flags: u32,
    pub metadata: ActivityMetadata,
}

// activities[0] is the track slot, None while paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub status: String,
    pub since: i64,
    pub activities: Vec<Option<serde_json::Value>>,
    pub afk: bool,
    pub broadcast: Option<serde_json::Value>,
}

#[async_trait]
pub trait PresenceChannel: Send + Sync {
    async fn presence_update(&self, update: &PresenceUpdate) -> Result<()>;
}

pub trait PresenceStateSource: Send + Sync {
    fn snapshot(&self) -> LocalPresenceState;
}

impl PresenceStateSource for LocalPresenceState {
    fn snapshot(&self) -> LocalPresenceState {
        self.clone()
    }
}

pub fn epoch_millis(now: SystemTime) -> i64 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn build_activity(
    track: &ResolvedTrack,
    event: &NowPlayingEvent,
    now_ms: i64,
    max_artists: usize,
) -> Activity {
    let played_at = now_ms - (event.position_secs * 1_000.0).round() as i64;
    let end_at = played_at + (event.duration_secs * 1_000.0).round() as i64;

    let artists: Vec<&str> = track
        .artist_names
        .iter()
        .take(max_artists)
        .map(String::as_str)
        .collect();

    Activity {
        activity_type: ACTIVITY_TYPE_LISTENING,
        name: ACTIVITY_NAME.to_string(),
        assets: ActivityAssets {
            large_image: track
                .album_image_id
                .as_ref()
                .map(|id| format!("spotify:{id}")),
            large_text: track.album_name.clone(),
        },
        details: track.title.clone(),
        state: artists.join("; "),
        timestamps: ActivityTimestamps {
            start: played_at,
            end: end_at,
        },
        party: ActivityParty {
            id: LISTENING_PARTY_ID.to_string(),
        },
        sync_id: now_ms.to_string(),
        flags: 0,
        metadata: ActivityMetadata {
            album_id: track.album_id.clone(),
            artist_ids: track.artist_ids.iter().take(max_artists).cloned().collect(),
            kind: "track".to_string(),
            button_urls: Vec::new(),
        },
    }
}

pub fn compose_update(
    activity: Option<&Activity>,
    base: LocalPresenceState,
) -> Result<PresenceUpdate> {
    let track_slot = activity
        .map(serde_json::to_value)
        .transpose()
        .context("failed to encode activity")?;

    let mut activities = Vec::with_capacity(base.activities.len() + 1);
    activities.push(track_slot);
    activities.extend(base.activities.into_iter().map(Some));

    Ok(PresenceUpdate {
        status: base.status,
        since: base.since,
        activities,
        afk: base.afk,
        broadcast: base.broadcast,
    })
}

pub struct PresencePublisher {
    channel: Arc<dyn PresenceChannel>,
    max_artists: usize,
}

impl PresencePublisher {
    pub fn new(channel: Arc<dyn PresenceChannel>, max_artists: usize) -> Self {
        Self {
            channel,
            max_artists,
        }
    }

    pub async fn publish(
        &self,
        track: &ResolvedTrack,
        event: &NowPlayingEvent,
        base: LocalPresenceState,
        now: SystemTime,
    ) -> Result<PresenceUpdate> {
        let activity = build_activity(track, event, epoch_millis(now), self.max_artists);
        let slot = (!event.is_paused).then_some(&activity);
        let update = compose_update(slot, base)?;

        debug!(
            payload = %serde_json::to_string(&update).unwrap_or_default(),
            "sending presence update"
        );
        self.channel
            .presence_update(&update)
            .await
            .context("presence update failed")?;
        Ok(update)
    }
}
