pub mod presence;
pub mod resolver;
pub mod token;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use tidal_presence_core::{AppConfig, NowPlayingEvent};
use tidal_presence_providers::TrackSearch;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use presence::{
    Activity, PresenceChannel, PresencePublisher, PresenceStateSource, PresenceUpdate,
};
pub use resolver::{Resolution, TrackResolver};
pub use token::TokenCache;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub token_ttl: Duration,
    pub duration_tolerance_ms: u64,
    pub max_artists: usize,
}

impl EngineConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            token_ttl: Duration::from_secs(cfg.search.token_ttl_secs),
            duration_tolerance_ms: cfg.search.duration_tolerance_ms,
            max_artists: cfg.search.max_artists,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_ttl: token::DEFAULT_TOKEN_TTL,
            duration_tolerance_ms: resolver::DEFAULT_DURATION_TOLERANCE_MS,
            max_artists: presence::DEFAULT_MAX_ARTISTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Published(PresenceUpdate),
    NotFound,
    Superseded,
}

// An event never publishes over one that arrived after it.
pub struct Bridge {
    tokens: Arc<TokenCache>,
    resolver: TrackResolver,
    publisher: PresencePublisher,
    presence_state: Arc<dyn PresenceStateSource>,
    next_seq: AtomicU64,
    last_published: Mutex<u64>,
}

impl Bridge {
    pub fn new(
        cfg: &EngineConfig,
        tokens: Arc<TokenCache>,
        search: Arc<dyn TrackSearch>,
        channel: Arc<dyn PresenceChannel>,
        presence_state: Arc<dyn PresenceStateSource>,
    ) -> Self {
        Self {
            resolver: TrackResolver::new(search, tokens.clone(), cfg.duration_tolerance_ms),
            publisher: PresencePublisher::new(channel, cfg.max_artists),
            tokens,
            presence_state,
            next_seq: AtomicU64::new(0),
            last_published: Mutex::new(0),
        }
    }

    pub async fn handle(
        &self,
        event: NowPlayingEvent,
        now_instant: Instant,
        now_system: SystemTime,
    ) -> Result<HandleOutcome> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(track = %event.track_name, paused = event.is_paused, seq, "now playing event");
        let credential = self.tokens.credential(now_instant).await;

        let track = match self
            .resolver
            .resolve(&event.track_name, event.duration_secs, &credential)
            .await
        {
            Resolution::Found(track) => track,
            Resolution::NotFound => {
                info!(track = %event.track_name, "no match; presence left unchanged");
                return Ok(HandleOutcome::NotFound);
            }
            Resolution::Superseded => return Ok(HandleOutcome::Superseded),
        };

        let mut last_published = self.last_published.lock().await;
        if *last_published > seq {
            debug!(track = %event.track_name, seq, "newer event already published");
            return Ok(HandleOutcome::Superseded);
        }
        let base = self.presence_state.snapshot();
        let update = self
            .publisher
            .publish(&track, &event, base, now_system)
            .await?;
        *last_published = seq;
        Ok(HandleOutcome::Published(update))
    }
}
