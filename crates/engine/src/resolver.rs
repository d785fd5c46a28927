use std::sync::Arc;

use tidal_presence_core::{urls, Credential, ResolvedTrack};
use tidal_presence_providers::{SearchTrack, TrackSearch};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::token::TokenCache;

pub const DEFAULT_DURATION_TOLERANCE_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedTrack),
    NotFound,
    Superseded,
}

struct Memo {
    track_name: String,
    track: Option<ResolvedTrack>,
}

struct Pending {
    track_name: String,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<Resolution>>,
}

#[derive(Default)]
struct ResolverState {
    generation: u64,
    pending: Option<Pending>,
    memo: Option<Memo>,
}

impl ResolverState {
    fn supersede_pending(&mut self) {
        if let Some(previous) = self.pending.take() {
            debug!(track = %previous.track_name, "cancelling superseded lookup");
            previous.cancel.cancel();
        }
        self.generation += 1;
    }
}

enum Step {
    Done(Resolution),
    Join(watch::Receiver<Option<Resolution>>),
    Lead {
        generation: u64,
        cancel: CancellationToken,
        outcome: watch::Sender<Option<Resolution>>,
    },
}

// One lookup in flight at a time; a repeat of the in-flight name joins it.
pub struct TrackResolver {
    search: Arc<dyn TrackSearch>,
    tokens: Arc<TokenCache>,
    tolerance_ms: u64,
    state: Mutex<ResolverState>,
}

impl TrackResolver {
    pub fn new(search: Arc<dyn TrackSearch>, tokens: Arc<TokenCache>, tolerance_ms: u64) -> Self {
        Self {
            search,
            tokens,
            tolerance_ms,
            state: Mutex::new(ResolverState::default()),
        }
    }

    pub async fn resolve(
        &self,
        track_name: &str,
        duration_secs: f64,
        credential: &Credential,
    ) -> Resolution {
        match self.begin(track_name).await {
            Step::Done(resolution) => resolution,
            Step::Join(mut outcome) => {
                debug!(track = %track_name, "waiting on in-flight lookup");
                let joined = outcome
                    .wait_for(Option::is_some)
                    .await
                    .map(|res| (*res).clone());
                match joined {
                    Ok(Some(resolution)) => resolution,
                    _ => Resolution::Superseded,
                }
            }
            Step::Lead {
                generation,
                cancel,
                outcome,
            } => {
                let resolution = self
                    .lookup(track_name, duration_secs, credential, generation, &cancel)
                    .await;
                outcome.send_replace(Some(resolution.clone()));
                resolution
            }
        }
    }

    async fn begin(&self, track_name: &str) -> Step {
        let mut state = self.state.lock().await;

        let memo_hit = state
            .memo
            .as_ref()
            .filter(|m| m.track_name == track_name)
            .map(|m| m.track.clone().map(Resolution::Found).unwrap_or(Resolution::NotFound));
        if let Some(resolution) = memo_hit {
            debug!(track = %track_name, "serving track from memo");
            state.supersede_pending();
            return Step::Done(resolution);
        }

        let in_flight = state
            .pending
            .as_ref()
            .filter(|p| p.track_name == track_name)
            .map(|p| p.outcome.clone());
        if let Some(outcome) = in_flight {
            return Step::Join(outcome);
        }

        state.supersede_pending();
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        state.pending = Some(Pending {
            track_name: track_name.to_string(),
            cancel: cancel.clone(),
            outcome: rx,
        });
        Step::Lead {
            generation: state.generation,
            cancel,
            outcome: tx,
        }
    }

    async fn lookup(
        &self,
        track_name: &str,
        duration_secs: f64,
        credential: &Credential,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Resolution {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Resolution::Superseded,
            res = self.search.search_tracks(track_name, &credential.token) => res,
        };

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                if err.is_unauthorized() {
                    warn!("search rejected the access token; forcing refresh");
                    self.tokens.invalidate().await;
                } else {
                    warn!(error = %err, track = %track_name, "track search failed");
                }
                self.release(generation).await;
                return Resolution::NotFound;
            }
        };

        let track = select_candidate(&items, duration_secs, self.tolerance_ms).map(to_resolved);

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(track = %track_name, "dropping late search result");
            return Resolution::Superseded;
        }
        state.pending = None;
        state.memo = Some(Memo {
            track_name: track_name.to_string(),
            track: track.clone(),
        });

        match track {
            Some(track) => {
                info!(track = %track_name, title = %track.title, "track resolved");
                Resolution::Found(track)
            }
            None => {
                info!(track = %track_name, candidates = items.len(), "no candidate within tolerance");
                Resolution::NotFound
            }
        }
    }

    async fn release(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.pending = None;
        }
    }
}

pub fn select_candidate(
    items: &[SearchTrack],
    duration_secs: f64,
    tolerance_ms: u64,
) -> Option<&SearchTrack> {
    let target_ms = (duration_secs * 1_000.0).round() as i64;
    items
        .iter()
        .find(|t| (t.duration_ms as i64 - target_ms).unsigned_abs() <= tolerance_ms)
}

fn to_resolved(track: &SearchTrack) -> ResolvedTrack {
    ResolvedTrack {
        title: track.name.clone(),
        album_name: track.album.name.clone(),
        album_id: track.album.id.clone(),
        album_image_id: track
            .album
            .images
            .first()
            .and_then(|img| urls::cover_image_id(&img.url)),
        artist_names: track.artists.iter().map(|a| a.name.clone()).collect(),
        artist_ids: track.artists.iter().map(|a| a.id.clone()).collect(),
        duration_ms: track.duration_ms,
    }
}
