use std::sync::Arc;
use std::time::{Duration, Instant};

use tidal_presence_core::Credential;
use tidal_presence_providers::host::find_connection;
use tidal_presence_providers::{ApiError, ConnectionsApi};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);

// Refreshes are not serialized; overlapping callers past the TTL may both refresh.
pub struct TokenCache {
    api: Arc<dyn ConnectionsApi>,
    ttl: Duration,
    credential: Mutex<Credential>,
}

impl TokenCache {
    pub fn new(api: Arc<dyn ConnectionsApi>, credential: Credential, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            credential: Mutex::new(credential),
        }
    }

    pub async fn bootstrap(
        api: Arc<dyn ConnectionsApi>,
        connection_type: &str,
        ttl: Duration,
        now: Instant,
    ) -> Result<Self, ApiError> {
        let connection = find_connection(api.connections().await?, connection_type)?;
        info!(kind = %connection.kind, id = %connection.id, "linked connection found");

        let credential = Credential {
            token: connection.access_token.unwrap_or_default(),
            issued_at: Some(now),
            subject_id: connection.id,
            subject_type: connection.kind,
        };
        let cache = Self::new(api, credential, ttl);
        if cache.credential.lock().await.token.is_empty() {
            cache.invalidate().await;
        }
        Ok(cache)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn credential(&self, now: Instant) -> Credential {
        let current = self.credential.lock().await.clone();
        if !current.is_stale(now, self.ttl) {
            return current;
        }

        debug!(kind = %current.subject_type, "refreshing provider access token");
        match self
            .api
            .refresh_access_token(&current.subject_type, &current.subject_id)
            .await
        {
            Ok(token) => {
                let mut guard = self.credential.lock().await;
                if let Some(token) = token {
                    guard.token = token;
                }
                guard.issued_at = Some(match guard.issued_at {
                    Some(prev) if prev > now => prev,
                    _ => now,
                });
                info!("provider access token refreshed");
                guard.clone()
            }
            Err(err) => {
                warn!(error = %err, "access token refresh failed; reusing previous token");
                current
            }
        }
    }

    pub async fn invalidate(&self) {
        self.credential.lock().await.issued_at = None;
    }
}
