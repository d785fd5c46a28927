use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod host;
pub mod spotify;

pub use host::HostRestClient;
pub use spotify::SpotifySearchClient;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("api error (status {code}): {message}")]
    Status { code: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no linked connection of type {0}")]
    MissingConnection(String),
}

impl ApiError {
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        match code {
            401 => Self::Unauthorized(message.into()),
            _ => Self::Status {
                code,
                message: message.into(),
            },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchImage {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<SearchImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchArtist {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTrack {
    pub name: String,
    pub duration_ms: u64,
    pub album: SearchAlbum,
    #[serde(default)]
    pub artists: Vec<SearchArtist>,
}

#[async_trait]
pub trait ConnectionsApi: Send + Sync {
    async fn connections(&self) -> Result<Vec<Connection>, ApiError>;

    async fn refresh_access_token(&self, kind: &str, id: &str)
        -> Result<Option<String>, ApiError>;
}

#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search_tracks(&self, query: &str, token: &str) -> Result<Vec<SearchTrack>, ApiError>;
}

pub fn build_http_client(timeout: Duration) -> Result<Client, ApiError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tidal-presence/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub(crate) async fn decode_response<T: DeserializeOwned>(
    response: Response,
) -> Result<T, ApiError> {
    let status = response.status();
    debug!("response status: {}", status);

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "api error: {}", body);
        return Err(ApiError::from_status(status.as_u16(), body));
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|err| {
        warn!(error = %err, "failed to parse response body");
        ApiError::Decode(err)
    })
}

#[cfg(test)]
mod tests {
    use super::ApiError;

    #[test]
    fn only_401_counts_as_unauthorized() {
        assert!(ApiError::from_status(401, "expired").is_unauthorized());
        assert!(!ApiError::from_status(403, "forbidden").is_unauthorized());
        assert!(!ApiError::from_status(500, "boom").is_unauthorized());

        let ApiError::Status { code, .. } = ApiError::from_status(403, "forbidden") else {
            panic!("expected a plain status error");
        };
        assert_eq!(code, 403);
    }
}
