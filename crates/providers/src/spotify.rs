use crate::{build_http_client, decode_response, ApiError, SearchTrack, TrackSearch};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tidal_presence_core::urls;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SearchTrack>,
}

pub struct SpotifySearchClient {
    client: Client,
    api_base: String,
}

impl SpotifySearchClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_base: api_base.into(),
        })
    }
}

#[async_trait]
impl TrackSearch for SpotifySearchClient {
    async fn search_tracks(&self, query: &str, token: &str) -> Result<Vec<SearchTrack>, ApiError> {
        let url = urls::track_search_url(&self.api_base, query);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?;
        let body: SearchResponse = decode_response(response).await?;
        Ok(body.tracks.items)
    }
}

#[cfg(test)]
mod tests {
    use super::SpotifySearchClient;
    use crate::{ApiError, TrackSearch};
    use mockito::Matcher;
    use std::time::Duration;

    const BODY: &str = r#"{
        "tracks": {
            "items": [
                {
                    "name": "Song A",
                    "duration_ms": 201000,
                    "album": {
                        "id": "alb1",
                        "name": "Album A",
                        "images": [{"url": "https://i.scdn.co/image/abc123"}]
                    },
                    "artists": [{"id": "ar1", "name": "Artist One"}]
                }
            ]
        }
    }"#;

    fn client(base: &str) -> SpotifySearchClient {
        SpotifySearchClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn searches_tracks_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "Song A".into()),
                Matcher::UrlEncoded("type".into(), "track".into()),
                Matcher::UrlEncoded("include_external".into(), "audio".into()),
            ]))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(BODY)
            .create_async()
            .await;

        let items = client(&server.url()).search_tracks("Song A", "tok").await.unwrap();

        mock.assert_async().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].duration_ms, 201_000);
        assert_eq!(items[0].album.images[0].url, "https://i.scdn.co/image/abc123");
        assert_eq!(items[0].artists[0].name, "Artist One");
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/search")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":{"status":401,"message":"The access token expired"}}"#)
            .create_async()
            .await;

        let err = client(&server.url()).search_tracks("x", "old").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"albums":{}}"#)
            .create_async()
            .await;

        let err = client(&server.url()).search_tracks("x", "tok").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
