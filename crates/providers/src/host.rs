use crate::{build_http_client, decode_response, ApiError, Connection, ConnectionsApi};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tidal_presence_core::urls;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

pub struct HostRestClient {
    client: Client,
    api_base: String,
    token: String,
}

impl HostRestClient {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_base: api_base.into(),
            token: token.into(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.header("Authorization", &self.token)
        }
    }
}

#[async_trait]
impl ConnectionsApi for HostRestClient {
    async fn connections(&self) -> Result<Vec<Connection>, ApiError> {
        let url = urls::connections_url(&self.api_base);
        debug!("GET {}", url);
        let response = self.authorized(self.client.get(&url)).send().await?;
        decode_response(response).await
    }

    async fn refresh_access_token(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Option<String>, ApiError> {
        let url = urls::connection_access_token_url(&self.api_base, kind, id);
        debug!("GET {}", url);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let body: AccessTokenResponse = decode_response(response).await?;
        Ok(body.access_token)
    }
}

pub fn find_connection(connections: Vec<Connection>, kind: &str) -> Result<Connection, ApiError> {
    connections
        .into_iter()
        .find(|c| c.kind == kind)
        .ok_or_else(|| ApiError::MissingConnection(kind.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{find_connection, HostRestClient};
    use crate::{ApiError, ConnectionsApi};
    use std::time::Duration;

    fn client(base: &str) -> HostRestClient {
        HostRestClient::new(base, "host-token", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn lists_connections_with_host_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/@me/connections")
            .match_header("authorization", "host-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"type":"github","id":"g1","name":"octo"},
                    {"type":"spotify","id":"sp1","access_token":"initial","name":"me"}
                ]"#,
            )
            .create_async()
            .await;

        let api = client(&server.url());
        let found = find_connection(api.connections().await.unwrap(), "spotify").unwrap();

        mock.assert_async().await;
        assert_eq!(found.id, "sp1");
        assert_eq!(found.access_token.as_deref(), Some("initial"));
    }

    #[test]
    fn missing_connection_is_reported() {
        let err = find_connection(Vec::new(), "spotify").unwrap_err();
        assert!(matches!(err, ApiError::MissingConnection(kind) if kind == "spotify"));
    }

    #[tokio::test]
    async fn refreshes_access_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/@me/connections/spotify/sp1/access-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh"}"#)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server.url());
        let token = api.refresh_access_token("spotify", "sp1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn refresh_without_token_field_yields_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/@me/connections/spotify/sp1/access-token")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let api = client(&server.url());
        assert_eq!(api.refresh_access_token("spotify", "sp1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/@me/connections/spotify/sp1/access-token")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        let api = client(&server.url());
        let err = api.refresh_access_token("spotify", "sp1").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { code: 500, .. }));
    }
}
