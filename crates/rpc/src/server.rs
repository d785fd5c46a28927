use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tidal_presence_core::{InboundRequest, ListenerConfig, NowPlayingEvent, RICH_PRESENCE_CMD};
use tidal_presence_engine::{Bridge, HandleOutcome};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::frame::{
    read_frame, write_frame, OPCODE_CLOSE, OPCODE_FRAME, OPCODE_HANDSHAKE, OPCODE_PING,
    OPCODE_PONG,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    NowPlaying(NowPlayingEvent),
    Ignored(String),
}

pub fn decode_request(raw: &[u8]) -> Result<Inbound> {
    let request: InboundRequest = serde_json::from_slice(raw).context("invalid rpc payload")?;
    if request.cmd != RICH_PRESENCE_CMD {
        return Ok(Inbound::Ignored(request.cmd));
    }
    let data = request
        .data
        .ok_or_else(|| anyhow!("{RICH_PRESENCE_CMD} without data"))?;
    let event = serde_json::from_value(data).context("invalid now playing data")?;
    Ok(Inbound::NowPlaying(event))
}

pub fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    match origin {
        Some(origin) => {
            let origin = origin.trim_end_matches('/');
            allowed
                .iter()
                .any(|a| a.trim_end_matches('/').eq_ignore_ascii_case(origin))
        }
        None => true,
    }
}

pub fn ready_payload() -> serde_json::Value {
    json!({
        "cmd": "DISPATCH",
        "evt": "READY",
        "data": { "v": 1 },
        "nonce": serde_json::Value::Null
    })
}

pub struct RpcServer {
    bridge: Arc<Bridge>,
    cfg: ListenerConfig,
}

impl RpcServer {
    pub fn new(bridge: Arc<Bridge>, cfg: ListenerConfig) -> Self {
        Self { bridge, cfg }
    }

    pub async fn run(self) -> Result<()> {
        let (listener, port) = bind_first_free(&self.cfg.ports).await?;
        info!(port, "rpc websocket listening on 127.0.0.1");

        let ipc = self.bind_ipc()?;
        let allowed = Arc::new(self.cfg.allowed_origins.clone());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "rpc websocket client connected");
                        let bridge = self.bridge.clone();
                        let allowed = allowed.clone();
                        tokio::spawn(async move {
                            let on_request = move |raw: &[u8]| dispatch(&bridge, raw);
                            if let Err(err) = serve_ws(stream, &allowed, on_request).await {
                                debug!(error = %err, "rpc websocket connection ended");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "rpc accept error"),
                },
                accepted = accept_ipc(ipc.as_ref()) => match accepted {
                    Ok(stream) => {
                        debug!("rpc ipc client connected");
                        let bridge = self.bridge.clone();
                        tokio::spawn(async move {
                            let on_request = move |raw: &[u8]| dispatch(&bridge, raw);
                            if let Err(err) = serve_ipc(stream, on_request).await {
                                debug!(error = %err, "rpc ipc connection ended");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "rpc ipc accept error"),
                },
            }
        }
    }

    #[cfg(unix)]
    fn bind_ipc(&self) -> Result<Option<tokio::net::UnixListener>> {
        match self.cfg.ipc_socket.as_ref() {
            Some(path) => bind_ipc_socket(path).map(Some),
            None => Ok(None),
        }
    }

    #[cfg(not(unix))]
    fn bind_ipc(&self) -> Result<Option<()>> {
        if self.cfg.ipc_socket.is_some() {
            warn!("ipc_socket is only supported on unix; ignoring");
        }
        Ok(None)
    }
}

#[cfg(unix)]
fn bind_ipc_socket(path: &std::path::Path) -> Result<tokio::net::UnixListener> {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove stale ipc socket");
        }
    }
    let listener = tokio::net::UnixListener::bind(path)
        .with_context(|| format!("failed to bind ipc socket {}", path.display()))?;
    info!(path = %path.display(), "rpc ipc socket listening");
    Ok(listener)
}

#[cfg(unix)]
async fn accept_ipc(
    listener: Option<&tokio::net::UnixListener>,
) -> Result<tokio::net::UnixStream> {
    match listener {
        Some(listener) => Ok(listener.accept().await?.0),
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn accept_ipc(_listener: Option<&()>) -> Result<tokio::io::DuplexStream> {
    std::future::pending().await
}

pub async fn bind_first_free(ports: &[u16]) -> Result<(TcpListener, u16)> {
    for &port in ports {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                let bound = listener.local_addr()?.port();
                return Ok((listener, bound));
            }
            Err(err) => debug!(port, error = %err, "rpc port unavailable"),
        }
    }
    bail!("no free rpc port in {:?}", ports)
}

fn dispatch(bridge: &Arc<Bridge>, raw: &[u8]) {
    match decode_request(raw) {
        Ok(Inbound::NowPlaying(event)) => {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let track = event.track_name.clone();
                match bridge.handle(event, Instant::now(), SystemTime::now()).await {
                    Ok(HandleOutcome::Published(_)) => debug!(%track, "presence published"),
                    Ok(HandleOutcome::NotFound) => debug!(%track, "presence not updated"),
                    Ok(HandleOutcome::Superseded) => debug!(%track, "event superseded"),
                    Err(err) => warn!(error = %err, %track, "failed to handle now playing event"),
                }
            });
        }
        Ok(Inbound::Ignored(cmd)) => debug!(%cmd, "ignoring rpc command"),
        Err(err) => warn!(error = %err, "dropping malformed rpc payload"),
    }
}

pub async fn serve_ws<F>(stream: TcpStream, allowed: &[String], on_request: F) -> Result<()>
where
    F: Fn(&[u8]),
{
    let check_origin = |req: &Request, resp: Response| {
        let origin = req.headers().get("origin").and_then(|v| v.to_str().ok());
        if origin_allowed(origin, allowed) {
            Ok(resp)
        } else {
            warn!(origin = ?origin, "rejecting rpc connection from disallowed origin");
            let mut err = ErrorResponse::new(Some("origin not allowed".to_string()));
            *err.status_mut() = StatusCode::FORBIDDEN;
            Err(err)
        }
    };

    let mut ws = accept_hdr_async(stream, check_origin)
        .await
        .context("rpc websocket handshake failed")?;
    ws.send(Message::Text(ready_payload().to_string())).await?;

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => on_request(text.as_bytes()),
            Message::Binary(bin) => on_request(&bin),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

pub async fn serve_ipc<S, F>(mut stream: S, on_request: F) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fn(&[u8]),
{
    let Some((opcode, handshake)) = read_frame(&mut stream).await? else {
        return Ok(());
    };
    if opcode != OPCODE_HANDSHAKE {
        bail!("expected ipc handshake, got opcode {opcode}");
    }
    debug!(handshake = %String::from_utf8_lossy(&handshake), "rpc ipc handshake");
    write_frame(&mut stream, OPCODE_FRAME, ready_payload().to_string().as_bytes()).await?;

    while let Some((opcode, payload)) = read_frame(&mut stream).await? {
        match opcode {
            OPCODE_FRAME => on_request(&payload),
            OPCODE_PING => write_frame(&mut stream, OPCODE_PONG, &payload).await?,
            OPCODE_CLOSE => break,
            other => warn!(opcode = other, "unexpected ipc opcode"),
        }
    }
    Ok(())
}
