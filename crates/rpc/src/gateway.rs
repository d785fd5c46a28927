use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tidal_presence_engine::{PresenceChannel, PresenceUpdate};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const OPCODE_PRESENCE_UPDATE: u8 = 3;
const BACKOFF_STEPS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    sink: Option<SplitSink<Ws, Message>>,
    reader: Option<JoinHandle<()>>,
    backoff_idx: usize,
    next_retry_at: Instant,
}

impl Connection {
    fn schedule_backoff(&mut self) {
        let idx = self.backoff_idx.min(BACKOFF_STEPS.len() - 1);
        self.next_retry_at = Instant::now() + BACKOFF_STEPS[idx];
        self.backoff_idx = (self.backoff_idx + 1).min(BACKOFF_STEPS.len() - 1);
    }

    fn peer_gone(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.is_finished())
    }

    fn disconnect(&mut self) {
        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

pub struct GatewayChannel {
    url: Url,
    conn: Mutex<Connection>,
}

impl GatewayChannel {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid gateway url {url}"))?;
        Ok(Self {
            url,
            conn: Mutex::new(Connection {
                sink: None,
                reader: None,
                backoff_idx: 0,
                next_retry_at: Instant::now(),
            }),
        })
    }

    async fn ensure_connected(&self, conn: &mut Connection) -> Result<()> {
        if conn.peer_gone() {
            info!(url = %self.url, "presence gateway closed the connection");
            conn.disconnect();
        }
        if conn.sink.is_some() {
            return Ok(());
        }
        if Instant::now() < conn.next_retry_at {
            return Err(anyhow!("gateway reconnect backoff active"));
        }

        match connect_async(self.url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %self.url, "connected to presence gateway");
                let (sink, stream) = ws.split();
                conn.sink = Some(sink);
                conn.reader = Some(tokio::spawn(drain_incoming(stream)));
                conn.backoff_idx = 0;
                Ok(())
            }
            Err(err) => {
                conn.schedule_backoff();
                Err(anyhow!("unable to connect to presence gateway: {err}"))
            }
        }
    }

    #[cfg(test)]
    async fn connected(&self) -> bool {
        let conn = self.conn.lock().await;
        conn.sink.is_some() && !conn.peer_gone()
    }
}

// Reading flushes the automatic pong and close replies; ends with the stream.
async fn drain_incoming(mut stream: SplitStream<Ws>) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => debug!(payload = %text, "gateway message"),
            Ok(Message::Close(frame)) => debug!(frame = ?frame, "gateway close received"),
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "gateway read failed");
                break;
            }
        }
    }
}

pub fn presence_frame(update: &PresenceUpdate) -> serde_json::Value {
    json!({ "op": OPCODE_PRESENCE_UPDATE, "d": update })
}

#[async_trait]
impl PresenceChannel for GatewayChannel {
    async fn presence_update(&self, update: &PresenceUpdate) -> Result<()> {
        let mut conn = self.conn.lock().await;
        self.ensure_connected(&mut conn).await?;

        let frame = presence_frame(update).to_string();
        debug!(payload = %frame, "gateway send");
        let Some(sink) = conn.sink.as_mut() else {
            return Err(anyhow!("gateway transport not connected"));
        };
        let sent = sink.send(Message::Text(frame)).await;
        if let Err(err) = sent {
            conn.disconnect();
            conn.schedule_backoff();
            return Err(anyhow!("gateway send failed: {err}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{presence_frame, GatewayChannel};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tidal_presence_engine::{PresenceChannel, PresenceUpdate};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;

    fn update() -> PresenceUpdate {
        PresenceUpdate {
            status: "online".to_string(),
            since: 0,
            activities: vec![None, Some(json!({"type": 0, "name": "Game"}))],
            afk: false,
            broadcast: None,
        }
    }

    #[test]
    fn frame_wraps_update_in_op_3() {
        let frame = presence_frame(&update());
        assert_eq!(frame["op"], 3);
        assert_eq!(frame["d"]["status"], "online");
        assert!(frame["d"]["activities"][0].is_null());
        assert_eq!(frame["d"]["activities"][1]["name"], "Game");
    }

    #[tokio::test]
    async fn sends_updates_over_one_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut frames = Vec::new();
            for _ in 0..2 {
                let msg = ws.next().await.unwrap().unwrap();
                let text = msg.to_text().unwrap();
                frames.push(serde_json::from_str::<serde_json::Value>(text).unwrap());
            }
            frames
        });

        let channel = GatewayChannel::new(&format!("ws://127.0.0.1:{port}/")).unwrap();
        channel.presence_update(&update()).await.unwrap();
        channel.presence_update(&update()).await.unwrap();

        let frames = server.await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["op"], 3);
        assert_eq!(frames[1]["d"]["afk"], false);
    }

    #[tokio::test]
    async fn unreachable_gateway_backs_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = GatewayChannel::new(&format!("ws://127.0.0.1:{port}/")).unwrap();
        let first = channel.presence_update(&update()).await.unwrap_err();
        let second = channel.presence_update(&update()).await.unwrap_err();

        assert!(first.to_string().contains("unable to connect"));
        assert!(second.to_string().contains("backoff"));
    }

    #[tokio::test]
    async fn answers_gateway_pings_between_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.next().await.unwrap().unwrap();
            ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap()
        });

        let channel = GatewayChannel::new(&format!("ws://127.0.0.1:{port}/")).unwrap();
        channel.presence_update(&update()).await.unwrap();

        assert_eq!(server.await.unwrap(), Message::Pong(b"hb".to_vec()));
    }

    #[tokio::test]
    async fn reconnects_after_gateway_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (closed_tx, closed_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            drop(ws);
            closed_tx.send(()).unwrap();

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            serde_json::from_str::<serde_json::Value>(msg.to_text().unwrap()).unwrap()
        });

        let channel = GatewayChannel::new(&format!("ws://127.0.0.1:{port}/")).unwrap();
        channel.presence_update(&update()).await.unwrap();
        closed_rx.await.unwrap();
        for _ in 0..100 {
            if !channel.connected().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!channel.connected().await);

        channel.presence_update(&update()).await.unwrap();
        assert_eq!(server.await.unwrap()["op"], 3);
    }
}
