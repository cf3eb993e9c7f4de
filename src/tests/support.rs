//! Helpers shared by the networked tests: a full stack on ephemeral ports and
//! a bare-bones SSE reader over a raw `TcpStream`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::SinkExt;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::engine::Broker;
use crate::broker::{BoundAddrs, PubSub};
use crate::config::Settings;
use crate::gateway::{self, GatewayState};
use crate::presence::{PresenceStore, SledPresenceStore};
use crate::transport::relay::lock;

pub(crate) fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.ingest_port = 0;
    settings.server.relay_port = 0;
    settings.server.gateway_port = 0;
    settings.server.token_signing_key = "test-signing-key".to_string();
    settings.gateway.keep_alive_ms = 100;
    settings.gateway.max_duration_ms = 10_000;
    settings.emitter.flush_interval_ms = 50;
    settings
}

pub(crate) struct Stack {
    pub pubsub: PubSub,
    pub addrs: BoundAddrs,
    pub gateway_addr: SocketAddr,
    pub state: Arc<GatewayState>,
    pub store: Arc<SledPresenceStore>,
    _dir: TempDir,
}

impl Stack {
    pub async fn start(settings: Settings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledPresenceStore::open(dir.path().to_str().unwrap()).unwrap());

        let mut pubsub = PubSub::new(settings.clone());
        let addrs = pubsub.start().await.unwrap();

        let state = Arc::new(
            GatewayState::new(format!("ws://{}", addrs.relay), settings.gateway.clone())
                .with_presence(store.clone() as Arc<dyn PresenceStore>)
                .with_shutdown(CancellationToken::new()),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = listener.local_addr().unwrap();
        tokio::spawn(gateway::serve(listener, state.clone()));

        Self {
            pubsub,
            addrs,
            gateway_addr,
            state,
            store,
            _dir: dir,
        }
    }

    pub async fn shutdown(mut self) {
        self.state.shutdown.cancel();
        self.pubsub.stop().await.unwrap();
    }
}

/// Waits until the relay holds at least `n` subscribers with a filter.
pub(crate) async fn wait_for_filters(broker: &Arc<Mutex<Broker>>, n: usize) {
    wait_until(|| {
        lock(broker)
            .subscribers
            .values()
            .filter(|s| !s.filters.is_empty())
            .count()
            >= n
    })
    .await;
}

pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Publishes frames on the ingest endpoint the way a sandbox would.
pub(crate) async fn publish(ingest: SocketAddr, token: &str, frames: &[&str]) {
    let mut request = format!("ws://{ingest}").into_client_request().unwrap();
    request.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    for frame in frames {
        ws.send(WsMessage::text(frame.to_string())).await.unwrap();
    }
    ws.close(None).await.unwrap();
}

pub(crate) struct SseClient {
    stream: TcpStream,
    pub status: u16,
    pub received: String,
}

impl SseClient {
    pub async fn open(addr: SocketAddr, path: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut client = Self {
            stream,
            status: 0,
            received: String::new(),
        };
        assert!(client.read_until("\r\n\r\n", Duration::from_secs(5)).await);
        client.status = client
            .received
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        client
    }

    /// Reads until `needle` shows up in everything received so far, or the
    /// timeout passes. Returns whether it was found.
    pub async fn read_until(&mut self, needle: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 4096];
        while !self.received.contains(needle) {
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await;
            match read {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return false,
                Ok(Ok(n)) => self.received.push_str(&String::from_utf8_lossy(&buf[..n])),
            }
        }
        true
    }

    /// Reads until the server ends the response or the timeout passes.
    /// Returns whether the stream ended.
    pub async fn read_to_end(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 4096];
        loop {
            match tokio::time::timeout_at(deadline, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(n)) => self.received.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(_) => return false,
            }
            // chunked terminator
            if self.received.ends_with("0\r\n\r\n") {
                return true;
            }
        }
    }
}

pub(crate) fn boundary_path(subscription: &str, boundary: &str) -> String {
    format!("/v1/account/acc-1/subscription/{subscription}/boundary/{boundary}/log")
}

pub(crate) fn function_path(subscription: &str, boundary: &str, function: &str) -> String {
    format!(
        "/v1/account/acc-1/subscription/{subscription}/boundary/{boundary}/function/{function}/log"
    )
}
