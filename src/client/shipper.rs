//! Log shipping transports.

use std::future::Future;

use futures_util::SinkExt;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::protocol::Message as WsMessage;

use crate::client::emitter::LogEntry;

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid delivery token")]
    InvalidToken(#[from] tungstenite::http::header::InvalidHeaderValue),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delivers one batch of buffered entries. A failed batch is dropped by the
/// caller, so implementations should not retry.
pub trait LogShipper: Send + Sync + 'static {
    fn ship(&self, batch: &[LogEntry]) -> impl Future<Output = Result<(), ShipError>> + Send;
}

/// Ships each batch over one authenticated WebSocket connection to the
/// ingest endpoint, one frame per entry.
#[derive(Debug, Clone)]
pub struct WsShipper {
    url: String,
    token: String,
}

impl WsShipper {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

impl LogShipper for WsShipper {
    async fn ship(&self, batch: &[LogEntry]) -> Result<(), ShipError> {
        let mut request = self.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token))?,
        );

        let (mut ws, _) = connect_async(request).await?;
        for entry in batch {
            ws.send(WsMessage::text(serde_json::to_string(entry)?)).await?;
        }
        ws.close(None).await?;
        Ok(())
    }
}
