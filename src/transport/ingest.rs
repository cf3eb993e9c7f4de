//! Publish-ingest endpoint
//!
//! Accepts WebSocket connections from function sandboxes. Each connection:
//! - takes an ingest admission slot, or is dropped on the spot when none is
//!   free;
//! - must present `Authorization: Bearer <token>` in the upgrade request; a
//!   missing or invalid token fails the handshake with 401;
//! - publishes every data frame verbatim under the single topic derived from
//!   its token claims;
//! - is closed when idle for too long, when it reaches its maximum lifetime,
//!   or when the broker shuts down.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::admission::{Admission, AdmissionPermit};
use crate::broker::connection::{Connection, Direction};
use crate::broker::message::LogMessage;
use crate::broker::topic::Topic;
use crate::transport::auth::{AuthError, bearer_token, verify_token};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a publisher connection needs, cloned into each connection task.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub admission: Admission,
    pub collector: mpsc::Sender<LogMessage>,
    pub signing_key: Arc<str>,
    pub idle_timeout: Duration,
    pub max_connection_time: Duration,
}

pub async fn run_ingest(listener: TcpListener, ctx: IngestContext, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "ingest accept failed");
                continue;
            }
        };

        let Some(permit) = ctx.admission.try_acquire() else {
            warn!(%peer, max = ctx.admission.max(), "ingest at capacity, terminating connection");
            drop(stream);
            continue;
        };

        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            handle_publisher(stream, permit, ctx, shutdown).await;
        });
    }

    debug!("ingest listener closed");
}

async fn handle_publisher(
    stream: TcpStream,
    permit: AdmissionPermit,
    ctx: IngestContext,
    shutdown: CancellationToken,
) {
    let mut authorized: Option<Topic> = None;
    let callback = |req: &Request, resp: Response| match authorize(req, &ctx.signing_key) {
        Ok(topic) => {
            authorized = Some(topic);
            Ok(resp)
        }
        Err(e) => {
            debug!(error = %e, "rejecting ingest handshake");
            Err(unauthorized())
        }
    };

    let mut ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, callback)).await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            debug!(error = %e, "ingest handshake failed");
            return;
        }
        Err(_) => {
            debug!("ingest handshake timed out");
            return;
        }
    };
    let Some(topic) = authorized else {
        return;
    };

    let mut conn = Connection::new(Direction::Publish, Some(topic.clone()));
    info!(
        topic = %topic,
        connection = %conn.id,
        active = ctx.admission.active(),
        "websocket publisher connected"
    );

    loop {
        let deadline = conn.deadline(ctx.idle_timeout, ctx.max_connection_time);
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(connection = %conn.id, age = ?conn.age(), idle = ?conn.idle_for(), "publisher timed out");
                break;
            }
            frame = ws.next() => frame,
        };

        match frame {
            Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                conn.touch();
                let msg = LogMessage::new(topic.as_str(), msg.into_data());
                if ctx.collector.send(msg).await.is_err() {
                    // relay is gone, nothing left to publish into
                    break;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => conn.touch(),
            Some(Err(e)) => {
                debug!(connection = %conn.id, error = %e, "publisher socket error");
                break;
            }
        }
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), ws.close(None)).await;
    permit.release();
    info!(
        topic = %topic,
        connection = %conn.id,
        active = ctx.admission.active(),
        "websocket publisher disconnected"
    );
}

fn authorize(req: &Request, key: &str) -> Result<Topic, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let token = bearer_token(header)?;
    let scope = verify_token(token, key)?;
    Ok(scope.topic()?)
}

fn unauthorized() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("unauthorized".to_string()));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp
}
