//! Server-Sent Events handler for live log viewing
//!
//! GET `/v1/account/{account}/subscription/{sub}/boundary/{boundary}/log`
//! streams a whole boundary, and `.../function/{function}/log` a single
//! function. Each request opens its own relay subscription for the derived
//! topic prefix and turns relayed frames into `event: log` records.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::LogMessage;
use crate::broker::topic::{PresenceKey, Topic};
use crate::gateway::GatewayState;
use crate::gateway::error::GatewayError;
use crate::gateway::session::{CloseReason, Session};
use crate::presence::PresenceRecord;
use crate::transport::message::ControlMessage;

pub(crate) type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 64;

pub async fn boundary_logs(
    State(state): State<Arc<GatewayState>>,
    Path((_account_id, subscription_id, boundary_id)): Path<(String, String, String)>,
) -> Result<Response, GatewayError> {
    open_stream(state, &subscription_id, &boundary_id, None).await
}

pub async fn function_logs(
    State(state): State<Arc<GatewayState>>,
    Path((_account_id, subscription_id, boundary_id, function_id)): Path<(
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, GatewayError> {
    open_stream(state, &subscription_id, &boundary_id, Some(&function_id)).await
}

async fn open_stream(
    state: Arc<GatewayState>,
    subscription_id: &str,
    boundary_id: &str,
    function_id: Option<&str>,
) -> Result<Response, GatewayError> {
    let topic = Topic::for_scope(subscription_id, boundary_id, function_id)?;
    let presence_key = PresenceKey::for_scope(subscription_id, boundary_id, function_id)?;

    let permit = state.admission.try_acquire().ok_or_else(|| {
        warn!(topic = %topic, max = state.admission.max(), "gateway at capacity");
        GatewayError::TooBusy
    })?;

    let relay = connect_relay(&state.relay_url, &topic)
        .await
        .inspect_err(|e| warn!(topic = %topic, error = %e, "unable to reach log relay"))?;

    record_presence(&state, presence_key);

    let session = Arc::new(Session::new(topic, state.admission.clone(), permit));
    info!(
        session = %session.id,
        topic = %session.topic,
        active = state.admission.active(),
        "log stream opened"
    );

    let (tx, rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    tokio::spawn(pump(relay, tx, session, state));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).into_response())
}

/// Opens a relay subscriber socket and registers the topic filter on it.
pub async fn connect_relay(relay_url: &str, topic: &Topic) -> Result<RelaySocket, GatewayError> {
    let unavailable = |e: String| GatewayError::RelayUnavailable(e);

    let (mut relay, _) = tokio::time::timeout(RELAY_CONNECT_TIMEOUT, connect_async(relay_url))
        .await
        .map_err(|_| unavailable("connect timed out".to_string()))?
        .map_err(|e| unavailable(e.to_string()))?;

    relay
        .send(WsMessage::text(ControlMessage::subscribe(topic.as_str()).to_json()))
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    Ok(relay)
}

fn record_presence(state: &GatewayState, key: PresenceKey) {
    let Some(store) = state.presence.as_ref() else {
        return;
    };
    let ttl = chrono::Utc::now().timestamp() + state.settings.max_duration().as_secs().max(1) as i64;
    if let Err(e) = store.put(&PresenceRecord::new(key, ttl)) {
        warn!(error = %e, "unable to record log viewer presence");
    }
}

/// Moves relayed frames into the response until the session closes, then
/// tears the relay side down. Dropping `tx` on return ends the response.
pub(crate) async fn pump(relay: RelaySocket, tx: mpsc::Sender<Event>, session: Arc<Session>, state: Arc<GatewayState>) {
    let (mut relay_tx, mut relay_rx) = relay.split();

    deliver(&tx, &session, Event::default().comment("connected"));

    let keep_alive_every = state.settings.keep_alive().max(Duration::from_millis(1));
    let mut keep_alive = tokio::time::interval_at(Instant::now() + keep_alive_every, keep_alive_every);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_duration = tokio::time::sleep(state.settings.max_duration());
    tokio::pin!(max_duration);

    while !session.is_closed() {
        tokio::select! {
            _ = session.done() => {}
            _ = state.shutdown.cancelled() => {
                session.close(CloseReason::Shutdown);
            }
            _ = tx.closed() => {
                session.close(CloseReason::ClientDisconnected);
            }
            _ = &mut max_duration => {
                session.close(CloseReason::MaxDuration);
            }
            _ = keep_alive.tick() => {
                deliver(&tx, &session, Event::default().comment("keep-alive"));
            }
            frame = relay_rx.next() => match frame {
                Some(Ok(msg)) if msg.is_binary() || msg.is_text() => match to_event(msg.into_data()) {
                    Some(event) => deliver(&tx, &session, event),
                    None => debug!(session = %session.id, "dropping malformed relay frame"),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    session.close(CloseReason::RelayClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session = %session.id, error = %e, "relay socket error");
                    session.close(CloseReason::RelayError);
                }
            },
        }
    }

    let unsubscribe = ControlMessage::unsubscribe(session.topic.as_str()).to_json();
    let teardown = async {
        let _ = relay_tx.send(WsMessage::text(unsubscribe)).await;
        let _ = relay_tx.close().await;
    };
    let _ = tokio::time::timeout(Duration::from_secs(1), teardown).await;
    drop(tx);
}

/// Queues one event for the response without waiting. A viewer that stopped
/// reading loses events instead of stalling the session past its timers.
fn deliver(tx: &mpsc::Sender<Event>, session: &Session, event: Event) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            debug!(session = %session.id, "viewer not reading, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            session.close(CloseReason::WriteError);
        }
    }
}

/// Reframes one relay frame as an SSE record, dropping the routing topic.
fn to_event(frame: bytes::Bytes) -> Option<Event> {
    let msg = LogMessage::decode(frame)?;
    let payload = String::from_utf8_lossy(&msg.payload).replace("\r\n", "\n").replace('\r', "\n");
    Some(Event::default().event("log").data(payload))
}
