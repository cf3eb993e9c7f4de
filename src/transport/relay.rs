//! Relay endpoint
//!
//! Two halves bridge publishers and subscribers:
//! - the collector pump drains every published `LogMessage` from the ingest
//!   side and hands it to the broker engine for fan-out;
//! - the relay listener accepts subscriber WebSockets, applies their
//!   subscribe/unsubscribe control frames and forwards matching frames.
//!
//! Filter registration is open to anything that can reach the relay; it is
//! logged but never refused. Scoping is enforced one layer up by the gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::connection::{Connection, Direction};
use crate::broker::engine::{Broker, Subscriber};
use crate::broker::message::LogMessage;
use crate::broker::topic::Topic;
use crate::transport::message::ControlMessage;

pub(crate) fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes everything the ingest side collects, in arrival order.
pub async fn run_collector(
    mut collector: mpsc::Receiver<LogMessage>,
    broker: Arc<Mutex<Broker>>,
    shutdown: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = collector.recv() => msg,
        };
        let Some(msg) = msg else { break };
        let delivered = lock(&broker).publish(&msg);
        debug!(topic = %msg.topic, delivered, "relayed message");
    }
}

pub async fn run_relay(
    listener: TcpListener,
    broker: Arc<Mutex<Broker>>,
    high_water_mark: usize,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                let broker = broker.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_subscriber(stream, broker, high_water_mark, shutdown).await;
                });
            }
            Err(e) => warn!(error = %e, "relay accept failed"),
        }
    }

    debug!("relay listener closed");
}

async fn handle_subscriber(
    stream: TcpStream,
    broker: Arc<Mutex<Broker>>,
    high_water_mark: usize,
    shutdown: CancellationToken,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(error = %e, "relay handshake error");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(high_water_mark.max(1));

    let mut conn = Connection::new(Direction::Subscribe, None);
    let subscriber_id = conn.id.clone();
    lock(&broker).register_subscriber(Subscriber::new(subscriber_id.clone(), tx));

    let cleanup_called = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let broker = broker.clone();
        let subscriber_id = subscriber_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                lock(&broker).cleanup_subscriber(&subscriber_id);
                debug!(subscriber = %subscriber_id, "relay subscriber cleaned up");
            }
        }
    };

    {
        let subscriber_id = subscriber_id.clone();
        let do_cleanup = do_cleanup.clone();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(subscriber = %subscriber_id, error = %e, "relay send failed");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            do_cleanup();
        });
    }

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                conn.touch();
                handle_control(&broker, &mut conn, text.as_str());
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => conn.touch(),
            Some(Err(e)) => {
                debug!(subscriber = %subscriber_id, error = %e, "relay socket error");
                break;
            }
        }
    }

    do_cleanup();
}

fn handle_control(broker: &Mutex<Broker>, conn: &mut Connection, text: &str) {
    let control = match serde_json::from_str::<ControlMessage>(text) {
        Ok(control) => control,
        Err(_) => {
            debug!(subscriber = %conn.id, "dropping malformed control frame");
            return;
        }
    };

    match control {
        ControlMessage::Subscribe { topic } => {
            let Ok(filter) = Topic::from_filter(&topic) else {
                debug!(subscriber = %conn.id, "dropping invalid topic filter");
                return;
            };
            lock(broker).subscribe(&conn.id, filter.clone());
            info!(topic = %filter, subscriber = %conn.id, "relay topic subscribed");
            conn.topic_filter = Some(filter);
        }
        ControlMessage::Unsubscribe { topic } => {
            let Ok(filter) = Topic::from_filter(&topic) else {
                return;
            };
            lock(broker).unsubscribe(&conn.id, &filter);
            info!(topic = %filter, subscriber = %conn.id, "relay topic unsubscribed");
            if conn.topic_filter.as_ref() == Some(&filter) {
                conn.topic_filter = None;
            }
        }
    }
}
