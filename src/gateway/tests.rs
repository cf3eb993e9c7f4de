use super::error::GatewayError;
use super::session::{CloseReason, Session};
use super::sse::{connect_relay, pump};
use super::{GatewayState, serve};
use crate::broker::PubSub;
use crate::broker::admission::Admission;
use crate::broker::topic::{Topic, TopicError};
use crate::presence::PresenceStore;
use crate::tests::support::{
    SseClient, Stack, boundary_path, function_path, publish, test_settings, wait_for_filters,
    wait_until,
};
use crate::transport::auth::{LogScope, mint_token};
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::IntoResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_session_close_is_idempotent_under_races() {
    let admission = Admission::new(1);
    let permit = admission.try_acquire().unwrap();
    let session = Arc::new(Session::new(
        Topic::for_boundary("s1", "b1").unwrap(),
        admission.clone(),
        permit,
    ));

    let reasons = [
        CloseReason::ClientDisconnected,
        CloseReason::WriteError,
        CloseReason::RelayError,
        CloseReason::RelayClosed,
        CloseReason::MaxDuration,
        CloseReason::Shutdown,
    ];
    let mut handles = Vec::new();
    for i in 0..24 {
        let session = session.clone();
        let reason = reasons[i % reasons.len()];
        handles.push(tokio::spawn(async move { session.close(reason) }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert!(session.is_closed());
    assert!(session.reason().is_some());
    assert_eq!(admission.active(), 0);
    assert!(admission.try_acquire().is_some());
}

#[tokio::test]
async fn test_session_done_fires_on_close() {
    let admission = Admission::new(1);
    let session = Session::new(
        Topic::for_boundary("s1", "b1").unwrap(),
        admission.clone(),
        admission.try_acquire().unwrap(),
    );
    assert!(session.reason().is_none());

    assert!(session.close(CloseReason::MaxDuration));
    tokio::time::timeout(Duration::from_secs(1), session.done())
        .await
        .unwrap();
    assert!(!session.close(CloseReason::Shutdown));
    assert_eq!(session.reason(), Some(CloseReason::MaxDuration));
}

#[test]
fn test_gateway_error_responses() {
    assert_eq!(GatewayError::TooBusy.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        GatewayError::RelayUnavailable("down".into()).status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    let invalid = GatewayError::InvalidScope(TopicError::Empty("boundary id"));
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert!(!invalid.is_retryable());

    let busy = GatewayError::TooBusy.into_response();
    assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(busy.headers().get(RETRY_AFTER).unwrap(), "5");

    let invalid = invalid.into_response();
    assert!(invalid.headers().get(RETRY_AFTER).is_none());
}

#[tokio::test]
async fn test_admission_ceiling_over_http() {
    let mut settings = test_settings();
    settings.gateway.max_connections = 1;
    let stack = Stack::start(settings).await;

    let mut first = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    assert_eq!(first.status, 200);
    assert!(first.read_until("connected", Duration::from_secs(5)).await);
    assert_eq!(stack.state.admission.active(), 1);

    let rejected = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b2")).await;
    assert_eq!(rejected.status, 503);
    assert!(rejected.received.to_ascii_lowercase().contains("retry-after: 5"));

    drop(first);
    let state = stack.state.clone();
    wait_until(|| state.admission.active() == 0).await;

    let mut retried = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b2")).await;
    assert_eq!(retried.status, 200);
    assert!(retried.read_until("connected", Duration::from_secs(5)).await);

    drop(retried);
    stack.shutdown().await;
}

#[tokio::test]
async fn test_invalid_scope_is_bad_request() {
    let stack = Stack::start(test_settings()).await;

    let client = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b%3A1")).await;
    assert_eq!(client.status, 400);
    assert_eq!(stack.state.admission.active(), 0);

    stack.shutdown().await;
}

#[tokio::test]
async fn test_relay_unavailable_releases_slot() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = closed.local_addr().unwrap();
    drop(closed);

    let state = Arc::new(GatewayState::new(
        format!("ws://{relay_addr}"),
        test_settings().gateway,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state.clone()));

    let client = SseClient::open(addr, &boundary_path("s1", "b1")).await;
    assert_eq!(client.status, 503);
    assert_eq!(state.admission.active(), 0);

    state.shutdown.cancel();
}

#[tokio::test]
async fn test_stream_records_presence() {
    let stack = Stack::start(test_settings()).await;

    let mut boundary = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    let mut function = SseClient::open(stack.gateway_addr, &function_path("s1", "b2", "f1")).await;
    assert!(boundary.read_until("connected", Duration::from_secs(5)).await);
    assert!(function.read_until("connected", Duration::from_secs(5)).await);

    let now = chrono::Utc::now().timestamp();
    let mut keys: Vec<String> = stack
        .store
        .live_records(now)
        .unwrap()
        .into_iter()
        .map(|r| r.key.as_str().to_string())
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["s1/b1/".to_string(), "s1/b2/f1".to_string()]);

    stack.shutdown().await;
}

#[tokio::test]
async fn test_stream_ends_at_max_duration() {
    let mut settings = test_settings();
    settings.gateway.max_duration_ms = 300;
    let stack = Stack::start(settings).await;

    let mut client = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    assert_eq!(client.status, 200);
    assert!(client.read_to_end(Duration::from_secs(5)).await);

    let state = stack.state.clone();
    wait_until(|| state.admission.active() == 0).await;
    // the relay subscription goes away with the stream
    let broker = stack.pubsub.broker();
    wait_until(|| broker.lock().unwrap().subscriber_count() == 0).await;

    stack.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let stack = Stack::start(test_settings()).await;

    let mut client = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    assert!(client.read_until("connected", Duration::from_secs(5)).await);
    wait_for_filters(&stack.pubsub.broker(), 1).await;

    stack.state.shutdown.cancel();
    assert!(client.read_to_end(Duration::from_secs(5)).await);
    let state = stack.state.clone();
    wait_until(|| state.admission.active() == 0).await;

    stack.shutdown().await;
}

#[tokio::test]
async fn test_stalled_viewer_still_hits_max_duration() {
    let mut settings = test_settings();
    settings.gateway.max_duration_ms = 300;
    let mut pubsub = PubSub::new(settings.clone());
    let addrs = pubsub.start().await.unwrap();
    let state = Arc::new(GatewayState::new(
        format!("ws://{}", addrs.relay),
        settings.gateway.clone(),
    ));

    let topic = Topic::for_boundary("s1", "b1").unwrap();
    let relay = connect_relay(&state.relay_url, &topic).await.unwrap();
    wait_for_filters(&pubsub.broker(), 1).await;
    let permit = state.admission.try_acquire().unwrap();
    let session = Arc::new(Session::new(topic, state.admission.clone(), permit));

    // the viewer keeps the stream open but never reads from it
    let (tx, _unread) = mpsc::channel(4);
    let streaming = tokio::spawn(pump(relay, tx, session.clone(), state.clone()));

    let token = mint_token(
        &LogScope::new("s1", "b1", "f1"),
        &settings.server.token_signing_key,
        Duration::from_secs(60),
    )
    .unwrap();
    let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
    let frames: Vec<&str> = lines.iter().map(String::as_str).collect();
    publish(addrs.ingest, &token, &frames).await;

    tokio::time::timeout(Duration::from_secs(5), streaming)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.reason(), Some(CloseReason::MaxDuration));
    assert_eq!(state.admission.active(), 0);

    pubsub.stop().await.unwrap();
}

#[tokio::test]
async fn test_stream_sends_periodic_keep_alive() {
    let stack = Stack::start(test_settings()).await;

    let mut client = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    assert!(client.read_until("connected", Duration::from_secs(5)).await);

    // quiet stream: only heartbeats arrive, every 100ms
    client.read_until("never sent", Duration::from_millis(450)).await;
    assert!(client.received.matches("keep-alive").count() >= 2);
    assert!(!client.received.contains("event: log"));

    stack.shutdown().await;
}

#[tokio::test]
async fn test_zero_keep_alive_does_not_break_stream() {
    let mut settings = test_settings();
    settings.gateway.keep_alive_ms = 0;
    let stack = Stack::start(settings).await;

    let mut client = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    assert_eq!(client.status, 200);
    assert!(client.read_until("keep-alive", Duration::from_secs(5)).await);

    stack.shutdown().await;
}
