use crate::client::{Level, prepare_delivery};
use crate::presence::PresenceCache;
use crate::tests::support::{SseClient, Stack, boundary_path, function_path, publish, test_settings, wait_for_filters};
use crate::transport::auth::{LogScope, mint_token};
use std::time::Duration;

#[tokio::test]
async fn test_emitted_log_reaches_boundary_viewer_only() {
    let settings = test_settings();
    let stack = Stack::start(settings.clone()).await;

    let mut watching = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    let mut elsewhere = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b2")).await;
    assert!(watching.read_until("connected", Duration::from_secs(5)).await);
    assert!(elsewhere.read_until("connected", Duration::from_secs(5)).await);
    wait_for_filters(&stack.pubsub.broker(), 2).await;

    let cache = PresenceCache::new(true);
    assert_eq!(cache.poll_once(stack.store.as_ref()).unwrap(), 2);

    let scope = LogScope::new("s1", "b1", "f1");
    let target = prepare_delivery(&cache, &settings, &scope, &format!("ws://{}", stack.addrs.ingest))
        .unwrap()
        .unwrap();
    let emitter = target.emitter(&settings);
    emitter.write(Level::Info, "hello");
    assert!(emitter.finish().await);

    assert!(watching.read_until("hello", Duration::from_secs(5)).await);
    assert!(watching.received.contains("event: log"));
    assert!(watching.received.contains(r#""message":"hello""#));
    assert!(!elsewhere.read_until("hello", Duration::from_millis(500)).await);

    stack.shutdown().await;
}

#[tokio::test]
async fn test_function_stream_is_scoped_to_its_function() {
    let settings = test_settings();
    let stack = Stack::start(settings.clone()).await;

    let mut f1 = SseClient::open(stack.gateway_addr, &function_path("s1", "b1", "f1")).await;
    let mut f2 = SseClient::open(stack.gateway_addr, &function_path("s1", "b1", "f2")).await;
    assert!(f1.read_until("connected", Duration::from_secs(5)).await);
    assert!(f2.read_until("connected", Duration::from_secs(5)).await);
    wait_for_filters(&stack.pubsub.broker(), 2).await;

    let token = mint_token(
        &LogScope::new("s1", "b1", "f1"),
        &settings.server.token_signing_key,
        Duration::from_secs(60),
    )
    .unwrap();
    publish(stack.addrs.ingest, &token, &["only for f1"]).await;

    assert!(f1.read_until("only for f1", Duration::from_secs(5)).await);
    assert!(!f2.read_until("only for f1", Duration::from_millis(500)).await);

    stack.shutdown().await;
}

#[tokio::test]
async fn test_multiline_payload_becomes_data_lines() {
    let settings = test_settings();
    let stack = Stack::start(settings.clone()).await;

    let mut viewer = SseClient::open(stack.gateway_addr, &boundary_path("s1", "b1")).await;
    assert!(viewer.read_until("connected", Duration::from_secs(5)).await);
    wait_for_filters(&stack.pubsub.broker(), 1).await;

    let token = mint_token(
        &LogScope::new("s1", "b1", "f1"),
        &settings.server.token_signing_key,
        Duration::from_secs(60),
    )
    .unwrap();
    publish(stack.addrs.ingest, &token, &["first\r\nsecond"]).await;

    assert!(viewer.read_until("data: second", Duration::from_secs(5)).await);
    assert!(viewer.received.contains("data: first\n"));

    stack.shutdown().await;
}
