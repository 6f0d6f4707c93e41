mod common;

use bore_dash::{ConnectionStatus, FeedConfig, Origin, ReconnectPolicy, Scheme};
use common::{spawn_client, update_frame, wait_for, FeedServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_feed_snapshot_sorted() {
    let server = FeedServer::start().await;
    let (client, state) = spawn_client(server.config(Duration::from_millis(100)));

    wait_for("connect", WAIT, || server.connection_count() == 1).await;
    wait_for("connected status", WAIT, || {
        state.status() == ConnectionStatus::Connected
    })
    .await;

    server.send(update_frame(&[("zulu", 2), ("alpha", 1), ("mike", 0)]));
    wait_for("first snapshot", WAIT, || state.update_count() == 1).await;

    let view = state.view();
    let ids: Vec<_> = view.tunnels().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["alpha", "mike", "zulu"]);
    assert_eq!(view.total_connections(), 3);
    assert_eq!(view.server_stats().throughput_out, 1024.0);
    assert!(view.last_error.is_none());

    // Tunnels absent from the next snapshot are simply gone
    server.send(update_frame(&[("mike", 4)]));
    wait_for("second snapshot", WAIT, || state.update_count() == 2).await;
    let view = state.view();
    assert_eq!(view.tunnels().len(), 1);
    assert_eq!(view.total_connections(), 4);

    client.shutdown().await;
    assert_eq!(state.status(), ConnectionStatus::Disconnected);
    assert!(state.snapshot().is_none());
}

#[tokio::test]
async fn test_feed_null_stats_and_empty_tunnels() {
    let server = FeedServer::start().await;
    let (client, state) = spawn_client(server.config(Duration::from_millis(100)));
    wait_for("connect", WAIT, || server.connection_count() == 1).await;

    server.send(r#"{"type":"update","tunnels":[],"serverStats":null}"#);
    wait_for("snapshot", WAIT, || state.update_count() == 1).await;

    let snapshot = state.snapshot().unwrap();
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.server_stats(), &Default::default());

    client.shutdown().await;
}

#[tokio::test]
async fn test_feed_malformed_frame_keeps_connection() {
    let server = FeedServer::start().await;
    let (client, state) = spawn_client(server.config(Duration::from_millis(100)));
    wait_for("connect", WAIT, || server.connection_count() == 1).await;

    server.send(update_frame(&[("a", 1)]));
    wait_for("snapshot", WAIT, || state.update_count() == 1).await;

    server.send("this is not json");
    server.send(r#"{"type":"heartbeat"}"#);
    server.send(update_frame(&[("a", 1), ("b", 1)]));
    wait_for("snapshot after garbage", WAIT, || state.update_count() == 2).await;

    assert_eq!(state.status(), ConnectionStatus::Connected);
    assert_eq!(state.snapshot().unwrap().tunnels().len(), 2);
    assert!(state.last_error().is_none());
    assert_eq!(server.connection_count(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_feed_reconnects_after_delay() {
    let delay = Duration::from_millis(300);
    let server = FeedServer::start().await;
    let (client, state) = spawn_client(server.config(delay));
    wait_for("connect", WAIT, || server.connection_count() == 1).await;

    server.send(update_frame(&[("a", 1)]));
    wait_for("snapshot", WAIT, || state.update_count() == 1).await;

    let closed_at = Instant::now();
    server.close_all();

    wait_for("reconnect", WAIT, || server.connection_count() == 2).await;
    let reopened_at = server.accepted_at(1).unwrap();
    let waited = reopened_at.duration_since(closed_at);
    assert!(waited >= delay);
    // Not pushed back by the close handshake
    assert!(waited < delay + Duration::from_millis(900), "waited {waited:?}");

    wait_for("connected again", WAIT, || {
        state.status() == ConnectionStatus::Connected
    })
    .await;
    // Nothing carried over from the previous connection
    assert!(state.snapshot().is_none());

    // Exactly one retry per close
    sleep(delay * 2).await;
    assert_eq!(server.connection_count(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn test_dispose_cancels_pending_retry() {
    let server = FeedServer::start().await;
    let (client, state) = spawn_client(server.config(Duration::from_millis(300)));
    wait_for("connect", WAIT, || server.connection_count() == 1).await;
    wait_for("connected status", WAIT, || {
        state.status() == ConnectionStatus::Connected
    })
    .await;

    server.close_all();
    wait_for("disconnect", WAIT, || {
        state.status() == ConnectionStatus::Disconnected
    })
    .await;

    client.dispose();
    client.dispose();
    sleep(Duration::from_millis(700)).await;

    assert_eq!(server.connection_count(), 1);
    assert_eq!(state.status(), ConnectionStatus::Disconnected);
    client.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_takes_effect_before_returning() {
    let server = FeedServer::start().await;
    let (client, state) = spawn_client(server.config(Duration::from_millis(100)));
    wait_for("connect", WAIT, || server.connection_count() == 1).await;

    server.send(update_frame(&[("a", 1)]));
    wait_for("snapshot", WAIT, || state.update_count() == 1).await;

    client.dispose();
    // No await between dispose and the read
    let view = state.view();
    assert_eq!(view.status, ConnectionStatus::Disconnected);
    assert!(view.snapshot.is_none());

    // Frames still in flight never land
    server.send(update_frame(&[("a", 1), ("b", 2)]));
    sleep(Duration::from_millis(200)).await;
    let view = state.view();
    assert!(view.snapshot.is_none());
    assert_eq!(view.update_count, 1);
    assert_eq!(view.status, ConnectionStatus::Disconnected);

    client.shutdown().await;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_dispose_while_connecting_never_opens() {
    // Accepts TCP but never answers the WebSocket handshake
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicBool::new(false));
    let accepted_flag = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            accepted_flag.store(true, Ordering::SeqCst);
            held.push(stream);
        }
    });

    let config = FeedConfig::new(Origin::new(Scheme::Insecure, addr.to_string()))
        .with_connect_timeout(Duration::from_secs(30));
    let (client, state) = spawn_client(config);

    wait_for("tcp accept", WAIT, || accepted.load(Ordering::SeqCst)).await;
    assert_eq!(state.status(), ConnectionStatus::Connecting);

    timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("shutdown should not wait for the handshake");

    assert_eq!(state.status(), ConnectionStatus::Disconnected);
    assert_eq!(state.update_count(), 0);
    assert!(state.last_error().is_none());
}

#[tokio::test]
async fn test_refused_connection_records_error_and_retries() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = FeedConfig::new(Origin::new(Scheme::Insecure, format!("127.0.0.1:{port}")))
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(50)));
    let (client, state) = spawn_client(config);

    wait_for("error", WAIT, || state.last_error().is_some()).await;
    let error = state.last_error().unwrap();
    assert!(
        error.starts_with("WebSocket connection error"),
        "unexpected error: {error}"
    );
    assert_ne!(state.status(), ConnectionStatus::Connected);

    client.shutdown().await;
}

#[tokio::test]
async fn test_unusable_endpoint_is_retried_not_raised() {
    let config = FeedConfig::new(Origin::new(Scheme::Insecure, "bad host name"))
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(50)));
    let (client, state) = spawn_client(config);

    wait_for("error", WAIT, || state.last_error().is_some()).await;
    assert!(state.last_error().unwrap().contains("WebSocket"));
    assert_ne!(state.status(), ConnectionStatus::Connected);

    client.shutdown().await;
}
