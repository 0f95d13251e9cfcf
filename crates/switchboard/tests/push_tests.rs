//! Push connection lifecycle: heartbeat, snapshot reconciliation, teardown.

mod common;

use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::*;
use switchboard::protocol::{EventId, UserId, UserState};
use switchboard::{CacheError, Error};

fn snapshot_path() -> String {
    format!("{SUPERVISOR}/request_full_statistics")
}

fn agent_snapshot(agents: serde_json::Value) -> serde_json::Value {
    json!([
        {"dataSource": "AGENT_STATE", "data": agents},
        {"dataSource": "ACD_STATUS", "data": [{"id": "q1", "callsInQueue": 2}]}
    ])
}

fn state_of(service: &switchboard::Service, id: &str) -> Option<UserState> {
    service
        .supervisor()
        .stats()
        .agent_state
        .get(&UserId::new(id))
        .map(|state| state.state)
}

#[tokio::test(start_paused = true)]
async fn test_missing_pongs_time_out() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(false);
    let service = service_with(test_config(), transport, connector);

    let started = Instant::now();
    let err = service
        .supervisor()
        .run_push(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_connection_fatal());
    match err {
        Error::HeartbeatTimeout { elapsed, limit } => {
            assert_eq!(limit, Duration::from_secs(45));
            assert!(elapsed > limit);
            assert!(elapsed <= Duration::from_secs(47), "elapsed {elapsed:?}");
        }
        other => panic!("expected HeartbeatTimeout, got {other:?}"),
    }
    assert!(started.elapsed() <= Duration::from_secs(50));
    assert_eq!(service.supervisor().push().live_tasks(), 0);

    let server = servers.try_recv().unwrap();
    assert!(server.pings() >= 9, "pings {}", server.pings());
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_zero_monitor_interval_is_rejected_at_build() {
    let transport = MockTransport::supervisor();
    let (connector, _servers) = MockPushConnector::new(true);
    let mut config = test_config();
    config.heartbeat.monitor_interval_secs = 0;

    let err = switchboard::Service::builder(config)
        .transport(transport.clone())
        .push_connector(connector)
        .build()
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_connection_alive() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector);
    let cancel = CancellationToken::new();

    let run = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.supervisor().run_push(cancel).await }
    });
    let server = servers.recv().await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!run.is_finished());
    assert!(server.pings() >= 24);
    assert!(service.supervisor().stats().last_pong().is_some());

    cancel.cancel();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_connection_carries_session_cookie() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport.clone(), connector.clone());
    let cancel = CancellationToken::new();

    let run = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.supervisor().run_push(cancel).await }
    });
    let server = servers.recv().await.unwrap();

    assert!(
        server
            .url
            .starts_with(&format!("wss://{API_HOST}/supsvcs/sws/"))
    );
    assert_eq!(server.header("Cookie"), Some(COOKIE));
    eventually("snapshot request", || {
        transport.hits(Method::PUT, &snapshot_path()) == 1
    })
    .await;

    cancel.cancel();
    run.await.unwrap().unwrap_err();
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_then_incremental_update() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector);
    let cancel = CancellationToken::new();

    let run = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.supervisor().run_push(cancel).await }
    });
    let server = servers.recv().await.unwrap();
    let stats = service.supervisor().stats().clone();

    assert!(matches!(
        stats.agent_state.get_all(),
        Err(CacheError::NotReady)
    ));

    server.send_event(
        EventId::SupervisorStats,
        agent_snapshot(json!([
            {"id": "1", "state": "READY"},
            {"id": "2", "state": "NOT_READY"}
        ])),
    );
    eventually("snapshot", || stats.agent_state.is_ready()).await;
    assert_eq!(stats.agent_state.len(), 2);
    assert!(stats.acd_state.is_ready());
    assert!(stats.snapshot_received_at().is_some());

    server.send_event(
        EventId::IncrementalStatsUpdate,
        json!([{
            "dataSource": "AGENT_STATE",
            "added": [{"id": "3", "state": "ON_CALL"}],
            "updated": [{"id": "1", "state": "ACW"}],
            "removed": [{"id": "2"}]
        }]),
    );
    eventually("incremental update", || {
        stats.agent_state.get(&UserId::new("3")).is_some()
    })
    .await;

    let snapshot = stats.agent_state.get_all().unwrap();
    assert_eq!(snapshot.items.len(), 2);
    assert_eq!(state_of(&service, "1"), Some(UserState::AfterCallWork));
    assert_eq!(state_of(&service, "2"), None);
    assert_eq!(state_of(&service, "3"), Some(UserState::OnCall));

    cancel.cancel();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(!stats.agent_state.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_starts_from_empty_state() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport.clone(), connector);
    let stats = service.supervisor().stats().clone();

    // First connection: snapshot, then the server hangs up.
    let first = tokio::spawn({
        let service = service.clone();
        async move { service.supervisor().run_push(CancellationToken::new()).await }
    });
    let server = servers.recv().await.unwrap();
    server.send_event(
        EventId::SupervisorStats,
        agent_snapshot(json!([{"id": "1", "state": "READY"}])),
    );
    eventually("first snapshot", || stats.agent_state.is_ready()).await;
    server.close();

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert!(err.is_connection_fatal());
    assert!(matches!(
        stats.agent_state.get_all(),
        Err(CacheError::NotReady)
    ));
    assert_eq!(service.supervisor().push().live_tasks(), 0);

    // Second connection sees none of the first one's data.
    let cancel = CancellationToken::new();
    let second = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.supervisor().run_push(cancel).await }
    });
    let server = servers.recv().await.unwrap();
    eventually("second snapshot request", || {
        transport.hits(Method::PUT, &snapshot_path()) == 2
    })
    .await;
    assert!(!stats.agent_state.is_ready());

    server.send_event(
        EventId::SupervisorStats,
        agent_snapshot(json!([{"id": "2", "state": "LOGGED_OUT"}])),
    );
    eventually("second snapshot", || stats.agent_state.is_ready()).await;
    assert_eq!(state_of(&service, "1"), None);
    assert_eq!(state_of(&service, "2"), Some(UserState::LoggedOut));

    cancel.cancel();
    second.await.unwrap().unwrap_err();
    // One login served both connections.
    assert_eq!(
        transport.hits(Method::POST, "/supsvcs/rs/svc/auth/login"),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_tears_down_every_task() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport.clone(), connector);
    let cancel = CancellationToken::new();

    let run = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.supervisor().run_push(cancel).await }
    });
    let server = servers.recv().await.unwrap();
    eventually("connection tasks", || {
        transport.hits(Method::PUT, &snapshot_path()) == 1
            && service.supervisor().push().live_tasks() == 3
    })
    .await;

    cancel.cancel();
    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run did not stop within the grace period")
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(!err.is_connection_fatal());
    assert_eq!(service.supervisor().push().live_tasks(), 0);
    assert!(server.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_connect() {
    let transport = MockTransport::supervisor();
    let (connector, _servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service.supervisor().run_push(cancel).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_ends_connection() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector);

    let run = tokio::spawn({
        let service = service.clone();
        async move { service.supervisor().run_push(CancellationToken::new()).await }
    });
    let server = servers.recv().await.unwrap();
    server.send_raw(b"{not json");

    let err = run.await.unwrap().unwrap_err();
    match err {
        Error::Frame(frame) => {
            assert_eq!(frame.raw, b"{not json");
            assert!(frame.reason.starts_with("invalid envelope"));
        }
        other => panic!("expected Frame, got {other:?}"),
    }
    assert_eq!(service.supervisor().push().live_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_snapshot_ends_connection() {
    let transport = MockTransport::supervisor();
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector);

    let run = tokio::spawn({
        let service = service.clone();
        async move { service.supervisor().run_push(CancellationToken::new()).await }
    });
    let server = servers.recv().await.unwrap();
    server.send_event(EventId::SupervisorStats, json!({"not": "a list"}));

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Frame(ref frame) if frame.reason.contains("5000")));
}

#[tokio::test(start_paused = true)]
async fn test_failed_snapshot_request_ends_connection() {
    let transport = MockTransport::supervisor();
    transport.on(
        Method::PUT,
        &snapshot_path(),
        json_response(500, json!({"five9ExceptionDetail": {"message": "boom"}})),
    );
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector);

    let run = tokio::spawn({
        let service = service.clone();
        async move { service.supervisor().run_push(CancellationToken::new()).await }
    });
    let server = servers.recv().await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(server.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_never_connects() {
    let transport = MockTransport::supervisor();
    transport.on(
        Method::POST,
        "/supsvcs/rs/svc/auth/login",
        empty_response(403),
    );
    let (connector, _servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport, connector.clone());

    let err = service
        .supervisor()
        .run_push(CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert_eq!(connector.connects(), 0);
    assert_eq!(service.supervisor().push().live_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_event_resets_metadata() {
    let transport = MockTransport::supervisor();
    transport.on(
        Method::GET,
        &format!("/supsvcs/rs/svc/orgs/{ORG_ID}/users"),
        users_response(),
    );
    let (connector, mut servers) = MockPushConnector::new(true);
    let service = service_with(test_config(), transport.clone(), connector);
    let cancel = CancellationToken::new();

    let run = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.supervisor().run_push(cancel).await }
    });
    let server = servers.recv().await.unwrap();

    let metadata = service.supervisor().resolver().caches().clone();
    service.supervisor().resolver().agents().await.unwrap();
    assert!(metadata.agents.is_ready());

    server.send_event(EventId::UsersInvalidated, json!(null));
    eventually("users invalidated", || !metadata.agents.is_ready()).await;

    service.supervisor().resolver().agents().await.unwrap();
    assert_eq!(
        transport.hits(Method::GET, &format!("/supsvcs/rs/svc/orgs/{ORG_ID}/users")),
        2
    );

    cancel.cancel();
    run.await.unwrap().unwrap_err();
}
