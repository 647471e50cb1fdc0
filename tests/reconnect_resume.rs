mod common;

use std::time::Duration;

use common::*;
use gateway_ws::core::client_close;
use gateway_ws::testing::{MockTransport, NoReconnect, StalledIdentity, UnauthorizedIdentity};
use gateway_ws::{
    EventKind, GatewayClient, GatewayError, GatewayErrorKind, GatewayStatus, OpCode,
    RegisterOptions,
};
use sonic_rs::JsonValueTrait;
use tokio::sync::mpsc;

#[tokio::test]
async fn reconnect_request_resumes_on_the_resume_url() {
    let mut h = harness(test_config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.client
        .on(EventKind::MessageCreate, RegisterOptions::new(), forward(tx))
        .unwrap();
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.send_dispatch(5, "MESSAGE_CREATE", r#"{"content":"before"}"#)
        .unwrap();
    assert_eq!(next_event(&mut rx).await.sequence, Some(5));

    conn.send_text(r#"{"op":7,"d":null}"#).unwrap();
    assert_eq!(expect_client_close(&mut conn).await, client_close::RESUMABLE);

    let mut next = h.gateway.accept_timeout(WAIT).await.expect("reconnect");
    assert_eq!(next.url(), "wss://resume.mock/?v=10&encoding=json");
    next.send_hello(HEARTBEAT_MS).unwrap();
    let resume = expect_op(&mut next, OpCode::Resume).await;
    let d = resume.d.expect("resume body");
    assert_eq!(d.get("token").and_then(|v| v.as_str()), Some("test-token"));
    assert_eq!(d.get("session_id").and_then(|v| v.as_str()), Some("session-1"));
    assert_eq!(d.get("seq").and_then(|v| v.as_u64()), Some(5));

    next.send_dispatch(6, "RESUMED", "null").unwrap();
    next.send_dispatch(7, "MESSAGE_CREATE", r#"{"content":"after"}"#)
        .unwrap();
    assert_eq!(next_event(&mut rx).await.sequence, Some(7));
    assert_eq!(h.client.status(), GatewayStatus::Ready);
    assert_eq!(h.client.sequence(), 7);
}

#[tokio::test]
async fn dropped_socket_resumes() {
    let mut h = harness(test_config());
    let (tx, mut connected) = mpsc::unbounded_channel();
    h.client
        .on(EventKind::GatewayConnected, RegisterOptions::new(), forward(tx))
        .unwrap();
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    next_event(&mut connected).await;
    conn.drop_socket();

    let mut next = h.gateway.accept_timeout(WAIT).await.expect("reconnect");
    next.send_hello(HEARTBEAT_MS).unwrap();
    let resume = expect_op(&mut next, OpCode::Resume).await;
    assert_eq!(
        resume.d.and_then(|d| d.get("seq").and_then(|v| v.as_u64())),
        Some(1)
    );
    // Every new socket announces itself once.
    next_event(&mut connected).await;
    next.send_heartbeat_ack().unwrap();
    assert_no_event(&mut connected).await;
}

#[tokio::test]
async fn non_resumable_invalid_session_identifies_again() {
    let mut h = harness(test_config());
    let conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.send_dispatch(2, "TYPING_START", r#"{"user_id":"1"}"#)
        .unwrap();
    conn.send_text(r#"{"op":9,"d":false}"#).unwrap();

    let mut next = h.gateway.accept_timeout(WAIT).await.expect("reconnect");
    assert_eq!(next.url(), "wss://gateway.mock/?v=10&encoding=json");
    next.send_hello(HEARTBEAT_MS).unwrap();
    expect_op(&mut next, OpCode::Identify).await;
    assert_eq!(h.client.sequence(), 0);

    next.send_ready(1, "session-2", SELF_ID).unwrap();
    let mut status = h.client.subscribe_status();
    tokio::time::timeout(WAIT, status.wait_for(GatewayStatus::is_ready))
        .await
        .expect("ready again")
        .unwrap();
}

#[tokio::test]
async fn resumable_invalid_session_resumes() {
    let mut h = harness(test_config());
    let conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.send_text(r#"{"op":9,"d":true}"#).unwrap();

    let mut next = h.gateway.accept_timeout(WAIT).await.expect("reconnect");
    next.send_hello(HEARTBEAT_MS).unwrap();
    expect_op(&mut next, OpCode::Resume).await;
}

#[tokio::test]
async fn reidentify_close_code_starts_a_new_session() {
    let mut h = harness(test_config());
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.close(4009, "Session timed out").unwrap();

    let mut next = h.gateway.accept_timeout(WAIT).await.expect("reconnect");
    next.send_hello(HEARTBEAT_MS).unwrap();
    expect_op(&mut next, OpCode::Identify).await;
}

#[tokio::test]
async fn authentication_close_before_ready_fails_connect() {
    let mut h = harness(test_config());
    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut conn = h.gateway.accept_timeout(WAIT).await.expect("client connects");
    conn.send_hello(HEARTBEAT_MS).unwrap();
    expect_op(&mut conn, OpCode::Identify).await;
    conn.close(4004, "Authentication failed").unwrap();

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), GatewayErrorKind::Authentication);
    assert!(matches!(h.client.status(), GatewayStatus::Closed(_)));
    assert!(
        h.gateway
            .accept_timeout(Duration::from_millis(200))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn disallowed_intents_fail_connect_with_configuration_error() {
    let mut h = harness(test_config());
    let client = h.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });

    let mut conn = h.gateway.accept_timeout(WAIT).await.expect("client connects");
    conn.send_hello(HEARTBEAT_MS).unwrap();
    expect_op(&mut conn, OpCode::Identify).await;
    conn.close(4014, "Disallowed intent(s)").unwrap();

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)), "{err:?}");
    assert_eq!(err.kind(), GatewayErrorKind::Configuration);
}

#[tokio::test]
async fn fatal_close_after_ready_stops_the_client() {
    let mut h = harness(test_config());
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.close(4014, "Disallowed intent(s)").unwrap();

    let reason = tokio::time::timeout(WAIT, h.client.wait_closed())
        .await
        .expect("client closes");
    assert_eq!(reason.kind, GatewayErrorKind::Configuration);
    assert!(
        h.gateway
            .accept_timeout(Duration::from_millis(200))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn refused_first_connection_reports_network_error() {
    let h = harness(test_config());
    h.gateway.refuse_next("connection refused");

    let err = h.client.connect().await.unwrap_err();
    assert_eq!(err.kind(), GatewayErrorKind::Network);
    assert_eq!(h.client.wait_closed().await.kind, GatewayErrorKind::Network);
}

#[tokio::test]
async fn refused_reconnect_is_retried() {
    let mut h = harness(test_config());
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    h.gateway.refuse_next("connection refused");
    conn.drop_socket();

    let mut next = h.gateway.accept_timeout(WAIT).await.expect("second attempt");
    next.send_hello(HEARTBEAT_MS).unwrap();
    expect_op(&mut next, OpCode::Resume).await;
    assert_eq!(h.client.stats().await.unwrap().reconnects, 2);
}

#[tokio::test]
async fn exhausted_reconnects_close_the_client() {
    init_tracing();
    let (transport, gateway) = MockTransport::channel_pair();
    let client = GatewayClient::with_reconnect_strategy(
        test_config(),
        transport,
        gateway_ws::StaticIdentity::new(SELF_ID, "test-bot"),
        Box::new(NoReconnect),
    );
    let mut h = Harness { client, gateway };
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.drop_socket();

    let reason = tokio::time::timeout(WAIT, h.client.wait_closed())
        .await
        .expect("client closes");
    assert_eq!(reason.kind, GatewayErrorKind::Network);
}

#[tokio::test]
async fn rejected_identity_lookup_fails_connect() {
    init_tracing();
    let (transport, mut gateway) = MockTransport::channel_pair();
    let client = GatewayClient::new(test_config(), transport, UnauthorizedIdentity);
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut conn = accept_and_identify(&mut gateway, HEARTBEAT_MS).await;

    let err = connecting.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), GatewayErrorKind::Authentication);
    assert_eq!(expect_client_close(&mut conn).await, client_close::NORMAL);
}

#[tokio::test(start_paused = true)]
async fn stalled_identity_lookup_times_out() {
    init_tracing();
    let (transport, mut gateway) = MockTransport::channel_pair();
    let config = test_config().with_handshake_timeout(Duration::from_secs(5));
    let client = GatewayClient::new(config, transport, StalledIdentity);
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut conn = accept_and_identify(&mut gateway, HEARTBEAT_MS).await;

    let err = tokio::time::timeout(Duration::from_secs(30), connecting)
        .await
        .expect("connect returns")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), GatewayErrorKind::Network);
    assert!(err.to_string().contains("identity lookup"), "{err}");
    assert_eq!(expect_client_close(&mut conn).await, client_close::NORMAL);
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let mut h = harness(test_config());
    let _conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    assert!(h.client.connect().await.is_err());
    assert!(h.client.status().is_ready());
}
