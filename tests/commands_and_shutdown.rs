mod common;

use std::time::Duration;

use common::*;
use gateway_ws::core::{Activity, ActivityType, PresenceStatus, PresenceUpdate, client_close};
use gateway_ws::{GatewayError, GatewayErrorKind, GatewayStatus, OpCode};
use sonic_rs::JsonValueTrait;

fn presence() -> PresenceUpdate {
    PresenceUpdate::new(PresenceStatus::Online)
        .with_activity(Activity::new("tests", ActivityType::Game))
}

#[tokio::test]
async fn commands_before_ready_are_rejected() {
    let h = harness(test_config());
    let err = h
        .client
        .send_command(OpCode::PresenceUpdate, &presence())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidState(_)));
}

#[tokio::test]
async fn presence_update_reaches_the_wire() {
    let mut h = harness(test_config());
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;

    h.client
        .send_command(OpCode::PresenceUpdate, &presence())
        .await
        .unwrap();
    let sent = expect_op(&mut conn, OpCode::PresenceUpdate).await;
    let d = sent.d.expect("presence body");
    assert_eq!(d.get("status").and_then(|v| v.as_str()), Some("online"));
    assert_eq!(d.get("afk").and_then(|v| v.as_bool()), Some(false));
}

#[tokio::test]
async fn connection_opcodes_cannot_be_sent_as_commands() {
    let mut h = harness(test_config());
    let _conn = connect_ready(&mut h, HEARTBEAT_MS).await;

    for op in [OpCode::Identify, OpCode::Resume, OpCode::Heartbeat] {
        let err = h.client.send_command(op, &()).await.unwrap_err();
        assert_eq!(err.kind(), GatewayErrorKind::Protocol, "op {}", op.as_u8());
    }
}

#[tokio::test]
async fn command_rate_is_limited() {
    let mut h = harness(test_config().with_command_limit(2, Duration::from_secs(60)));
    let _conn = connect_ready(&mut h, HEARTBEAT_MS).await;

    for _ in 0..2 {
        h.client
            .send_command(OpCode::PresenceUpdate, &presence())
            .await
            .unwrap();
    }
    let err = h
        .client
        .send_command(OpCode::PresenceUpdate, &presence())
        .await
        .unwrap_err();
    match err {
        GatewayError::RateLimited { retry_after, .. } => assert!(retry_after.is_some()),
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_closes_normally_and_is_idempotent() {
    let mut h = harness(test_config());
    let mut conn = connect_ready(&mut h, HEARTBEAT_MS).await;

    h.client.shutdown().await.unwrap();
    assert_eq!(expect_client_close(&mut conn).await, client_close::NORMAL);
    assert_eq!(
        h.client.status(),
        GatewayStatus::Closed(gateway_ws::CloseReason::shutdown())
    );
    h.client.shutdown().await.unwrap();

    assert!(
        h.client
            .send_command(OpCode::PresenceUpdate, &presence())
            .await
            .is_err()
    );
    assert!(
        h.gateway
            .accept_timeout(Duration::from_millis(200))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn stats_count_frames_and_dispatches() {
    let mut h = harness(test_config());
    let conn = connect_ready(&mut h, HEARTBEAT_MS).await;
    conn.send_dispatch(2, "TYPING_START", r#"{"user_id":"1"}"#)
        .unwrap();
    conn.send_dispatch(3, "TYPING_START", r#"{"user_id":"1"}"#)
        .unwrap();

    let mut status = h.client.subscribe_status();
    assert!(status.borrow_and_update().is_ready());

    let stats = loop {
        let stats = h.client.stats().await.unwrap();
        if stats.sequence == 3 {
            break stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    // HELLO, READY and two dispatches.
    assert_eq!(stats.frames, 4);
    assert_eq!(stats.dispatches, 3);
    assert_eq!(stats.reconnects, 0);
    assert!(stats.status.is_ready());
}
