#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gateway_ws::core::{GatewayPayload, WsFrame};
use gateway_ws::testing::{ImmediateReconnect, MockConnection, MockGateway, MockTransport};
use gateway_ws::{GatewayClient, GatewayConfig, GatewayEvent, Intents, OpCode, StaticIdentity};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub const SELF_ID: u64 = 4242;
pub const HEARTBEAT_MS: u64 = 41_250;
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig::new("test-token", Intents::default())
        .with_url("wss://gateway.mock")
        .with_label("test-gateway")
}

pub struct Harness {
    pub client: GatewayClient<MockTransport>,
    pub gateway: MockGateway,
}

pub fn harness(config: GatewayConfig) -> Harness {
    init_tracing();
    let (transport, gateway) = MockTransport::channel_pair();
    let client = GatewayClient::with_reconnect_strategy(
        config,
        transport,
        StaticIdentity::new(SELF_ID, "test-bot"),
        Box::new(ImmediateReconnect::default()),
    );
    Harness { client, gateway }
}

/// Accept the next socket, say HELLO and answer IDENTIFY with READY (sequence 1).
pub async fn accept_and_identify(gateway: &mut MockGateway, heartbeat_ms: u64) -> MockConnection {
    let mut conn = gateway.accept_timeout(WAIT).await.expect("client connects");
    conn.send_hello(heartbeat_ms).unwrap();
    let identify = conn.recv_payload_timeout(WAIT).await.expect("identify");
    assert_eq!(identify.op, OpCode::Identify);
    conn.send_ready(1, "session-1", SELF_ID).unwrap();
    conn
}

/// Run `connect()` against the mock server and return the open socket.
pub async fn connect_ready(harness: &mut Harness, heartbeat_ms: u64) -> MockConnection {
    let client = harness.client.clone();
    let connecting = tokio::spawn(async move { client.connect().await });
    let conn = accept_and_identify(&mut harness.gateway, heartbeat_ms).await;
    let user = connecting.await.unwrap().expect("connect succeeds");
    assert_eq!(user.id, SELF_ID);
    conn
}

/// Next payload with the given opcode, skipping anything else the client sends.
pub async fn expect_op(conn: &mut MockConnection, op: OpCode) -> GatewayPayload {
    loop {
        let payload = conn
            .recv_payload_timeout(WAIT)
            .await
            .unwrap_or_else(|| panic!("expected op {}", op.as_u8()));
        if payload.op == op {
            return payload;
        }
    }
}

/// Close code of the next close frame the client writes on `conn`.
pub async fn expect_client_close(conn: &mut MockConnection) -> u16 {
    loop {
        match conn.recv_timeout(WAIT).await {
            Some(WsFrame::Close(Some(close))) => return close.code,
            Some(_) => continue,
            None => panic!("socket ended without a close frame"),
        }
    }
}

/// Listener callback that forwards each event into a channel.
pub fn forward(
    tx: mpsc::UnboundedSender<Arc<GatewayEvent>>,
) -> impl Fn(Arc<GatewayEvent>) -> futures_util::future::Ready<gateway_ws::listener::ListenerResult>
+ Send
+ Sync
+ 'static {
    move |event| {
        let _ = tx.send(event);
        futures_util::future::ready(Ok(()))
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Arc<GatewayEvent>>) -> Arc<GatewayEvent> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("listener channel open")
}

pub async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<Arc<GatewayEvent>>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected event: {extra:?}");
}
