//! Test utilities for driving a gateway client without a real socket.
//!
//! [`MockTransport::channel_pair`] returns the transport handed to the client plus a
//! [`MockGateway`] that plays the server: it accepts each connection the client opens, pushes
//! frames to it, reads what the client wrote, and can close or drop the socket.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::core::{
    GatewayError, GatewayPayload, ReconnectStrategy, WebSocketBufferConfig, WsFrame, WsTlsConfig,
    decode_payload, frame_bytes,
};
use crate::gateway::{CurrentUser, IdentityFuture, IdentityProvider};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// In-memory transport; every `connect` produces a new [`MockConnection`].
#[derive(Clone)]
pub struct MockTransport {
    accept_tx: mpsc::UnboundedSender<MockConnection>,
    refusals: Arc<Mutex<VecDeque<String>>>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockGateway) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let refusals = Arc::new(Mutex::new(VecDeque::new()));
        (
            Self {
                accept_tx,
                refusals: Arc::clone(&refusals),
            },
            MockGateway {
                accept_rx,
                refusals,
            },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: WebSocketBufferConfig,
        _tls: WsTlsConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let accept_tx = self.accept_tx.clone();
        let refusal = self.refusals.lock().pop_front();
        Box::pin(async move {
            if let Some(reason) = refusal {
                return Err(GatewayError::ConnectionFailed(reason));
            }

            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let connection = MockConnection {
                url,
                outbound_rx: sent_rx,
                inbound_tx: Some(inbound_tx),
            };
            accept_tx.send(connection).map_err(|_| {
                GatewayError::ConnectionFailed("mock gateway is gone".to_string())
            })?;
            Ok((MockReader { rx: inbound_rx }, MockWriter { sent_tx }))
        })
    }
}

/// Error surface for operations on [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The client side is no longer reading.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server side paired with [`MockTransport`].
pub struct MockGateway {
    accept_rx: mpsc::UnboundedReceiver<MockConnection>,
    refusals: Arc<Mutex<VecDeque<String>>>,
}

impl MockGateway {
    /// Wait for the client's next connection.
    pub async fn accept(&mut self) -> Option<MockConnection> {
        self.accept_rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.accept_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Fail the next connection attempt with a network error.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.refusals.lock().push_back(reason.into());
    }
}

/// One accepted socket.
pub struct MockConnection {
    url: String,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockConnection {
    /// URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive a frame written by the client.
    pub async fn recv(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Receive the next decodable text frame the client wrote, skipping control frames.
    pub async fn recv_payload(&mut self) -> Option<GatewayPayload> {
        while let Some(frame) = self.outbound_rx.recv().await {
            if let WsFrame::Text(bytes) = &frame
                && let Ok(payload) = decode_payload(bytes)
            {
                return Some(payload);
            }
        }
        None
    }

    pub async fn recv_payload_timeout(&mut self, timeout: Duration) -> Option<GatewayPayload> {
        tokio::time::timeout(timeout, self.recv_payload())
            .await
            .unwrap_or_default()
    }

    /// Frames the client has written that have not been received yet.
    pub fn drain(&mut self) -> Vec<WsFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Push an inbound frame to the client.
    pub fn send_frame(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl AsRef<str>) -> Result<(), MockServerError> {
        self.send_frame(WsFrame::json(text.as_ref().as_bytes().to_vec()))
    }

    pub fn send_hello(&self, heartbeat_interval_ms: u64) -> Result<(), MockServerError> {
        self.send_text(format!(
            r#"{{"op":10,"d":{{"heartbeat_interval":{heartbeat_interval_ms}}}}}"#
        ))
    }

    pub fn send_ready(
        &self,
        sequence: u64,
        session_id: &str,
        user_id: u64,
    ) -> Result<(), MockServerError> {
        self.send_text(format!(
            r#"{{"op":0,"s":{sequence},"t":"READY","d":{{"session_id":"{session_id}","resume_gateway_url":"wss://resume.mock","user":{{"id":"{user_id}","bot":true}}}}}}"#
        ))
    }

    /// Send a DISPATCH frame; `data` is the raw JSON of the `d` field.
    pub fn send_dispatch(
        &self,
        sequence: u64,
        event: &str,
        data: &str,
    ) -> Result<(), MockServerError> {
        self.send_text(format!(
            r#"{{"op":0,"s":{sequence},"t":"{event}","d":{data}}}"#
        ))
    }

    pub fn send_heartbeat_ack(&self) -> Result<(), MockServerError> {
        self.send_text(r#"{"op":11}"#)
    }

    /// Send a close frame and then end the inbound stream.
    pub fn close(&mut self, code: u16, reason: &'static str) -> Result<(), MockServerError> {
        let result = self.send_frame(WsFrame::close(code, reason));
        self.inbound_tx = None;
        result
    }

    /// Simulate a server-side socket drop by ending the inbound stream.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// True once the client has stopped reading this socket.
    pub fn is_closed_by_client(&self) -> bool {
        self.inbound_tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = GatewayError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| GatewayError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Reconnect strategy that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl ReconnectStrategy for NoReconnect {
    fn next_delay(&mut self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        false
    }
}

/// Reconnect strategy with a fixed, short delay.
#[derive(Clone, Copy, Debug)]
pub struct ImmediateReconnect(pub Duration);

impl Default for ImmediateReconnect {
    fn default() -> Self {
        Self(Duration::from_millis(10))
    }
}

impl ReconnectStrategy for ImmediateReconnect {
    fn next_delay(&mut self) -> Duration {
        self.0
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        true
    }
}

/// Identity provider that always rejects the token, like a REST call answering 401.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnauthorizedIdentity;

impl IdentityProvider for UnauthorizedIdentity {
    fn fetch_current_identity(&self) -> IdentityFuture<'_> {
        Box::pin(async {
            Err::<CurrentUser, _>(GatewayError::AuthenticationFailed {
                message: "401 Unauthorized".to_string(),
                code: None,
            })
        })
    }
}

/// Identity provider whose lookup never completes, like a hung REST call.
#[derive(Clone, Copy, Debug, Default)]
pub struct StalledIdentity;

impl IdentityProvider for StalledIdentity {
    fn fetch_current_identity(&self) -> IdentityFuture<'_> {
        Box::pin(std::future::pending())
    }
}

/// Decode the payload of a frame the client wrote.
pub fn frame_payload(frame: &WsFrame) -> Option<GatewayPayload> {
    frame_bytes(frame).and_then(|bytes| decode_payload(bytes).ok())
}
