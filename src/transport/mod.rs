use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{GatewayError, WebSocketBufferConfig, WsFrame, WsTlsConfig};

pub mod tungstenite;

pub use tungstenite::TungsteniteTransport;

pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), GatewayError>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The read loop runs outside kameo; the gateway actor owns protocol state and policy. Each
/// `connect` call opens an independent socket, so one transport value serves every reconnect.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, GatewayError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
        tls: WsTlsConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
