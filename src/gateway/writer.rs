use futures_util::{Sink, SinkExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::watch;
use tracing::debug;

use crate::core::{GatewayError, GatewayResult, WsFrame};

/// Writer actor that owns the transport sink; every outbound frame goes through its mailbox,
/// so heartbeats, handshakes and commands never interleave on the wire.
pub struct GatewayWriter<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    writer: W,
    shutdown_rx: watch::Receiver<bool>,
}

impl<W> GatewayWriter<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    pub fn new(writer: W, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            writer,
            shutdown_rx,
        }
    }
}

impl<W> Actor for GatewayWriter<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    type Args = Self;
    type Error = GatewayError;

    fn name() -> &'static str {
        "GatewayWriter"
    }

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> Result<(), Self::Error> {
        // Best effort; the socket may already be gone.
        let _ = self.writer.close().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "GatewayWriter panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

#[derive(Debug)]
pub struct WriteFrame {
    pub frame: WsFrame,
}

impl<W> KameoMessage<WriteFrame> for GatewayWriter<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        msg: WriteFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if *self.shutdown_rx.borrow() {
            return Err(GatewayError::InvalidState("writer stopped".to_string()));
        }
        debug!(target: "gateway-writer", close = msg.frame.is_close(), "sending frame to wire");
        self.writer.send(msg.frame).await
    }
}
