use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kameo::prelude::{Actor, ActorRef};
use serde::Serialize;
use tokio::sync::watch;

use super::actor::{
    Connect, GatewayActor, GatewayActorArgs, GatewayTelemetry, GetStats, SendCommand, Shutdown,
};
use super::flatten_send_error;
use super::identity::{CurrentUser, IdentityProvider};
use crate::config::GatewayConfig;
use crate::core::{
    CloseReason, EventKind, GatewayError, GatewayErrorKind, GatewayEvent, GatewayResult,
    GatewayStats, GatewayStatus, OpCode, ReconnectStrategy, encode,
};
use crate::listener::{
    ListenerFilter, ListenerId, ListenerRegistry, ListenerResult, RegisterOptions,
};
use crate::transport::{TungsteniteTransport, WsTransport};

/// Handle to one gateway connection.
///
/// Cheap to clone; every clone talks to the same connection actor and shares one listener
/// registry. Constructors spawn the actor and must run inside a tokio runtime.
#[derive(Clone)]
pub struct GatewayClient<T: WsTransport = TungsteniteTransport> {
    actor_ref: ActorRef<GatewayActor<T>>,
    registry: Arc<ListenerRegistry>,
    status_rx: watch::Receiver<GatewayStatus>,
    user_rx: watch::Receiver<Option<CurrentUser>>,
    telemetry: Arc<GatewayTelemetry>,
}

impl GatewayClient<TungsteniteTransport> {
    /// Client over the default rustls websocket transport.
    pub fn with_default_transport(config: GatewayConfig, identity: impl IdentityProvider) -> Self {
        Self::new(config, TungsteniteTransport::new(), identity)
    }
}

impl<T: WsTransport> GatewayClient<T> {
    pub fn new(config: GatewayConfig, transport: T, identity: impl IdentityProvider) -> Self {
        let reconnect = Box::new(config.reconnect.strategy());
        Self::with_reconnect_strategy(config, transport, identity, reconnect)
    }

    pub fn with_reconnect_strategy(
        config: GatewayConfig,
        transport: T,
        identity: impl IdentityProvider,
        reconnect: Box<dyn ReconnectStrategy>,
    ) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let telemetry = Arc::new(GatewayTelemetry::new());
        let (status_tx, status_rx) = watch::channel(GatewayStatus::Disconnected);
        let (user_tx, user_rx) = watch::channel(None);

        let actor_ref = GatewayActor::spawn(GatewayActorArgs {
            config,
            transport,
            identity: Arc::new(identity),
            registry: Arc::clone(&registry),
            reconnect,
            status_tx,
            user_tx,
            telemetry: Arc::clone(&telemetry),
        });

        Self {
            actor_ref,
            registry,
            status_rx,
            user_rx,
            telemetry,
        }
    }

    /// Direct access to the listener table, for removal and inspection.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Register a listener for `kind`.
    pub fn on<F, Fut>(
        &self,
        kind: EventKind,
        options: RegisterOptions,
        callback: F,
    ) -> GatewayResult<ListenerId>
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.registry.register(kind, options, callback)
    }

    /// Register a listener that fires for the first matching event only.
    pub fn once<F, Fut>(
        &self,
        kind: EventKind,
        filter: ListenerFilter,
        callback: F,
    ) -> GatewayResult<ListenerId>
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.registry.register_once(kind, filter, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    /// Open the connection and wait until the session is READY and the account is known.
    ///
    /// Fails with the classified error if the first handshake or the identity lookup fails.
    /// Later disconnects are recovered in the background; watch [`GatewayClient::subscribe_status`]
    /// or [`GatewayClient::wait_closed`] for a terminal close.
    pub async fn connect(&self) -> GatewayResult<CurrentUser> {
        self.actor_ref
            .ask(Connect)
            .await
            .map_err(flatten_send_error)?;

        let mut status = self.status_rx.clone();
        let mut user = self.user_rx.clone();
        loop {
            if let Some(current) = user.borrow_and_update().clone() {
                return Ok(current);
            }
            if let GatewayStatus::Closed(reason) = &*status.borrow_and_update() {
                return Err(reason.clone().into_error());
            }
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(actor_gone());
                    }
                }
                changed = user.changed() => {
                    if changed.is_err() {
                        return Err(actor_gone());
                    }
                }
            }
        }
    }

    /// Resolve once the client has stopped for good.
    pub async fn wait_closed(&self) -> CloseReason {
        let mut status = self.status_rx.clone();
        loop {
            if let GatewayStatus::Closed(reason) = &*status.borrow_and_update() {
                return reason.clone();
            }
            if status.changed().await.is_err() {
                return CloseReason::new(GatewayErrorKind::Internal, "gateway actor stopped");
            }
        }
    }

    pub fn status(&self) -> GatewayStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<GatewayStatus> {
        self.status_rx.clone()
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user_rx.borrow().clone()
    }

    /// Most recent heartbeat round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.telemetry.latency()
    }

    /// Last dispatch sequence observed.
    pub fn sequence(&self) -> u64 {
        self.telemetry.sequence()
    }

    pub async fn stats(&self) -> GatewayResult<GatewayStats> {
        self.actor_ref
            .ask(GetStats)
            .await
            .map_err(flatten_send_error)
    }

    /// Send an application command such as a presence or voice state update.
    ///
    /// Connection-managed opcodes are rejected, and so is anything sent before READY or beyond
    /// the configured command rate.
    pub async fn send_command<P: Serialize>(&self, op: OpCode, payload: &P) -> GatewayResult<()> {
        let frame = encode(op, payload)?;
        self.actor_ref
            .ask(SendCommand { op, frame })
            .await
            .map_err(flatten_send_error)
    }

    /// Close the connection with a normal close code and stop the actor. Idempotent.
    pub async fn shutdown(&self) -> GatewayResult<()> {
        if !self.actor_ref.is_alive() {
            return Ok(());
        }
        let result = self
            .actor_ref
            .ask(Shutdown)
            .await
            .map_err(flatten_send_error);
        let _ = self.actor_ref.stop_gracefully().await;
        self.actor_ref.wait_for_shutdown().await;
        result
    }
}

fn actor_gone() -> GatewayError {
    GatewayError::ActorError("gateway actor stopped".to_string())
}
