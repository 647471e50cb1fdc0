//! Gateway connection actor.
//!
//! The socket read loop runs outside kameo and forwards decoded payloads; the actor owns the
//! session state machine, the heartbeat schedule and the reconnect policy. Every message that
//! belongs to one socket carries that socket's generation, and anything from an older generation
//! is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use kameo::prelude::{
    Actor, ActorRef, ActorStopReason, Context, Message as KameoMessage, WeakActorRef,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::heartbeat::run_heartbeat_loop;
use super::identity::{CurrentUser, IdentityProvider};
use super::writer::{GatewayWriter, WriteFrame};
use crate::config::GatewayConfig;
use crate::core::{
    CloseCodeClass, CloseReason, CommandRateLimiter, DisconnectAction, DisconnectCause,
    EventKind, GatewayError, GatewayErrorKind, GatewayEvent, GatewayHealthMonitor,
    GatewayPayload, GatewayResult, GatewaySession, GatewayStats, GatewayStatus, OpCode,
    ReconnectStrategy, SessionAction, SessionPhase, WsFrame, classify_close_code, client_close,
    decode_frame, jitter_delay,
};
use crate::listener::ListenerRegistry;
use crate::transport::WsTransport;

const NO_LATENCY: u64 = u64::MAX;

/// Values the client reads without a round trip through the mailbox. Only the actor writes.
#[derive(Debug)]
pub(crate) struct GatewayTelemetry {
    sequence: AtomicU64,
    latency_us: AtomicU64,
}

impl GatewayTelemetry {
    pub(crate) fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            latency_us: AtomicU64::new(NO_LATENCY),
        }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub(crate) fn latency(&self) -> Option<Duration> {
        match self.latency_us.load(Ordering::Acquire) {
            NO_LATENCY => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    fn set_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Release);
    }

    fn set_latency(&self, latency: Duration) {
        let us = latency.as_micros().min((NO_LATENCY - 1) as u128) as u64;
        self.latency_us.store(us, Ordering::Release);
    }
}

pub(crate) struct GatewayActorArgs<T: WsTransport> {
    pub config: GatewayConfig,
    pub transport: T,
    pub identity: Arc<dyn IdentityProvider>,
    pub registry: Arc<ListenerRegistry>,
    pub reconnect: Box<dyn ReconnectStrategy>,
    pub status_tx: watch::Sender<GatewayStatus>,
    pub user_tx: watch::Sender<Option<CurrentUser>>,
    pub telemetry: Arc<GatewayTelemetry>,
}

pub(crate) struct GatewayActor<T: WsTransport> {
    config: GatewayConfig,
    transport: T,
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<ListenerRegistry>,
    reconnect: Box<dyn ReconnectStrategy>,
    session: GatewaySession,
    health: GatewayHealthMonitor,
    limiter: CommandRateLimiter,
    actor_ref: ActorRef<Self>,
    status_tx: watch::Sender<GatewayStatus>,
    user_tx: watch::Sender<Option<CurrentUser>>,
    telemetry: Arc<GatewayTelemetry>,
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
    writer_ref: Option<ActorRef<GatewayWriter<T::Writer>>>,
    reader_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    handshake_timer: Option<JoinHandle<()>>,
    last_latency: Option<Duration>,
    /// Whether the current socket has delivered a frame yet.
    socket_active: bool,
    ever_ready: bool,
    identity_requested: bool,
    started: bool,
    closed: bool,
}

impl<T: WsTransport> Actor for GatewayActor<T> {
    type Args = GatewayActorArgs<T>;
    type Error = GatewayError;

    fn name() -> &'static str {
        "GatewayActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        let session = GatewaySession::new(args.config.identify_payload());
        let limiter =
            CommandRateLimiter::new(args.config.command_limit, args.config.command_window);
        let (shutdown_tx, _) = watch::channel(true);

        Ok(Self {
            config: args.config,
            transport: args.transport,
            identity: args.identity,
            registry: args.registry,
            reconnect: args.reconnect,
            session,
            health: GatewayHealthMonitor::new(),
            limiter,
            actor_ref: ctx,
            status_tx: args.status_tx,
            user_tx: args.user_tx,
            telemetry: args.telemetry,
            generation: 0,
            shutdown_tx,
            writer_ref: None,
            reader_task: None,
            heartbeat_task: None,
            handshake_timer: None,
            last_latency: None,
            socket_active: false,
            ever_ready: false,
            identity_requested: false,
            started: false,
            closed: false,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        self.finish(stop_close_reason(&reason)).await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "GatewayActor panicked");
            Ok(std::ops::ControlFlow::Break(ActorStopReason::Panicked(err)))
        }
    }
}

/// Start the first connection.
#[derive(Debug)]
pub(crate) struct Connect;

/// Send an application command (presence, voice state, member request).
#[derive(Debug)]
pub(crate) struct SendCommand {
    pub op: OpCode,
    pub frame: WsFrame,
}

#[derive(Debug)]
pub(crate) struct GetStats;

#[derive(Debug)]
pub(crate) struct Shutdown;

pub(crate) struct ConnectionEstablished<T: WsTransport> {
    generation: u64,
    reader: T::Reader,
    writer: T::Writer,
}

pub(crate) struct ConnectionFailed {
    generation: u64,
    error: GatewayError,
}

pub(crate) enum ReaderEvent {
    Payload(GatewayPayload),
    Malformed(String),
    Closed(DisconnectCause),
}

pub(crate) struct FromReader {
    generation: u64,
    event: ReaderEvent,
}

pub(crate) struct HeartbeatTick {
    generation: u64,
}

pub(crate) struct HandshakeTimeout {
    generation: u64,
}

pub(crate) struct ReconnectDue {
    generation: u64,
    resume: bool,
}

pub(crate) struct IdentityResolved {
    result: GatewayResult<CurrentUser>,
}

impl<T: WsTransport> KameoMessage<Connect> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(&mut self, _msg: Connect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if self.closed {
            return Err(GatewayError::InvalidState("gateway is closed".to_string()));
        }
        if self.started {
            return Err(GatewayError::InvalidState(
                "connect already called".to_string(),
            ));
        }
        self.started = true;
        info!(connection = %self.config.label(), "starting gateway client");
        self.registry
            .dispatch(GatewayEvent::lifecycle(EventKind::Starting));
        self.begin_connect(false);
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<SendCommand> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        msg: SendCommand,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Err(GatewayError::InvalidState("gateway is closed".to_string()));
        }
        if !msg.op.is_application_command() {
            return Err(GatewayError::Protocol(format!(
                "opcode {} is managed by the connection",
                msg.op.as_u8()
            )));
        }
        if !self.session.is_ready() || self.writer_ref.is_none() {
            return Err(GatewayError::InvalidState(
                "gateway session is not ready".to_string(),
            ));
        }
        self.limiter.try_acquire()?;

        if let Err(err) = self.write_frame(msg.frame).await {
            self.handle_disconnect(DisconnectCause::WriteFailure {
                error: err.to_string(),
            })
            .await;
            return Err(err);
        }
        Ok(())
    }
}

impl<T: WsTransport> KameoMessage<GetStats> for GatewayActor<T> {
    type Reply = GatewayResult<GatewayStats>;

    async fn handle(&mut self, _msg: GetStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        Ok(self.health.snapshot(
            self.status_tx.borrow().clone(),
            self.session.sequence(),
            self.last_latency,
        ))
    }
}

impl<T: WsTransport> KameoMessage<Shutdown> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(&mut self, _msg: Shutdown, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.finish(CloseReason::shutdown()).await;
        Ok(())
    }
}

// Internal messages arrive via `tell`, so their handlers never fail; errors are handled here.

impl<T: WsTransport> KameoMessage<ConnectionEstablished<T>> for GatewayActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation || self.closed {
            debug!(connection = %self.config.label(), "dropping stale connection");
            return;
        }
        self.on_connection_established(msg.reader, msg.writer);
    }
}

impl<T: WsTransport> KameoMessage<ConnectionFailed> for GatewayActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation || self.closed {
            return;
        }
        let error = msg.error.to_string();
        self.health.record_error("connect", &error);
        self.handle_disconnect(DisconnectCause::ConnectFailed { error })
            .await;
    }
}

impl<T: WsTransport> KameoMessage<FromReader> for GatewayActor<T> {
    type Reply = ();

    async fn handle(&mut self, msg: FromReader, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if msg.generation != self.generation || self.closed {
            return;
        }
        if !self.socket_active && !matches!(msg.event, ReaderEvent::Closed(_)) {
            self.socket_active = true;
            self.registry
                .dispatch(GatewayEvent::lifecycle(EventKind::GatewayConnected));
        }
        match msg.event {
            ReaderEvent::Payload(payload) => self.process_payload(payload).await,
            ReaderEvent::Malformed(error) => {
                self.health.record_frame();
                self.health.record_error("decode", &error);
            }
            ReaderEvent::Closed(cause) => self.handle_disconnect(cause).await,
        }
    }
}

impl<T: WsTransport> KameoMessage<HeartbeatTick> for GatewayActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: HeartbeatTick,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation || self.closed || self.writer_ref.is_none() {
            return;
        }
        if self.config.zombie_detection && self.session.heartbeat_overdue() {
            warn!(
                connection = %self.config.label(),
                sequence = self.session.sequence(),
                "previous heartbeat was never acknowledged"
            );
            self.handle_disconnect(DisconnectCause::HeartbeatAckMissed)
                .await;
            return;
        }

        let frame = match self.session.heartbeat(Instant::now()) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection = %self.config.label(), error = %err, "heartbeat skipped");
                return;
            }
        };
        if let Err(err) = self.write_frame(frame).await {
            self.handle_disconnect(DisconnectCause::WriteFailure {
                error: err.to_string(),
            })
            .await;
        }
    }
}

impl<T: WsTransport> KameoMessage<HandshakeTimeout> for GatewayActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: HandshakeTimeout,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation || self.closed || self.session.is_ready() {
            return;
        }
        let message = format!(
            "handshake not completed within {:?} ({:?})",
            self.config.handshake_timeout,
            self.session.phase()
        );
        self.handle_disconnect(DisconnectCause::ProtocolViolation { message })
            .await;
    }
}

impl<T: WsTransport> KameoMessage<ReconnectDue> for GatewayActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ReconnectDue,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation || self.closed {
            return;
        }
        self.begin_connect(msg.resume);
    }
}

impl<T: WsTransport> KameoMessage<IdentityResolved> for GatewayActor<T> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: IdentityResolved,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return;
        }
        match msg.result {
            Ok(user) => {
                info!(
                    connection = %self.config.label(),
                    user_id = user.id,
                    username = %user.username,
                    "gateway identity resolved"
                );
                self.registry.set_self_id(Some(user.id));
                self.user_tx.send_replace(Some(user));
                self.registry
                    .dispatch(GatewayEvent::lifecycle(EventKind::Started));
            }
            Err(err) => {
                warn!(connection = %self.config.label(), error = %err, "identity lookup failed");
                self.finish(CloseReason::new(
                    err.kind(),
                    format!("identity lookup failed: {err}"),
                ))
                .await;
            }
        }
    }
}

impl<T: WsTransport> GatewayActor<T> {
    fn publish_status(&self, status: GatewayStatus) {
        self.status_tx.send_replace(status);
    }

    fn begin_connect(&mut self, resume: bool) {
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let resuming = self.session.begin_connection(resume);
        self.telemetry.set_sequence(self.session.sequence());

        let url = match self.session.resume_state().and_then(|state| state.resume_url) {
            Some(resume_url) if resuming => self.config.url_for(&resume_url),
            _ => self.config.gateway_url(),
        };
        self.publish_status(GatewayStatus::Connecting);
        debug!(
            connection = %self.config.label(),
            generation,
            resuming,
            url = %url,
            "opening gateway socket"
        );

        let actor_ref = self.actor_ref.clone();
        let transport = self.transport.clone();
        let buffers = self.config.buffers;
        let tls = self.config.tls;
        let timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.connect(url, buffers, tls))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout {
                    context: format!("gateway connect after {timeout:?}"),
                }),
            };
            match result {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            generation,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(error) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed { generation, error })
                        .send()
                        .await;
                }
            }
        });
    }

    fn on_connection_established(&mut self, reader: T::Reader, writer: T::Writer) {
        info!(
            connection = %self.config.label(),
            generation = self.generation,
            "gateway socket open"
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.socket_active = false;
        self.writer_ref = Some(GatewayWriter::spawn(GatewayWriter::new(
            writer,
            shutdown_rx.clone(),
        )));
        self.reader_task = Some(spawn_reader::<T>(
            reader,
            shutdown_rx,
            self.actor_ref.clone(),
            self.generation,
            self.config.label().to_string(),
        ));

        let actor_ref = self.actor_ref.clone();
        let generation = self.generation;
        let timeout = self.config.handshake_timeout;
        self.handshake_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = actor_ref.tell(HandshakeTimeout { generation }).send().await;
        }));
        self.publish_status(GatewayStatus::AwaitingHello);
    }

    async fn process_payload(&mut self, payload: GatewayPayload) {
        self.health.record_frame();
        let op = payload.op;
        let result = self.session.handle(payload, Instant::now());
        self.telemetry.set_sequence(self.session.sequence());
        let actions = match result {
            Ok(actions) => actions,
            Err(err) => {
                warn!(
                    connection = %self.config.label(),
                    op = op.as_u8(),
                    error = %err,
                    "dropping gateway frame"
                );
                self.health.record_error("session", &err.to_string());
                return;
            }
        };

        for action in actions {
            match action {
                SessionAction::Send(frame) => {
                    if let Err(err) = self.write_frame(frame).await {
                        self.handle_disconnect(DisconnectCause::WriteFailure {
                            error: err.to_string(),
                        })
                        .await;
                        return;
                    }
                }
                SessionAction::StartHeartbeat(interval) => {
                    self.start_heartbeat_loop(interval);
                    let status = match self.session.phase() {
                        SessionPhase::Resuming => GatewayStatus::Resuming,
                        _ => GatewayStatus::Identified,
                    };
                    info!(
                        connection = %self.config.label(),
                        heartbeat_ms = interval.as_millis() as u64,
                        status = ?status,
                        "hello received"
                    );
                    self.publish_status(status);
                }
                SessionAction::HeartbeatAcked(rtt) => {
                    self.last_latency = Some(rtt);
                    self.telemetry.set_latency(rtt);
                    self.health.record_latency(rtt);
                    debug!(
                        connection = %self.config.label(),
                        latency_us = rtt.as_micros() as u64,
                        "heartbeat acknowledged"
                    );
                }
                SessionAction::Dispatch(event) => {
                    self.health.record_dispatch();
                    let name = event.kind.name();
                    let scheduled = self.registry.dispatch(event);
                    debug!(event = name, listeners = scheduled, "dispatched gateway event");
                }
                SessionAction::HandshakeComplete { resumed, user_id } => {
                    self.on_handshake_complete(resumed, user_id);
                }
                SessionAction::Reconnect(cause) => {
                    self.handle_disconnect(cause).await;
                    return;
                }
            }
        }
    }

    fn on_handshake_complete(&mut self, resumed: bool, user_id: Option<u64>) {
        if let Some(timer) = self.handshake_timer.take() {
            timer.abort();
        }
        self.ever_ready = true;
        self.reconnect.reset();
        self.publish_status(GatewayStatus::Ready);
        info!(
            connection = %self.config.label(),
            resumed,
            sequence = self.session.sequence(),
            "gateway session ready"
        );

        if let Some(id) = user_id
            && self.registry.self_id().is_none()
        {
            self.registry.set_self_id(Some(id));
        }

        if !resumed && !self.identity_requested {
            self.identity_requested = true;
            let identity = Arc::clone(&self.identity);
            let actor_ref = self.actor_ref.clone();
            let timeout = self.config.handshake_timeout;
            tokio::spawn(async move {
                let result =
                    match tokio::time::timeout(timeout, identity.fetch_current_identity()).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::Timeout {
                            context: format!("identity lookup after {timeout:?}"),
                        }),
                    };
                let _ = actor_ref.tell(IdentityResolved { result }).send().await;
            });
        }
    }

    fn start_heartbeat_loop(&mut self, interval: Duration) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        let shutdown = self.shutdown_tx.subscribe();
        let actor_ref = self.actor_ref.clone();
        let generation = self.generation;
        self.heartbeat_task = Some(tokio::spawn(run_heartbeat_loop(
            interval,
            shutdown,
            move || {
                let actor_ref = actor_ref.clone();
                async move {
                    actor_ref
                        .tell(HeartbeatTick { generation })
                        .send()
                        .await
                        .is_ok()
                }
            },
        )));
    }

    async fn write_frame(&mut self, frame: WsFrame) -> GatewayResult<()> {
        let Some(writer) = self.writer_ref.clone() else {
            return Err(GatewayError::InvalidState("no open connection".to_string()));
        };
        match writer.ask(WriteFrame { frame }).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = super::flatten_send_error(err);
                self.health.record_error("write", &err.to_string());
                warn!(connection = %self.config.label(), error = %err, "gateway write failed");
                Err(err)
            }
        }
    }

    async fn handle_disconnect(&mut self, cause: DisconnectCause) {
        if self.closed {
            return;
        }
        let action = classify_disconnect(&cause);
        self.log_reconnect_plan("received", &cause, action, None);

        let abort = match action {
            DisconnectAction::Abort(kind) => Some(CloseReason::new(kind, cause.to_string())),
            _ if !self.ever_ready => Some(CloseReason::new(
                pre_ready_kind(&cause),
                format!("handshake failed: {cause}"),
            )),
            _ => None,
        };
        if let Some(reason) = abort {
            self.finish(reason).await;
            return;
        }

        let resume = action == DisconnectAction::Resume;
        let code = if resume {
            client_close::RESUMABLE
        } else {
            client_close::NORMAL
        };
        self.teardown_connection(code).await;
        self.schedule_reconnect(&cause, action).await;
    }

    async fn schedule_reconnect(&mut self, cause: &DisconnectCause, action: DisconnectAction) {
        if !self.reconnect.should_retry() {
            self.log_reconnect_plan("retry_exhausted", cause, action, None);
            self.finish(CloseReason::new(
                GatewayErrorKind::Network,
                format!("reconnect attempts exhausted: {cause}"),
            ))
            .await;
            return;
        }

        let delay = jitter_delay(self.reconnect.next_delay());
        self.health.increment_reconnect();
        self.publish_status(GatewayStatus::Disconnected);
        self.log_reconnect_plan("scheduled", cause, action, Some(delay));

        let actor_ref = self.actor_ref.clone();
        let generation = self.generation;
        let resume = action == DisconnectAction::Resume;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = actor_ref
                .tell(ReconnectDue { generation, resume })
                .send()
                .await;
        });
    }

    /// Close the current socket, if any. Bumps the generation so in-flight messages from the old
    /// socket are ignored.
    async fn teardown_connection(&mut self, code: u16) {
        self.generation = self.generation.wrapping_add(1);
        for task in [self.handshake_timer.take(), self.heartbeat_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }

        if let Some(writer) = self.writer_ref.take() {
            // Best effort; the remote may already be gone.
            let _ = writer
                .ask(WriteFrame {
                    frame: WsFrame::close(code, ""),
                })
                .await;
            self.shutdown_tx.send_replace(true);
            let _ = writer.stop_gracefully().await;
            writer.wait_for_shutdown().await;
        }
        self.shutdown_tx.send_replace(true);

        // The reader may be parked on our own mailbox, so it is aborted rather than joined.
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
    }

    async fn finish(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.teardown_connection(client_close::NORMAL).await;
        if reason == CloseReason::shutdown() {
            info!(connection = %self.config.label(), "gateway client stopped");
        } else {
            warn!(connection = %self.config.label(), reason = %reason, "gateway client closed");
        }
        self.publish_status(GatewayStatus::Closed(reason));
    }

    fn log_reconnect_plan(
        &self,
        note: &str,
        cause: &DisconnectCause,
        action: DisconnectAction,
        delay: Option<Duration>,
    ) {
        let delay_ms = delay.map(|d| d.as_millis().min(u64::MAX as u128) as u64);
        let last_frame_age_ms = self
            .health
            .last_frame_age()
            .as_millis()
            .min(u64::MAX as u128) as u64;
        warn!(
            connection = %self.config.label(),
            note = %note,
            cause = %cause,
            action = ?action,
            attempt = self.health.reconnects(),
            delay_ms,
            sequence = self.session.sequence(),
            ever_ready = self.ever_ready,
            last_frame_age_ms,
            "gateway reconnect plan"
        );
    }
}

/// Close reason published when the actor stops without an earlier terminal close.
fn stop_close_reason(reason: &ActorStopReason) -> CloseReason {
    match reason {
        ActorStopReason::Normal | ActorStopReason::Killed => CloseReason::shutdown(),
        ActorStopReason::Panicked(err) => {
            CloseReason::new(GatewayErrorKind::Internal, format!("gateway actor {err}"))
        }
        other => CloseReason::new(
            GatewayErrorKind::Internal,
            format!("gateway actor stopped: {other}"),
        ),
    }
}

fn spawn_reader<T: WsTransport>(
    mut reader: T::Reader,
    mut shutdown: watch::Receiver<bool>,
    actor_ref: ActorRef<GatewayActor<T>>,
    generation: u64,
    label: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                    continue;
                }
                next = reader.next() => next,
            };

            let (event, last) = match next {
                Some(Ok(WsFrame::Close(close))) => {
                    let (code, reason) = match close {
                        Some(close) => (Some(close.code), close.reason_lossy()),
                        None => (None, String::new()),
                    };
                    info!(connection = %label, code, reason = %reason, "gateway sent close frame");
                    (
                        ReaderEvent::Closed(DisconnectCause::RemoteClosed { code, reason }),
                        true,
                    )
                }
                Some(Ok(frame)) => match decode_frame(&frame) {
                    Ok(Some(payload)) => (ReaderEvent::Payload(payload), false),
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(connection = %label, error = %err, "skipping malformed frame");
                        (ReaderEvent::Malformed(err.to_string()), false)
                    }
                },
                Some(Err(err)) => (
                    ReaderEvent::Closed(DisconnectCause::ReadFailure {
                        error: err.to_string(),
                    }),
                    true,
                ),
                None => (ReaderEvent::Closed(DisconnectCause::StreamEnded), true),
            };

            let delivered = actor_ref
                .tell(FromReader { generation, event })
                .send()
                .await
                .is_ok();
            if !delivered || last {
                break;
            }
        }
    })
}

/// Decide how to recover from a dropped connection once the session has been READY.
pub(crate) fn classify_disconnect(cause: &DisconnectCause) -> DisconnectAction {
    match cause {
        DisconnectCause::RemoteClosed {
            code: Some(code), ..
        } => match classify_close_code(*code) {
            CloseCodeClass::AuthenticationFailed => {
                DisconnectAction::Abort(GatewayErrorKind::Authentication)
            }
            CloseCodeClass::Fatal if matches!(code, 4013 | 4014) => {
                DisconnectAction::Abort(GatewayErrorKind::Configuration)
            }
            CloseCodeClass::Fatal => DisconnectAction::Abort(GatewayErrorKind::Protocol),
            CloseCodeClass::Reidentify => DisconnectAction::Reidentify,
            CloseCodeClass::Resumable => DisconnectAction::Resume,
        },
        DisconnectCause::SessionInvalidated { resumable: false }
        | DisconnectCause::ProtocolViolation { .. } => DisconnectAction::Reidentify,
        _ => DisconnectAction::Resume,
    }
}

/// Error kind reported when a connection fails before the first READY.
fn pre_ready_kind(cause: &DisconnectCause) -> GatewayErrorKind {
    match cause {
        DisconnectCause::SessionInvalidated { .. }
        | DisconnectCause::ReconnectRequested
        | DisconnectCause::ProtocolViolation { .. } => GatewayErrorKind::Protocol,
        _ => GatewayErrorKind::Network,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(code: u16) -> DisconnectCause {
        DisconnectCause::RemoteClosed {
            code: Some(code),
            reason: String::new(),
        }
    }

    #[test]
    fn close_codes_map_to_recovery_actions() {
        assert_eq!(
            classify_disconnect(&closed(4004)),
            DisconnectAction::Abort(GatewayErrorKind::Authentication)
        );
        assert_eq!(
            classify_disconnect(&closed(4014)),
            DisconnectAction::Abort(GatewayErrorKind::Configuration)
        );
        assert_eq!(
            classify_disconnect(&closed(4012)),
            DisconnectAction::Abort(GatewayErrorKind::Protocol)
        );
        assert_eq!(
            classify_disconnect(&closed(4009)),
            DisconnectAction::Reidentify
        );
        assert_eq!(classify_disconnect(&closed(1006)), DisconnectAction::Resume);
    }

    #[test]
    fn transport_drops_resume() {
        assert_eq!(
            classify_disconnect(&DisconnectCause::StreamEnded),
            DisconnectAction::Resume
        );
        assert_eq!(
            classify_disconnect(&DisconnectCause::HeartbeatAckMissed),
            DisconnectAction::Resume
        );
        assert_eq!(
            classify_disconnect(&DisconnectCause::SessionInvalidated { resumable: true }),
            DisconnectAction::Resume
        );
        assert_eq!(
            classify_disconnect(&DisconnectCause::SessionInvalidated { resumable: false }),
            DisconnectAction::Reidentify
        );
    }

    #[test]
    fn failures_before_ready_are_reported_by_kind() {
        assert_eq!(
            pre_ready_kind(&DisconnectCause::ConnectFailed {
                error: "refused".into()
            }),
            GatewayErrorKind::Network
        );
        assert_eq!(
            pre_ready_kind(&DisconnectCause::SessionInvalidated { resumable: false }),
            GatewayErrorKind::Protocol
        );
    }

    #[test]
    fn crashed_actor_is_not_reported_as_shutdown() {
        assert_eq!(
            stop_close_reason(&ActorStopReason::Normal),
            CloseReason::shutdown()
        );

        let panicked = ActorStopReason::Panicked(kameo::prelude::PanicError::new(Box::new(
            "filter bug",
        )));
        let reason = stop_close_reason(&panicked);
        assert_eq!(reason.kind, GatewayErrorKind::Internal);
        assert_ne!(reason, CloseReason::shutdown());
        assert!(reason.message.contains("filter bug"), "{}", reason.message);
    }

    #[test]
    fn telemetry_reports_missing_latency_as_none() {
        let telemetry = GatewayTelemetry::new();
        assert_eq!(telemetry.latency(), None);
        telemetry.set_latency(Duration::from_millis(42));
        assert_eq!(telemetry.latency(), Some(Duration::from_millis(42)));
        telemetry.set_sequence(9);
        assert_eq!(telemetry.sequence(), 9);
    }
}
