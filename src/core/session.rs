//! Handshake and steady-state protocol logic for one gateway session.
//!
//! [`GatewaySession`] performs no IO: it consumes decoded payloads and returns the
//! [`SessionAction`]s the connection owner must carry out. The same session object lives across
//! reconnects so the resume cursor survives a dropped socket.

use std::time::{Duration, Instant};

use tracing::debug;

use super::event::{EventKind, GatewayEvent};
use super::frame::WsFrame;
use super::heartbeat::HeartbeatTracker;
use super::payload::{
    GatewayPayload, IdentifyPayload, OpCode, ResumePayload, encode, encode_heartbeat,
};
use super::sequence::SequenceTracker;
use super::types::{DisconnectCause, GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Socket open, waiting for HELLO. Everything else is ignored.
    AwaitingHello,
    /// IDENTIFY sent, waiting for READY.
    Identified,
    /// RESUME sent, waiting for RESUMED.
    Resuming,
    /// Handshake complete.
    Ready,
}

/// What a later connection needs to resume this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    pub session_id: String,
    pub resume_url: Option<String>,
    pub sequence: u64,
}

#[derive(Debug)]
pub enum SessionAction {
    /// Write this frame to the transport.
    Send(WsFrame),
    /// HELLO received; begin the periodic heartbeat with this period.
    StartHeartbeat(Duration),
    /// A heartbeat was acknowledged after this round trip.
    HeartbeatAcked(Duration),
    /// Fan this event out to listeners.
    Dispatch(GatewayEvent),
    /// READY or RESUMED arrived.
    HandshakeComplete {
        resumed: bool,
        user_id: Option<u64>,
    },
    /// Tear the connection down and reconnect.
    Reconnect(DisconnectCause),
}

pub struct GatewaySession {
    identify: IdentifyPayload,
    phase: SessionPhase,
    sequence: SequenceTracker,
    heartbeat: Option<HeartbeatTracker>,
    session_id: Option<String>,
    resume_url: Option<String>,
    attempt_resume: bool,
}

impl GatewaySession {
    pub fn new(identify: IdentifyPayload) -> Self {
        Self {
            identify,
            phase: SessionPhase::AwaitingHello,
            sequence: SequenceTracker::new(),
            heartbeat: None,
            session_id: None,
            resume_url: None,
            attempt_resume: false,
        }
    }

    /// Prepare for a freshly opened socket.
    ///
    /// Returns whether the handshake will send RESUME; that needs both `resume` and a session
    /// id from an earlier READY. A fresh IDENTIFY starts the sequence over.
    pub fn begin_connection(&mut self, resume: bool) -> bool {
        self.phase = SessionPhase::AwaitingHello;
        self.heartbeat = None;
        self.attempt_resume = resume && self.session_id.is_some();
        if !self.attempt_resume {
            self.clear_resume_state();
        }
        self.attempt_resume
    }

    /// Forget the session so the next connection identifies from scratch.
    pub fn clear_resume_state(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.sequence.reset();
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.current()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.as_ref().and_then(HeartbeatTracker::latency)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat.as_ref().map(HeartbeatTracker::interval)
    }

    pub fn resume_state(&self) -> Option<ResumeState> {
        self.session_id.as_ref().map(|session_id| ResumeState {
            session_id: session_id.clone(),
            resume_url: self.resume_url.clone(),
            sequence: self.sequence.current(),
        })
    }

    /// True when the previous heartbeat went unacknowledged.
    pub fn heartbeat_overdue(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(HeartbeatTracker::is_awaiting_ack)
    }

    /// Build a HEARTBEAT frame and record the send time.
    pub fn heartbeat(&mut self, now: Instant) -> GatewayResult<WsFrame> {
        let frame = encode_heartbeat(self.sequence.last())?;
        let tracker = self
            .heartbeat
            .as_mut()
            .ok_or_else(|| GatewayError::InvalidState("heartbeat before HELLO".to_string()))?;
        tracker.record_sent(now);
        Ok(frame)
    }

    /// Advance the state machine with one inbound payload.
    pub fn handle(
        &mut self,
        payload: GatewayPayload,
        now: Instant,
    ) -> GatewayResult<Vec<SessionAction>> {
        if self.phase == SessionPhase::AwaitingHello {
            return match payload.op {
                OpCode::Hello => self.on_hello(&payload),
                op => {
                    debug!(op = op.as_u8(), "ignoring frame before HELLO");
                    Ok(Vec::new())
                }
            };
        }

        match payload.op {
            OpCode::Dispatch => self.on_dispatch(payload),
            OpCode::HeartbeatAck => {
                let acked = self
                    .heartbeat
                    .as_mut()
                    .and_then(|tracker| tracker.record_ack(now));
                Ok(acked.map(SessionAction::HeartbeatAcked).into_iter().collect())
            }
            OpCode::Heartbeat => Ok(vec![SessionAction::Send(self.heartbeat(now)?)]),
            OpCode::Reconnect => Ok(vec![SessionAction::Reconnect(
                DisconnectCause::ReconnectRequested,
            )]),
            OpCode::InvalidSession => {
                let resumable = payload.invalid_session_resumable() && self.session_id.is_some();
                if !resumable {
                    self.clear_resume_state();
                }
                Ok(vec![SessionAction::Reconnect(
                    DisconnectCause::SessionInvalidated { resumable },
                )])
            }
            op => {
                debug!(op = op.as_u8(), phase = ?self.phase, "ignoring unexpected opcode");
                Ok(Vec::new())
            }
        }
    }

    fn on_hello(&mut self, payload: &GatewayPayload) -> GatewayResult<Vec<SessionAction>> {
        let interval = payload.hello_interval()?;
        let handshake = match (&self.session_id, self.attempt_resume) {
            (Some(session_id), true) => {
                self.phase = SessionPhase::Resuming;
                encode(
                    OpCode::Resume,
                    &ResumePayload {
                        token: &self.identify.token,
                        session_id,
                        seq: self.sequence.last(),
                    },
                )?
            }
            _ => {
                self.phase = SessionPhase::Identified;
                encode(OpCode::Identify, &self.identify)?
            }
        };
        self.heartbeat = Some(HeartbeatTracker::new(interval));
        Ok(vec![
            SessionAction::Send(handshake),
            SessionAction::StartHeartbeat(interval),
        ])
    }

    fn on_dispatch(&mut self, payload: GatewayPayload) -> GatewayResult<Vec<SessionAction>> {
        let sequence = self.sequence.observe(payload.s);
        let Some(name) = payload.t.as_deref() else {
            return Err(GatewayError::MalformedFrame(
                "DISPATCH without event name".to_string(),
            ));
        };
        let Some(kind) = EventKind::from_name(name) else {
            debug!(event = name, sequence, "ignoring unknown event");
            return Ok(Vec::new());
        };

        let mut actions = Vec::with_capacity(2);
        match kind {
            EventKind::Ready => {
                let ready = payload.ready_info()?;
                self.session_id = Some(ready.session_id);
                self.resume_url = ready.resume_gateway_url;
                self.phase = SessionPhase::Ready;
                actions.push(SessionAction::HandshakeComplete {
                    resumed: false,
                    user_id: ready.user_id,
                });
            }
            EventKind::Resumed => {
                self.phase = SessionPhase::Ready;
                actions.push(SessionAction::HandshakeComplete {
                    resumed: true,
                    user_id: None,
                });
            }
            _ => {}
        }

        let event_sequence = payload.s.unwrap_or(sequence);
        let event = GatewayEvent::from_dispatch(kind, Some(event_sequence), payload.d.as_ref())?;
        actions.push(SessionAction::Dispatch(event));
        Ok(actions)
    }
}
