use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Canonical error surface of the gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String, code: Option<u16> },

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Gateway closed the session: code={code}, reason={reason}")]
    Closed { code: u16, reason: String },

    #[error("Invalid listener configuration: {0}")]
    InvalidListenerConfig(String),

    /// The gateway rejected the session's settings (shard, API version, intents).
    #[error("Gateway configuration rejected: {0}")]
    Configuration(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("Timeout: {context}")]
    Timeout { context: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
}

/// Coarse classification used when reporting a failed `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    Authentication,
    Network,
    Protocol,
    Configuration,
    Internal,
}

impl GatewayError {
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::AuthenticationFailed { .. } => GatewayErrorKind::Authentication,
            GatewayError::ConnectionFailed(_)
            | GatewayError::TransportError { .. }
            | GatewayError::Timeout { .. } => GatewayErrorKind::Network,
            GatewayError::MalformedFrame(_)
            | GatewayError::Protocol(_)
            | GatewayError::Closed { .. } => GatewayErrorKind::Protocol,
            GatewayError::InvalidListenerConfig(_) | GatewayError::Configuration(_) => {
                GatewayErrorKind::Configuration
            }
            GatewayError::ActorError(_)
            | GatewayError::InvalidState(_)
            | GatewayError::RateLimited { .. } => GatewayErrorKind::Internal,
        }
    }
}

/// Terminal reason published once the gateway stops for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl CloseReason {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn shutdown() -> Self {
        Self::new(GatewayErrorKind::Internal, "shutdown requested")
    }

    /// Rebuild an error carrying this reason's classification.
    pub fn into_error(self) -> GatewayError {
        match self.kind {
            GatewayErrorKind::Authentication => GatewayError::AuthenticationFailed {
                message: self.message,
                code: None,
            },
            GatewayErrorKind::Network => GatewayError::ConnectionFailed(self.message),
            GatewayErrorKind::Protocol => GatewayError::Protocol(self.message),
            GatewayErrorKind::Configuration => GatewayError::Configuration(self.message),
            GatewayErrorKind::Internal => GatewayError::InvalidState(self.message),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Lifecycle phase of the gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identified,
    Resuming,
    Ready,
    Closed(CloseReason),
}

impl GatewayStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, GatewayStatus::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, GatewayStatus::Closed(_))
    }
}

/// Why a connection ended.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    /// The remote sent a close frame.
    RemoteClosed { code: Option<u16>, reason: String },
    /// The inbound stream ended without a close frame.
    StreamEnded,
    ReadFailure { error: String },
    WriteFailure { error: String },
    /// The remote asked for a reconnect (op 7).
    ReconnectRequested,
    /// The remote invalidated the session (op 9).
    SessionInvalidated { resumable: bool },
    /// A heartbeat tick fired before the previous heartbeat was acknowledged.
    HeartbeatAckMissed,
    ConnectFailed { error: String },
    ProtocolViolation { message: String },
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::RemoteClosed {
                code: Some(code),
                reason,
            } => write!(f, "remote closed (code={code}, reason={reason})"),
            DisconnectCause::RemoteClosed { code: None, .. } => f.write_str("remote closed"),
            DisconnectCause::StreamEnded => f.write_str("stream ended"),
            DisconnectCause::ReadFailure { error } => write!(f, "read failure: {error}"),
            DisconnectCause::WriteFailure { error } => write!(f, "write failure: {error}"),
            DisconnectCause::ReconnectRequested => f.write_str("remote requested reconnect"),
            DisconnectCause::SessionInvalidated { resumable } => {
                write!(f, "session invalidated (resumable={resumable})")
            }
            DisconnectCause::HeartbeatAckMissed => f.write_str("heartbeat not acknowledged"),
            DisconnectCause::ConnectFailed { error } => write!(f, "connect failed: {error}"),
            DisconnectCause::ProtocolViolation { message } => {
                write!(f, "protocol violation: {message}")
            }
        }
    }
}

/// Actions the lifecycle may take after a disconnect classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Reconnect and send RESUME.
    Resume,
    /// Reconnect and send a fresh IDENTIFY.
    Reidentify,
    /// Stop for good and publish the close reason.
    Abort(GatewayErrorKind),
}

/// Transport-independent buffer sizing parameters used for websocket configuration.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 128 << 10,
            max_write_buffer_bytes: 256 << 10,
            // READY and GUILD_CREATE for large accounts can run to several MiB.
            max_message_bytes: 64 << 20,
            max_frame_bytes: 16 << 20,
        }
    }
}

/// TLS configuration for websocket connections.
///
/// Certificate validation is enabled unless explicitly disabled.
#[derive(Clone, Copy, Debug)]
pub struct WsTlsConfig {
    pub validate_certs: bool,
}

impl Default for WsTlsConfig {
    fn default() -> Self {
        Self {
            validate_certs: true,
        }
    }
}

/// Abstract reconnect strategy.
pub trait ReconnectStrategy: Send + Sync + 'static {
    fn next_delay(&mut self) -> Duration;
    fn reset(&mut self);
    fn should_retry(&self) -> bool;
}

/// Connection statistics snapshot.
#[derive(Clone, Debug)]
pub struct GatewayStats {
    pub status: GatewayStatus,
    pub uptime: Duration,
    pub frames: u64,
    pub dispatches: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub sequence: u64,
    pub latency: Option<Duration>,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
    pub latency_samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_classify_for_connect_callers() {
        let auth = GatewayError::AuthenticationFailed {
            message: "bad token".into(),
            code: Some(4004),
        };
        assert_eq!(auth.kind(), GatewayErrorKind::Authentication);
        assert_eq!(
            GatewayError::ConnectionFailed("dns".into()).kind(),
            GatewayErrorKind::Network
        );
        assert_eq!(
            GatewayError::Protocol("no hello".into()).kind(),
            GatewayErrorKind::Protocol
        );
    }

    #[test]
    fn close_reason_round_trips_its_kind() {
        let reason = CloseReason::new(GatewayErrorKind::Authentication, "4004");
        assert_eq!(reason.clone().into_error().kind(), reason.kind);
    }

    #[test]
    fn rejected_intents_are_not_listener_errors() {
        let err = CloseReason::new(GatewayErrorKind::Configuration, "Disallowed intent(s)")
            .into_error();
        assert!(matches!(err, GatewayError::Configuration(_)), "{err:?}");
        assert_eq!(err.kind(), GatewayErrorKind::Configuration);
        assert!(!err.to_string().contains("listener"));
    }
}
