//! Gateway frame envelope: `{op, d, s, t}`.
//!
//! Inbound text frames decode into [`GatewayPayload`]; outbound frames are encoded from typed
//! payload structs. Opcodes the client does not know decode to [`OpCode::Unknown`] instead of
//! failing, so newer servers never break the receive loop.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sonic_rs::{JsonValueTrait, Value};

use super::frame::WsFrame;
use super::presence::PresenceUpdate;
use super::types::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Dispatch,
    Heartbeat,
    Identify,
    PresenceUpdate,
    VoiceStateUpdate,
    Resume,
    Reconnect,
    RequestGuildMembers,
    InvalidSession,
    Hello,
    HeartbeatAck,
    Unknown(u8),
}

impl OpCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => OpCode::Dispatch,
            1 => OpCode::Heartbeat,
            2 => OpCode::Identify,
            3 => OpCode::PresenceUpdate,
            4 => OpCode::VoiceStateUpdate,
            6 => OpCode::Resume,
            7 => OpCode::Reconnect,
            8 => OpCode::RequestGuildMembers,
            9 => OpCode::InvalidSession,
            10 => OpCode::Hello,
            11 => OpCode::HeartbeatAck,
            other => OpCode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
            OpCode::Unknown(other) => other,
        }
    }

    /// Opcodes an application may send through `send_command`.
    pub fn is_application_command(self) -> bool {
        matches!(
            self,
            OpCode::PresenceUpdate | OpCode::VoiceStateUpdate | OpCode::RequestGuildMembers
        )
    }
}

#[derive(Deserialize)]
struct RawPayload {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub struct GatewayPayload {
    pub op: OpCode,
    pub d: Option<Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

impl GatewayPayload {
    /// `heartbeat_interval` of a HELLO payload, received in milliseconds.
    pub fn hello_interval(&self) -> GatewayResult<Duration> {
        let millis = self
            .d
            .as_ref()
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                GatewayError::MalformedFrame("HELLO without heartbeat_interval".to_string())
            })?;
        if millis == 0 {
            return Err(GatewayError::MalformedFrame(
                "HELLO with zero heartbeat_interval".to_string(),
            ));
        }
        Ok(Duration::from_millis(millis))
    }

    /// Whether an INVALID_SESSION payload allows resuming (`d: true`).
    pub fn invalid_session_resumable(&self) -> bool {
        self.d.as_ref().and_then(|d| d.as_bool()).unwrap_or(false)
    }

    /// Session details carried by READY.
    pub fn ready_info(&self) -> GatewayResult<ReadyInfo> {
        let d = self
            .d
            .as_ref()
            .ok_or_else(|| GatewayError::MalformedFrame("READY without data".to_string()))?;
        let session_id = d
            .get("session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::MalformedFrame("READY without session_id".to_string()))?
            .to_string();
        let resume_gateway_url = d
            .get("resume_gateway_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let user_id = d
            .get("user")
            .and_then(|user| user.get("id"))
            .and_then(snowflake);
        Ok(ReadyInfo {
            session_id,
            resume_gateway_url,
            user_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
    pub user_id: Option<u64>,
}

/// Snowflake ids travel as strings; tolerate bare numbers too.
pub(crate) fn snowflake(value: &Value) -> Option<u64> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_u64())
}

/// Decode a raw JSON document into an envelope.
pub fn decode_payload(bytes: &[u8]) -> GatewayResult<GatewayPayload> {
    let raw: RawPayload =
        sonic_rs::from_slice(bytes).map_err(|e| GatewayError::MalformedFrame(e.to_string()))?;
    Ok(GatewayPayload {
        op: OpCode::from_u8(raw.op),
        d: raw.d,
        s: raw.s,
        t: raw.t,
    })
}

/// Decode one websocket frame.
///
/// Control frames yield `Ok(None)`. Binary frames are rejected: the connection is negotiated
/// with `encoding=json` and without transport compression.
pub fn decode_frame(frame: &WsFrame) -> GatewayResult<Option<GatewayPayload>> {
    match frame {
        WsFrame::Text(bytes) => decode_payload(bytes).map(Some),
        WsFrame::Binary(bytes) => Err(GatewayError::MalformedFrame(format!(
            "unexpected binary frame ({} bytes)",
            bytes.len()
        ))),
        WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => Ok(None),
    }
}

#[derive(Serialize)]
struct Outbound<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

/// Encode an outbound `{op, d}` frame.
pub fn encode<T: Serialize>(op: OpCode, d: &T) -> GatewayResult<WsFrame> {
    sonic_rs::to_vec(&Outbound { op: op.as_u8(), d })
        .map(WsFrame::json)
        .map_err(|e| GatewayError::Protocol(format!("encode op {}: {e}", op.as_u8())))
}

/// HEARTBEAT carries the last sequence number, or `null` before the first dispatch.
pub fn encode_heartbeat(sequence: Option<u64>) -> GatewayResult<WsFrame> {
    encode(OpCode::Heartbeat, &sequence)
}

/// Client metadata sent with IDENTIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[derive(Clone, Serialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u16>,
    /// Presence the session starts with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

impl fmt::Debug for IdentifyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyPayload")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .field("large_threshold", &self.large_threshold)
            .field("presence", &self.presence)
            .finish()
    }
}

#[derive(Serialize)]
pub struct ResumePayload<'a> {
    pub token: &'a str,
    pub session_id: &'a str,
    pub seq: Option<u64>,
}
