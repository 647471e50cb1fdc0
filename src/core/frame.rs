use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native message type into/from `WsFrame`; everything above the
/// transport (decoder, session, writer) only sees this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsCloseFrame {
    pub fn reason_lossy(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

impl WsFrame {
    /// Wrap an already-serialized JSON document as a text frame.
    #[inline]
    pub fn json(payload: Vec<u8>) -> Self {
        Self::Text(Bytes::from(payload))
    }

    #[inline]
    pub fn close(code: u16, reason: &'static str) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::from_static(reason.as_bytes()),
        }))
    }

    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

/// Borrow the underlying bytes from frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes)
        | WsFrame::Binary(bytes)
        | WsFrame::Ping(bytes)
        | WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}

/// Close codes the client sends when it tears a connection down.
pub mod client_close {
    /// Normal closure; the remote invalidates the session.
    pub const NORMAL: u16 = 1000;
    /// Non-standard closure; the remote keeps the session so it can be resumed.
    pub const RESUMABLE: u16 = 4000;
}

/// Classification of gateway close codes sent by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCodeClass {
    /// Reconnect and resume the previous session.
    Resumable,
    /// Reconnect with a fresh IDENTIFY.
    Reidentify,
    /// Token was rejected.
    AuthenticationFailed,
    /// Configuration or protocol error that a reconnect cannot fix.
    Fatal,
}

pub fn classify_close_code(code: u16) -> CloseCodeClass {
    match code {
        4004 => CloseCodeClass::AuthenticationFailed,
        4010..=4014 => CloseCodeClass::Fatal,
        4007 | 4009 => CloseCodeClass::Reidentify,
        _ => CloseCodeClass::Resumable,
    }
}
