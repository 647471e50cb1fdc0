//! Kameo-based chat gateway client.
//!
//! Keeps one persistent event-stream connection alive: HELLO/IDENTIFY/RESUME handshake,
//! heartbeats with zombie detection, sequence tracking, reconnect with resume, and fan-out of
//! dispatched events to filtered listeners.

pub mod config;
pub mod core;
pub mod gateway;
pub mod listener;
pub mod testing;
pub mod transport;

pub use config::{GatewayConfig, ReconnectConfig};
pub use core::{
    CloseReason, EventKind, GatewayError, GatewayErrorKind, GatewayEvent, GatewayResult,
    GatewayStats, GatewayStatus, Intents, OpCode,
};
pub use gateway::{CurrentUser, GatewayClient, IdentityProvider, StaticIdentity};
pub use listener::{ListenerFilter, ListenerId, RegisterOptions};
