//! Connection lifecycle: the gateway actor, its writer, heartbeat driver and the public client.

mod actor;
pub mod client;
pub mod heartbeat;
pub mod identity;
pub mod writer;

use kameo::error::SendError;

use crate::core::GatewayError;

pub use client::GatewayClient;
pub use heartbeat::run_heartbeat_loop;
pub use identity::{CurrentUser, IdentityFuture, IdentityProvider, StaticIdentity};
pub use writer::{GatewayWriter, WriteFrame};

/// Unwrap a handler error from an `ask`; any other send failure means the actor is gone.
pub(crate) fn flatten_send_error<M>(err: SendError<M, GatewayError>) -> GatewayError {
    match err {
        SendError::HandlerError(err) => err,
        _ => GatewayError::ActorError("gateway actor is not running".to_string()),
    }
}
