//! Listener registration and event fan-out.

pub mod filter;
pub mod registry;

pub use filter::{EventPredicate, ListenerFilter};
pub use registry::{
    BoxError, ListenerFuture, ListenerId, ListenerInfo, ListenerRegistry, ListenerResult,
    RegisterOptions,
};
