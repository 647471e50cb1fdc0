pub mod event;
pub mod frame;
pub mod health;
pub mod heartbeat;
pub mod intents;
pub mod payload;
pub mod presence;
pub mod rate_limit;
pub mod reconnect;
pub mod sequence;
pub mod session;
pub mod types;

pub use event::*;
pub use frame::*;
pub use health::*;
pub use heartbeat::*;
pub use intents::*;
pub use payload::*;
pub use presence::*;
pub use rate_limit::*;
pub use reconnect::*;
pub use sequence::*;
pub use session::*;
pub use types::*;
