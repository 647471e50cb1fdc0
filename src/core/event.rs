//! Application events decoded from DISPATCH frames.
//!
//! An event keeps its payload as raw JSON bytes so it can be shared across listener tasks
//! cheaply; the filtering fields (guild, author, bot flag) are pulled out once at decode time.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use sonic_rs::{JsonValueTrait, Value};

use super::payload::snowflake;
use super::types::{GatewayError, GatewayResult};

macro_rules! event_kinds {
    ($($variant:ident => $name:literal,)*) => {
        /// Event types listeners can subscribe to.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            /// Emitted locally before the first connection attempt.
            Starting,
            /// Emitted locally once the current identity is known.
            Started,
            /// Emitted locally when a newly opened socket delivers its first frame.
            GatewayConnected,
            $($variant,)*
        }

        impl EventKind {
            /// Map a DISPATCH `t` name to its kind; unknown names yield `None`.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(EventKind::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    EventKind::Starting => "STARTING",
                    EventKind::Started => "STARTED",
                    EventKind::GatewayConnected => "GATEWAY_CONNECTED",
                    $(EventKind::$variant => $name,)*
                }
            }
        }
    };
}

event_kinds! {
    Ready => "READY",
    Resumed => "RESUMED",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    ChannelDelete => "CHANNEL_DELETE",
    ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
    ThreadCreate => "THREAD_CREATE",
    ThreadUpdate => "THREAD_UPDATE",
    ThreadDelete => "THREAD_DELETE",
    GuildCreate => "GUILD_CREATE",
    GuildUpdate => "GUILD_UPDATE",
    GuildDelete => "GUILD_DELETE",
    GuildBanAdd => "GUILD_BAN_ADD",
    GuildBanRemove => "GUILD_BAN_REMOVE",
    GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    InteractionCreate => "INTERACTION_CREATE",
    InviteCreate => "INVITE_CREATE",
    InviteDelete => "INVITE_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    MessageUpdate => "MESSAGE_UPDATE",
    MessageDelete => "MESSAGE_DELETE",
    MessageDeleteBulk => "MESSAGE_DELETE_BULK",
    MessageReactionAdd => "MESSAGE_REACTION_ADD",
    MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
    MessageReactionRemoveAll => "MESSAGE_REACTION_REMOVE_ALL",
    PresenceUpdate => "PRESENCE_UPDATE",
    TypingStart => "TYPING_START",
    UserUpdate => "USER_UPDATE",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
}

impl EventKind {
    /// Events whose payload is the guild object itself.
    fn payload_is_guild(self) -> bool {
        matches!(
            self,
            EventKind::GuildCreate | EventKind::GuildUpdate | EventKind::GuildDelete
        )
    }
}

/// Origin of an event, when the payload names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAuthor {
    pub id: u64,
    pub bot: bool,
}

/// One decoded application event.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub kind: EventKind,
    /// Dispatch sequence of this event; `None` for locally emitted lifecycle events.
    pub sequence: Option<u64>,
    pub guild_id: Option<u64>,
    pub author: Option<EventAuthor>,
    data: Bytes,
}

impl GatewayEvent {
    /// Build an event from a DISPATCH payload's `d` field.
    pub fn from_dispatch(
        kind: EventKind,
        sequence: Option<u64>,
        d: Option<&Value>,
    ) -> GatewayResult<Self> {
        let Some(d) = d else {
            return Ok(Self::lifecycle(kind).with_sequence(sequence));
        };

        let guild_id = if kind.payload_is_guild() {
            d.get("id").and_then(snowflake)
        } else {
            d.get("guild_id").and_then(snowflake)
        };
        let data = sonic_rs::to_vec(d)
            .map(Bytes::from)
            .map_err(|e| GatewayError::MalformedFrame(format!("{}: {e}", kind.name())))?;

        Ok(Self {
            kind,
            sequence,
            guild_id,
            author: extract_author(d),
            data,
        })
    }

    /// A locally emitted event with a `null` payload.
    pub fn lifecycle(kind: EventKind) -> Self {
        Self {
            kind,
            sequence: None,
            guild_id: None,
            author: None,
            data: Bytes::from_static(b"null"),
        }
    }

    fn with_sequence(mut self, sequence: Option<u64>) -> Self {
        self.sequence = sequence;
        self
    }

    /// Raw JSON of the DISPATCH `d` field.
    pub fn raw(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Deserialize the payload into an application type.
    pub fn data<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        sonic_rs::from_slice(self.data.as_ref())
            .map_err(|e| GatewayError::MalformedFrame(format!("{}: {e}", self.kind.name())))
    }

    pub fn value(&self) -> GatewayResult<Value> {
        self.data()
    }

    pub fn is_dm(&self) -> bool {
        self.guild_id.is_none()
    }

    pub fn author_id(&self) -> Option<u64> {
        self.author.map(|a| a.id)
    }

    pub fn is_bot(&self) -> bool {
        self.author.is_some_and(|a| a.bot)
    }

    pub fn is_human(&self) -> bool {
        self.author.is_some_and(|a| !a.bot)
    }
}

/// Messages carry `author`; interactions, reactions and typing carry `user`, `member.user`
/// or a bare `user_id`.
fn extract_author(d: &Value) -> Option<EventAuthor> {
    let user = d
        .get("author")
        .or_else(|| d.get("user"))
        .or_else(|| d.get("member").and_then(|m| m.get("user")));

    if let Some(user) = user
        && let Some(id) = user.get("id").and_then(snowflake)
    {
        let bot = user.get("bot").and_then(|b| b.as_bool()).unwrap_or(false);
        return Some(EventAuthor { id, bot });
    }

    d.get("user_id")
        .and_then(snowflake)
        .map(|id| EventAuthor { id, bot: false })
}
