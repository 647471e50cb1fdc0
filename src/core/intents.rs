use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Capability flags declared in IDENTIFY; the remote only sends events covered by them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Intents(u64);

impl Intents {
    pub const NONE: Intents = Intents(0);
    pub const GUILDS: Intents = Intents(1 << 0);
    /// Privileged.
    pub const GUILD_MEMBERS: Intents = Intents(1 << 1);
    pub const GUILD_BANS: Intents = Intents(1 << 2);
    pub const GUILD_EMOJIS: Intents = Intents(1 << 3);
    pub const GUILD_INTEGRATIONS: Intents = Intents(1 << 4);
    pub const GUILD_WEBHOOKS: Intents = Intents(1 << 5);
    pub const GUILD_INVITES: Intents = Intents(1 << 6);
    pub const GUILD_VOICE_STATES: Intents = Intents(1 << 7);
    /// Privileged.
    pub const GUILD_PRESENCES: Intents = Intents(1 << 8);
    pub const GUILD_MESSAGES: Intents = Intents(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Intents = Intents(1 << 10);
    pub const GUILD_MESSAGE_TYPING: Intents = Intents(1 << 11);
    pub const DIRECT_MESSAGES: Intents = Intents(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Intents = Intents(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Intents = Intents(1 << 14);
    /// Privileged; required to read guild message content.
    pub const MESSAGE_CONTENT: Intents = Intents(1 << 15);
    pub const GUILD_SCHEDULED_EVENTS: Intents = Intents(1 << 16);
    pub const AUTO_MODERATION_CONFIGURATION: Intents = Intents(1 << 20);
    pub const AUTO_MODERATION_EXECUTION: Intents = Intents(1 << 21);

    pub const UNPRIVILEGED: Intents = Intents(
        Self::GUILDS.0
            | Self::GUILD_BANS.0
            | Self::GUILD_EMOJIS.0
            | Self::GUILD_INTEGRATIONS.0
            | Self::GUILD_WEBHOOKS.0
            | Self::GUILD_INVITES.0
            | Self::GUILD_VOICE_STATES.0
            | Self::GUILD_MESSAGES.0
            | Self::GUILD_MESSAGE_REACTIONS.0
            | Self::GUILD_MESSAGE_TYPING.0
            | Self::DIRECT_MESSAGES.0
            | Self::DIRECT_MESSAGE_REACTIONS.0
            | Self::DIRECT_MESSAGE_TYPING.0
            | Self::GUILD_SCHEDULED_EVENTS.0
            | Self::AUTO_MODERATION_CONFIGURATION.0
            | Self::AUTO_MODERATION_EXECUTION.0,
    );
    pub const PRIVILEGED: Intents =
        Intents(Self::MESSAGE_CONTENT.0 | Self::GUILD_MEMBERS.0 | Self::GUILD_PRESENCES.0);
    pub const ALL: Intents = Intents(Self::UNPRIVILEGED.0 | Self::PRIVILEGED.0);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Intents(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_privileged(self) -> bool {
        self.0 & Self::PRIVILEGED.0 != 0
    }
}

impl Default for Intents {
    fn default() -> Self {
        // Unprivileged guild, message, reaction and DM intents.
        Intents(98045)
    }
}

impl BitOr for Intents {
    type Output = Intents;

    fn bitor(self, rhs: Intents) -> Intents {
        Intents(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Intents) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Intents({:#x})", self.0)
    }
}
