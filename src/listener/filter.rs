use std::fmt;
use std::sync::Arc;

use crate::core::{GatewayError, GatewayEvent, GatewayResult};

/// Extra predicate evaluated after the built-in flags.
pub type EventPredicate = Arc<dyn Fn(&GatewayEvent) -> bool + Send + Sync>;

/// Conditions an event must meet before a listener fires. All set conditions must hold.
#[derive(Clone, Default)]
pub struct ListenerFilter {
    guild_only: bool,
    dms_only: bool,
    bots_only: bool,
    humans_only: bool,
    ignore_self: bool,
    predicate: Option<EventPredicate>,
}

impl ListenerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events that carry a guild id.
    pub fn guild_only(mut self) -> Self {
        self.guild_only = true;
        self
    }

    /// Only events without a guild id.
    pub fn dms_only(mut self) -> Self {
        self.dms_only = true;
        self
    }

    pub fn bots_only(mut self) -> Self {
        self.bots_only = true;
        self
    }

    pub fn humans_only(mut self) -> Self {
        self.humans_only = true;
        self
    }

    /// Drop events authored by the connected account. Passes everything until the account's
    /// id is known.
    pub fn ignore_self(mut self) -> Self {
        self.ignore_self = true;
        self
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&GatewayEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Reject flag combinations no event can satisfy.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.guild_only && self.dms_only {
            return Err(GatewayError::InvalidListenerConfig(
                "guild_only and dms_only are mutually exclusive".to_string(),
            ));
        }
        if self.bots_only && self.humans_only {
            return Err(GatewayError::InvalidListenerConfig(
                "bots_only and humans_only are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        !(self.guild_only
            || self.dms_only
            || self.bots_only
            || self.humans_only
            || self.ignore_self
            || self.predicate.is_some())
    }

    pub fn matches(&self, event: &GatewayEvent, self_id: Option<u64>) -> bool {
        if self.guild_only && event.guild_id.is_none() {
            return false;
        }
        if self.dms_only && event.guild_id.is_some() {
            return false;
        }
        // Events without an author are neither bot nor human.
        if self.bots_only && !event.is_bot() {
            return false;
        }
        if self.humans_only && !event.is_human() {
            return false;
        }
        if self.ignore_self
            && let (Some(me), Some(author)) = (self_id, event.author_id())
            && me == author
        {
            return false;
        }
        self.predicate.as_ref().is_none_or(|predicate| predicate(event))
    }
}

impl fmt::Debug for ListenerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerFilter")
            .field("guild_only", &self.guild_only)
            .field("dms_only", &self.dms_only)
            .field("bots_only", &self.bots_only)
            .field("humans_only", &self.humans_only)
            .field("ignore_self", &self.ignore_self)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
