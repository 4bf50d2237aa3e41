//! Gateway intents bitmask
//!
//! Declares which event groups a session wants to receive. Sent in the
//! Identify payload as a 64-bit integer bitfield.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway intent flags
    ///
    /// Serialized as a plain JSON number inside the Identify payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild create/update/delete and role/channel events
        const GUILDS                   = 1 << 0;
        /// Member add/update/remove (privileged)
        const GUILD_MEMBERS            = 1 << 1;
        /// Moderation events (bans, audit actions)
        const GUILD_MODERATION         = 1 << 2;
        /// Voice state updates
        const GUILD_VOICE_STATES       = 1 << 7;
        /// Presence updates (privileged)
        const GUILD_PRESENCES          = 1 << 8;
        /// Messages sent in guild channels
        const GUILD_MESSAGES           = 1 << 9;
        /// Reactions in guild channels
        const GUILD_MESSAGE_REACTIONS  = 1 << 10;
        /// Typing indicators in guild channels
        const GUILD_MESSAGE_TYPING     = 1 << 11;
        /// Direct messages
        const DIRECT_MESSAGES          = 1 << 12;
        /// Reactions in direct messages
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Typing indicators in direct messages
        const DIRECT_MESSAGE_TYPING    = 1 << 14;
        /// Full message content (privileged)
        const MESSAGE_CONTENT          = 1 << 15;
    }
}

impl Intents {
    /// All intents that do not require explicit allow-listing
    #[must_use]
    pub const fn unprivileged() -> Self {
        Self::all()
            .difference(Self::GUILD_MEMBERS)
            .difference(Self::GUILD_PRESENCES)
            .difference(Self::MESSAGE_CONTENT)
    }

    /// Check whether any privileged intent is requested
    #[must_use]
    pub const fn has_privileged(&self) -> bool {
        self.intersects(
            Self::GUILD_MEMBERS
                .union(Self::GUILD_PRESENCES)
                .union(Self::MESSAGE_CONTENT),
        )
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::unprivileged()
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u64::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}
