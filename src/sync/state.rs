//! State types for the guild traversal.

use std::fmt;

/// Newtype for a Discord guild ID to prevent mixing with other strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuildId(pub String);

impl GuildId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GuildId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GuildId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype for a member's Discord account ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where the traversal stands. Each variant is the position the engine rests
/// in between ticks, except `GuildDrain`, whose finalization work runs as
/// soon as it is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalState {
    /// Guild popped from the work queue, members not yet loaded.
    GuildStart { guild: GuildId },

    /// Working through the guild's member pool. `expected_total` is the pool
    /// size captured at load time, reported in the guild's sync log row.
    MemberStep {
        guild: GuildId,
        pool: Vec<AccountId>,
        expected_total: usize,
    },

    /// The guild's pool is empty; its record is being finalized.
    GuildDrain {
        guild: GuildId,
        expected_total: usize,
    },

    /// No guilds remain. The run is over.
    Terminal,
}

impl TraversalState {
    /// Returns true when the run is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// The guild currently being worked, if any.
    pub fn guild(&self) -> Option<&GuildId> {
        match self {
            Self::GuildStart { guild } => Some(guild),
            Self::MemberStep { guild, .. } => Some(guild),
            Self::GuildDrain { guild, .. } => Some(guild),
            Self::Terminal => None,
        }
    }
}
