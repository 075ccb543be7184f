//! Whether the bot may currently enforce anything on a member.

use crate::error::Result;
use crate::model::Snowflake;
use async_trait::async_trait;

/// Interaction-eligibility check consulted before enforcement steps.
///
/// Typical reasons to refuse: the member outranks the bot, or another
/// sanction elsewhere is in charge of the member right now.
#[async_trait]
pub trait ModerationGate: Send + Sync {
    async fn can_enforce(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<bool>;
}

/// Gate that never objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl ModerationGate for AllowAll {
    async fn can_enforce(&self, _guild_id: Snowflake, _user_id: Snowflake) -> Result<bool> {
        Ok(true)
    }
}

/// Gate that refuses enforcement for a fixed set of users.
#[derive(Debug, Clone, Default)]
pub struct ProtectedUsers {
    users: std::collections::HashSet<Snowflake>,
}

impl ProtectedUsers {
    pub fn new(users: impl IntoIterator<Item = Snowflake>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ModerationGate for ProtectedUsers {
    async fn can_enforce(&self, _guild_id: Snowflake, user_id: Snowflake) -> Result<bool> {
        Ok(!self.users.contains(&user_id))
    }
}
