//! Contract with the remote chat platform.
//!
//! The engine only talks to Discord through [`GuildApi`]. The production
//! binding is [`discord::DiscordRestClient`]; tests script their own.

pub mod discord;

use crate::error::{ReconcileError, Result};
use crate::model::{EventStatus, Snowflake};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Remote operations the reconciliation engine consumes.
#[async_trait]
pub trait GuildApi: Send + Sync {
    /// All scheduled events currently known to the guild.
    async fn list_scheduled_events(
        &self,
        guild_id: Snowflake,
    ) -> Result<Vec<RemoteScheduledEvent>>;

    /// Move a scheduled event to `status`.
    async fn set_scheduled_event_status(
        &self,
        guild_id: Snowflake,
        event_id: Snowflake,
        status: EventStatus,
    ) -> Result<()>;

    /// Live guild member, `None` when the user is not in the guild.
    async fn get_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Option<RemoteMember>>;

    /// Replace roles and/or nickname of a member.
    async fn modify_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        edit: &MemberEdit,
    ) -> Result<()>;

    /// Add a single role to a member.
    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()>;

    /// Active ban for a user, `None` when the user is not banned.
    async fn get_ban(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<RemoteBan>>;

    /// Lift a ban.
    async fn remove_ban(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        reason: &str,
    ) -> Result<()>;

    /// Post a message to a channel.
    async fn create_message(&self, channel_id: Snowflake, message: &OutboundMessage) -> Result<()>;
}

/// Race a remote call against shutdown.
///
/// Dropping the call future aborts the in-flight request, so nothing after the
/// call (and therefore no local state change) runs once shutdown wins.
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ReconcileError::Cancelled),
        result = call => result,
    }
}

/// Where a scheduled event takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    StageInstance,
    Voice,
    External,
}

impl TryFrom<u8> for EntityType {
    type Error = ReconcileError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::StageInstance),
            2 => Ok(Self::Voice),
            3 => Ok(Self::External),
            other => Err(ReconcileError::UnexpectedValue {
                kind: "scheduled event entity type",
                value: other.to_string(),
            }),
        }
    }
}

/// Extra data for external events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub location: Option<String>,
}

/// Scheduled event as reported by Discord.
///
/// `status` and `entity_type` stay raw: Discord may add values this bot does
/// not know about, and decoding them is a per-event failure, not a parse
/// failure of the whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteScheduledEvent {
    pub id: Snowflake,
    pub guild_id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creator_id: Option<Snowflake>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    pub entity_type: u8,
    #[serde(default)]
    pub entity_metadata: Option<EntityMetadata>,
    pub status: u8,
    pub scheduled_start_time: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_end_time: Option<DateTime<Utc>>,
}

impl RemoteScheduledEvent {
    pub fn status(&self) -> Result<EventStatus> {
        EventStatus::try_from(self.status)
    }

    pub fn entity_type(&self) -> Result<EntityType> {
        EntityType::try_from(self.entity_type)
    }

    /// Location of an external event, if present and non-blank.
    pub fn location(&self) -> Option<&str> {
        self.entity_metadata
            .as_ref()
            .and_then(|meta| meta.location.as_deref())
            .map(str::trim)
            .filter(|location| !location.is_empty())
    }
}

/// Discord user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

/// Guild member as reported by Discord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMember {
    #[serde(default)]
    pub user: Option<RemoteUser>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

impl RemoteMember {
    /// Nickname, else global name, else username.
    pub fn display_name(&self) -> Option<&str> {
        if let Some(nick) = self.nick.as_deref() {
            return Some(nick);
        }
        let user = self.user.as_ref()?;
        Some(user.global_name.as_deref().unwrap_or(&user.username))
    }
}

/// Guild ban entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBan {
    #[serde(default)]
    pub reason: Option<String>,
    pub user: RemoteUser,
}

/// Partial member update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemberEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Snowflake>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
}

impl MemberEdit {
    pub fn roles(roles: Vec<Snowflake>) -> Self {
        Self {
            roles: Some(roles),
            nick: None,
        }
    }

    pub fn nick(nick: impl Into<String>) -> Self {
        Self {
            roles: None,
            nick: Some(nick.into()),
        }
    }
}

/// Rich embed attached to an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// Interactive button. Exactly one of `custom_id` or `url` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub custom_id: Option<String>,
    pub url: Option<String>,
}

/// A message ready to post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub embed: Option<Embed>,
    pub buttons: Vec<Button>,
    /// Roles allowed to be pinged by `content`.
    pub mention_roles: Vec<Snowflake>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    fn member(nick: Option<&str>, global: Option<&str>) -> RemoteMember {
        RemoteMember {
            user: Some(RemoteUser {
                id: Snowflake(1),
                username: "user_name".to_owned(),
                global_name: global.map(str::to_owned),
            }),
            nick: nick.map(str::to_owned),
            roles: Vec::new(),
        }
    }

    #[test]
    fn display_name_prefers_nick_then_global_then_username() {
        assert_eq!(member(Some("nick"), Some("global")).display_name(), Some("nick"));
        assert_eq!(member(None, Some("global")).display_name(), Some("global"));
        assert_eq!(member(None, None).display_name(), Some("user_name"));
    }

    #[test]
    fn scheduled_event_parses_discord_payload() {
        let event: RemoteScheduledEvent = serde_json::from_value(serde_json::json!({
            "id": "41",
            "guild_id": "1",
            "name": "Movie night",
            "creator_id": "7",
            "channel_id": null,
            "entity_type": 3,
            "entity_metadata": {"location": "  Cinema  "},
            "status": 1,
            "scheduled_start_time": "2026-01-01T20:00:00+00:00",
            "privacy_level": 2
        }))
        .unwrap();
        assert_eq!(event.status().unwrap(), EventStatus::Scheduled);
        assert_eq!(event.entity_type().unwrap(), EntityType::External);
        assert_eq!(event.location(), Some("Cinema"));
        assert_eq!(event.creator_id, Some(Snowflake(7)));
    }

    #[test]
    fn unknown_entity_type_is_a_contract_violation() {
        assert!(EntityType::try_from(0).unwrap_err().is_contract_violation());
    }

    #[test]
    fn member_edit_skips_unset_fields() {
        let json = serde_json::to_value(MemberEdit::nick("Bob")).unwrap();
        assert_eq!(json, serde_json::json!({"nick": "Bob"}));
        let json = serde_json::to_value(MemberEdit::roles(vec![Snowflake(2)])).unwrap();
        assert_eq!(json, serde_json::json!({"roles": ["2"]}));
    }

    #[tokio::test]
    async fn cancellable_prefers_shutdown() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellable_passes_results_through() {
        let cancel = CancellationToken::new();
        let value = cancellable(&cancel, async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
    }
}
