//! Shared test utilities used across multiple test modules.
//!
//! [`MockGuildApi`] is a scripted in-memory Discord: tests seed events,
//! members and bans, choose which operations fail, then inspect the calls the
//! engine made.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::{ReconcileError, Result};
use crate::model::{EventStatus, Snowflake};
use crate::remote::{
    GuildApi, MemberEdit, OutboundMessage, RemoteBan, RemoteMember, RemoteScheduledEvent,
    RemoteUser,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Fixed point in time, `secs` after the Unix epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

/// Voice-channel event with a creator, ready to announce.
pub fn remote_event(
    guild_id: u64,
    id: u64,
    status: EventStatus,
    start: DateTime<Utc>,
) -> RemoteScheduledEvent {
    RemoteScheduledEvent {
        id: Snowflake(id),
        guild_id: Snowflake(guild_id),
        name: format!("event {id}"),
        description: None,
        creator_id: Some(Snowflake(900)),
        channel_id: Some(Snowflake(901)),
        entity_type: 2,
        entity_metadata: None,
        status: status.wire_value(),
        scheduled_start_time: start,
        scheduled_end_time: None,
    }
}

pub fn remote_member(user_id: u64, roles: &[u64], nick: Option<&str>) -> RemoteMember {
    RemoteMember {
        user: Some(RemoteUser {
            id: Snowflake(user_id),
            username: format!("user{user_id}"),
            global_name: None,
        }),
        nick: nick.map(str::to_owned),
        roles: roles.iter().copied().map(Snowflake).collect(),
    }
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    ListScheduledEvents(Snowflake),
    SetEventStatus {
        guild_id: Snowflake,
        event_id: Snowflake,
        status: EventStatus,
    },
    GetMember {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    ModifyMember {
        guild_id: Snowflake,
        user_id: Snowflake,
        edit: MemberEdit,
    },
    AddMemberRole {
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    },
    GetBan {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    RemoveBan {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    CreateMessage {
        channel_id: Snowflake,
        message: OutboundMessage,
    },
}

impl ApiCall {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::ListScheduledEvents(_) => "list_scheduled_events",
            Self::SetEventStatus { .. } => "set_scheduled_event_status",
            Self::GetMember { .. } => "get_member",
            Self::ModifyMember { .. } => "modify_member",
            Self::AddMemberRole { .. } => "add_member_role",
            Self::GetBan { .. } => "get_ban",
            Self::RemoveBan { .. } => "remove_ban",
            Self::CreateMessage { .. } => "create_message",
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ApiCall>,
    events: HashMap<Snowflake, Vec<RemoteScheduledEvent>>,
    members: HashMap<(Snowflake, Snowflake), RemoteMember>,
    bans: HashSet<(Snowflake, Snowflake)>,
    /// `(operation, scope)`; scope `None` fails everywhere. The scope is the
    /// guild id, or the channel id for `create_message`.
    failing: HashSet<(&'static str, Option<Snowflake>)>,
}

/// Scripted [`GuildApi`].
#[derive(Debug, Default)]
pub struct MockGuildApi {
    state: Mutex<MockState>,
}

impl MockGuildApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock")
    }

    pub fn set_events(&self, guild_id: u64, events: Vec<RemoteScheduledEvent>) {
        self.state().events.insert(Snowflake(guild_id), events);
    }

    pub fn set_member(&self, guild_id: u64, member: RemoteMember) {
        let user_id = member.user.as_ref().map(|u| u.id).expect("member has user");
        self.state()
            .members
            .insert((Snowflake(guild_id), user_id), member);
    }

    pub fn set_ban(&self, guild_id: u64, user_id: u64) {
        self.state()
            .bans
            .insert((Snowflake(guild_id), Snowflake(user_id)));
    }

    /// Make `operation` fail everywhere until [`Self::recover`].
    pub fn fail(&self, operation: &'static str) {
        self.state().failing.insert((operation, None));
    }

    /// Make `operation` fail only for one guild (or channel).
    pub fn fail_in(&self, operation: &'static str, scope: u64) {
        self.state()
            .failing
            .insert((operation, Some(Snowflake(scope))));
    }

    pub fn recover(&self, operation: &'static str) {
        self.state().failing.retain(|(op, _)| *op != operation);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Messages posted so far, in order.
    pub fn messages(&self) -> Vec<(Snowflake, OutboundMessage)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                ApiCall::CreateMessage {
                    channel_id,
                    message,
                } => Some((*channel_id, message.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall, scope: Snowflake) -> Result<()> {
        let mut state = self.state();
        let operation = call.operation();
        state.calls.push(call);
        if state.failing.contains(&(operation, None))
            || state.failing.contains(&(operation, Some(scope)))
        {
            return Err(ReconcileError::Remote {
                operation,
                status: 500,
                body: "scripted failure".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GuildApi for MockGuildApi {
    async fn list_scheduled_events(
        &self,
        guild_id: Snowflake,
    ) -> Result<Vec<RemoteScheduledEvent>> {
        self.record(ApiCall::ListScheduledEvents(guild_id), guild_id)?;
        Ok(self
            .state()
            .events
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_scheduled_event_status(
        &self,
        guild_id: Snowflake,
        event_id: Snowflake,
        status: EventStatus,
    ) -> Result<()> {
        self.record(
            ApiCall::SetEventStatus {
                guild_id,
                event_id,
                status,
            },
            guild_id,
        )
    }

    async fn get_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Option<RemoteMember>> {
        self.record(ApiCall::GetMember { guild_id, user_id }, guild_id)?;
        Ok(self.state().members.get(&(guild_id, user_id)).cloned())
    }

    async fn modify_member(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        edit: &MemberEdit,
    ) -> Result<()> {
        self.record(
            ApiCall::ModifyMember {
                guild_id,
                user_id,
                edit: edit.clone(),
            },
            guild_id,
        )
    }

    async fn add_member_role(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    ) -> Result<()> {
        self.record(
            ApiCall::AddMemberRole {
                guild_id,
                user_id,
                role_id,
            },
            guild_id,
        )
    }

    async fn get_ban(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<RemoteBan>> {
        self.record(ApiCall::GetBan { guild_id, user_id }, guild_id)?;
        let banned = self.state().bans.contains(&(guild_id, user_id));
        Ok(banned.then(|| RemoteBan {
            reason: None,
            user: RemoteUser {
                id: user_id,
                username: format!("user{user_id}"),
                global_name: None,
            },
        }))
    }

    async fn remove_ban(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
        _reason: &str,
    ) -> Result<()> {
        self.record(ApiCall::RemoveBan { guild_id, user_id }, guild_id)?;
        self.state().bans.remove(&(guild_id, user_id));
        Ok(())
    }

    async fn create_message(&self, channel_id: Snowflake, message: &OutboundMessage) -> Result<()> {
        self.record(
            ApiCall::CreateMessage {
                channel_id,
                message: message.clone(),
            },
            channel_id,
        )
    }
}
