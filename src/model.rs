//! Cached per-guild state the engine reconciles against Discord.
//!
//! A [`GuildContext`] is owned by the data store. The scheduler locks it for
//! one guild tick at a time, so every mutation here happens with a single
//! writer.

use crate::config::GuildSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Discord snowflake id.
///
/// Serialized as a string (the Discord wire form); deserializes from either a
/// string or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(pub u64);

impl Snowflake {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl serde::de::Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake id as a string or integer")
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(value))
            }

            fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Snowflake, E> {
                u64::try_from(value)
                    .map(Snowflake)
                    .map_err(|_| E::custom(format!("negative snowflake: {value}")))
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Snowflake, E> {
                value
                    .parse()
                    .map_err(|_| E::custom(format!("invalid snowflake: {value}")))
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// Lifecycle state of a guild scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Active,
    Completed,
    Canceled,
}

impl EventStatus {
    /// Discord wire value.
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::Scheduled => 1,
            Self::Active => 2,
            Self::Completed => 3,
            Self::Canceled => 4,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

impl TryFrom<u8> for EventStatus {
    type Error = crate::ReconcileError;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            1 => Ok(Self::Scheduled),
            2 => Ok(Self::Active),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Canceled),
            other => Err(crate::ReconcileError::UnexpectedValue {
                kind: "scheduled event status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

/// Cached view of one remote scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEventRecord {
    pub id: Snowflake,
    pub name: String,
    pub status: EventStatus,
    pub scheduled_start_time: DateTime<Utc>,
    /// Set the first time the event is observed active.
    #[serde(default)]
    pub actual_start_time: Option<DateTime<Utc>>,
    /// Once set, never reverts.
    #[serde(default)]
    pub early_notification_sent: bool,
    /// A status notification is pending and has not been confirmed sent.
    #[serde(default)]
    pub dirty: bool,
}

impl ScheduledEventRecord {
    /// Record for a freshly observed event. It starts dirty so the matching
    /// lifecycle notification goes out on the next dispatch.
    pub fn new(
        id: Snowflake,
        name: impl Into<String>,
        scheduled_start_time: DateTime<Utc>,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            status,
            scheduled_start_time,
            actual_start_time: (status == EventStatus::Active).then_some(now),
            early_notification_sent: false,
            dirty: true,
        }
    }

    /// The event vanished from the remote list: it either ran to completion or
    /// was canceled. Returns `true` when this call changed the record.
    pub fn observe_missing(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = if self.actual_start_time.is_some() {
            EventStatus::Completed
        } else {
            EventStatus::Canceled
        };
        self.dirty = true;
        true
    }

    /// Adopt a status observed remotely. Returns `true` on a transition.
    pub fn observe_status(&mut self, status: EventStatus, now: DateTime<Utc>) -> bool {
        if status == self.status {
            return false;
        }
        self.status = status;
        if status == EventStatus::Active && self.actual_start_time.is_none() {
            self.actual_start_time = Some(now);
        }
        self.dirty = true;
        true
    }
}

/// Pointer to the message a reminder was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
}

impl MessageRef {
    pub fn jump_url(&self, guild_id: Snowflake) -> String {
        format!(
            "https://discord.com/channels/{guild_id}/{}/{}",
            self.channel_id, self.message_id
        )
    }
}

/// A reminder a member asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub text: String,
    pub due_at: DateTime<Utc>,
    pub channel_id: Snowflake,
    pub origin: MessageRef,
}

/// Cached moderation and reminder state for one member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: Snowflake,
    /// Role snapshot. Frozen while muted so unmuting restores it.
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub banned_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub muted_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
}

impl MemberRecord {
    pub fn new(id: Snowflake) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Everything the bot caches about one guild.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildContext {
    pub id: Snowflake,
    #[serde(default)]
    pub settings: GuildSettings,
    #[serde(default)]
    pub scheduled_events: HashMap<Snowflake, ScheduledEventRecord>,
    #[serde(default)]
    pub members: HashMap<Snowflake, MemberRecord>,
}

impl GuildContext {
    pub fn new(id: Snowflake) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Member record for `id`, created empty if unknown.
    pub fn member_mut(&mut self, id: Snowflake) -> &mut MemberRecord {
        self.members
            .entry(id)
            .or_insert_with(|| MemberRecord::new(id))
    }
}
