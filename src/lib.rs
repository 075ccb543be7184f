//! guildkeeper: periodic reconciliation engine for a Discord community bot.
//!
//! Once per tick the [`scheduler::TickScheduler`] walks every tracked guild
//! and brings Discord in line with the bot's cached state:
//!
//! - **Scheduled events** ([`events`]): lifecycle announcements, autostart and
//!   early reminders
//! - **Members** ([`members`]): expiring bans and mutes, due reminders, the
//!   default role and hoisted nicknames
//!
//! Remote calls go through [`remote::GuildApi`]; cached state lives in a
//! [`store::GuildStore`]. Failures are collected per guild
//! ([`aggregate::ErrorAggregator`]) and never stop the loop.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod events;
pub mod members;
pub mod model;
pub mod moderation;
pub mod notify;
pub mod remote;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use aggregate::{AggregateError, ErrorAggregator};
pub use config::{BotConfig, GuildSettings};
pub use error::{ReconcileError, Result};
pub use model::{GuildContext, Snowflake};
