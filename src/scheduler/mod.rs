//! Tick scheduler driving the guild reconcilers.

pub mod runner;

pub use runner::{GuildOutcome, TickScheduler};
