//! Scheduler background loop.
//!
//! Every tick fans out one task per tracked guild and waits for the whole wave
//! before the next tick. A guild's failures are logged and dropped; they never
//! reach the other guilds or the loop itself.

use crate::aggregate::{AggregateError, ErrorAggregator};
use crate::error::ReconcileError;
use crate::events::EventReconciler;
use crate::members::MemberReconciler;
use crate::model::Snowflake;
use crate::store::GuildStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one guild's pass within a wave.
#[derive(Debug)]
pub struct GuildOutcome {
    pub guild_id: Snowflake,
    pub result: Result<(), AggregateError>,
}

impl GuildOutcome {
    /// One-line description of the failures, `None` for a clean pass.
    ///
    /// Shutdown interruptions are not counted as failures.
    pub fn summary(&self) -> Option<String> {
        let Err(failures) = &self.result else {
            return None;
        };
        let causes = failures.causes();
        let cancelled = causes
            .iter()
            .filter(|cause| matches!(cause, ReconcileError::Cancelled))
            .count();
        let violations = causes
            .iter()
            .filter(|cause| cause.is_contract_violation())
            .count();
        let failed = causes.len() - cancelled;

        let mut summary = match failed {
            0 => "interrupted by shutdown".to_owned(),
            1 => "1 failure".to_owned(),
            n => format!("{n} failures"),
        };
        if violations > 0 {
            summary.push_str(&format!(", {violations} contract violation(s)"));
        }
        Some(summary)
    }

    // Causes are logged where they happen, with entity context; this is the
    // per-guild rollup.
    fn log(&self) {
        let Some(summary) = self.summary() else {
            debug!(guild = %self.guild_id, "guild pass clean");
            return;
        };
        let Err(failures) = &self.result else {
            return;
        };
        let causes = failures.causes();
        if causes.iter().all(|c| matches!(c, ReconcileError::Cancelled)) {
            debug!(guild = %self.guild_id, "guild pass {summary}");
        } else if causes.iter().any(ReconcileError::is_contract_violation) {
            error!(guild = %self.guild_id, "guild pass finished with {summary}");
        } else {
            warn!(guild = %self.guild_id, "guild pass finished with {summary}");
        }
    }
}

/// Capture a store failure, logging it with the step that failed.
fn capture_store<T>(
    errors: &mut ErrorAggregator,
    guild_id: Snowflake,
    step: &str,
    result: crate::Result<T>,
) -> Option<T> {
    if let Err(e) = &result {
        warn!(guild = %guild_id, "{step} failed: {e}");
    }
    errors.capture(result)
}

/// Everything one guild pass needs, shared by the wave's tasks.
struct GuildPass {
    store: Arc<dyn GuildStore>,
    events: EventReconciler,
    members: MemberReconciler,
}

impl GuildPass {
    async fn run(
        &self,
        guild_id: Snowflake,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), AggregateError> {
        let mut errors = ErrorAggregator::new();

        // Settings and flush take the guild lock themselves.
        let settings = self.store.settings(guild_id).await;
        let Some(settings) = capture_store(&mut errors, guild_id, "settings lookup", settings)
        else {
            return errors.finish();
        };
        let shared = self.store.guild(guild_id).await;
        let Some(shared) = capture_store(&mut errors, guild_id, "guild lookup", shared) else {
            return errors.finish();
        };

        {
            let mut guild = shared.lock().await;
            errors.absorb(self.events.reconcile(&mut guild, &settings, now, cancel).await);
            errors.absorb(self.members.reconcile(&mut guild, &settings, now, cancel).await);
        }

        let flushed = self.store.flush(guild_id).await;
        capture_store(&mut errors, guild_id, "flush", flushed);
        errors.finish()
    }
}

/// Periodic driver for every tracked guild.
pub struct TickScheduler {
    pass: Arc<GuildPass>,
    interval: Duration,
}

impl TickScheduler {
    pub fn new(
        store: Arc<dyn GuildStore>,
        events: EventReconciler,
        members: MemberReconciler,
        interval: Duration,
    ) -> Self {
        Self {
            pass: Arc::new(GuildPass {
                store,
                events,
                members,
            }),
            interval,
        }
    }

    /// Run one wave at `now`: every tracked guild, concurrently, to
    /// completion. Outcomes come back sorted by guild id.
    ///
    /// On cancellation the wave's tasks are aborted and only the outcomes
    /// collected so far are returned.
    pub async fn tick_once(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<GuildOutcome> {
        let guild_ids = match self.pass.store.tracked_guilds().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("cannot list tracked guilds: {e}");
                return Vec::new();
            }
        };

        let mut wave = JoinSet::new();
        for guild_id in guild_ids {
            let pass = Arc::clone(&self.pass);
            let cancel = cancel.clone();
            wave.spawn(async move {
                let result = pass.run(guild_id, now, &cancel).await;
                GuildOutcome { guild_id, result }
            });
        }

        let mut outcomes = Vec::with_capacity(wave.len());
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    wave.abort_all();
                    break;
                }
                joined = wave.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        outcome.log();
                        outcomes.push(outcome);
                    }
                    Some(Err(e)) if e.is_panic() => error!("guild task panicked: {e}"),
                    Some(Err(_)) => {}
                    None => break,
                },
            }
        }

        outcomes.sort_by_key(|outcome| outcome.guild_id);
        outcomes
    }

    /// Tick until `cancel` fires. Slow waves delay the next tick; missed
    /// ticks are skipped.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let outcomes = self.tick_once(Utc::now(), &cancel).await;
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            debug!(guilds = outcomes.len(), failed, "tick finished");
        }

        info!("scheduler stopped");
    }

    /// Spawn [`Self::run`] on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
