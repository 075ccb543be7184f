//! Scheduled event lifecycle reconciliation.
//!
//! Each pass lists the guild's events from Discord, folds what it sees into
//! the cached [`ScheduledEventRecord`]s, and then walks every record:
//!
//! - a dirty record gets exactly one lifecycle notification (created,
//!   started, completed or canceled); `dirty` clears only once the send
//!   succeeded, and terminal records are dropped at that point;
//! - a clean record gets the tick policy: autostart at the scheduled time,
//!   then the once-only early notification.
//!
//! Nothing local changes before the matching remote call succeeded, so a
//! failed or cancelled call is simply retried by the next tick.

use crate::aggregate::{AggregateError, ErrorAggregator};
use crate::config::GuildSettings;
use crate::error::{ReconcileError, Result};
use crate::model::{EventStatus, GuildContext, ScheduledEventRecord, Snowflake};
use crate::notify::{EventDetails, Notification, Presenter};
use crate::remote::{GuildApi, RemoteScheduledEvent, cancellable};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one record during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// Notification sent (or suppressed because no channel is configured).
    Delivered,
    /// Terminal notification delivered; drop the record.
    Finished,
}

/// Drives scheduled event records for one guild at a time.
pub struct EventReconciler {
    api: Arc<dyn GuildApi>,
    presenter: Arc<dyn Presenter>,
}

impl EventReconciler {
    pub fn new(api: Arc<dyn GuildApi>, presenter: Arc<dyn Presenter>) -> Self {
        Self { api, presenter }
    }

    /// Run one pass over `guild`.
    ///
    /// # Errors
    ///
    /// Every per-event failure, aggregated. A failed list fetch ends the pass
    /// early since there is nothing to compare against.
    pub async fn reconcile(
        &self,
        guild: &mut GuildContext,
        settings: &GuildSettings,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), AggregateError> {
        let mut errors = ErrorAggregator::new();
        let guild_id = guild.id;

        let listed = cancellable(cancel, self.api.list_scheduled_events(guild_id)).await;
        let remote_events = match listed {
            Ok(events) => events,
            Err(e) => {
                warn!(guild = %guild_id, "cannot list scheduled events: {e}");
                errors.push(e);
                return errors.finish();
            }
        };

        let remote_by_id: HashMap<Snowflake, &RemoteScheduledEvent> =
            remote_events.iter().map(|event| (event.id, event)).collect();

        let undecodable = observe(guild, &remote_events, now, &mut errors);

        let mut ids: Vec<Snowflake> = guild.scheduled_events.keys().copied().collect();
        ids.sort_unstable();

        for event_id in ids {
            if cancel.is_cancelled() {
                errors.push(ReconcileError::Cancelled);
                break;
            }
            // Already reported by `observe`; leave the record as it is.
            if undecodable.contains(&event_id) {
                continue;
            }
            let Some(record) = guild.scheduled_events.get_mut(&event_id) else {
                continue;
            };
            let remote = remote_by_id.get(&event_id).copied();

            if record.dirty {
                match self
                    .dispatch(guild_id, record, remote, settings, now, cancel)
                    .await
                {
                    Ok(Dispatch::Finished) => {
                        guild.scheduled_events.remove(&event_id);
                        continue;
                    }
                    Ok(Dispatch::Delivered) => {}
                    Err(e) => {
                        log_event_failure(guild_id, event_id, "status notification", &e);
                        errors.push(e);
                        continue;
                    }
                }
            }

            let Some(remote) = remote else {
                continue;
            };
            if let Err(e) = self
                .tick(guild_id, record, remote, settings, now, cancel)
                .await
            {
                log_event_failure(guild_id, event_id, "event tick", &e);
                errors.push(e);
            }
        }

        errors.finish()
    }

    /// Send the notification matching the record's status.
    async fn dispatch(
        &self,
        guild_id: Snowflake,
        record: &mut ScheduledEventRecord,
        remote: Option<&RemoteScheduledEvent>,
        settings: &GuildSettings,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Dispatch> {
        let live_details = || -> Result<EventDetails> {
            let remote = remote.ok_or_else(|| ReconcileError::MissingField {
                entity: format!("scheduled event {}", record.id),
                field: "remote event",
            })?;
            EventDetails::from_remote(remote)
        };

        let (notification, outcome) = match record.status {
            EventStatus::Scheduled => (
                Notification::EventCreated(live_details()?),
                Dispatch::Delivered,
            ),
            EventStatus::Active => (
                Notification::EventStarted(live_details()?),
                Dispatch::Delivered,
            ),
            EventStatus::Completed => (
                Notification::EventCompleted {
                    guild_id,
                    event_id: record.id,
                    name: record.name.clone(),
                    actual_start_time: record.actual_start_time,
                    ended_at: now,
                },
                Dispatch::Finished,
            ),
            EventStatus::Canceled => (
                Notification::EventCanceled {
                    guild_id,
                    event_id: record.id,
                    name: record.name.clone(),
                },
                Dispatch::Finished,
            ),
        };

        self.send(&notification, settings, cancel).await?;
        record.dirty = false;
        debug!(
            guild = %guild_id,
            event = %record.id,
            status = %record.status,
            "scheduled event notification delivered"
        );
        Ok(outcome)
    }

    /// Autostart, then the early notification. Only called for clean records.
    async fn tick(
        &self,
        guild_id: Snowflake,
        record: &mut ScheduledEventRecord,
        remote: &RemoteScheduledEvent,
        settings: &GuildSettings,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let remote_status = remote.status()?;

        if settings.autostart_events
            && now >= remote.scheduled_start_time
            && remote_status == EventStatus::Scheduled
        {
            // The local record flips to Active once a later list shows it.
            cancellable(
                cancel,
                self.api
                    .set_scheduled_event_status(guild_id, record.id, EventStatus::Active),
            )
            .await?;
            info!(guild = %guild_id, event = %record.id, "scheduled event autostarted");
            return Ok(());
        }

        let Some(offset) = settings.early_notification_offset() else {
            return Ok(());
        };
        if record.early_notification_sent
            || record.status != EventStatus::Scheduled
            || now < record.scheduled_start_time - offset
        {
            return Ok(());
        }

        let details = EventDetails::from_remote(remote)?;
        self.send(&Notification::EventStartingSoon(details), settings, cancel)
            .await?;
        record.early_notification_sent = true;
        debug!(guild = %guild_id, event = %record.id, "early event notification delivered");
        Ok(())
    }

    async fn send(
        &self,
        notification: &Notification,
        settings: &GuildSettings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(channel_id) = settings.event_notification_channel else {
            return Ok(());
        };
        let message = self.presenter.render(notification, settings);
        cancellable(cancel, self.api.create_message(channel_id, &message)).await
    }
}

/// Fold the remote list into the cache: vanished events become terminal,
/// status changes are adopted, unseen live events get new records.
///
/// Returns the cached ids whose remote status could not be decoded.
fn observe(
    guild: &mut GuildContext,
    remote_events: &[RemoteScheduledEvent],
    now: DateTime<Utc>,
    errors: &mut ErrorAggregator,
) -> HashSet<Snowflake> {
    let guild_id = guild.id;
    let mut undecodable = HashSet::new();

    for record in guild.scheduled_events.values_mut() {
        let Some(remote) = remote_events.iter().find(|event| event.id == record.id) else {
            if record.observe_missing() {
                info!(
                    guild = %guild_id,
                    event = %record.id,
                    status = %record.status,
                    "scheduled event left the remote list"
                );
            }
            continue;
        };

        record.name.clone_from(&remote.name);
        record.scheduled_start_time = remote.scheduled_start_time;
        match remote.status() {
            Ok(status) => {
                if record.observe_status(status, now) {
                    info!(
                        guild = %guild_id,
                        event = %record.id,
                        %status,
                        "scheduled event status changed"
                    );
                }
            }
            Err(e) => {
                log_event_failure(guild_id, record.id, "status decode", &e);
                errors.push(e);
                undecodable.insert(record.id);
            }
        }
    }

    for remote in remote_events {
        if guild.scheduled_events.contains_key(&remote.id) {
            continue;
        }
        match remote.status() {
            // Already announced and dropped; Discord may keep listing it a while.
            Ok(status) if status.is_terminal() => {}
            Ok(status) => {
                debug!(guild = %guild_id, event = %remote.id, "tracking new scheduled event");
                guild.scheduled_events.insert(
                    remote.id,
                    ScheduledEventRecord::new(
                        remote.id,
                        remote.name.clone(),
                        remote.scheduled_start_time,
                        status,
                        now,
                    ),
                );
            }
            Err(e) => {
                log_event_failure(guild_id, remote.id, "status decode", &e);
                errors.push(e);
            }
        }
    }

    undecodable
}

fn log_event_failure(
    guild_id: Snowflake,
    event_id: Snowflake,
    step: &str,
    err: &ReconcileError,
) {
    if err.is_contract_violation() {
        error!(guild = %guild_id, event = %event_id, "{step} failed: {err}");
    } else {
        warn!(guild = %guild_id, event = %event_id, "{step} failed: {err}");
    }
}
