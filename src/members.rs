//! Per-member upkeep: expiring bans and mutes, due reminders, the default
//! role, and hoisted nicknames.

use crate::aggregate::{AggregateError, ErrorAggregator};
use crate::config::GuildSettings;
use crate::error::{ReconcileError, Result};
use crate::model::{GuildContext, MemberRecord, Snowflake};
use crate::moderation::ModerationGate;
use crate::notify::{Notification, Presenter};
use crate::remote::{GuildApi, MemberEdit, cancellable};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const UNBAN_REASON: &str = "Ban duration expired";

/// Whether `c` may lead a display name.
fn is_legal_lead(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, 'А'..='я' | 'Ё' | 'ё')
}

/// Strip leading characters that would hoist a member in the member list.
///
/// Returns `None` when the name already starts with a letter or digit. A name
/// that is nothing but symbols or whitespace is replaced by a random entry
/// from `pool` (`None` if the pool is empty).
pub fn sanitize_nickname<R: Rng + ?Sized>(
    name: &str,
    rng: &mut R,
    pool: &[String],
) -> Option<String> {
    let stripped = name.trim_start_matches(|c: char| !is_legal_lead(c));
    if stripped.len() == name.len() {
        return None;
    }
    if stripped.trim().is_empty() {
        return pool.choose(rng).cloned();
    }
    Some(stripped.to_owned())
}

pub struct MemberReconciler {
    api: Arc<dyn GuildApi>,
    presenter: Arc<dyn Presenter>,
    gate: Arc<dyn ModerationGate>,
    fallback_names: Vec<String>,
    rng: Mutex<StdRng>,
}

impl MemberReconciler {
    pub fn new(
        api: Arc<dyn GuildApi>,
        presenter: Arc<dyn Presenter>,
        gate: Arc<dyn ModerationGate>,
        fallback_names: Vec<String>,
    ) -> Self {
        Self {
            api,
            presenter,
            gate,
            fallback_names,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the random source used for fallback nicknames.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Run one pass over every cached member of `guild`, in id order.
    ///
    /// # Errors
    ///
    /// Every failed step of every member, aggregated.
    pub async fn reconcile(
        &self,
        guild: &mut GuildContext,
        settings: &GuildSettings,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), AggregateError> {
        let mut errors = ErrorAggregator::new();
        let guild_id = guild.id;

        let mut ids: Vec<Snowflake> = guild.members.keys().copied().collect();
        ids.sort_unstable();

        for user_id in ids {
            if cancel.is_cancelled() {
                errors.push(ReconcileError::Cancelled);
                break;
            }
            let Some(member) = guild.members.get_mut(&user_id) else {
                continue;
            };
            let mut member_errors = ErrorAggregator::new();
            self.reconcile_member(guild_id, member, settings, now, cancel, &mut member_errors)
                .await;
            if let Err(failures) = member_errors.finish() {
                for cause in failures.causes() {
                    log_member_failure(guild_id, user_id, cause);
                }
                errors.absorb(Err(failures));
            }
        }

        errors.finish()
    }

    async fn reconcile_member(
        &self,
        guild_id: Snowflake,
        member: &mut MemberRecord,
        settings: &GuildSettings,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        errors: &mut ErrorAggregator,
    ) {
        let user_id = member.id;

        if member.banned_until.is_some_and(|until| until <= now) {
            errors.capture(self.lift_ban(guild_id, member, cancel).await);
        }

        let live = match cancellable(cancel, self.api.get_member(guild_id, user_id)).await {
            Ok(Some(live)) => live,
            Ok(None) => return,
            Err(e) => {
                errors.push(e);
                return;
            }
        };

        let can_enforce = errors
            .capture(self.gate.can_enforce(guild_id, user_id).await)
            .unwrap_or(false);

        if member.muted_until.is_none() {
            member.roles.clone_from(&live.roles);
        }

        for index in (0..member.reminders.len()).rev() {
            if member.reminders[index].due_at > now {
                continue;
            }
            let reminder = member.reminders[index].clone();
            let channel_id = reminder.channel_id;
            let notification = Notification::ReminderDue {
                guild_id,
                user_id,
                reminder,
            };
            let message = self.presenter.render(&notification, settings);
            if errors
                .capture(cancellable(cancel, self.api.create_message(channel_id, &message)).await)
                .is_some()
            {
                member.reminders.remove(index);
                debug!(guild = %guild_id, user = %user_id, "reminder delivered");
            }
        }

        if !can_enforce {
            return;
        }

        let mut current_roles = live.roles.clone();
        if member.muted_until.is_some_and(|until| until <= now) {
            let edit = MemberEdit::roles(member.roles.clone());
            let restored =
                cancellable(cancel, self.api.modify_member(guild_id, user_id, &edit)).await;
            if errors.capture(restored).is_some() {
                member.muted_until = None;
                current_roles.clone_from(&member.roles);
                info!(guild = %guild_id, user = %user_id, "mute expired, roles restored");
            }
        }

        if let Some(role_id) = settings.default_role {
            if !current_roles.contains(&role_id) {
                errors.capture(
                    cancellable(cancel, self.api.add_member_role(guild_id, user_id, role_id))
                        .await,
                );
            }
        }

        if !settings.rename_hoisted_users {
            return;
        }
        if let Some(replacement) = live.display_name().and_then(|name| self.sanitized(name)) {
            let edit = MemberEdit::nick(replacement.clone());
            let renamed =
                cancellable(cancel, self.api.modify_member(guild_id, user_id, &edit)).await;
            if errors.capture(renamed).is_some() {
                info!(
                    guild = %guild_id,
                    user = %user_id,
                    nick = %replacement,
                    "hoisted name replaced"
                );
            }
        }
    }

    /// Clear an elapsed ban, unbanning only if Discord still has one.
    async fn lift_ban(
        &self,
        guild_id: Snowflake,
        member: &mut MemberRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let user_id = member.id;
        let ban = cancellable(cancel, self.api.get_ban(guild_id, user_id)).await?;
        if ban.is_some() {
            cancellable(cancel, self.api.remove_ban(guild_id, user_id, UNBAN_REASON)).await?;
            info!(guild = %guild_id, user = %user_id, "ban expired, user unbanned");
        } else {
            debug!(guild = %guild_id, user = %user_id, "ban already lifted");
        }
        member.banned_until = None;
        Ok(())
    }

    fn sanitized(&self, name: &str) -> Option<String> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        sanitize_nickname(name, &mut *rng, &self.fallback_names)
    }
}

fn log_member_failure(guild_id: Snowflake, user_id: Snowflake, err: &ReconcileError) {
    if err.is_contract_violation() {
        error!(guild = %guild_id, user = %user_id, "member upkeep failed: {err}");
    } else {
        warn!(guild = %guild_id, user = %user_id, "member upkeep failed: {err}");
    }
}
