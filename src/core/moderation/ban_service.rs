// Ban lifecycle - the only code that writes the ban columns of a user.
//
// Expiry is lazy: `is_effectively_banned` derives the status from the stored
// timestamp on every call and clears stale fields on the way. The periodic
// sweep does the same for users who never come back; it is an optimization.

use super::moderation_error::ModerationError;
use super::moderation_models::{BanState, ModerationConfig, Principal, Role, UserId};
use super::moderation_store::{ModerationStore, ModerationTx};
use crate::core::clock::Clock;
use crate::core::notifications::{
    NotificationCategory, NotificationDraft, NotificationFanout, Topic, EVENT_ACCOUNT_BANNED,
    EVENT_ACCOUNT_UNBANNED,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub struct BanLifecycleManager<S: ModerationStore> {
    store: Arc<S>,
    fanout: Arc<NotificationFanout>,
    clock: Arc<dyn Clock>,
    max_ban_days: u32,
}

impl<S: ModerationStore> BanLifecycleManager<S> {
    pub fn new(
        store: Arc<S>,
        fanout: Arc<NotificationFanout>,
        clock: Arc<dyn Clock>,
        config: &ModerationConfig,
    ) -> Self {
        Self {
            store,
            fanout,
            clock,
            max_ban_days: config.max_ban_days,
        }
    }

    pub fn validate_duration(&self, duration_days: Option<u32>) -> Result<(), ModerationError> {
        match duration_days {
            Some(0) => Err(ModerationError::Validation(
                "ban duration must be at least one day".to_string(),
            )),
            Some(days) if days > self.max_ban_days => Err(ModerationError::Validation(format!(
                "ban duration must be at most {} days",
                self.max_ban_days
            ))),
            _ => Ok(()),
        }
    }

    /// Expiry for a ban of `duration_days` starting now. `None` is permanent.
    pub fn expiry_for(&self, duration_days: Option<u32>) -> Option<DateTime<Utc>> {
        Self::expiry_from(self.clock.now(), duration_days)
    }

    /// Expiry for a ban of `duration_days` starting at `start`.
    pub fn expiry_from(start: DateTime<Utc>, duration_days: Option<u32>) -> Option<DateTime<Utc>> {
        duration_days.map(|days| start + Duration::days(i64::from(days)))
    }

    /// Write the ban inside the caller's transaction.
    ///
    /// Used by the resolution engine so the ban commits with the content
    /// deletion and the audit entry. A ban already in force at `now` that
    /// lasts at least as long is kept as is; the returned state is what is stored.
    pub async fn apply_ban_in(
        &self,
        tx: &mut dyn ModerationTx,
        user_id: UserId,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BanState, ModerationError> {
        let user = tx
            .get_user(user_id)
            .await?
            .ok_or_else(|| ModerationError::not_found(format!("user {}", user_id)))?;
        if user.role == Role::Admin {
            return Err(ModerationError::Validation("admins cannot be banned".to_string()));
        }

        if user.ban.is_effective_at(now) && outlasts(user.ban.expires_at, expires_at) {
            tracing::debug!(user_id, "Existing ban lasts longer; kept");
            return Ok(user.ban);
        }

        let ban = BanState::active(reason, expires_at);
        tx.write_ban(user_id, &ban).await?;
        Ok(ban)
    }

    /// Ban a user in its own transaction and kick any live session.
    pub async fn apply_ban(
        &self,
        user_id: UserId,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<BanState, ModerationError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let ban = self
            .apply_ban_in(tx.as_mut(), user_id, reason, expires_at, now)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id, expires_at = ?ban.expires_at, "User banned");
        self.announce_ban(user_id, &ban).await;
        Ok(ban)
    }

    /// Push the ban to connected sessions of the user. Best effort.
    pub async fn announce_ban(&self, user_id: UserId, ban: &BanState) {
        self.fanout
            .push_event(
                Topic::User(user_id),
                EVENT_ACCOUNT_BANNED,
                serde_json::json!({
                    "reason": ban.reason,
                    "expires_at": ban.expires_at,
                }),
            )
            .await;
    }

    /// Clear the ban columns. Lifting a ban that does not exist is a no-op.
    ///
    /// Returns whether anything was cleared.
    pub async fn lift_ban(&self, user_id: UserId) -> Result<bool, ModerationError> {
        let mut tx = self.store.begin().await?;
        let lifted = Self::clear_in(tx.as_mut(), user_id, None).await?;
        tx.commit().await?;

        if lifted {
            tracing::info!(user_id, "Ban lifted");
        }
        Ok(lifted)
    }

    /// Explicit admin unban: lift, then tell the user.
    pub async fn lift_ban_as(&self, principal: Principal, user_id: UserId) -> Result<bool, ModerationError> {
        if !principal.is_admin() {
            return Err(ModerationError::Unauthorized);
        }

        let lifted = self.lift_ban(user_id).await?;
        if lifted {
            let draft = NotificationDraft::new(
                NotificationCategory::AccountUnbanned,
                "Your account has been restored",
                "An administrator lifted the ban on your account.",
                serde_json::json!({ "user_id": user_id }),
            );
            self.fanout.notify(user_id, &draft).await;
            self.fanout
                .push_event(Topic::User(user_id), EVENT_ACCOUNT_UNBANNED, serde_json::json!({}))
                .await;
        }
        Ok(lifted)
    }

    /// Request-time ban check with lazy expiry.
    ///
    /// An expiry in the past means "not banned" whatever the stored flag says,
    /// and the stale columns are cleared before returning.
    pub async fn is_effectively_banned(&self, user_id: UserId) -> Result<bool, ModerationError> {
        let now = self.clock.now();
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ModerationError::not_found(format!("user {}", user_id)))?;

        if !user.ban.is_stale_at(now) {
            return Ok(user.ban.is_effective_at(now));
        }

        // Re-read under the transaction: a fresh ban applied meanwhile must survive and count.
        let mut tx = self.store.begin().await?;
        let Some(current) = tx.get_user(user_id).await? else {
            return Err(ModerationError::not_found(format!("user {}", user_id)));
        };
        if current.ban.is_stale_at(now) {
            tx.write_ban(user_id, &BanState::default()).await?;
            tx.commit().await?;
            tracing::info!(user_id, "Expired ban cleared on access");
            return Ok(false);
        }
        Ok(current.ban.is_effective_at(now))
    }

    /// Lift every ban whose expiry has passed. Safe to run alongside live traffic.
    pub async fn sweep_expired(&self) -> Result<u64, ModerationError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let expired = tx.list_expired_bans(now).await?;

        let mut cleared = 0u64;
        for user_id in expired {
            if Self::clear_in(tx.as_mut(), user_id, Some(now)).await? {
                cleared += 1;
            }
        }
        tx.commit().await?;

        if cleared > 0 {
            tracing::info!(cleared, "Ban expiry sweep finished");
        }
        Ok(cleared)
    }

    /// Clear the ban columns of `user_id`. With `only_if_stale_at`, only
    /// when the stored expiry is at or before that instant.
    async fn clear_in(
        tx: &mut dyn ModerationTx,
        user_id: UserId,
        only_if_stale_at: Option<DateTime<Utc>>,
    ) -> Result<bool, ModerationError> {
        let Some(user) = tx.get_user(user_id).await? else {
            return Ok(false);
        };
        if user.ban.is_clear() {
            return Ok(false);
        }
        if let Some(now) = only_if_stale_at {
            if !user.ban.is_stale_at(now) {
                return Ok(false);
            }
        }

        tx.write_ban(user_id, &BanState::default()).await?;
        Ok(true)
    }
}

/// Whether a ban ending at `current` lasts at least as long as one ending at `proposed`.
fn outlasts(current: Option<DateTime<Utc>>, proposed: Option<DateTime<Utc>>) -> bool {
    match (current, proposed) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(current), Some(proposed)) => current >= proposed,
    }
}
