// Report submission - the ledger side of the moderation engine.
//
// This service handles:
// - Input validation and the per-user rate limit
// - Inserting the report under the (reporter, target) unique key
// - Running auto-suppression inside the same transaction
// - Alerting admins on the first pending report (after commit, best effort)

use super::moderation_error::ModerationError;
use super::moderation_models::{
    InsertOutcome, ModerationConfig, NewReport, Principal, ReportId, ReportTarget, UserId,
};
use super::moderation_store::{ModerationStore, ModerationTx};
use super::suppression::{AutoSuppressionEvaluator, SuppressionCheck, SuppressionOutcome};
use crate::core::clock::Clock;
use crate::core::notifications::{
    NotificationCategory, NotificationDraft, NotificationFanout, Topic, EVENT_CONTENT_CHANGED,
    EVENT_QUEUE_CHANGED,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

// ============================================================================
// RATE LIMIT PORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Sliding-window throttle for report submissions, supplied by infra.
pub trait ReportRateLimiter: Send + Sync {
    /// Record an attempt at `now` if it fits in the window.
    fn check(&self, user_id: UserId, now: DateTime<Utc>) -> RateDecision;
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created {
        report_id: ReportId,
        pending_count: u32,
        suppressed: bool,
        admin_alerted: bool,
    },
    AlreadyReported,
    RateLimited {
        retry_after_secs: u64,
    },
}

impl SubmitOutcome {
    /// For callers that treat anything but a new report as an error.
    pub fn into_result(self) -> Result<ReportId, ModerationError> {
        match self {
            SubmitOutcome::Created { report_id, .. } => Ok(report_id),
            SubmitOutcome::AlreadyReported => Err(ModerationError::Conflict(
                "you have already reported this item".to_string(),
            )),
            SubmitOutcome::RateLimited { retry_after_secs } => {
                Err(ModerationError::RateLimited { retry_after_secs })
            }
        }
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ReportService<S: ModerationStore> {
    store: Arc<S>,
    limiter: Arc<dyn ReportRateLimiter>,
    evaluator: AutoSuppressionEvaluator,
    fanout: Arc<NotificationFanout>,
    clock: Arc<dyn Clock>,
    max_reason_len: usize,
}

impl<S: ModerationStore> ReportService<S> {
    pub fn new(
        store: Arc<S>,
        limiter: Arc<dyn ReportRateLimiter>,
        fanout: Arc<NotificationFanout>,
        clock: Arc<dyn Clock>,
        config: &ModerationConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            evaluator: AutoSuppressionEvaluator::from_config(config),
            fanout,
            clock,
            max_reason_len: config.max_reason_len,
        }
    }

    fn validate_reason(&self, reason: &str) -> Result<String, ModerationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ModerationError::Validation("reason must not be empty".to_string()));
        }
        if reason.chars().count() > self.max_reason_len {
            return Err(ModerationError::Validation(format!(
                "reason must be at most {} characters",
                self.max_reason_len
            )));
        }
        Ok(reason.to_string())
    }

    /// Submit a report against a comment or a course.
    ///
    /// **Returns:**
    /// - `Created` with the fresh pending count and whether the item got hidden
    /// - `AlreadyReported` if this user already reported the target (safe client retry)
    /// - `RateLimited` without touching storage
    pub async fn submit(
        &self,
        reporter: Principal,
        target: ReportTarget,
        reason: &str,
    ) -> Result<SubmitOutcome, ModerationError> {
        let reason = self.validate_reason(reason)?;
        let now = self.clock.now();

        if let RateDecision::Limited { retry_after_secs } = self.limiter.check(reporter.user_id, now) {
            tracing::debug!(reporter = reporter.user_id, %target, "Report submission throttled");
            return Ok(SubmitOutcome::RateLimited { retry_after_secs });
        }

        let new_report = NewReport {
            reporter_id: reporter.user_id,
            target,
            reason,
            created_at: now,
        };

        // The insert goes first so the transaction holds the write lock while counting.
        let mut tx = self.store.begin().await?;
        let report = match tx.insert_report(&new_report).await? {
            InsertOutcome::Created(report) => report,
            InsertOutcome::Duplicate => {
                tracing::debug!(reporter = reporter.user_id, %target, "Duplicate report ignored");
                return Ok(SubmitOutcome::AlreadyReported);
            }
        };
        Self::ensure_target_exists(tx.as_mut(), target).await?;
        let check = self.evaluator.on_report_submitted(tx.as_mut(), target).await?;
        tx.commit().await?;

        tracing::info!(
            report_id = report.id,
            reporter = reporter.user_id,
            %target,
            pending = check.pending_count,
            "Report submitted"
        );

        self.after_commit(report.id, target, &check).await;

        Ok(SubmitOutcome::Created {
            report_id: report.id,
            pending_count: check.pending_count,
            suppressed: check.outcome == SuppressionOutcome::Suppressed,
            admin_alerted: check.admin_alert,
        })
    }

    async fn ensure_target_exists(
        tx: &mut dyn ModerationTx,
        target: ReportTarget,
    ) -> Result<(), ModerationError> {
        let exists = match target {
            ReportTarget::Content(id) => tx.get_content(id).await?.is_some(),
            ReportTarget::Course(id) => tx.get_course(id).await?.is_some(),
        };
        if exists {
            Ok(())
        } else {
            Err(ModerationError::not_found(target))
        }
    }

    /// Side effects of a committed submission. Nothing here can fail the submission.
    async fn after_commit(&self, report_id: ReportId, target: ReportTarget, check: &SuppressionCheck) {
        if check.admin_alert {
            let draft = NotificationDraft::new(
                NotificationCategory::ReportAlert,
                "New report to review",
                format!(
                    "A {} was reported and is waiting for review",
                    target.category().as_str().to_lowercase()
                ),
                serde_json::json!({
                    "report_id": report_id,
                    "category": target.category(),
                    "target_id": target.id(),
                }),
            );
            self.fanout.notify_admins(&draft).await;
        }

        if check.outcome == SuppressionOutcome::Suppressed {
            if let Some(lesson_id) = check.lesson_id {
                self.fanout
                    .push_event(
                        Topic::Room(lesson_id),
                        EVENT_CONTENT_CHANGED,
                        serde_json::json!({ "content_id": target.id() }),
                    )
                    .await;
            }
        }

        self.fanout
            .push_event(
                Topic::Admins,
                EVENT_QUEUE_CHANGED,
                serde_json::json!({ "report_id": report_id }),
            )
            .await;
    }
}
