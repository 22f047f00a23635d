// Resolution engine - applies an admin decision to a report's target.
//
// One resolution is one transaction:
//   claim report -> snapshot -> audit insert -> content/course change
//   -> bulk-resolve remaining reports -> ban
// Notifications and pushes happen only after the commit.

use super::audit_snapshot::{AuditSnapshotter, SnapshotContext};
use super::ban_service::BanLifecycleManager;
use super::moderation_error::ModerationError;
use super::moderation_models::{
    AuditAction, AuditEntryId, BanState, ContentItem, Course, CourseStatus, LessonId,
    ModerationConfig, Principal, Report, ReportId, ReportTarget, ResolutionAction, UserId,
    Visibility,
};
use super::moderation_store::{ModerationStore, ModerationTx};
use crate::core::clock::Clock;
use crate::core::notifications::{
    NotificationCategory, NotificationDraft, NotificationFanout, Topic, EVENT_CONTENT_CHANGED,
    EVENT_QUEUE_CHANGED,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

// ============================================================================
// OUTCOMES
// ============================================================================

/// What a committed resolution changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionSummary {
    pub audit_entry_id: AuditEntryId,
    pub action: AuditAction,
    pub target: ReportTarget,
    pub report_id: Option<ReportId>,
    pub reports_resolved: u32,
    /// Visibility after the resolution, for content targets
    pub visibility: Option<Visibility>,
    /// Status after the resolution, for course targets
    pub course_status: Option<CourseStatus>,
    pub ban: Option<BanState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionResult {
    Applied(ResolutionSummary),
    /// The report was handled by an earlier (or concurrent) resolution. Nothing changed.
    AlreadyResolved { report_id: ReportId },
}

impl ResolutionResult {
    /// For callers that need to know the report was already handled.
    pub fn into_result(self) -> Result<ResolutionSummary, ModerationError> {
        match self {
            ResolutionResult::Applied(summary) => Ok(summary),
            ResolutionResult::AlreadyResolved { report_id } => Err(ModerationError::Conflict(
                format!("report {} is already resolved", report_id),
            )),
        }
    }
}

/// Loaded target of a resolution.
enum Subject {
    Content(ContentItem),
    Course(Course),
}

/// Side effects to run once the transaction committed.
struct FollowUp {
    author_id: Option<UserId>,
    lesson_id: Option<LessonId>,
    visibility_changed: bool,
    course_title: Option<String>,
    reason: String,
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ResolutionEngine<S: ModerationStore> {
    store: Arc<S>,
    bans: Arc<BanLifecycleManager<S>>,
    fanout: Arc<NotificationFanout>,
    clock: Arc<dyn Clock>,
    max_reason_len: usize,
}

impl<S: ModerationStore> ResolutionEngine<S> {
    pub fn new(
        store: Arc<S>,
        bans: Arc<BanLifecycleManager<S>>,
        fanout: Arc<NotificationFanout>,
        clock: Arc<dyn Clock>,
        config: &ModerationConfig,
    ) -> Self {
        Self {
            store,
            bans,
            fanout,
            clock,
            max_reason_len: config.max_reason_len,
        }
    }

    /// Apply `action` to the report and everything else pending on its target.
    ///
    /// **Returns:**
    /// - `Applied` with the audit entry id and the new state
    /// - `AlreadyResolved` if the report was already handled (no audit entry, no notification)
    /// - `Err(Unauthorized)` before anything is touched if the caller is not an admin
    /// - `Err(NotFound)` / `Err(InvalidAction)` with the transaction rolled back
    pub async fn resolve(
        &self,
        principal: Principal,
        report_id: ReportId,
        action: ResolutionAction,
    ) -> Result<ResolutionResult, ModerationError> {
        self.authorize(principal)?;
        self.validate_action(&action)?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;

        // Claiming first takes the write lock and makes re-resolution a no-op.
        let claimed = tx.claim_pending_report(report_id, principal.user_id, now).await?;
        let report = tx
            .get_report(report_id)
            .await?
            .ok_or_else(|| ModerationError::not_found(format!("report {}", report_id)))?;
        if !claimed {
            tracing::debug!(report_id, "Report already resolved; nothing to do");
            return Ok(ResolutionResult::AlreadyResolved { report_id });
        }

        let category = report.target.category();
        if !action.is_valid_for(category) {
            return Err(ModerationError::InvalidAction {
                action: action.audit_action(),
                category,
            });
        }

        let summary = self
            .apply(tx, principal, Some(&report), report.target, &action, None, 1, now)
            .await?;
        Ok(ResolutionResult::Applied(summary))
    }

    /// Delete the reported content and ban its author in one step.
    pub async fn ban_with_delete(
        &self,
        principal: Principal,
        report_id: ReportId,
        reason: &str,
        duration_days: Option<u32>,
    ) -> Result<ResolutionResult, ModerationError> {
        self.resolve(
            principal,
            report_id,
            ResolutionAction::BanUser {
                reason: reason.to_string(),
                duration_days,
            },
        )
        .await
    }

    /// Admin action without an originating report: delete a comment or block a course.
    ///
    /// The audit entry carries a null report reference; pending reports on
    /// the target are resolved along the way.
    pub async fn direct_block(
        &self,
        principal: Principal,
        target: ReportTarget,
        reason: &str,
    ) -> Result<ResolutionSummary, ModerationError> {
        self.authorize(principal)?;
        let reason = self.validate_reason(reason)?;
        let action = match target {
            ReportTarget::Content(_) => ResolutionAction::DeleteContent,
            ReportTarget::Course(_) => ResolutionAction::BlockCourse,
        };
        let now = self.clock.now();

        let tx = self.store.begin().await?;
        self.apply(tx, principal, None, target, &action, Some(&reason), 0, now)
            .await
    }

    fn authorize(&self, principal: Principal) -> Result<(), ModerationError> {
        if principal.is_admin() {
            Ok(())
        } else {
            Err(ModerationError::Unauthorized)
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

    fn validate_action(&self, action: &ResolutionAction) -> Result<(), ModerationError> {
        if let ResolutionAction::BanUser { reason, duration_days } = action {
            self.validate_reason(reason)?;
            self.bans.validate_duration(*duration_days)?;
        }
        Ok(())
    }

    /// The shared transactional body of every resolution path. Consumes `tx`.
    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        mut tx: Box<dyn ModerationTx>,
        principal: Principal,
        report: Option<&Report>,
        target: ReportTarget,
        action: &ResolutionAction,
        direct_reason: Option<&str>,
        already_claimed: u32,
        now: DateTime<Utc>,
    ) -> Result<ResolutionSummary, ModerationError> {
        let subject = Self::load_subject(tx.as_mut(), target).await?;
        let (content, course) = match &subject {
            Subject::Content(content) => (Some(content), None),
            Subject::Course(course) => (None, Some(course)),
        };

        let (ban_reason, ban_expires_at) = match action {
            ResolutionAction::BanUser { reason, duration_days } => {
                let expires_at = BanLifecycleManager::<S>::expiry_from(now, *duration_days);
                (Some(reason.trim().to_string()), expires_at)
            }
            _ => (None, None),
        };

        // 1. Snapshot before anything destructive, same transaction.
        let still_pending = tx.count_pending_reports(target).await?;
        let audit_entry = AuditSnapshotter::capture(
            tx.as_mut(),
            SnapshotContext {
                admin_id: principal.user_id,
                action: action.audit_action(),
                target,
                report,
                content,
                course,
                author: None,
                reporter: None,
                admin: None,
                reason: ban_reason.as_deref().or(direct_reason),
                reports_resolved: already_claimed + still_pending,
                ban_expires_at,
                now,
            },
        )
        .await?;
        let audit_entry_id = tx.insert_audit_entry(&audit_entry).await?;

        // 2. Mutate the target.
        let mut visibility = content.map(|c| c.visibility);
        let mut course_status = course.map(|c| c.status);
        let mut visibility_changed = false;
        match (action, &subject) {
            (ResolutionAction::Ignore, Subject::Content(content)) => {
                if content.visibility == Visibility::Hidden {
                    tx.set_content_visibility(content.id, Visibility::Visible).await?;
                    visibility = Some(Visibility::Visible);
                    visibility_changed = true;
                }
            }
            (
                ResolutionAction::DeleteContent | ResolutionAction::BanUser { .. },
                Subject::Content(content),
            ) => {
                if content.visibility.can_transition_to(Visibility::Deleted) {
                    tx.set_content_visibility(content.id, Visibility::Deleted).await?;
                    visibility = Some(Visibility::Deleted);
                    visibility_changed = true;
                }
            }
            (ResolutionAction::BlockCourse, Subject::Course(course)) => {
                if course.status != CourseStatus::Blocked {
                    tx.set_course_status(course.id, CourseStatus::Blocked).await?;
                }
                course_status = Some(CourseStatus::Blocked);
            }
            (ResolutionAction::Ignore, Subject::Course(_)) => {}
            (action, _) => {
                return Err(ModerationError::InvalidAction {
                    action: action.audit_action(),
                    category: target.category(),
                });
            }
        }

        // 3. Close every other pending report on the target.
        let swept = tx.resolve_pending_reports(target, principal.user_id, now).await?;

        // 4. Ban through the lifecycle manager, still inside the transaction.
        let author_id = content.map(|c| c.author_id).or(course.map(|c| c.owner_id));
        let ban = match (&ban_reason, author_id) {
            (Some(reason), Some(author_id)) => Some(
                self.bans
                    .apply_ban_in(tx.as_mut(), author_id, reason, ban_expires_at, now)
                    .await?,
            ),
            _ => None,
        };

        tx.commit().await?;

        let reports_resolved = already_claimed + swept as u32;
        tracing::info!(
            audit_entry_id,
            admin_id = principal.user_id,
            action = %action.audit_action(),
            %target,
            reports_resolved,
            "Moderation decision applied"
        );

        let summary = ResolutionSummary {
            audit_entry_id,
            action: action.audit_action(),
            target,
            report_id: report.map(|r| r.id),
            reports_resolved,
            visibility,
            course_status,
            ban,
        };

        let follow_up = FollowUp {
            author_id,
            lesson_id: content.and_then(|c| c.lesson_id),
            visibility_changed,
            course_title: course.map(|c| c.title.clone()),
            reason: audit_entry.snapshot.reason.clone(),
        };
        self.after_commit(&summary, follow_up).await;

        Ok(summary)
    }

    async fn load_subject(
        tx: &mut dyn ModerationTx,
        target: ReportTarget,
    ) -> Result<Subject, ModerationError> {
        match target {
            ReportTarget::Content(id) => tx
                .get_content(id)
                .await?
                .map(Subject::Content)
                .ok_or_else(|| ModerationError::not_found(target)),
            ReportTarget::Course(id) => tx
                .get_course(id)
                .await?
                .map(Subject::Course)
                .ok_or_else(|| ModerationError::not_found(target)),
        }
    }

    /// Notifications and live pushes. Failures are logged inside the fanout.
    async fn after_commit(&self, summary: &ResolutionSummary, follow_up: FollowUp) {
        let target_id = summary.target.id();

        match (summary.action, follow_up.author_id) {
            (AuditAction::DeleteContent, Some(author_id)) if follow_up.visibility_changed => {
                let draft = NotificationDraft::new(
                    NotificationCategory::ContentRemoved,
                    "Your comment was removed",
                    format!("An administrator removed your comment. Reason: {}", follow_up.reason),
                    serde_json::json!({
                        "content_id": target_id,
                        "lesson_id": follow_up.lesson_id,
                    }),
                );
                self.fanout.notify(author_id, &draft).await;
            }
            (AuditAction::BanUser, Some(author_id)) => {
                let until = summary
                    .ban
                    .as_ref()
                    .and_then(|b| b.expires_at)
                    .map(|t| format!("until {}", t.format("%Y-%m-%d %H:%M UTC")))
                    .unwrap_or_else(|| "permanently".to_string());
                let draft = NotificationDraft::new(
                    NotificationCategory::AccountBanned,
                    "Your account has been suspended",
                    format!(
                        "Your comment was removed and your account is suspended {}. Reason: {}",
                        until, follow_up.reason
                    ),
                    serde_json::json!({
                        "content_id": target_id,
                        "expires_at": summary.ban.as_ref().and_then(|b| b.expires_at),
                    }),
                );
                self.fanout.notify(author_id, &draft).await;
                if let Some(ban) = &summary.ban {
                    self.bans.announce_ban(author_id, ban).await;
                }
            }
            (AuditAction::BlockCourse, Some(owner_id)) => {
                let title = follow_up.course_title.unwrap_or_default();
                let draft = NotificationDraft::new(
                    NotificationCategory::CourseBlocked,
                    "Your course has been blocked",
                    format!("\"{}\" was blocked by an administrator. Reason: {}", title, follow_up.reason),
                    serde_json::json!({ "course_id": target_id }),
                );
                self.fanout.notify(owner_id, &draft).await;
            }
            _ => {}
        }

        if follow_up.visibility_changed {
            if let Some(lesson_id) = follow_up.lesson_id {
                self.fanout
                    .push_event(
                        Topic::Room(lesson_id),
                        EVENT_CONTENT_CHANGED,
                        serde_json::json!({ "content_id": target_id }),
                    )
                    .await;
            }
        }

        self.fanout
            .push_event(
                Topic::Admins,
                EVENT_QUEUE_CHANGED,
                serde_json::json!({
                    "audit_entry_id": summary.audit_entry_id,
                    "action": summary.action,
                }),
            )
            .await;
    }
}
