// Audit snapshots - freeze a report, its target and the people involved into
// a plain value stored inline with the audit row.
//
// The snapshot must be inserted in the same transaction as the destructive
// step it documents, and before it.

use super::moderation_error::ModerationError;
use super::moderation_models::{
    AuditAction, AuditSnapshot, ContentItem, ContentSnapshot, Course, CourseSnapshot,
    NewAuditEntry, PersonSnapshot, Report, ReportTarget, Role, UserAccount, UserId,
};
use super::moderation_store::ModerationTx;
use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// Everything the snapshot is folded from. All references, no I/O.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotContext<'a> {
    pub admin_id: UserId,
    pub action: AuditAction,
    pub target: ReportTarget,
    pub report: Option<&'a Report>,
    pub content: Option<&'a ContentItem>,
    pub course: Option<&'a Course>,
    pub author: Option<&'a UserAccount>,
    pub reporter: Option<&'a UserAccount>,
    pub admin: Option<&'a UserAccount>,
    /// Admin-supplied reason; falls back to the report reason
    pub reason: Option<&'a str>,
    pub reports_resolved: u32,
    pub ban_expires_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub struct AuditSnapshotter;

impl AuditSnapshotter {
    /// Load the author, reporter and admin rows through `tx`, then build the entry.
    ///
    /// The entry is not persisted here; the caller inserts it in the same transaction.
    pub async fn capture(
        tx: &mut dyn ModerationTx,
        ctx: SnapshotContext<'_>,
    ) -> Result<NewAuditEntry, ModerationError> {
        let author_id = ctx
            .content
            .map(|c| c.author_id)
            .or(ctx.course.map(|c| c.owner_id));

        let author = match author_id {
            Some(id) => tx.get_user(id).await?,
            None => None,
        };
        let reporter = match ctx.report {
            Some(report) => tx.get_user(report.reporter_id).await?,
            None => None,
        };
        let admin = tx.get_user(ctx.admin_id).await?;

        Ok(Self::build(&SnapshotContext {
            author: author.as_ref(),
            reporter: reporter.as_ref(),
            admin: admin.as_ref(),
            ..ctx
        }))
    }

    /// Pure fold of the context into an audit entry.
    pub fn build(ctx: &SnapshotContext<'_>) -> NewAuditEntry {
        let reason = ctx
            .reason
            .map(str::to_string)
            .or_else(|| ctx.report.map(|r| r.reason.clone()))
            .unwrap_or_else(|| ctx.action.as_str().to_string());

        let admin = ctx.admin.map(PersonSnapshot::from).unwrap_or(PersonSnapshot {
            id: ctx.admin_id,
            display_name: format!("user#{}", ctx.admin_id),
            role: Role::Admin,
        });

        let ban_duration_days = match ctx.action {
            AuditAction::BanUser => Self::ban_duration_days(ctx.ban_expires_at, ctx.now),
            _ => None,
        };

        let snapshot = AuditSnapshot {
            reason,
            report_id: ctx.report.map(|r| r.id),
            report_reason: ctx.report.map(|r| r.reason.clone()),
            reported_at: ctx.report.map(|r| r.created_at),
            content: ctx.content.map(|c| ContentSnapshot {
                id: c.id,
                body: c.body.clone(),
                visibility: c.visibility,
                parent_id: c.parent_id,
                lesson_id: c.lesson_id,
                course_id: c.course_id,
                created_at: c.created_at,
            }),
            course: ctx.course.map(|c| CourseSnapshot {
                id: c.id,
                title: c.title.clone(),
                status: c.status,
            }),
            author: ctx.author.map(PersonSnapshot::from),
            reporter: ctx.reporter.map(PersonSnapshot::from),
            admin,
            reports_resolved: ctx.reports_resolved,
            ban_duration_days,
            ban_expires_at: match ctx.action {
                AuditAction::BanUser => ctx.ban_expires_at,
                _ => None,
            },
            created_at: ctx.now,
        };

        NewAuditEntry {
            admin_id: ctx.admin_id,
            category: ctx.target.category(),
            action: ctx.action,
            report_id: ctx.report.map(|r| r.id),
            target: ctx.target,
            snapshot,
            created_at: ctx.now,
        }
    }

    /// Whole days between `now` and the expiry, rounded up. Permanent bans have none.
    pub fn ban_duration_days(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<u32> {
        let seconds = (expires_at? - now).num_seconds().max(0);
        Some(((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY) as u32)
    }
}
