// Storage ports for the moderation engine.
//
// The core defines WHAT it needs; `infra` provides SQLite and in-memory versions.
// Writes go through a `ModerationTx` so a resolution's snapshot, content change,
// report bulk-update and ban land together or not at all.

use super::moderation_error::ModerationError;
use super::moderation_models::{
    AuditEntry, AuditEntryId, BanState, ContentId, ContentItem, Course, CourseId, CourseStatus,
    InsertOutcome, NewAuditEntry, NewComment, NewReport, Report, ReportCategory, ReportId,
    ReportTarget, UserAccount, UserId, Visibility,
};
use super::query_service::{
    AuditFilter, AuditSummary, Page, PageRequest, PendingSummary, QueueEntry, QueueFilter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A unit of work. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait ModerationTx: Send {
    /// Insert a report, relying on the (reporter, target) unique key for duplicates.
    async fn insert_report(&mut self, report: &NewReport) -> Result<InsertOutcome, ModerationError>;

    async fn get_report(&mut self, report_id: ReportId) -> Result<Option<Report>, ModerationError>;

    /// Flip one report from PENDING to RESOLVED. Returns false if it was not pending
    /// (missing or already handled). Used first in a resolution so the write lock
    /// is taken before anything is read.
    async fn claim_pending_report(
        &mut self,
        report_id: ReportId,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, ModerationError>;

    async fn count_pending_reports(&mut self, target: ReportTarget) -> Result<u32, ModerationError>;

    /// Mark every PENDING report on `target` as RESOLVED. Returns rows changed.
    async fn resolve_pending_reports(
        &mut self,
        target: ReportTarget,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<u64, ModerationError>;

    async fn get_content(&mut self, content_id: ContentId)
        -> Result<Option<ContentItem>, ModerationError>;

    async fn set_content_visibility(
        &mut self,
        content_id: ContentId,
        visibility: Visibility,
    ) -> Result<(), ModerationError>;

    async fn get_course(&mut self, course_id: CourseId) -> Result<Option<Course>, ModerationError>;

    async fn set_course_status(
        &mut self,
        course_id: CourseId,
        status: CourseStatus,
    ) -> Result<(), ModerationError>;

    async fn get_user(&mut self, user_id: UserId) -> Result<Option<UserAccount>, ModerationError>;

    /// Overwrite the ban columns of a user. Only the ban lifecycle manager calls this.
    async fn write_ban(&mut self, user_id: UserId, ban: &BanState) -> Result<(), ModerationError>;

    /// Users whose stored expiry is at or before `now`.
    async fn list_expired_bans(&mut self, now: DateTime<Utc>) -> Result<Vec<UserId>, ModerationError>;

    async fn insert_audit_entry(&mut self, entry: &NewAuditEntry)
        -> Result<AuditEntryId, ModerationError>;

    /// Delete RESOLVED reports of `category` that an audit entry already covers.
    async fn purge_resolved_reports(&mut self, category: ReportCategory)
        -> Result<u64, ModerationError>;

    async fn commit(self: Box<Self>) -> Result<(), ModerationError>;
}

/// Trait for persisting moderation state.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ModerationTx>, ModerationError>;

    /// Content-identity lookup (author, thread root, lesson/course path).
    async fn get_content(&self, content_id: ContentId) -> Result<Option<ContentItem>, ModerationError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserAccount>, ModerationError>;

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, ModerationError>;

    async fn reports_for_target(&self, target: ReportTarget) -> Result<Vec<Report>, ModerationError>;

    /// PENDING reports, newest first.
    async fn pending_queue(
        &self,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>, ModerationError>;

    async fn pending_summary(&self) -> Result<PendingSummary, ModerationError>;

    /// Audit log, newest first.
    async fn audit_log(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEntry>, ModerationError>;

    async fn get_audit_entry(&self, id: AuditEntryId) -> Result<Option<AuditEntry>, ModerationError>;

    async fn audit_summary(&self, today_start: DateTime<Utc>) -> Result<AuditSummary, ModerationError>;
}

/// Writes to the rows the engine moderates but does not own (users, courses, comments).
///
/// The wider platform normally owns these; the engine needs them for seeding
/// and to keep replies at depth one.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn upsert_user(&self, user: &UserAccount) -> Result<(), ModerationError>;

    async fn upsert_course(&self, course: &Course) -> Result<(), ModerationError>;

    /// Insert a comment, re-parenting replies-to-replies onto the thread root.
    async fn post_comment(&self, comment: &NewComment) -> Result<ContentItem, ModerationError>;
}
