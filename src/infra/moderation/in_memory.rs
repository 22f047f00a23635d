// In-memory moderation store for tests. Production wiring uses SQLite.
//
// A transaction holds the store mutex for its whole lifetime and works on a
// full clone of the state; `commit` swaps the clone in, dropping discards it.
// That gives the same all-or-nothing and single-writer behavior as SQLite,
// at a per-transaction cost proportional to the whole data set.

use crate::core::moderation::{
    AuditEntry, AuditEntryId, AuditFilter, AuditSummary, BanState, ContentCatalog, ContentId,
    ContentItem, Course, CourseId, CourseStatus, InsertOutcome, ModerationError, ModerationStore,
    ModerationTx, NewAuditEntry, NewComment, NewReport, Page, PageRequest, PendingSummary,
    QueueEntry, QueueFilter, Report, ReportCategory, ReportId, ReportStatus, ReportTarget,
    UserAccount, UserId, Visibility,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<UserId, UserAccount>,
    courses: BTreeMap<CourseId, Course>,
    comments: BTreeMap<ContentId, ContentItem>,
    reports: BTreeMap<ReportId, Report>,
    audit: BTreeMap<AuditEntryId, AuditEntry>,
    next_comment_id: i64,
    next_report_id: i64,
    next_audit_id: i64,
}

impl MemoryState {
    fn pending_on(&self, target: ReportTarget) -> impl Iterator<Item = &Report> {
        self.reports
            .values()
            .filter(move |r| r.target == target && r.is_pending())
    }

    fn is_covered_by_audit(&self, report: &Report) -> bool {
        self.audit.values().any(|entry| {
            entry.report_id == Some(report.id)
                || (entry.target == report.target && entry.created_at >= report.created_at)
        })
    }
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len() as u64;
    let start = (page.offset() as usize).min(items.len());
    let end = (start + page.limit() as usize).min(items.len());
    let slice = items.drain(start..end).collect();
    Page::new(slice, total, page)
}

#[derive(Clone, Default)]
pub struct InMemoryModerationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryModerationStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModerationStore for InMemoryModerationStore {
    async fn begin(&self) -> Result<Box<dyn ModerationTx>, ModerationError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }

    async fn get_content(&self, content_id: ContentId) -> Result<Option<ContentItem>, ModerationError> {
        Ok(self.state.lock().await.comments.get(&content_id).cloned())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserAccount>, ModerationError> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, ModerationError> {
        Ok(self.state.lock().await.reports.get(&report_id).cloned())
    }

    async fn reports_for_target(&self, target: ReportTarget) -> Result<Vec<Report>, ModerationError> {
        let state = self.state.lock().await;
        let mut reports: Vec<Report> = state
            .reports
            .values()
            .filter(|r| r.target == target)
            .cloned()
            .collect();
        reports.sort_by_key(|r| (r.created_at, r.id));
        Ok(reports)
    }

    async fn pending_queue(
        &self,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>, ModerationError> {
        let state = self.state.lock().await;
        let mut entries: Vec<QueueEntry> = state
            .reports
            .values()
            .filter(|r| r.is_pending() && filter.matches(r))
            .map(|r| QueueEntry {
                report: r.clone(),
                pending_on_target: state.pending_on(r.target).count() as u32,
            })
            .collect();
        entries.sort_by(|a, b| {
            (b.report.created_at, b.report.id).cmp(&(a.report.created_at, a.report.id))
        });
        Ok(paginate(entries, page))
    }

    async fn pending_summary(&self) -> Result<PendingSummary, ModerationError> {
        let state = self.state.lock().await;
        let mut summary = PendingSummary::default();
        for report in state.reports.values().filter(|r| r.is_pending()) {
            match report.target.category() {
                ReportCategory::Content => summary.pending_content_reports += 1,
                ReportCategory::Course => summary.pending_course_reports += 1,
            }
        }
        summary.hidden_content = state
            .comments
            .values()
            .filter(|c| c.visibility == Visibility::Hidden)
            .count() as u64;
        Ok(summary)
    }

    async fn audit_log(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEntry>, ModerationError> {
        let state = self.state.lock().await;
        // Ids are assigned in insertion order, so reverse id order is newest first.
        let entries: Vec<AuditEntry> = state
            .audit
            .values()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(paginate(entries, page))
    }

    async fn get_audit_entry(&self, id: AuditEntryId) -> Result<Option<AuditEntry>, ModerationError> {
        Ok(self.state.lock().await.audit.get(&id).cloned())
    }

    async fn audit_summary(&self, today_start: DateTime<Utc>) -> Result<AuditSummary, ModerationError> {
        let state = self.state.lock().await;
        let mut summary = AuditSummary::default();
        for entry in state.audit.values() {
            summary.total += 1;
            if entry.created_at >= today_start {
                summary.today += 1;
            }
            *summary.by_action.entry(entry.action).or_insert(0) += 1;
        }
        Ok(summary)
    }
}

#[async_trait]
impl ContentCatalog for InMemoryModerationStore {
    async fn upsert_user(&self, user: &UserAccount) -> Result<(), ModerationError> {
        self.state.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn upsert_course(&self, course: &Course) -> Result<(), ModerationError> {
        self.state.lock().await.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn post_comment(&self, comment: &NewComment) -> Result<ContentItem, ModerationError> {
        let mut state = self.state.lock().await;

        let parent_id = match comment.reply_to {
            Some(reply_to) => {
                let parent = state
                    .comments
                    .get(&reply_to)
                    .ok_or_else(|| ModerationError::not_found(format!("comment {}", reply_to)))?;
                Some(ContentItem::thread_parent_for_reply(parent))
            }
            None => None,
        };

        state.next_comment_id += 1;
        let item = ContentItem {
            id: state.next_comment_id,
            author_id: comment.author_id,
            parent_id,
            lesson_id: comment.lesson_id,
            course_id: comment.course_id,
            body: comment.body.clone(),
            visibility: Visibility::Visible,
            created_at: comment.created_at,
        };
        state.comments.insert(item.id, item.clone());
        Ok(item)
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl ModerationTx for InMemoryTx {
    async fn insert_report(&mut self, report: &NewReport) -> Result<InsertOutcome, ModerationError> {
        let duplicate = self
            .working
            .reports
            .values()
            .any(|r| r.reporter_id == report.reporter_id && r.target == report.target);
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }

        self.working.next_report_id += 1;
        let created = Report {
            id: self.working.next_report_id,
            reporter_id: report.reporter_id,
            target: report.target,
            reason: report.reason.clone(),
            status: ReportStatus::Pending,
            created_at: report.created_at,
            resolved_at: None,
            resolved_by: None,
        };
        self.working.reports.insert(created.id, created.clone());
        Ok(InsertOutcome::Created(created))
    }

    async fn get_report(&mut self, report_id: ReportId) -> Result<Option<Report>, ModerationError> {
        Ok(self.working.reports.get(&report_id).cloned())
    }

    async fn claim_pending_report(
        &mut self,
        report_id: ReportId,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, ModerationError> {
        match self.working.reports.get_mut(&report_id) {
            Some(report) if report.is_pending() => {
                report.status = ReportStatus::Resolved;
                report.resolved_at = Some(at);
                report.resolved_by = Some(admin_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_pending_reports(&mut self, target: ReportTarget) -> Result<u32, ModerationError> {
        Ok(self.working.pending_on(target).count() as u32)
    }

    async fn resolve_pending_reports(
        &mut self,
        target: ReportTarget,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<u64, ModerationError> {
        let mut resolved = 0;
        for report in self.working.reports.values_mut() {
            if report.target == target && report.is_pending() {
                report.status = ReportStatus::Resolved;
                report.resolved_at = Some(at);
                report.resolved_by = Some(admin_id);
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn get_content(&mut self, content_id: ContentId) -> Result<Option<ContentItem>, ModerationError> {
        Ok(self.working.comments.get(&content_id).cloned())
    }

    async fn set_content_visibility(
        &mut self,
        content_id: ContentId,
        visibility: Visibility,
    ) -> Result<(), ModerationError> {
        if let Some(item) = self.working.comments.get_mut(&content_id) {
            if item.visibility != Visibility::Deleted {
                item.visibility = visibility;
            }
        }
        Ok(())
    }

    async fn get_course(&mut self, course_id: CourseId) -> Result<Option<Course>, ModerationError> {
        Ok(self.working.courses.get(&course_id).cloned())
    }

    async fn set_course_status(
        &mut self,
        course_id: CourseId,
        status: CourseStatus,
    ) -> Result<(), ModerationError> {
        if let Some(course) = self.working.courses.get_mut(&course_id) {
            course.status = status;
        }
        Ok(())
    }

    async fn get_user(&mut self, user_id: UserId) -> Result<Option<UserAccount>, ModerationError> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn write_ban(&mut self, user_id: UserId, ban: &BanState) -> Result<(), ModerationError> {
        if let Some(user) = self.working.users.get_mut(&user_id) {
            user.ban = ban.clone();
        }
        Ok(())
    }

    async fn list_expired_bans(&mut self, now: DateTime<Utc>) -> Result<Vec<UserId>, ModerationError> {
        Ok(self
            .working
            .users
            .values()
            .filter(|u| u.ban.is_stale_at(now))
            .map(|u| u.id)
            .collect())
    }

    async fn insert_audit_entry(&mut self, entry: &NewAuditEntry) -> Result<AuditEntryId, ModerationError> {
        self.working.next_audit_id += 1;
        let id = self.working.next_audit_id;
        self.working.audit.insert(
            id,
            AuditEntry {
                id,
                admin_id: entry.admin_id,
                category: entry.category,
                action: entry.action,
                report_id: entry.report_id,
                target: entry.target,
                snapshot: entry.snapshot.clone(),
                created_at: entry.created_at,
            },
        );
        Ok(id)
    }

    async fn purge_resolved_reports(&mut self, category: ReportCategory) -> Result<u64, ModerationError> {
        let eligible: Vec<ReportId> = self
            .working
            .reports
            .values()
            .filter(|r| {
                r.status == ReportStatus::Resolved
                    && r.target.category() == category
                    && self.working.is_covered_by_audit(r)
            })
            .map(|r| r.id)
            .collect();

        for id in &eligible {
            self.working.reports.remove(id);
        }
        Ok(eligible.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), ModerationError> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
