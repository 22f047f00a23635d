// Read side of the moderation engine: queues, audit log search and counters.
//
// Every query runs outside any resolution transaction and may observe a
// resolution that committed a moment ago; nothing here holds locks.

use super::moderation_error::ModerationError;
use super::moderation_models::{
    AuditAction, AuditEntry, AuditEntryId, ContentId, ContentLocation, Principal, Report,
    ReportCategory, ReportTarget, UserId,
};
use super::moderation_store::ModerationStore;
use crate::core::clock::Clock;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

// ============================================================================
// PAGINATION
// ============================================================================

/// 1-based page request. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.per_page.max(1)))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages()
    }
}

// ============================================================================
// FILTERS & RESULTS
// ============================================================================

/// Filters for the pending queue. Date bounds apply to the report creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub category: Option<ReportCategory>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl QueueFilter {
    pub fn matches(&self, report: &Report) -> bool {
        self.category.map_or(true, |c| report.target.category() == c)
            && self.from.map_or(true, |from| report.created_at >= from)
            && self.to.map_or(true, |to| report.created_at <= to)
    }
}

/// Filters for the audit log. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub category: Option<ReportCategory>,
    pub action: Option<AuditAction>,
    pub admin_id: Option<UserId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.category.map_or(true, |c| entry.category == c)
            && self.action.map_or(true, |a| entry.action == a)
            && self.admin_id.map_or(true, |id| entry.admin_id == id)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at <= to)
    }
}

/// A pending report with the number of pending reports on the same target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub report: Report,
    pub pending_on_target: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total: u64,
    /// Entries since the start of the current UTC day
    pub today: u64,
    pub by_action: BTreeMap<AuditAction, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSummary {
    pub pending_content_reports: u64,
    pub pending_course_reports: u64,
    /// Content currently held back by auto-suppression
    pub hidden_content: u64,
}

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationSummary {
    pub pending: PendingSummary,
    pub audit: AuditSummary,
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationQueryService<S: ModerationStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: ModerationStore> ModerationQueryService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn authorize(principal: Principal) -> Result<(), ModerationError> {
        if principal.is_admin() {
            Ok(())
        } else {
            Err(ModerationError::Unauthorized)
        }
    }

    /// Pending reports, newest first.
    pub async fn list_queue(
        &self,
        principal: Principal,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>, ModerationError> {
        Self::authorize(principal)?;
        check_range(filter.from, filter.to)?;
        self.store.pending_queue(filter, page).await
    }

    /// Audit log search, newest first.
    pub async fn audit_log(
        &self,
        principal: Principal,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEntry>, ModerationError> {
        Self::authorize(principal)?;
        check_range(filter.from, filter.to)?;
        self.store.audit_log(filter, page).await
    }

    pub async fn audit_entry(
        &self,
        principal: Principal,
        id: AuditEntryId,
    ) -> Result<AuditEntry, ModerationError> {
        Self::authorize(principal)?;
        self.store
            .get_audit_entry(id)
            .await?
            .ok_or_else(|| ModerationError::not_found(format!("audit entry {}", id)))
    }

    /// Every report ever filed on a target, pending or not.
    pub async fn reports_for_target(
        &self,
        principal: Principal,
        target: ReportTarget,
    ) -> Result<Vec<Report>, ModerationError> {
        Self::authorize(principal)?;
        self.store.reports_for_target(target).await
    }

    /// Author, thread root and lesson/course path of a comment, for deep links from the queue.
    pub async fn locate_content(
        &self,
        principal: Principal,
        content_id: ContentId,
    ) -> Result<ContentLocation, ModerationError> {
        Self::authorize(principal)?;
        self.store
            .get_content(content_id)
            .await?
            .map(|item| item.location())
            .ok_or_else(|| ModerationError::not_found(format!("content {}", content_id)))
    }

    /// Totals, today's count and per-action counts, plus the pending backlog.
    pub async fn summary(&self, principal: Principal) -> Result<ModerationSummary, ModerationError> {
        Self::authorize(principal)?;

        let today_start = start_of_day(self.clock.now());
        let mut audit = self.store.audit_summary(today_start).await?;
        for action in AuditAction::ALL {
            audit.by_action.entry(action).or_insert(0);
        }
        let pending = self.store.pending_summary().await?;

        Ok(ModerationSummary { pending, audit })
    }
}

fn check_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<(), ModerationError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(ModerationError::Validation(
            "date range start must not be after its end".to_string(),
        )),
        _ => Ok(()),
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}
