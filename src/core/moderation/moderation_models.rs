// Moderation domain models - reports, content visibility, bans and audit entries.
//
// These are pure domain types with no storage or transport dependencies.
// The infra layer maps them to rows; the services decide how they change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i64;
pub type ContentId = i64;
pub type CourseId = i64;
pub type LessonId = i64;
pub type ReportId = i64;
pub type AuditEntryId = i64;

// ============================================================================
// PRINCIPALS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Instructor => "INSTRUCTOR",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STUDENT" => Some(Role::Student),
            "INSTRUCTOR" => Some(Role::Instructor),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The authenticated caller of an operation, as issued by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ============================================================================
// CONTENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Visible,
    Hidden,
    Deleted,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Visible => "VISIBLE",
            Visibility::Hidden => "HIDDEN",
            Visibility::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VISIBLE" => Some(Visibility::Visible),
            "HIDDEN" => Some(Visibility::Hidden),
            "DELETED" => Some(Visibility::Deleted),
            _ => None,
        }
    }

    /// DELETED is terminal; everything else may move freely.
    pub fn can_transition_to(&self, next: Visibility) -> bool {
        !matches!(self, Visibility::Deleted) && *self != next
    }
}

/// A user-generated unit subject to moderation (a lesson comment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub author_id: UserId,
    /// Thread root this item replies to. Replies are never nested deeper than one level.
    pub parent_id: Option<ContentId>,
    pub lesson_id: Option<LessonId>,
    pub course_id: Option<CourseId>,
    pub body: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    /// Parent to store for a new reply to `parent`: replies to replies flatten to the root.
    pub fn thread_parent_for_reply(parent: &ContentItem) -> ContentId {
        parent.parent_id.unwrap_or(parent.id)
    }

    pub fn thread_root(&self) -> ContentId {
        self.parent_id.unwrap_or(self.id)
    }

    pub fn location(&self) -> ContentLocation {
        ContentLocation {
            content_id: self.id,
            author_id: self.author_id,
            thread_root: self.thread_root(),
            lesson_id: self.lesson_id,
            course_id: self.course_id,
        }
    }
}

/// A comment about to be posted. `reply_to` may point at any comment of the thread.
#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub author_id: UserId,
    pub reply_to: Option<ContentId>,
    pub lesson_id: Option<LessonId>,
    pub course_id: Option<CourseId>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Result of the content-identity lookup: who wrote it and where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLocation {
    pub content_id: ContentId,
    pub author_id: UserId,
    pub thread_root: ContentId,
    pub lesson_id: Option<LessonId>,
    pub course_id: Option<CourseId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
    Draft,
    Published,
    Blocked,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "DRAFT",
            CourseStatus::Published => "PUBLISHED",
            CourseStatus::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(CourseStatus::Draft),
            "PUBLISHED" => Some(CourseStatus::Published),
            "BLOCKED" => Some(CourseStatus::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub owner_id: UserId,
    pub title: String,
    pub status: CourseStatus,
}

// ============================================================================
// USERS & BANS
// ============================================================================

/// The three ban columns stored on a user row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanState {
    pub banned: bool,
    pub reason: Option<String>,
    /// `None` with `banned = true` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BanState {
    pub fn active(reason: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            banned: true,
            reason: Some(reason.into()),
            expires_at,
        }
    }

    /// Whether the stored fields should be honored at `now`.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) if expires_at <= now => false,
            _ => self.banned,
        }
    }

    /// An expiry in the past means the row needs clearing, whatever the flag says.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_clear(&self) -> bool {
        !self.banned && self.reason.is_none() && self.expires_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    pub ban: BanState,
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportCategory {
    Content,
    Course,
}

impl ReportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::Content => "CONTENT",
            ReportCategory::Course => "COURSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONTENT" => Some(ReportCategory::Content),
            "COURSE" => Some(ReportCategory::Course),
            _ => None,
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a report (or a direct admin action) points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReportTarget {
    Content(ContentId),
    Course(CourseId),
}

impl ReportTarget {
    pub fn category(&self) -> ReportCategory {
        match self {
            ReportTarget::Content(_) => ReportCategory::Content,
            ReportTarget::Course(_) => ReportCategory::Course,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            ReportTarget::Content(id) | ReportTarget::Course(id) => *id,
        }
    }

    pub fn from_parts(category: ReportCategory, id: i64) -> Self {
        match category {
            ReportCategory::Content => ReportTarget::Content(id),
            ReportCategory::Course => ReportTarget::Course(id),
        }
    }
}

impl fmt::Display for ReportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportTarget::Content(id) => write!(f, "content:{}", id),
            ReportTarget::Course(id) => write!(f, "course:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Resolved,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ReportStatus::Pending),
            "RESOLVED" => Some(ReportStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub reporter_id: UserId,
    pub target: ReportTarget,
    pub reason: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
}

impl Report {
    pub fn is_pending(&self) -> bool {
        self.status == ReportStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub reporter_id: UserId,
    pub target: ReportTarget,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Result of inserting a report row under the (reporter, target) unique key.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Report),
    Duplicate,
}

// ============================================================================
// AUDIT LOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    DeleteContent,
    BanUser,
    Ignore,
    BlockCourse,
}

impl AuditAction {
    pub const ALL: [AuditAction; 4] = [
        AuditAction::DeleteContent,
        AuditAction::BanUser,
        AuditAction::Ignore,
        AuditAction::BlockCourse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DeleteContent => "DELETE_CONTENT",
            AuditAction::BanUser => "BAN_USER",
            AuditAction::Ignore => "IGNORE",
            AuditAction::BlockCourse => "BLOCK_COURSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DELETE_CONTENT" => Some(AuditAction::DeleteContent),
            "BAN_USER" => Some(AuditAction::BanUser),
            "IGNORE" => Some(AuditAction::Ignore),
            "BLOCK_COURSE" => Some(AuditAction::BlockCourse),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a person as it was at the time of the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSnapshot {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl From<&UserAccount> for PersonSnapshot {
    fn from(user: &UserAccount) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub id: ContentId,
    pub body: String,
    pub visibility: Visibility,
    pub parent_id: Option<ContentId>,
    pub lesson_id: Option<LessonId>,
    pub course_id: Option<CourseId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSnapshot {
    pub id: CourseId,
    pub title: String,
    pub status: CourseStatus,
}

/// Self-contained copy of everything an auditor needs, frozen at decision time.
///
/// Stored inline with the audit row as JSON so it outlives the report,
/// content and user rows it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub reason: String,
    pub report_id: Option<ReportId>,
    pub report_reason: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
    pub content: Option<ContentSnapshot>,
    pub course: Option<CourseSnapshot>,
    pub author: Option<PersonSnapshot>,
    pub reporter: Option<PersonSnapshot>,
    pub admin: PersonSnapshot,
    /// Reports closed by this decision, including the originating one
    pub reports_resolved: u32,
    /// `None` for permanent bans and non-ban actions. Rows imported from the
    /// legacy audit table carry it as `thoiHanCam`.
    #[serde(alias = "thoiHanCam")]
    pub ban_duration_days: Option<u32>,
    pub ban_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub admin_id: UserId,
    pub category: ReportCategory,
    pub action: AuditAction,
    /// `None` for direct actions that bypass a report.
    pub report_id: Option<ReportId>,
    pub target: ReportTarget,
    pub snapshot: AuditSnapshot,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub admin_id: UserId,
    pub category: ReportCategory,
    pub action: AuditAction,
    pub report_id: Option<ReportId>,
    pub target: ReportTarget,
    pub snapshot: AuditSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Admin decision applied by the resolution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionAction {
    /// Dismiss the reports and un-hide the target
    Ignore,
    /// Soft-delete the reported content
    DeleteContent,
    /// Soft-delete the content and ban its author
    BanUser {
        reason: String,
        /// `None` bans permanently
        duration_days: Option<u32>,
    },
    BlockCourse,
}

impl ResolutionAction {
    pub fn audit_action(&self) -> AuditAction {
        match self {
            ResolutionAction::Ignore => AuditAction::Ignore,
            ResolutionAction::DeleteContent => AuditAction::DeleteContent,
            ResolutionAction::BanUser { .. } => AuditAction::BanUser,
            ResolutionAction::BlockCourse => AuditAction::BlockCourse,
        }
    }

    pub fn is_valid_for(&self, category: ReportCategory) -> bool {
        match self.audit_action() {
            AuditAction::Ignore => true,
            AuditAction::DeleteContent | AuditAction::BanUser => category == ReportCategory::Content,
            AuditAction::BlockCourse => category == ReportCategory::Course,
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tunables for the moderation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Pending reports that auto-hide a visible item
    pub suppression_threshold: u32,
    /// Pending count that pages the admin pool (kept separate from suppression)
    pub admin_alert_threshold: u32,
    /// Reports a single user may file inside the rate limit window
    pub rate_limit_max_reports: u32,
    pub rate_limit_window_secs: u64,
    /// Recipients per push call
    pub push_batch_size: usize,
    pub push_timeout_ms: u64,
    pub max_reason_len: usize,
    /// Longest ban an admin may hand out
    pub max_ban_days: u32,
    /// Ban expiry sweep period, 0 disables it
    pub ban_sweep_interval_secs: u64,
    /// Report retention sweep period, 0 disables it
    pub retention_sweep_interval_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            suppression_threshold: 3,          // 3 pending reports hide the item
            admin_alert_threshold: 1,          // first pending report pings admins
            rate_limit_max_reports: 5,         // 5 reports...
            rate_limit_window_secs: 60,        // ...per minute
            push_batch_size: 100,              // 100 recipients per push call
            push_timeout_ms: 2_000,            // give up on a push after 2 seconds
            max_reason_len: 1_000,             // 1000 characters
            max_ban_days: 3_650,               // 10 years
            ban_sweep_interval_secs: 300,      // every 5 minutes
            retention_sweep_interval_secs: 0,  // off unless configured
        }
    }
}
