// SQLite-backed moderation store.
//
// Tables:
// - users: identity, role and the three ban columns
// - courses: owner and publication status
// - comments: lesson comments with their visibility state
// - reports: one row per (reporter, category, target), enforced by a unique index
// - audit_log: append-only, snapshot stored inline as JSON
//
// Timestamps are fixed-width RFC 3339 strings (microseconds, `Z`), so string
// comparison in SQL orders them correctly.

use crate::core::moderation::{
    AuditAction, AuditEntry, AuditEntryId, AuditFilter, AuditSnapshot, AuditSummary, BanState,
    ContentCatalog, ContentId, ContentItem, Course, CourseId, CourseStatus, InsertOutcome,
    ModerationError, ModerationStore, ModerationTx, NewAuditEntry, NewComment, NewReport, Page,
    PageRequest, PendingSummary, QueueEntry, QueueFilter, Report, ReportCategory, ReportId,
    ReportStatus, ReportTarget, Role, UserAccount, UserId, Visibility,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// Take the write lock up front. A deferred transaction that reads first fails
// with SQLITE_BUSY instead of waiting when it later upgrades to a writer.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

pub(crate) fn storage(e: sqlx::Error) -> ModerationError {
    ModerationError::Storage(e.to_string())
}

pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, ModerationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ModerationError::Storage(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, ModerationError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn corrupt(column: &str, value: &str) -> ModerationError {
    ModerationError::Storage(format!("unexpected {} value {:?}", column, value))
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn user_from_row(row: &SqliteRow) -> Result<UserAccount, ModerationError> {
    let role: String = row.get("role");
    let banned: bool = row.get("banned");
    Ok(UserAccount {
        id: row.get("id"),
        display_name: row.get("display_name"),
        role: Role::parse(&role).ok_or_else(|| corrupt("role", &role))?,
        ban: BanState {
            banned,
            reason: row.get("ban_reason"),
            expires_at: parse_opt_ts(row.get("ban_expires_at"))?,
        },
    })
}

fn content_from_row(row: &SqliteRow) -> Result<ContentItem, ModerationError> {
    let visibility: String = row.get("visibility");
    let created_at: String = row.get("created_at");
    Ok(ContentItem {
        id: row.get("id"),
        author_id: row.get("author_id"),
        parent_id: row.get("parent_id"),
        lesson_id: row.get("lesson_id"),
        course_id: row.get("course_id"),
        body: row.get("body"),
        visibility: Visibility::parse(&visibility).ok_or_else(|| corrupt("visibility", &visibility))?,
        created_at: parse_ts(&created_at)?,
    })
}

fn course_from_row(row: &SqliteRow) -> Result<Course, ModerationError> {
    let status: String = row.get("status");
    Ok(Course {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        status: CourseStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<Report, ModerationError> {
    let category: String = row.get("category");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let category = ReportCategory::parse(&category).ok_or_else(|| corrupt("category", &category))?;
    Ok(Report {
        id: row.get("id"),
        reporter_id: row.get("reporter_id"),
        target: ReportTarget::from_parts(category, row.get("target_id")),
        reason: row.get("reason"),
        status: ReportStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        created_at: parse_ts(&created_at)?,
        resolved_at: parse_opt_ts(row.get("resolved_at"))?,
        resolved_by: row.get("resolved_by"),
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEntry, ModerationError> {
    let category: String = row.get("category");
    let action: String = row.get("action");
    let snapshot: String = row.get("snapshot");
    let created_at: String = row.get("created_at");
    let category = ReportCategory::parse(&category).ok_or_else(|| corrupt("category", &category))?;
    let snapshot: AuditSnapshot = serde_json::from_str(&snapshot)
        .map_err(|e| ModerationError::Storage(format!("unreadable audit snapshot: {}", e)))?;
    Ok(AuditEntry {
        id: row.get("id"),
        admin_id: row.get("admin_id"),
        category,
        action: AuditAction::parse(&action).ok_or_else(|| corrupt("action", &action))?,
        report_id: row.get("report_id"),
        target: ReportTarget::from_parts(category, row.get("target_id")),
        snapshot,
        created_at: parse_ts(&created_at)?,
    })
}

// ============================================================================
// SHARED QUERIES (pool or transaction)
// ============================================================================

async fn fetch_user<'e, E>(executor: E, user_id: UserId) -> Result<Option<UserAccount>, ModerationError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .map_err(storage)?;
    row.as_ref().map(user_from_row).transpose()
}

async fn fetch_content<'e, E>(
    executor: E,
    content_id: ContentId,
) -> Result<Option<ContentItem>, ModerationError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM comments WHERE id = ?")
        .bind(content_id)
        .fetch_optional(executor)
        .await
        .map_err(storage)?;
    row.as_ref().map(content_from_row).transpose()
}

async fn fetch_report<'e, E>(executor: E, report_id: ReportId) -> Result<Option<Report>, ModerationError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
        .bind(report_id)
        .fetch_optional(executor)
        .await
        .map_err(storage)?;
    row.as_ref().map(report_from_row).transpose()
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Clone)]
pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url` and run migrations.
    ///
    /// `sqlite::memory:` databases are per-connection, so use `max_connections = 1` for them.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, ModerationError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL,
                banned BOOLEAN NOT NULL DEFAULT 0,
                ban_reason TEXT,
                ban_expires_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_users_ban_expires
                ON users(ban_expires_at) WHERE ban_expires_at IS NOT NULL;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS courses (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'DRAFT'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL,
                parent_id INTEGER,
                lesson_id INTEGER,
                course_id INTEGER,
                body TEXT NOT NULL,
                visibility TEXT NOT NULL DEFAULT 'VISIBLE',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_lesson ON comments(lesson_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reporter_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                resolved_by INTEGER,
                UNIQUE (reporter_id, category, target_id)
            );
            CREATE INDEX IF NOT EXISTS idx_reports_target
                ON reports(category, target_id, status);
            CREATE INDEX IF NOT EXISTS idx_reports_status_created
                ON reports(status, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        // No foreign key on report_id: the entry must outlive the purged report.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                admin_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                action TEXT NOT NULL,
                report_id INTEGER,
                target_id INTEGER NOT NULL,
                snapshot TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_log(created_at);
            CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(category, target_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn begin(&self) -> Result<Box<dyn ModerationTx>, ModerationError> {
        let tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(storage)?;
        Ok(Box::new(SqliteModerationTx { tx }))
    }

    async fn get_content(&self, content_id: ContentId) -> Result<Option<ContentItem>, ModerationError> {
        fetch_content(&self.pool, content_id).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserAccount>, ModerationError> {
        fetch_user(&self.pool, user_id).await
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, ModerationError> {
        fetch_report(&self.pool, report_id).await
    }

    async fn reports_for_target(&self, target: ReportTarget) -> Result<Vec<Report>, ModerationError> {
        let rows = sqlx::query(
            "SELECT * FROM reports WHERE category = ? AND target_id = ? ORDER BY created_at, id",
        )
        .bind(target.category().as_str())
        .bind(target.id())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(report_from_row).collect()
    }

    async fn pending_queue(
        &self,
        filter: &QueueFilter,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>, ModerationError> {
        let category = filter.category.map(|c| c.as_str());
        let from = filter.from.map(ts);
        let to = filter.to.map(ts);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM reports
            WHERE status = 'PENDING'
              AND (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR created_at >= ?2)
              AND (?3 IS NULL OR created_at <= ?3)
            "#,
        )
        .bind(category)
        .bind(&from)
        .bind(&to)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let rows = sqlx::query(
            r#"
            SELECT r.*,
                   (SELECT COUNT(*) FROM reports p
                    WHERE p.category = r.category
                      AND p.target_id = r.target_id
                      AND p.status = 'PENDING') AS pending_on_target
            FROM reports r
            WHERE r.status = 'PENDING'
              AND (?1 IS NULL OR r.category = ?1)
              AND (?2 IS NULL OR r.created_at >= ?2)
              AND (?3 IS NULL OR r.created_at <= ?3)
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT ?4 OFFSET ?5
            "#,
        )
        .bind(category)
        .bind(&from)
        .bind(&to)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(QueueEntry {
                    report: report_from_row(row)?,
                    pending_on_target: row.get::<i64, _>("pending_on_target") as u32,
                })
            })
            .collect::<Result<Vec<_>, ModerationError>>()?;

        Ok(Page::new(items, total as u64, page))
    }

    async fn pending_summary(&self) -> Result<PendingSummary, ModerationError> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS n FROM reports WHERE status = 'PENDING' GROUP BY category",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut summary = PendingSummary::default();
        for row in rows {
            let category: String = row.get("category");
            let n = row.get::<i64, _>("n") as u64;
            match ReportCategory::parse(&category) {
                Some(ReportCategory::Content) => summary.pending_content_reports = n,
                Some(ReportCategory::Course) => summary.pending_course_reports = n,
                None => return Err(corrupt("category", &category)),
            }
        }

        let hidden: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE visibility = 'HIDDEN'")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        summary.hidden_content = hidden as u64;

        Ok(summary)
    }

    async fn audit_log(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEntry>, ModerationError> {
        let category = filter.category.map(|c| c.as_str());
        let action = filter.action.map(|a| a.as_str());
        let from = filter.from.map(ts);
        let to = filter.to.map(ts);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM audit_log
            WHERE (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR action = ?2)
              AND (?3 IS NULL OR admin_id = ?3)
              AND (?4 IS NULL OR created_at >= ?4)
              AND (?5 IS NULL OR created_at <= ?5)
            "#,
        )
        .bind(category)
        .bind(action)
        .bind(filter.admin_id)
        .bind(&from)
        .bind(&to)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM audit_log
            WHERE (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR action = ?2)
              AND (?3 IS NULL OR admin_id = ?3)
              AND (?4 IS NULL OR created_at >= ?4)
              AND (?5 IS NULL OR created_at <= ?5)
            ORDER BY created_at DESC, id DESC
            LIMIT ?6 OFFSET ?7
            "#,
        )
        .bind(category)
        .bind(action)
        .bind(filter.admin_id)
        .bind(&from)
        .bind(&to)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let items = rows.iter().map(audit_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn get_audit_entry(&self, id: AuditEntryId) -> Result<Option<AuditEntry>, ModerationError> {
        let row = sqlx::query("SELECT * FROM audit_log WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(audit_from_row).transpose()
    }

    async fn audit_summary(&self, today_start: DateTime<Utc>) -> Result<AuditSummary, ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN created_at >= ? THEN 1 ELSE 0 END), 0) AS today
            FROM audit_log
            "#,
        )
        .bind(ts(today_start))
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let mut summary = AuditSummary {
            total: row.get::<i64, _>("total") as u64,
            today: row.get::<i64, _>("today") as u64,
            ..AuditSummary::default()
        };

        let rows = sqlx::query("SELECT action, COUNT(*) AS n FROM audit_log GROUP BY action")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        for row in rows {
            let action: String = row.get("action");
            let action = AuditAction::parse(&action).ok_or_else(|| corrupt("action", &action))?;
            summary.by_action.insert(action, row.get::<i64, _>("n") as u64);
        }

        Ok(summary)
    }
}

#[async_trait]
impl ContentCatalog for SqliteModerationStore {
    async fn upsert_user(&self, user: &UserAccount) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, role, banned, ban_reason, ban_expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role,
                banned = excluded.banned,
                ban_reason = excluded.ban_reason,
                ban_expires_at = excluded.ban_expires_at
            "#,
        )
        .bind(user.id)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.ban.banned)
        .bind(&user.ban.reason)
        .bind(user.ban.expires_at.map(ts))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn upsert_course(&self, course: &Course) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, owner_id, title, status)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                status = excluded.status
            "#,
        )
        .bind(course.id)
        .bind(course.owner_id)
        .bind(&course.title)
        .bind(course.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn post_comment(&self, comment: &NewComment) -> Result<ContentItem, ModerationError> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(storage)?;

        let parent_id = match comment.reply_to {
            Some(reply_to) => {
                let parent = fetch_content(&mut *tx, reply_to)
                    .await?
                    .ok_or_else(|| ModerationError::not_found(format!("comment {}", reply_to)))?;
                Some(ContentItem::thread_parent_for_reply(&parent))
            }
            None => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO comments (author_id, parent_id, lesson_id, course_id, body, visibility, created_at)
            VALUES (?, ?, ?, ?, ?, 'VISIBLE', ?)
            "#,
        )
        .bind(comment.author_id)
        .bind(parent_id)
        .bind(comment.lesson_id)
        .bind(comment.course_id)
        .bind(&comment.body)
        .bind(ts(comment.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        Ok(ContentItem {
            id: result.last_insert_rowid(),
            author_id: comment.author_id,
            parent_id,
            lesson_id: comment.lesson_id,
            course_id: comment.course_id,
            body: comment.body.clone(),
            visibility: Visibility::Visible,
            created_at: comment.created_at,
        })
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

pub struct SqliteModerationTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ModerationTx for SqliteModerationTx {
    async fn insert_report(&mut self, report: &NewReport) -> Result<InsertOutcome, ModerationError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reports (reporter_id, category, target_id, reason, status, created_at)
            VALUES (?, ?, ?, ?, 'PENDING', ?)
            ON CONFLICT(reporter_id, category, target_id) DO NOTHING
            "#,
        )
        .bind(report.reporter_id)
        .bind(report.target.category().as_str())
        .bind(report.target.id())
        .bind(&report.reason)
        .bind(ts(report.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Ok(InsertOutcome::Duplicate);
        }

        Ok(InsertOutcome::Created(Report {
            id: result.last_insert_rowid(),
            reporter_id: report.reporter_id,
            target: report.target,
            reason: report.reason.clone(),
            status: ReportStatus::Pending,
            created_at: report.created_at,
            resolved_at: None,
            resolved_by: None,
        }))
    }

    async fn get_report(&mut self, report_id: ReportId) -> Result<Option<Report>, ModerationError> {
        fetch_report(&mut *self.tx, report_id).await
    }

    async fn claim_pending_report(
        &mut self,
        report_id: ReportId,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, ModerationError> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET status = 'RESOLVED', resolved_at = ?, resolved_by = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(ts(at))
        .bind(admin_id)
        .bind(report_id)
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_pending_reports(&mut self, target: ReportTarget) -> Result<u32, ModerationError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reports WHERE category = ? AND target_id = ? AND status = 'PENDING'",
        )
        .bind(target.category().as_str())
        .bind(target.id())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)?;

        Ok(count as u32)
    }

    async fn resolve_pending_reports(
        &mut self,
        target: ReportTarget,
        admin_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<u64, ModerationError> {
        let result = sqlx::query(
            r#"
            UPDATE reports SET status = 'RESOLVED', resolved_at = ?, resolved_by = ?
            WHERE category = ? AND target_id = ? AND status = 'PENDING'
            "#,
        )
        .bind(ts(at))
        .bind(admin_id)
        .bind(target.category().as_str())
        .bind(target.id())
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected())
    }

    async fn get_content(&mut self, content_id: ContentId) -> Result<Option<ContentItem>, ModerationError> {
        fetch_content(&mut *self.tx, content_id).await
    }

    async fn set_content_visibility(
        &mut self,
        content_id: ContentId,
        visibility: Visibility,
    ) -> Result<(), ModerationError> {
        // DELETED never changes again, whatever the caller asks for.
        sqlx::query("UPDATE comments SET visibility = ? WHERE id = ? AND visibility != 'DELETED'")
            .bind(visibility.as_str())
            .bind(content_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn get_course(&mut self, course_id: CourseId) -> Result<Option<Course>, ModerationError> {
        let row = sqlx::query("SELECT * FROM courses WHERE id = ?")
            .bind(course_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage)?;
        row.as_ref().map(course_from_row).transpose()
    }

    async fn set_course_status(
        &mut self,
        course_id: CourseId,
        status: CourseStatus,
    ) -> Result<(), ModerationError> {
        sqlx::query("UPDATE courses SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(course_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn get_user(&mut self, user_id: UserId) -> Result<Option<UserAccount>, ModerationError> {
        fetch_user(&mut *self.tx, user_id).await
    }

    async fn write_ban(&mut self, user_id: UserId, ban: &BanState) -> Result<(), ModerationError> {
        sqlx::query("UPDATE users SET banned = ?, ban_reason = ?, ban_expires_at = ? WHERE id = ?")
            .bind(ban.banned)
            .bind(&ban.reason)
            .bind(ban.expires_at.map(ts))
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn list_expired_bans(&mut self, now: DateTime<Utc>) -> Result<Vec<UserId>, ModerationError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM users WHERE ban_expires_at IS NOT NULL AND ban_expires_at <= ? ORDER BY id",
        )
        .bind(ts(now))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(ids)
    }

    async fn insert_audit_entry(&mut self, entry: &NewAuditEntry) -> Result<AuditEntryId, ModerationError> {
        let snapshot = serde_json::to_string(&entry.snapshot)
            .map_err(|e| ModerationError::Storage(format!("unserializable audit snapshot: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (admin_id, category, action, report_id, target_id, snapshot, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.admin_id)
        .bind(entry.category.as_str())
        .bind(entry.action.as_str())
        .bind(entry.report_id)
        .bind(entry.target.id())
        .bind(snapshot)
        .bind(ts(entry.created_at))
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;

        Ok(result.last_insert_rowid())
    }

    async fn purge_resolved_reports(&mut self, category: ReportCategory) -> Result<u64, ModerationError> {
        let result = sqlx::query(
            r#"
            DELETE FROM reports
            WHERE status = 'RESOLVED'
              AND category = ?1
              AND (
                EXISTS (SELECT 1 FROM audit_log a WHERE a.report_id = reports.id)
                OR EXISTS (
                    SELECT 1 FROM audit_log a
                    WHERE a.category = reports.category
                      AND a.target_id = reports.target_id
                      AND a.created_at >= reports.created_at
                )
              )
            "#,
        )
        .bind(category.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), ModerationError> {
        self.tx.commit().await.map_err(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::testkit::{admin, student, Harness, AUTHOR};
    use crate::core::moderation::{
        ModerationConfig, ResolutionAction, ResolutionSummary, SubmitOutcome,
    };
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn on_disk(dir: &tempfile::TempDir) -> Arc<Harness<SqliteModerationStore>> {
        let url = format!("sqlite://{}", dir.path().join("moderation.db").display());
        let store = SqliteModerationStore::connect(&url, 8).await.unwrap();
        Arc::new(Harness::with_sqlite_store(store, ModerationConfig::default()).await)
    }

    /// File a report from each of `reporters` on `target`, all at once.
    fn report_wave(
        h: &Arc<Harness<SqliteModerationStore>>,
        target: ReportTarget,
        reporters: std::ops::RangeInclusive<UserId>,
    ) -> Vec<tokio::task::JoinHandle<Result<SubmitOutcome, ModerationError>>> {
        reporters
            .map(|reporter| {
                let h = h.clone();
                tokio::spawn(async move { h.reports.submit(student(reporter), target, "spam").await })
            })
            .collect()
    }

    async fn expect_created(
        wave: Vec<tokio::task::JoinHandle<Result<SubmitOutcome, ModerationError>>>,
    ) {
        for task in wave {
            let outcome = task.await.unwrap().unwrap();
            assert!(matches!(outcome, SubmitOutcome::Created { .. }), "got {:?}", outcome);
        }
    }

    /// Every report the resolution counted is RESOLVED; the rest arrived after its commit.
    async fn assert_resolution_is_consistent(
        h: &Harness<SqliteModerationStore>,
        summary: &ResolutionSummary,
        filed: usize,
    ) {
        let reports = h.store.reports_for_target(summary.target).await.unwrap();
        assert_eq!(reports.len(), filed);
        let resolved = reports.iter().filter(|r| r.status == ReportStatus::Resolved).count();
        assert_eq!(summary.reports_resolved as usize, resolved);
        assert!(reports
            .iter()
            .filter(|r| r.status == ReportStatus::Resolved)
            .all(|r| r.resolved_by == Some(admin().user_id)));

        let entry = h.store.get_audit_entry(summary.audit_entry_id).await.unwrap().unwrap();
        assert_eq!(entry.snapshot.reports_resolved as usize, resolved);
        let content = h.store.get_content(summary.target.id()).await.unwrap().unwrap();
        assert_eq!(content.visibility, Visibility::Deleted);
    }

    #[test]
    fn timestamps_round_trip_and_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 4, 15, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::microseconds(1_500_250);
        assert!(ts(early) < ts(late));
        assert_eq!(ts(early).len(), ts(late).len());
        assert_eq!(parse_ts(&ts(late)).unwrap(), late);
        assert!(parse_ts("yesterday").is_err());
    }

    #[tokio::test]
    async fn replies_are_flattened_to_the_thread_root() {
        let h = Harness::sqlite(ModerationConfig::default()).await;
        let root = h.comment("question").await;
        let answer = h.reply(2, Some(root.id), "answer").await;
        let nested = h.reply(3, Some(answer.id), "thanks").await;

        assert_eq!(answer.parent_id, Some(root.id));
        assert_eq!(nested.parent_id, Some(root.id));
        let stored = h.store.get_content(nested.id).await.unwrap().unwrap();
        assert_eq!(stored.thread_root(), root.id);

        let missing = h
            .store
            .post_comment(&NewComment {
                author_id: AUTHOR,
                reply_to: Some(4242),
                lesson_id: None,
                course_id: None,
                body: "orphan".to_string(),
                created_at: Utc::now(),
            })
            .await;
        assert!(matches!(missing, Err(ModerationError::NotFound(_))));
    }

    #[tokio::test]
    async fn unique_index_turns_second_insert_into_duplicate() {
        let h = Harness::sqlite(ModerationConfig::default()).await;
        let comment = h.comment("spam spam").await;
        let report = NewReport {
            reporter_id: 2,
            target: ReportTarget::Content(comment.id),
            reason: "spam".to_string(),
            created_at: Utc::now(),
        };

        let mut tx = h.store.begin().await.unwrap();
        assert!(matches!(tx.insert_report(&report).await.unwrap(), InsertOutcome::Created(_)));
        assert_eq!(tx.insert_report(&report).await.unwrap(), InsertOutcome::Duplicate);
        tx.commit().await.unwrap();

        let rows = h.store.reports_for_target(report.target).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let h = Harness::sqlite(ModerationConfig::default()).await;
        let comment = h.comment("draft").await;
        {
            let mut tx = h.store.begin().await.unwrap();
            tx.set_content_visibility(comment.id, Visibility::Deleted).await.unwrap();
        }

        let stored = h.store.get_content(comment.id).await.unwrap().unwrap();
        assert_eq!(stored.visibility, Visibility::Visible);
    }

    #[tokio::test]
    async fn resolution_survives_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("moderation.db").display());

        let store = SqliteModerationStore::connect(&url, 2).await.unwrap();
        let h = Harness::with_sqlite_store(store, ModerationConfig::default()).await;
        let comment = h.comment("buy followers here").await;
        let report_id = h
            .reports
            .submit(student(2), ReportTarget::Content(comment.id), "spam")
            .await
            .unwrap()
            .into_result()
            .unwrap();
        let summary = h
            .resolutions
            .resolve(admin(), report_id, ResolutionAction::DeleteContent)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        h.store.pool().close().await;
        drop(h);

        let reopened = SqliteModerationStore::connect(&url, 1).await.unwrap();
        let entry = reopened.get_audit_entry(summary.audit_entry_id).await.unwrap().unwrap();
        assert_eq!(entry.action, AuditAction::DeleteContent);
        assert_eq!(entry.report_id, Some(report_id));
        let snapshot = entry.snapshot.content.as_ref().unwrap();
        assert_eq!(snapshot.body, "buy followers here");
        assert_eq!(snapshot.visibility, Visibility::Visible);

        let content = reopened.get_content(comment.id).await.unwrap().unwrap();
        assert_eq!(content.visibility, Visibility::Deleted);
        let report = reopened.get_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Resolved);
        assert_eq!(report.resolved_by, Some(admin().user_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resolution_races_incoming_reports() {
        let dir = tempfile::tempdir().unwrap();
        let h = on_disk(&dir).await;

        for round in 0..5 {
            let comment = h.comment(&format!("wave {}", round)).await;
            let target = ReportTarget::Content(comment.id);
            let first = h
                .reports
                .submit(student(2), target, "spam")
                .await
                .unwrap()
                .into_result()
                .unwrap();

            let wave = report_wave(&h, target, 3..=8);
            let resolution = {
                let h = h.clone();
                tokio::spawn(async move {
                    h.resolutions
                        .resolve(admin(), first, ResolutionAction::DeleteContent)
                        .await
                })
            };

            expect_created(wave).await;
            let summary = resolution.await.unwrap().unwrap().into_result().unwrap();
            assert_eq!(summary.report_id, Some(first));
            assert_resolution_is_consistent(&h, &summary, 7).await;

            h.clock.advance(chrono::Duration::seconds(61));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn direct_block_races_incoming_reports() {
        let dir = tempfile::tempdir().unwrap();
        let h = on_disk(&dir).await;

        for round in 0..5 {
            let comment = h.comment(&format!("wave {}", round)).await;
            let target = ReportTarget::Content(comment.id);

            let wave = report_wave(&h, target, 2..=8);
            let block = {
                let h = h.clone();
                tokio::spawn(async move { h.resolutions.direct_block(admin(), target, "spam wave").await })
            };

            expect_created(wave).await;
            let summary = block.await.unwrap().unwrap();
            assert_eq!(summary.report_id, None);
            assert_resolution_is_consistent(&h, &summary, 7).await;

            h.clock.advance(chrono::Duration::seconds(61));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lazy_expiry_races_incoming_reports() {
        let dir = tempfile::tempdir().unwrap();
        let h = on_disk(&dir).await;

        for round in 0..5 {
            let expires = h.bans.expiry_for(Some(1));
            h.bans.apply_ban(AUTHOR, "spam", expires).await.unwrap();
            h.clock.advance(chrono::Duration::days(2));

            let comment = h.comment(&format!("wave {}", round)).await;
            let wave = report_wave(&h, ReportTarget::Content(comment.id), 2..=8);
            let check = {
                let h = h.clone();
                tokio::spawn(async move { h.bans.is_effectively_banned(AUTHOR).await })
            };

            expect_created(wave).await;
            assert!(!check.await.unwrap().unwrap());
            let user = h.store.get_user(AUTHOR).await.unwrap().unwrap();
            assert!(user.ban.is_clear());
        }
    }
}
