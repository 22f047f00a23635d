// SQLite-backed notification store.
//
// Shares the moderation database: the admin pool is read straight from the
// `users` table, so it must be migrated after `SqliteModerationStore`.

use crate::core::moderation::UserId;
use crate::core::notifications::{
    NewNotification, Notification, NotificationCategory, NotificationError, NotificationId,
    NotificationStore,
};
use crate::infra::moderation::sqlite_store::{parse_ts, ts};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};

fn storage(e: impl std::fmt::Display) -> NotificationError {
    NotificationError::StorageError(e.to_string())
}

pub struct SqliteNotificationStore {
    pool: Pool<Sqlite>,
}

impl SqliteNotificationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), NotificationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                category TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_recipient
                ON notifications(recipient_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn persist(
        &self,
        notifications: &[NewNotification],
    ) -> Result<Vec<NotificationId>, NotificationError> {
        // One transaction per batch: a batch lands whole or not at all.
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut ids = Vec::with_capacity(notifications.len());

        for notification in notifications {
            let result = sqlx::query(
                r#"
                INSERT INTO notifications (recipient_id, title, message, category, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(notification.recipient_id)
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(notification.category.as_str())
            .bind(notification.metadata.to_string())
            .bind(ts(notification.created_at))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await.map_err(storage)?;
        Ok(ids)
    }

    async fn admin_ids(&self) -> Result<Vec<UserId>, NotificationError> {
        sqlx::query_scalar("SELECT id FROM users WHERE role = 'ADMIN' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let category: String = row.get("category");
            let metadata: String = row.get("metadata");
            let created_at: String = row.get("created_at");
            notifications.push(Notification {
                id: row.get("id"),
                recipient_id: row.get("recipient_id"),
                title: row.get("title"),
                message: row.get("message"),
                category: NotificationCategory::parse(&category)
                    .ok_or_else(|| storage(format!("unknown notification category {:?}", category)))?,
                metadata: serde_json::from_str(&metadata).map_err(storage)?,
                created_at: parse_ts(&created_at).map_err(storage)?,
            });
        }
        Ok(notifications)
    }
}
