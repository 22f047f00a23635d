// In-memory notification store for tests.

use crate::core::moderation::UserId;
use crate::core::notifications::{
    NewNotification, Notification, NotificationError, NotificationId, NotificationStore,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct InMemoryNotificationStore {
    rows: DashMap<NotificationId, Notification>,
    next_id: AtomicI64,
    admins: Vec<UserId>,
}

impl InMemoryNotificationStore {
    /// `admins` is the fixed admin pool returned by `admin_ids`.
    pub fn new(admins: Vec<UserId>) -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(0),
            admins,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn persist(
        &self,
        notifications: &[NewNotification],
    ) -> Result<Vec<NotificationId>, NotificationError> {
        let mut ids = Vec::with_capacity(notifications.len());
        for n in notifications {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.rows.insert(
                id,
                Notification {
                    id,
                    recipient_id: n.recipient_id,
                    title: n.title.clone(),
                    message: n.message.clone(),
                    category: n.category,
                    metadata: n.metadata.clone(),
                    created_at: n.created_at,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn admin_ids(&self) -> Result<Vec<UserId>, NotificationError> {
        Ok(self.admins.clone())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        let mut rows: Vec<Notification> = self
            .rows
            .iter()
            .filter(|entry| entry.recipient_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
