// Notification fan-out - durable notification rows plus best-effort real-time push.
//
// Everything in here runs AFTER the moderation transaction committed.
// Failures are logged and counted in a `FanoutReport`; they never turn into
// a `ModerationError`.

use super::notification_models::{
    FanoutReport, NewNotification, Notification, NotificationDraft, NotificationId, Topic,
    EVENT_NOTIFICATION,
};
use crate::core::clock::Clock;
use crate::core::moderation::UserId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification storage error: {0}")]
    StorageError(String),

    #[error("Push transport error: {0}")]
    TransportError(String),

    #[error("Push timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// PORTS
// ============================================================================

/// Durable side of the notification channel.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a batch, returning ids in input order.
    async fn persist(
        &self,
        notifications: &[NewNotification],
    ) -> Result<Vec<NotificationId>, NotificationError>;

    /// Everyone in the admin pool.
    async fn admin_ids(&self) -> Result<Vec<UserId>, NotificationError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError>;
}

/// Real-time pub/sub transport. At-least-once, no ordering across topics.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Publish one event to every topic in `topics`.
    async fn push(
        &self,
        topics: &[Topic],
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotificationError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct NotificationFanout {
    store: Arc<dyn NotificationStore>,
    transport: Arc<dyn PushTransport>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    push_timeout: Duration,
}

impl NotificationFanout {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        transport: Arc<dyn PushTransport>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
        push_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            batch_size: batch_size.max(1),
            push_timeout,
        }
    }

    /// Notify a single user: persist, then push on their private topic.
    pub async fn notify(&self, recipient_id: UserId, draft: &NotificationDraft) -> FanoutReport {
        self.notify_batch(&[recipient_id], draft).await
    }

    /// Notify many users, `batch_size` recipients per persist/push call.
    ///
    /// A failing batch is logged and skipped; later batches still go out.
    pub async fn notify_batch(&self, recipients: &[UserId], draft: &NotificationDraft) -> FanoutReport {
        let mut report = FanoutReport::default();
        let now = self.clock.now();
        let payload = draft.payload();

        for (index, chunk) in recipients.chunks(self.batch_size).enumerate() {
            let rows: Vec<NewNotification> = chunk
                .iter()
                .map(|recipient| draft.for_recipient(*recipient, now))
                .collect();

            match self.store.persist(&rows).await {
                Ok(ids) => report.persisted += ids.len(),
                Err(e) => {
                    tracing::warn!(
                        batch = index,
                        recipients = chunk.len(),
                        category = draft.category.as_str(),
                        "Failed to persist notification batch: {}",
                        e
                    );
                    report.failed_batches += 1;
                    continue;
                }
            }

            let topics: Vec<Topic> = chunk.iter().map(|id| Topic::User(*id)).collect();
            if !self.push_topics(&topics, EVENT_NOTIFICATION, &payload).await {
                report.failed_pushes += 1;
            }
        }

        report
    }

    /// Notify the whole admin pool: one row per admin, one push on the `admins` topic.
    pub async fn notify_admins(&self, draft: &NotificationDraft) -> FanoutReport {
        let admins = match self.store.admin_ids().await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::warn!("Failed to load admin pool for notification: {}", e);
                return FanoutReport {
                    failed_batches: 1,
                    ..Default::default()
                };
            }
        };

        let now = self.clock.now();
        let mut report = FanoutReport::default();
        for (index, chunk) in admins.chunks(self.batch_size).enumerate() {
            let rows: Vec<NewNotification> = chunk
                .iter()
                .map(|admin| draft.for_recipient(*admin, now))
                .collect();
            match self.store.persist(&rows).await {
                Ok(ids) => report.persisted += ids.len(),
                Err(e) => {
                    tracing::warn!(batch = index, "Failed to persist admin notifications: {}", e);
                    report.failed_batches += 1;
                }
            }
        }

        if !self
            .push_topics(&[Topic::Admins], EVENT_NOTIFICATION, &draft.payload())
            .await
        {
            report.failed_pushes += 1;
        }
        report
    }

    /// Push a bare event (no persisted row). Returns whether the push went through.
    pub async fn push_event(&self, topic: Topic, event: &str, payload: serde_json::Value) -> bool {
        self.push_topics(&[topic], event, &payload).await
    }

    async fn push_topics(&self, topics: &[Topic], event: &str, payload: &serde_json::Value) -> bool {
        let result = tokio::time::timeout(
            self.push_timeout,
            self.transport.push(topics, event, payload),
        )
        .await
        .unwrap_or(Err(NotificationError::Timeout(self.push_timeout)));

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    event,
                    topics = topics.len(),
                    first_topic = %topics.first().map(|t| t.to_string()).unwrap_or_default(),
                    "Best-effort push failed: {}",
                    e
                );
                false
            }
        }
    }

    pub async fn inbox(&self, user_id: UserId, limit: usize) -> Result<Vec<Notification>, NotificationError> {
        self.store.list_for_user(user_id, limit).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
