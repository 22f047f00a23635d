// Notification domain models.
//
// A notification is persisted once per recipient and never mutated here;
// read/dismiss state belongs to the inbox feature, not to moderation.

use crate::core::moderation::{LessonId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type NotificationId = i64;

/// Event pushed with every persisted notification.
pub const EVENT_NOTIFICATION: &str = "notification:new";
/// "Something in this lesson changed, re-fetch". No payload semantics.
pub const EVENT_CONTENT_CHANGED: &str = "content:changed";
/// Admin queues should reload.
pub const EVENT_QUEUE_CHANGED: &str = "moderation:queue_changed";
/// Connected sessions of the user must drop to the banned screen.
pub const EVENT_ACCOUNT_BANNED: &str = "account:banned";
pub const EVENT_ACCOUNT_UNBANNED: &str = "account:unbanned";

/// Pub/sub topic on the real-time transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Private channel of one user
    User(UserId),
    /// Broadcast to the admin pool
    Admins,
    /// UI refresh signal for everyone viewing a lesson
    Room(LessonId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{}", id),
            Topic::Admins => write!(f, "admins"),
            Topic::Room(id) => write!(f, "room:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    ReportAlert,
    ContentRemoved,
    AccountBanned,
    AccountUnbanned,
    CourseBlocked,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReportAlert => "report_alert",
            Self::ContentRemoved => "content_removed",
            Self::AccountBanned => "account_banned",
            Self::AccountUnbanned => "account_unbanned",
            Self::CourseBlocked => "course_blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "report_alert" => Some(Self::ReportAlert),
            "content_removed" => Some(Self::ContentRemoved),
            "account_banned" => Some(Self::AccountBanned),
            "account_unbanned" => Some(Self::AccountUnbanned),
            "course_blocked" => Some(Self::CourseBlocked),
            _ => None,
        }
    }
}

/// Recipient-independent part of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    /// Deep-link target and other structured context
    pub metadata: serde_json::Value,
}

impl NotificationDraft {
    pub fn new(
        category: NotificationCategory,
        title: impl Into<String>,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            category,
            metadata,
        }
    }

    pub fn for_recipient(&self, recipient_id: UserId, created_at: DateTime<Utc>) -> NewNotification {
        NewNotification {
            recipient_id,
            title: self.title.clone(),
            message: self.message.clone(),
            category: self.category,
            metadata: self.metadata.clone(),
            created_at,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "message": self.message,
            "category": self.category.as_str(),
            "metadata": self.metadata,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// What happened to one fan-out call. Purely observational.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub persisted: usize,
    pub failed_batches: usize,
    pub failed_pushes: usize,
}

impl FanoutReport {
    pub fn is_clean(&self) -> bool {
        self.failed_batches == 0 && self.failed_pushes == 0
    }
}
