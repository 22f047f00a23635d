// Test wiring shared by the service and scenario tests.

use super::ban_service::BanLifecycleManager;
use super::moderation_models::{
    BanState, ContentItem, Course, CourseId, CourseStatus, ModerationConfig, NewComment,
    Principal, Role, UserAccount, UserId,
};
use super::moderation_store::{ContentCatalog, ModerationStore};
use super::query_service::ModerationQueryService;
use super::report_service::ReportService;
use super::resolution_service::ResolutionEngine;
use super::retention::RetentionService;
use crate::core::clock::{Clock, ManualClock};
use crate::core::notifications::{Notification, NotificationFanout, NotificationStore};
use crate::infra::moderation::{InMemoryModerationStore, SlidingWindowLimiter, SqliteModerationStore};
use crate::infra::notifications::{
    BroadcastTransport, InMemoryNotificationStore, PushMessage, SqliteNotificationStore,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const ADMIN: UserId = 99;
pub const SECOND_ADMIN: UserId = 98;
pub const INSTRUCTOR: UserId = 10;
pub const AUTHOR: UserId = 1;
pub const LESSON: i64 = 20;
pub const COURSE: CourseId = 300;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 15, 9, 0, 0).unwrap()
}

pub fn admin() -> Principal {
    Principal::new(ADMIN, Role::Admin)
}

pub fn student(id: UserId) -> Principal {
    Principal::new(id, Role::Student)
}

pub struct Harness<S: ModerationStore + ContentCatalog> {
    pub store: Arc<S>,
    pub clock: Arc<ManualClock>,
    pub notifications: Arc<dyn NotificationStore>,
    pub reports: ReportService<S>,
    pub bans: Arc<BanLifecycleManager<S>>,
    pub resolutions: ResolutionEngine<S>,
    pub queries: ModerationQueryService<S>,
    pub retention: RetentionService<S>,
    // Kept so pushes can be inspected; the transport needs at least one receiver.
    _transport: Arc<BroadcastTransport>,
    pushes: Mutex<broadcast::Receiver<PushMessage>>,
}

impl Harness<InMemoryModerationStore> {
    pub async fn in_memory(config: ModerationConfig) -> Self {
        let store = Arc::new(InMemoryModerationStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new(vec![SECOND_ADMIN, ADMIN]));
        Self::build(store, notifications, config).await
    }
}

impl Harness<SqliteModerationStore> {
    pub async fn sqlite(config: ModerationConfig) -> Self {
        let store = SqliteModerationStore::connect("sqlite::memory:", 1).await.unwrap();
        Self::with_sqlite_store(store, config).await
    }

    pub async fn with_sqlite_store(store: SqliteModerationStore, config: ModerationConfig) -> Self {
        let notifications = SqliteNotificationStore::new(store.pool().clone());
        notifications.migrate().await.unwrap();
        Self::build(Arc::new(store), Arc::new(notifications), config).await
    }
}

impl<S: ModerationStore + ContentCatalog> Harness<S> {
    async fn build(
        store: Arc<S>,
        notifications: Arc<dyn NotificationStore>,
        config: ModerationConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let transport = Arc::new(BroadcastTransport::new(1024));
        let pushes = Mutex::new(transport.subscribe());

        let fanout = Arc::new(NotificationFanout::new(
            notifications.clone(),
            transport.clone(),
            dyn_clock.clone(),
            config.push_batch_size,
            Duration::from_millis(config.push_timeout_ms),
        ));
        let limiter = Arc::new(SlidingWindowLimiter::from_config(&config));
        let bans = Arc::new(BanLifecycleManager::new(
            store.clone(),
            fanout.clone(),
            dyn_clock.clone(),
            &config,
        ));

        let harness = Self {
            reports: ReportService::new(store.clone(), limiter, fanout.clone(), dyn_clock.clone(), &config),
            resolutions: ResolutionEngine::new(
                store.clone(),
                bans.clone(),
                fanout,
                dyn_clock.clone(),
                &config,
            ),
            queries: ModerationQueryService::new(store.clone(), dyn_clock),
            retention: RetentionService::new(store.clone()),
            bans,
            store,
            clock,
            notifications,
            _transport: transport,
            pushes,
        };
        harness.seed_people().await;
        harness
    }

    async fn seed_people(&self) {
        let people = [
            (ADMIN, "Root Admin", Role::Admin),
            (SECOND_ADMIN, "Night Shift", Role::Admin),
            (INSTRUCTOR, "Instructor", Role::Instructor),
        ];
        for (id, name, role) in people {
            self.add_user(id, name, role).await;
        }
        for id in 1..=8 {
            self.add_user(id, &format!("student{}", id), Role::Student).await;
        }
        self.store
            .upsert_course(&Course {
                id: COURSE,
                owner_id: INSTRUCTOR,
                title: "Intro to Rust".to_string(),
                status: CourseStatus::Published,
            })
            .await
            .unwrap();
    }

    pub async fn add_user(&self, id: UserId, name: &str, role: Role) {
        self.store
            .upsert_user(&UserAccount {
                id,
                display_name: name.to_string(),
                role,
                ban: BanState::default(),
            })
            .await
            .unwrap();
    }

    /// A top-level comment by `AUTHOR` in `LESSON`.
    pub async fn comment(&self, body: &str) -> ContentItem {
        self.reply(AUTHOR, None, body).await
    }

    pub async fn reply(&self, author_id: UserId, reply_to: Option<i64>, body: &str) -> ContentItem {
        self.store
            .post_comment(&NewComment {
                author_id,
                reply_to,
                lesson_id: Some(LESSON),
                course_id: Some(COURSE),
                body: body.to_string(),
                created_at: self.clock.now(),
            })
            .await
            .unwrap()
    }

    pub async fn inbox(&self, user_id: UserId) -> Vec<Notification> {
        self.notifications.list_for_user(user_id, 100).await.unwrap()
    }

    /// Everything pushed since the last call.
    pub fn drain_pushes(&self) -> Vec<PushMessage> {
        let mut rx = self.pushes.lock().unwrap();
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}
