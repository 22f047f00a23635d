// This is the entry point of the moderation engine.
//
// **Architecture Overview:**
// - `core/` = Business logic (storage-agnostic)
// - `infra/` = Implementations of core traits (SQLite, push transport, rate limiter)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Run the background sweeps until Ctrl-C
//
// Request handling (reports, resolutions, queries) is embedded by the host
// application through the library; this binary is the maintenance process.

use anyhow::Context;
use moderation_engine::core::clock::{Clock, SystemClock};
use moderation_engine::core::moderation::{
    BanLifecycleManager, ModerationConfig, ModerationStore, RetentionService,
};
use moderation_engine::core::notifications::NotificationFanout;
use moderation_engine::infra::moderation::SqliteModerationStore;
use moderation_engine::infra::notifications::{BroadcastTransport, SqliteNotificationStore};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/moderation.db?mode=rwc";
const PUSH_CHANNEL_CAPACITY: usize = 1024;

/// Read `MODERATION_<name>`, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(format!("MODERATION_{}", name))
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn load_config() -> ModerationConfig {
    let defaults = ModerationConfig::default();
    ModerationConfig {
        suppression_threshold: env_or("SUPPRESSION_THRESHOLD", defaults.suppression_threshold),
        admin_alert_threshold: env_or("ADMIN_ALERT_THRESHOLD", defaults.admin_alert_threshold),
        rate_limit_max_reports: env_or("RATE_LIMIT_MAX_REPORTS", defaults.rate_limit_max_reports),
        rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs),
        push_batch_size: env_or("PUSH_BATCH_SIZE", defaults.push_batch_size),
        push_timeout_ms: env_or("PUSH_TIMEOUT_MS", defaults.push_timeout_ms),
        max_reason_len: env_or("MAX_REASON_LEN", defaults.max_reason_len),
        max_ban_days: env_or("MAX_BAN_DAYS", defaults.max_ban_days),
        ban_sweep_interval_secs: env_or("BAN_SWEEP_INTERVAL_SECS", defaults.ban_sweep_interval_secs),
        retention_sweep_interval_secs: env_or(
            "RETENTION_SWEEP_INTERVAL_SECS",
            defaults.retention_sweep_interval_secs,
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config();
    let database_url =
        std::env::var("MODERATION_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    if database_url == DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data").context("Failed to create data directory for SQLite files")?;
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let store = Arc::new(
        SqliteModerationStore::connect(&database_url, 5)
            .await
            .with_context(|| format!("Failed to open moderation database at {}", database_url))?,
    );
    let notification_store = SqliteNotificationStore::new(store.pool().clone());
    notification_store
        .migrate()
        .await
        .context("Failed to migrate notifications table")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport = Arc::new(BroadcastTransport::new(PUSH_CHANNEL_CAPACITY));
    let fanout = Arc::new(NotificationFanout::new(
        Arc::new(notification_store),
        transport,
        clock.clone(),
        config.push_batch_size,
        Duration::from_millis(config.push_timeout_ms),
    ));
    let bans = Arc::new(BanLifecycleManager::new(
        store.clone(),
        fanout,
        clock.clone(),
        &config,
    ));
    let retention = Arc::new(RetentionService::new(store.clone()));

    let pending = store
        .pending_summary()
        .await
        .context("Failed to read pending report counters")?;
    tracing::info!(
        pending_content = pending.pending_content_reports,
        pending_course = pending.pending_course_reports,
        hidden = pending.hidden_content,
        "🛡️ Moderation engine is ready"
    );

    // ========================================================================
    // BACKGROUND SWEEPS
    // ========================================================================

    if config.ban_sweep_interval_secs > 0 {
        let bans = Arc::clone(&bans);
        let period = Duration::from_secs(config.ban_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = bans.sweep_expired().await {
                    tracing::error!("Ban expiry sweep failed: {}", e);
                }
            }
        });
    }

    if config.retention_sweep_interval_secs > 0 {
        let retention = Arc::clone(&retention);
        let period = Duration::from_secs(config.retention_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = retention.sweep().await {
                    tracing::error!("Report retention sweep failed: {}", e);
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    store.pool().close().await;

    Ok(())
}
