use super::moderation_models::{AuditAction, ReportCategory};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================
// Each variant maps to a distinct reaction in the admin UI (refresh a stale
// queue, ask the user to slow down, retry), so callers match on them.

#[derive(Debug, Error, PartialEq)]
pub enum ModerationError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Admin capability required")]
    Unauthorized,

    #[error("Too many reports. Try again in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Action {action} is not valid for {category} reports")]
    InvalidAction {
        action: AuditAction,
        category: ReportCategory,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ModerationError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ModerationError::NotFound(what.to_string())
    }

    /// Transaction failures are safe to retry: every operation is idempotent
    /// on its own key (reporter+target for reports, report status for resolutions).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModerationError::Storage(_))
    }
}
