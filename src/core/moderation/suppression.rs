// Auto-suppression - hide content once enough users report it.
//
// The count is always re-read inside the submitting transaction after the
// insert, never taken from the caller, so two reporters racing each other
// both see the authoritative number.

use super::moderation_error::ModerationError;
use super::moderation_models::{LessonId, ModerationConfig, ReportTarget, Visibility};
use super::moderation_store::ModerationTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionOutcome {
    NoChange,
    Suppressed,
}

/// What the evaluator decided for one submitted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionCheck {
    pub pending_count: u32,
    pub outcome: SuppressionOutcome,
    /// First pending report of a cycle: page the admin pool
    pub admin_alert: bool,
    /// Lesson room to refresh if the item was hidden
    pub lesson_id: Option<LessonId>,
}

#[derive(Debug, Clone, Copy)]
pub struct AutoSuppressionEvaluator {
    suppression_threshold: u32,
    admin_alert_threshold: u32,
}

impl AutoSuppressionEvaluator {
    pub fn new(suppression_threshold: u32, admin_alert_threshold: u32) -> Self {
        Self {
            suppression_threshold: suppression_threshold.max(1),
            admin_alert_threshold: admin_alert_threshold.max(1),
        }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self::new(config.suppression_threshold, config.admin_alert_threshold)
    }

    /// Decide from an authoritative pending count and the current visibility.
    ///
    /// Only VISIBLE items are hidden, so reports beyond the threshold (or
    /// against already hidden/deleted items) never re-trigger the transition.
    pub fn decide(&self, pending_count: u32, visibility: Option<Visibility>) -> (SuppressionOutcome, bool) {
        let admin_alert = pending_count == self.admin_alert_threshold;
        let outcome = match visibility {
            Some(Visibility::Visible) if pending_count >= self.suppression_threshold => {
                SuppressionOutcome::Suppressed
            }
            _ => SuppressionOutcome::NoChange,
        };
        (outcome, admin_alert)
    }

    /// Recount and, if the threshold is crossed, hide the item inside `tx`.
    pub async fn on_report_submitted(
        &self,
        tx: &mut dyn ModerationTx,
        target: ReportTarget,
    ) -> Result<SuppressionCheck, ModerationError> {
        let pending_count = tx.count_pending_reports(target).await?;

        // Courses are never auto-hidden; they only raise the admin alert.
        let content = match target {
            ReportTarget::Content(content_id) => tx.get_content(content_id).await?,
            ReportTarget::Course(_) => None,
        };

        let (outcome, admin_alert) = self.decide(pending_count, content.as_ref().map(|c| c.visibility));

        if outcome == SuppressionOutcome::Suppressed {
            if let ReportTarget::Content(content_id) = target {
                tx.set_content_visibility(content_id, Visibility::Hidden).await?;
                tracing::info!(
                    content_id,
                    pending_count,
                    threshold = self.suppression_threshold,
                    "Content auto-suppressed"
                );
            }
        }

        Ok(SuppressionCheck {
            pending_count,
            outcome,
            admin_alert,
            lesson_id: content.and_then(|c| c.lesson_id),
        })
    }
}
