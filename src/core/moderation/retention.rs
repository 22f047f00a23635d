// Report retention - purge RESOLVED report rows once the audit log covers them.
//
// A report is only eligible when an audit entry references it or its target,
// so the audit log stays the record of what happened after the purge.

use super::moderation_error::ModerationError;
use super::moderation_models::{Principal, ReportCategory};
use super::moderation_store::{ModerationStore, ModerationTx};
use std::sync::Arc;

pub struct RetentionService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> RetentionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Admin-triggered cleanup for one category. Returns rows purged.
    pub async fn cleanup_resolved(
        &self,
        principal: Principal,
        category: ReportCategory,
    ) -> Result<u64, ModerationError> {
        if !principal.is_admin() {
            return Err(ModerationError::Unauthorized);
        }

        let purged = self.purge(category).await?;
        tracing::info!(admin_id = principal.user_id, %category, purged, "Resolved reports cleaned up");
        Ok(purged)
    }

    /// Periodic sweep over both categories.
    pub async fn sweep(&self) -> Result<u64, ModerationError> {
        let mut purged = 0;
        for category in [ReportCategory::Content, ReportCategory::Course] {
            purged += self.purge(category).await?;
        }
        if purged > 0 {
            tracing::info!(purged, "Report retention sweep finished");
        }
        Ok(purged)
    }

    async fn purge(&self, category: ReportCategory) -> Result<u64, ModerationError> {
        let mut tx = self.store.begin().await?;
        let purged = tx.purge_resolved_reports(category).await?;
        tx.commit().await?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::testkit::{admin, student, Harness, COURSE};
    use crate::core::moderation::{
        AuditFilter, ModerationConfig, PageRequest, ReportTarget, ResolutionAction,
    };

    #[tokio::test]
    async fn purges_only_audited_resolved_reports() {
        let h = Harness::in_memory(ModerationConfig::default()).await;
        let resolved = h.comment("resolved").await;
        let pending = h.comment("pending").await;
        let mut first = None;
        for reporter in 2..=3 {
            let id = h
                .reports
                .submit(student(reporter), ReportTarget::Content(resolved.id), "spam")
                .await
                .unwrap()
                .into_result()
                .unwrap();
            first.get_or_insert(id);
        }
        h.reports
            .submit(student(4), ReportTarget::Content(pending.id), "spam")
            .await
            .unwrap();
        let summary = h
            .resolutions
            .resolve(admin(), first.unwrap(), ResolutionAction::DeleteContent)
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(
            h.retention.cleanup_resolved(admin(), ReportCategory::Content).await.unwrap(),
            2
        );
        assert_eq!(
            h.retention.cleanup_resolved(admin(), ReportCategory::Content).await.unwrap(),
            0
        );

        assert!(h
            .store
            .reports_for_target(ReportTarget::Content(resolved.id))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            h.store
                .reports_for_target(ReportTarget::Content(pending.id))
                .await
                .unwrap()
                .len(),
            1
        );

        // The audit entry outlives the purged rows.
        let entry = h.queries.audit_entry(admin(), summary.audit_entry_id).await.unwrap();
        assert_eq!(entry.report_id, first);
        assert_eq!(entry.snapshot.report_reason.as_deref(), Some("spam"));
        let log = h
            .queries
            .audit_log(admin(), &AuditFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(log.total, 1);
    }

    #[tokio::test]
    async fn cleanup_is_scoped_by_category_and_admin_only() {
        let h = Harness::in_memory(ModerationConfig::default()).await;
        let id = h
            .reports
            .submit(student(2), ReportTarget::Course(COURSE), "scam")
            .await
            .unwrap()
            .into_result()
            .unwrap();
        h.resolutions
            .resolve(admin(), id, ResolutionAction::Ignore)
            .await
            .unwrap();

        assert_eq!(
            h.retention.cleanup_resolved(student(2), ReportCategory::Course).await,
            Err(ModerationError::Unauthorized)
        );
        assert_eq!(
            h.retention.cleanup_resolved(admin(), ReportCategory::Content).await.unwrap(),
            0
        );
        assert_eq!(h.retention.sweep().await.unwrap(), 1);
        assert_eq!(h.retention.sweep().await.unwrap(), 0);
    }
}
