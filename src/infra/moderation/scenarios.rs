// End-to-end moderation scenarios, run against both store implementations.

use crate::core::clock::Clock;
use crate::core::moderation::testkit::{admin, student, Harness, ADMIN, AUTHOR};
use crate::core::moderation::{
    AuditAction, AuditFilter, ContentCatalog, ModerationConfig, ModerationStore, PageRequest,
    ReportCategory, ReportId, ReportStatus, ReportTarget, ResolutionAction, SubmitOutcome,
    Visibility,
};
use crate::core::notifications::NotificationCategory;
use chrono::Duration;

/// Three users report one comment: hidden after the third, one admin alert.
async fn three_reports_hide_comment<S: ModerationStore + ContentCatalog>(
    h: &Harness<S>,
) -> Vec<ReportId> {
    let comment = h.comment("you are all idiots").await;
    let target = ReportTarget::Content(comment.id);

    let mut ids = Vec::new();
    let mut alerts = 0;
    for reporter in 2..=4 {
        match h.reports.submit(student(reporter), target, "insult").await.unwrap() {
            SubmitOutcome::Created { report_id, admin_alerted, .. } => {
                ids.push(report_id);
                if admin_alerted {
                    alerts += 1;
                }
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    let stored = h.store.get_content(comment.id).await.unwrap().unwrap();
    assert_eq!(stored.visibility, Visibility::Hidden);
    assert_eq!(alerts, 1);
    let admin_inbox = h.inbox(ADMIN).await;
    assert_eq!(admin_inbox.len(), 1);
    assert_eq!(admin_inbox[0].category, NotificationCategory::ReportAlert);
    ids
}

/// DELETE resolves all three reports, writes one audit entry, notifies the author once.
async fn delete_resolution<S: ModerationStore + ContentCatalog>(h: &Harness<S>) {
    let ids = three_reports_hide_comment(h).await;
    let report = h.store.get_report(ids[0]).await.unwrap().unwrap();

    h.resolutions
        .resolve(admin(), ids[0], ResolutionAction::DeleteContent)
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let content = h.store.get_content(report.target.id()).await.unwrap().unwrap();
    assert_eq!(content.visibility, Visibility::Deleted);
    let reports = h.store.reports_for_target(report.target).await.unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.status == ReportStatus::Resolved));

    let deletes = AuditFilter {
        action: Some(AuditAction::DeleteContent),
        ..AuditFilter::default()
    };
    let log = h.queries.audit_log(admin(), &deletes, PageRequest::default()).await.unwrap();
    assert_eq!(log.total, 1);
    assert!(!log.items[0].snapshot.reason.is_empty());

    let inbox = h.inbox(AUTHOR).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].category, NotificationCategory::ContentRemoved);
}

/// BAN_USER for 7 days, then lazy expiry 8 days later.
async fn ban_resolution<S: ModerationStore + ContentCatalog>(h: &Harness<S>) {
    let ids = three_reports_hide_comment(h).await;
    let banned_at = h.clock.now();

    let summary = h
        .resolutions
        .resolve(
            admin(),
            ids[2],
            ResolutionAction::BanUser {
                reason: "harassment".to_string(),
                duration_days: Some(7),
            },
        )
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let user = h.store.get_user(AUTHOR).await.unwrap().unwrap();
    assert!(user.ban.banned);
    let expires = user.ban.expires_at.unwrap();
    assert!((expires - (banned_at + Duration::days(7))).num_seconds().abs() <= 1);

    let entry = h.queries.audit_entry(admin(), summary.audit_entry_id).await.unwrap();
    assert_eq!(entry.action, AuditAction::BanUser);
    assert_eq!(entry.snapshot.ban_duration_days, Some(7));

    h.clock.advance(Duration::days(8));
    assert!(!h.bans.is_effectively_banned(AUTHOR).await.unwrap());
    let user = h.store.get_user(AUTHOR).await.unwrap().unwrap();
    assert!(!user.ban.banned);
    assert!(user.ban.reason.is_none());
    assert!(user.ban.expires_at.is_none());
}

/// IGNORE on a hidden comment with five pending reports.
async fn ignore_resolution<S: ModerationStore + ContentCatalog>(h: &Harness<S>) {
    let comment = h.comment("controversial but fine").await;
    let target = ReportTarget::Content(comment.id);
    let mut ids = Vec::new();
    for reporter in 2..=6 {
        ids.push(
            h.reports
                .submit(student(reporter), target, "disagree")
                .await
                .unwrap()
                .into_result()
                .unwrap(),
        );
    }
    assert_eq!(
        h.store.get_content(comment.id).await.unwrap().unwrap().visibility,
        Visibility::Hidden
    );

    h.resolutions
        .resolve(admin(), ids[4], ResolutionAction::Ignore)
        .await
        .unwrap();

    assert_eq!(
        h.store.get_content(comment.id).await.unwrap().unwrap().visibility,
        Visibility::Visible
    );
    let reports = h.store.reports_for_target(target).await.unwrap();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.status == ReportStatus::Resolved));
    let user = h.store.get_user(AUTHOR).await.unwrap().unwrap();
    assert!(user.ban.is_clear());
    assert!(h.inbox(AUTHOR).await.is_empty());
}

/// Cleanup twice: the second call purges nothing.
async fn cleanup_twice<S: ModerationStore + ContentCatalog>(h: &Harness<S>) {
    let ids = three_reports_hide_comment(h).await;
    let summary = h
        .resolutions
        .resolve(admin(), ids[0], ResolutionAction::DeleteContent)
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let first = h.retention.cleanup_resolved(admin(), ReportCategory::Content).await.unwrap();
    let second = h.retention.cleanup_resolved(admin(), ReportCategory::Content).await.unwrap();
    assert_eq!(first, 3);
    assert_eq!(second, 0);

    let entry = h.queries.audit_entry(admin(), summary.audit_entry_id).await.unwrap();
    assert_eq!(entry.report_id, Some(ids[0]));
    assert!(h.store.get_report(ids[0]).await.unwrap().is_none());
}

macro_rules! both_stores {
    ($($name:ident => $scenario:ident),* $(,)?) => {
        mod in_memory {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    let h = Harness::in_memory(ModerationConfig::default()).await;
                    $scenario(&h).await;
                }
            )*
        }

        mod sqlite {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    let h = Harness::sqlite(ModerationConfig::default()).await;
                    $scenario(&h).await;
                }
            )*
        }
    };
}

both_stores! {
    reports_hide_comment_and_alert_once => three_reports_hide_comment,
    delete_resolves_all_reports => delete_resolution,
    ban_expires_lazily => ban_resolution,
    ignore_restores_hidden_comment => ignore_resolution,
    cleanup_twice_purges_once => cleanup_twice,
}
