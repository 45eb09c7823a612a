// Reconciliation passes against a recording backend.

mod common;

use common::{harness, process_job};
use hourglass_core::JobKey;
use hourglass_records::params;
use hourglass_scheduler::{ReconcileReport, ReconciliationProcess};

#[tokio::test]
async fn schedule_all_new_jobs_twice_changes_nothing_the_second_time() {
    let h = harness();
    let a = h.store.insert(&process_job(60)).unwrap();
    let b = h.store.insert(&process_job(120)).unwrap();

    let first = ReconciliationProcess::ScheduleAllNewJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(first.scheduled, 2);
    assert_eq!(
        h.backend.keys(),
        vec![
            JobKey::for_scheduled_job(a.id.unwrap()),
            JobKey::for_scheduled_job(b.id.unwrap())
        ]
    );

    h.backend.clear_ops();
    let second = ReconciliationProcess::ScheduleAllNewJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(
        second,
        ReconcileReport {
            skipped: 2,
            ..ReconcileReport::default()
        }
    );
    assert!(h.backend.ops().is_empty(), "ops: {:?}", h.backend.ops());
}

#[tokio::test]
async fn schedule_all_new_jobs_only_adds_what_is_missing() {
    let h = harness();
    let a = h.store.insert(&process_job(60)).unwrap();
    h.manager.setup_scheduled_job(&a).await.unwrap();
    let b = h.store.insert(&process_job(60)).unwrap();
    h.backend.clear_ops();

    let report = ReconciliationProcess::ScheduleAllNewJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(report.scheduled, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        h.backend.ops(),
        vec![format!("schedule {}", JobKey::for_scheduled_job(b.id.unwrap()))]
    );
}

#[tokio::test]
async fn reschedule_all_replaces_changed_drops_orphans_and_adds_missing() {
    let h = harness();
    let unchanged = h.store.insert(&process_job(60)).unwrap();
    let changed = h.store.insert(&process_job(60)).unwrap();
    let deleted = h.store.insert(&process_job(60)).unwrap();
    ReconciliationProcess::ScheduleAllNewJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();

    h.store
        .update(&changed.clone().with_repeat_seconds(90))
        .unwrap();
    h.store.delete(deleted.id.unwrap()).unwrap();
    let added = h.store.insert(&process_job(30)).unwrap();
    h.backend.clear_ops();

    let report = ReconciliationProcess::RescheduleAllJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            scheduled: 1,
            rescheduled: 1,
            unscheduled: 1,
            skipped: 1,
            failed: 0,
        }
    );

    let key = |r: &hourglass_records::ScheduledJobRecord| JobKey::for_scheduled_job(r.id.unwrap());
    assert_eq!(
        h.backend.keys(),
        vec![key(&unchanged), key(&changed), key(&added)]
    );
    let ops = h.backend.ops();
    assert!(ops.contains(&format!("unschedule {}", key(&deleted))));
    assert!(ops.contains(&format!("schedule {}", key(&changed))));
    assert!(!ops.contains(&format!("schedule {}", key(&unchanged))));
}

#[tokio::test]
async fn reschedule_all_drops_jobs_made_inactive() {
    let h = harness();
    let job = h.store.insert(&process_job(60)).unwrap();
    h.manager.setup_scheduled_job(&job).await.unwrap();
    h.store.update(&job.clone().with_active(false)).unwrap();

    let report = ReconciliationProcess::RescheduleAllJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(report.unscheduled, 1);
    assert!(h.backend.keys().is_empty());
}

#[tokio::test]
async fn unschedule_all_leaves_static_schedules() {
    let h = harness();
    h.store.insert(&process_job(60)).unwrap();
    h.store.insert(&process_job(90)).unwrap();
    h.manager.setup_all_scheduled_jobs().await.unwrap();
    assert_eq!(h.backend.keys().len(), 6);

    let report = ReconciliationProcess::UnscheduleAllJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(report.unscheduled, 2);
    let remaining = h.backend.keys();
    assert_eq!(remaining.len(), 4);
    assert!(remaining.iter().all(|k| !k.is_dynamic()));
    assert!(h
        .manager
        .registrations()
        .await
        .iter()
        .all(|r| !r.key.is_dynamic()));
}

#[tokio::test]
async fn reschedule_all_takes_down_live_jobs_whose_record_no_longer_validates() {
    let h = harness();
    let job = h.store.insert(&process_job(60)).unwrap();
    h.manager.setup_scheduled_job(&job).await.unwrap();

    h.store
        .update(&job.clone().with_parameter(params::PROCESS_NAME, "nope"))
        .unwrap();
    h.backend.clear_ops();

    let report = ReconciliationProcess::RescheduleAllJobs
        .run(&h.manager, h.store.as_ref())
        .await
        .unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            unscheduled: 1,
            failed: 1,
            ..ReconcileReport::default()
        }
    );
    assert!(h.backend.keys().is_empty());
    assert_eq!(
        h.backend.ops(),
        vec![format!("unschedule {}", JobKey::for_scheduled_job(job.id.unwrap()))]
    );
}
