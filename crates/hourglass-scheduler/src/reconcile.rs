//! Bulk passes that bring live triggers back in line with the scheduled
//! job table.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};

use hourglass_core::JobKey;
use hourglass_records::{ScheduledJobRecord, ScheduledJobStore};

use crate::backend::ScheduledJobInfo;
use crate::error::{Result, SchedulerError};
use crate::manager::ScheduleManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationProcess {
    /// Schedule active records that have no live trigger yet.
    ScheduleAllNewJobs,
    /// Drop orphans, replace changed triggers, add missing ones.
    RescheduleAllJobs,
    /// Remove every dynamic trigger; static schedules stay.
    UnscheduleAllJobs,
}

/// What one pass did, by job count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub rescheduled: usize,
    pub unscheduled: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ReconciliationProcess {
    pub const ALL: [ReconciliationProcess; 3] = [
        ReconciliationProcess::ScheduleAllNewJobs,
        ReconciliationProcess::RescheduleAllJobs,
        ReconciliationProcess::UnscheduleAllJobs,
    ];

    /// Process name as it is invoked by name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationProcess::ScheduleAllNewJobs => "ScheduleAllNewJobsProcess",
            ReconciliationProcess::RescheduleAllJobs => "RescheduleAllJobsProcess",
            ReconciliationProcess::UnscheduleAllJobs => "UnscheduleAllJobsProcess",
        }
    }

    pub async fn run(
        &self,
        manager: &ScheduleManager,
        store: &dyn ScheduledJobStore,
    ) -> Result<ReconcileReport> {
        let live = live_dynamic_jobs(manager).await?;
        let report = match self {
            ReconciliationProcess::ScheduleAllNewJobs => {
                schedule_all_new(manager, store, &live).await?
            }
            ReconciliationProcess::RescheduleAllJobs => reschedule_all(manager, store, &live).await?,
            ReconciliationProcess::UnscheduleAllJobs => unschedule_all(manager, &live).await?,
        };
        info!(process = %self, ?report, "reconciliation finished");
        Ok(report)
    }
}

impl std::fmt::Display for ReconciliationProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReconciliationProcess {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SchedulerError::validation(format!("Unrecognized process [{s}]")))
    }
}

async fn live_dynamic_jobs(manager: &ScheduleManager) -> Result<HashMap<JobKey, ScheduledJobInfo>> {
    Ok(manager
        .query_scheduled()
        .await?
        .into_iter()
        .filter(|info| info.key.is_dynamic())
        .map(|info| (info.key.clone(), info))
        .collect())
}

fn keyed(records: Vec<ScheduledJobRecord>) -> Vec<(JobKey, ScheduledJobRecord)> {
    records
        .into_iter()
        .filter_map(|r| r.id.map(|id| (JobKey::for_scheduled_job(id), r)))
        .collect()
}

async fn schedule_all_new(
    manager: &ScheduleManager,
    store: &dyn ScheduledJobStore,
    live: &HashMap<JobKey, ScheduledJobInfo>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for (key, record) in keyed(store.list_active()?) {
        if live.contains_key(&key) {
            report.skipped += 1;
            continue;
        }
        match manager.setup_scheduled_job(&record).await {
            Ok(()) => report.scheduled += 1,
            Err(e) => {
                warn!(job = %record.describe(), error = %e, "scheduling new job failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

async fn reschedule_all(
    manager: &ScheduleManager,
    store: &dyn ScheduledJobStore,
    live: &HashMap<JobKey, ScheduledJobInfo>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let active = keyed(store.list_active()?);
    let active_ids: HashSet<i64> = active.iter().filter_map(|(_, r)| r.id).collect();

    for (key, info) in live {
        if key
            .scheduled_job_id()
            .is_some_and(|id| active_ids.contains(&id))
        {
            continue;
        }
        info!(job_key = %key, scheduler = %info.scheduler_name, "deleting job with no active scheduled job record");
        manager
            .unschedule_key(key, Some(&info.scheduler_name))
            .await?;
        report.unscheduled += 1;
    }

    for (key, record) in &active {
        let planned = match manager.plan_scheduled_job(record) {
            Ok(planned) => planned,
            Err(e) => {
                warn!(job = %record.describe(), error = %e, "scheduled job is not schedulable");
                report.failed += 1;
                if let Some(info) = live.get(key) {
                    info!(job_key = %key, "deleting job whose record no longer validates");
                    manager
                        .unschedule_key(key, Some(&info.scheduler_name))
                        .await?;
                    report.unscheduled += 1;
                }
                continue;
            }
        };

        let replacing = match live.get(key) {
            Some(info)
                if info.trigger == planned.trigger
                    && info.scheduler_name == planned.scheduler_name =>
            {
                report.skipped += 1;
                continue;
            }
            Some(info) => {
                info!(
                    job_key = %key,
                    from = %info.trigger,
                    to = %planned.trigger,
                    "re-scheduling job whose schedule changed"
                );
                true
            }
            None => false,
        };

        match manager.setup_scheduled_job(record).await {
            Ok(()) if replacing => report.rescheduled += 1,
            Ok(()) => report.scheduled += 1,
            Err(e) => {
                warn!(job = %record.describe(), error = %e, "rescheduling failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

async fn unschedule_all(
    manager: &ScheduleManager,
    live: &HashMap<JobKey, ScheduledJobInfo>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for (key, info) in live {
        manager
            .unschedule_key(key, Some(&info.scheduler_name))
            .await?;
        report.unscheduled += 1;
    }
    Ok(report)
}
