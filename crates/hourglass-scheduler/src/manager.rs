//! Schedule Manager: turns scheduled job records and static metadata
//! schedules into live backend triggers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use hourglass_core::JobKey;
use hourglass_records::{params, ScheduledJobRecord, ScheduledJobStore, ScheduledJobType};

use crate::backend::{ScheduledJobInfo, SchedulerRegistry};
use crate::dispatch::{FireTask, JobDispatcher, RunnableKind, SchedulableRunnable};
use crate::error::{Result, SchedulerError};
use crate::metadata::MetadataSource;
use crate::schedule::{ScheduleDefinition, Trigger};

/// Collaborators the manager is built from.
pub struct ManagerParts {
    pub metadata: Arc<dyn MetadataSource>,
    pub store: Arc<dyn ScheduledJobStore>,
    pub registry: SchedulerRegistry,
    pub dispatcher: Arc<JobDispatcher>,
    /// Matched against `variant_filters` of static schedules.
    pub environment: Option<String>,
}

/// A job the manager has handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub key: JobKey,
    pub trigger: Trigger,
    pub scheduler_name: String,
    pub runnable: SchedulableRunnable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupFailure {
    /// e.g. `process nightlyReport` or `scheduledJob 12 (label)`.
    pub entity: String,
    pub error: String,
}

/// Outcome of a bulk setup or check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupSummary {
    pub scheduled: Vec<JobKey>,
    pub failed: Vec<SetupFailure>,
}

impl SetupSummary {
    fn record(&mut self, entity: String, key: Option<JobKey>, result: Result<()>) {
        match result {
            Ok(()) => {
                if let Some(key) = key {
                    self.scheduled.push(key);
                }
            }
            Err(e) => {
                warn!(%entity, error = %e, "schedule setup failed");
                self.failed.push(SetupFailure {
                    entity,
                    error: e.to_string(),
                });
            }
        }
    }
}

pub struct ScheduleManager {
    metadata: Arc<dyn MetadataSource>,
    store: Arc<dyn ScheduledJobStore>,
    registry: SchedulerRegistry,
    dispatcher: Arc<JobDispatcher>,
    environment: Option<String>,
    registrations: Mutex<HashMap<JobKey, Registration>>,
}

impl ScheduleManager {
    pub fn new(parts: ManagerParts) -> Self {
        Self {
            metadata: parts.metadata,
            store: parts.store,
            registry: parts.registry,
            dispatcher: parts.dispatcher,
            environment: parts.environment,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &SchedulerRegistry {
        &self.registry
    }

    /// Validate one record and schedule it. Inactive records are unscheduled,
    /// and so are records that no longer validate: a failed setup never
    /// leaves an earlier trigger running.
    #[instrument(skip(self, record), fields(job = %record.describe()))]
    pub async fn setup_scheduled_job(&self, record: &ScheduledJobRecord) -> Result<()> {
        if !record.is_active {
            debug!("record inactive, unscheduling");
            return self.unschedule_job(record).await;
        }
        match self.plan_scheduled_job(record) {
            Ok(registration) => self.install(registration).await,
            Err(e) => {
                self.unschedule_job(record).await?;
                Err(e)
            }
        }
    }

    /// Everything `setup_scheduled_job` checks, without touching a backend.
    ///
    /// Errors come out in a fixed order: schedule, type, required parameters,
    /// entity lookup, static-schedule conflict, then scheduler and trigger.
    pub fn plan_scheduled_job(&self, record: &ScheduledJobRecord) -> Result<Registration> {
        if !record.has_schedule() {
            return Err(SchedulerError::validation("Missing a schedule"));
        }

        let job_type = match record.parsed_type() {
            None => return Err(SchedulerError::validation("Missing a type")),
            Some(Err(_)) => {
                return Err(SchedulerError::validation(format!(
                    "Unrecognized type [{}]",
                    record.job_type.as_deref().unwrap_or_default()
                )))
            }
            Some(Ok(t)) => t,
        };

        match job_type {
            ScheduledJobType::Process => self.check_process(record)?,
            ScheduledJobType::QueueProcessor => self.check_queue(record)?,
            ScheduledJobType::TableAutomations => self.check_table_automations(record)?,
        }

        let id = record.id.ok_or_else(|| {
            SchedulerError::validation("Scheduled job must be saved before it can be scheduled")
        })?;
        let key = JobKey::for_scheduled_job(id);

        let definition = ScheduleDefinition::from_record(record);
        let (scheduler_name, trigger) = self.resolve(&definition)?;

        let mut runnable = SchedulableRunnable::new(key.clone(), RunnableKind::from(job_type));
        for p in &record.job_parameters {
            runnable.parameters.insert(p.key.clone(), p.value.clone());
        }

        Ok(Registration {
            key,
            trigger,
            scheduler_name,
            runnable,
        })
    }

    fn check_process(&self, record: &ScheduledJobRecord) -> Result<()> {
        let name = required_parameter(record, params::PROCESS_NAME)?;
        let process = self.metadata.process(name).ok_or_else(|| {
            SchedulerError::validation(format!("Unrecognized processName [{name}]"))
        })?;
        if process.schedule.is_some() {
            return Err(static_conflict("Process", name));
        }
        Ok(())
    }

    fn check_queue(&self, record: &ScheduledJobRecord) -> Result<()> {
        let name = required_parameter(record, params::QUEUE_NAME)?;
        let queue = self.metadata.queue(name).ok_or_else(|| {
            SchedulerError::validation(format!("Unrecognized queueName [{name}]"))
        })?;
        if queue.schedule.is_some() {
            return Err(static_conflict("Queue", name));
        }
        Ok(())
    }

    fn check_table_automations(&self, record: &ScheduledJobRecord) -> Result<()> {
        let table_name = required_parameter(record, params::TABLE_NAME)?;
        let status = required_parameter(record, params::AUTOMATION_STATUS)?;

        let table = self.metadata.table(table_name).ok_or_else(|| {
            SchedulerError::validation(format!("Unrecognized tableName [{table_name}]"))
        })?;
        let details = table.automation_details.as_ref().ok_or_else(|| {
            SchedulerError::validation(format!(
                "Table [{table_name}] does not have automationDetails"
            ))
        })?;

        let found = details.pending_statuses();
        if !found.iter().any(|s| s.as_str() == status) {
            let found: Vec<&str> = found.iter().map(|s| s.as_str()).collect();
            return Err(SchedulerError::validation(format!(
                "Did not find table automation actions matching automationStatus [{status}] for table [{table_name}]. Found: {}",
                found.join(",")
            )));
        }

        if details.schedule.is_some() {
            return Err(static_conflict("Table", table_name));
        }
        Ok(())
    }

    /// Scheduler name and trigger for a definition; the backend must exist.
    fn resolve(&self, definition: &ScheduleDefinition) -> Result<(String, Trigger)> {
        let scheduler_name = definition
            .scheduler_name
            .clone()
            .ok_or_else(|| SchedulerError::validation("Missing a schedulerName"))?;
        if !self.registry.contains(&scheduler_name) {
            return Err(SchedulerError::UnknownScheduler {
                name: scheduler_name,
            });
        }
        let trigger = definition.resolve_trigger()?;
        Ok((scheduler_name, trigger))
    }

    /// Static schedules declared in metadata that apply to this environment,
    /// each paired with the entity it came from.
    fn plan_static_schedules(&self) -> Vec<(String, JobKey, Result<Registration>)> {
        let env = self.environment.as_deref();
        let mut planned = Vec::new();

        for process in self.metadata.processes() {
            let Some(schedule) = process.schedule.as_ref().filter(|s| s.applies_to(env)) else {
                continue;
            };
            let key = JobKey::for_process(&process.name);
            let runnable = SchedulableRunnable::process(key.clone(), &process.name);
            planned.push((
                format!("process {}", process.name),
                key,
                self.plan_static(runnable, schedule),
            ));
        }

        for queue in self.metadata.queues() {
            let Some(schedule) = queue.schedule.as_ref().filter(|s| s.applies_to(env)) else {
                continue;
            };
            let key = JobKey::for_queue(&queue.name);
            let runnable = SchedulableRunnable::queue(key.clone(), &queue.name);
            planned.push((
                format!("queue {}", queue.name),
                key,
                self.plan_static(runnable, schedule),
            ));
        }

        for table in self.metadata.tables() {
            let Some(details) = table.automation_details.as_ref() else {
                continue;
            };
            let Some(schedule) = details.schedule.as_ref().filter(|s| s.applies_to(env)) else {
                continue;
            };
            for status in details.pending_statuses() {
                let key = JobKey::for_table_automations(&table.name, status.as_str());
                let runnable =
                    SchedulableRunnable::table_automations(key.clone(), &table.name, status.as_str());
                planned.push((
                    format!("table {} automations {}", table.name, status),
                    key,
                    self.plan_static(runnable, schedule),
                ));
            }
        }

        planned
    }

    fn plan_static(
        &self,
        runnable: SchedulableRunnable,
        schedule: &ScheduleDefinition,
    ) -> Result<Registration> {
        let (scheduler_name, trigger) = self.resolve(schedule)?;
        Ok(Registration {
            key: runnable.key.clone(),
            trigger,
            scheduler_name,
            runnable,
        })
    }

    /// Set up every static schedule, then every active record. One failure
    /// never stops the rest; each is logged and collected.
    pub async fn setup_all_scheduled_jobs(&self) -> Result<SetupSummary> {
        let mut summary = SetupSummary::default();

        for (entity, key, planned) in self.plan_static_schedules() {
            let result = match planned {
                Ok(registration) => self.install(registration).await,
                Err(e) => Err(e),
            };
            summary.record(entity, Some(key), result);
        }

        for record in self.store.list_active()? {
            let key = record.id.map(JobKey::for_scheduled_job);
            let result = self.setup_scheduled_job(&record).await;
            summary.record(record.describe(), key, result);
        }

        info!(
            scheduled = summary.scheduled.len(),
            failed = summary.failed.len(),
            "bulk schedule setup finished"
        );
        Ok(summary)
    }

    /// Same checks as `setup_all_scheduled_jobs`, nothing is scheduled.
    pub fn check_all(&self) -> Result<SetupSummary> {
        let mut summary = SetupSummary::default();
        for (entity, key, planned) in self.plan_static_schedules() {
            summary.record(entity, Some(key), planned.map(|_| ()));
        }
        for record in self.store.list_active()? {
            let planned = self.plan_scheduled_job(&record);
            let key = planned.as_ref().ok().map(|r| r.key.clone());
            summary.record(record.describe(), key, planned.map(|_| ()));
        }
        Ok(summary)
    }

    /// Hand a registration to its backend, moving it off any other backend
    /// that held the same key.
    async fn install(&self, registration: Registration) -> Result<()> {
        let backend = self.registry.get(&registration.scheduler_name)?;
        let mut registrations = self.registrations.lock().await;

        if let Some(previous) = registrations.get(&registration.key) {
            if previous.scheduler_name != registration.scheduler_name {
                if let Ok(old) = self.registry.get(&previous.scheduler_name) {
                    old.unschedule(&registration.key).await?;
                    debug!(
                        job_key = %registration.key,
                        from = %previous.scheduler_name,
                        to = %registration.scheduler_name,
                        "job moved between schedulers"
                    );
                }
            }
        }

        let task = FireTask::new(registration.runnable.clone(), self.dispatcher.clone());
        backend
            .schedule(&registration.key, &registration.trigger, task)
            .await?;
        info!(
            job_key = %registration.key,
            scheduler = %registration.scheduler_name,
            trigger = %registration.trigger,
            "job scheduled"
        );
        registrations.insert(registration.key.clone(), registration);
        Ok(())
    }

    /// Remove a record's trigger. Unsaved or unknown records are a no-op.
    pub async fn unschedule_job(&self, record: &ScheduledJobRecord) -> Result<()> {
        let Some(id) = record.id else {
            return Ok(());
        };
        self.unschedule_key(
            &JobKey::for_scheduled_job(id),
            record.scheduler_name.as_deref(),
        )
        .await
    }

    /// Remove `key` from the backend that owns it and from `scheduler_name`.
    pub async fn unschedule_key(&self, key: &JobKey, scheduler_name: Option<&str>) -> Result<()> {
        let mut registrations = self.registrations.lock().await;
        let mut owners = BTreeSet::new();
        if let Some(registration) = registrations.remove(key) {
            owners.insert(registration.scheduler_name);
        }
        if let Some(name) = scheduler_name {
            owners.insert(name.to_string());
        }
        for owner in owners {
            match self.registry.get(&owner) {
                Ok(backend) => backend.unschedule(key).await?,
                Err(_) => debug!(job_key = %key, scheduler = %owner, "no such scheduler to unschedule from"),
            }
        }
        info!(job_key = %key, "job unscheduled");
        Ok(())
    }

    /// Snapshot of what the manager has scheduled, ordered by key.
    pub async fn registrations(&self) -> Vec<Registration> {
        let registrations = self.registrations.lock().await;
        let mut all: Vec<Registration> = registrations.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Live jobs across every backend.
    pub async fn query_scheduled(&self) -> Result<Vec<ScheduledJobInfo>> {
        let mut all = Vec::new();
        for backend in self.registry.all() {
            all.extend(backend.query_scheduled().await?);
        }
        Ok(all)
    }

    pub async fn start(&self) -> Result<()> {
        for backend in self.registry.all() {
            backend.start().await?;
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        for backend in self.registry.all() {
            backend.stop().await?;
        }
        Ok(())
    }

    /// Tear down every backend. The first failure is returned after all
    /// backends have been attempted.
    pub async fn un_init(&self) -> Result<()> {
        self.registrations.lock().await.clear();
        let mut first_error = None;
        for backend in self.registry.all() {
            if let Err(e) = backend.un_init().await {
                warn!(scheduler = %backend.name(), error = %e, "scheduler teardown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn required_parameter<'a>(record: &'a ScheduledJobRecord, key: &str) -> Result<&'a str> {
    record.parameter(key).ok_or_else(|| {
        SchedulerError::validation(format!("Missing scheduledJobParameter with key [{key}]"))
    })
}

fn static_conflict(kind: &str, name: &str) -> SchedulerError {
    SchedulerError::validation(format!(
        "{kind} [{name}] has a schedule in its metaData - so it should not be dynamically scheduled via a scheduled job"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimpleScheduler;
    use crate::dispatch::test_support::{self, CountingRunner};
    use crate::metadata::{InstanceMetadata, ProcessMeta};
    use hourglass_records::SqliteScheduledJobStore;

    fn manager(metadata: InstanceMetadata) -> ScheduleManager {
        ScheduleManager::new(ManagerParts {
            metadata: Arc::new(metadata),
            store: Arc::new(SqliteScheduledJobStore::open_in_memory().unwrap()),
            registry: SchedulerRegistry::new()
                .with_backend(Arc::new(SimpleScheduler::new("A")))
                .with_backend(Arc::new(SimpleScheduler::new("B"))),
            dispatcher: test_support::dispatcher(Arc::new(CountingRunner::default())),
            environment: None,
        })
    }

    fn report_job(scheduler: &str) -> ScheduledJobRecord {
        ScheduledJobRecord::new()
            .with_id(3)
            .with_type(ScheduledJobType::Process)
            .with_scheduler_name(scheduler)
            .with_repeat_seconds(60)
            .with_parameter(params::PROCESS_NAME, "report")
    }

    #[tokio::test]
    async fn moving_a_job_between_schedulers_leaves_one_live_copy() {
        let m = manager(InstanceMetadata::default().with_process(ProcessMeta::new("report")));
        m.setup_scheduled_job(&report_job("A")).await.unwrap();
        m.setup_scheduled_job(&report_job("B")).await.unwrap();

        let live = m.query_scheduled().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].scheduler_name, "B");
        assert_eq!(m.registrations().await[0].scheduler_name, "B");
    }

    #[tokio::test]
    async fn inactive_record_is_unscheduled() {
        let m = manager(InstanceMetadata::default().with_process(ProcessMeta::new("report")));
        m.setup_scheduled_job(&report_job("A")).await.unwrap();
        m.setup_scheduled_job(&report_job("A").with_active(false))
            .await
            .unwrap();
        assert!(m.query_scheduled().await.unwrap().is_empty());
        assert!(m.registrations().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_scheduler_is_reported() {
        let m = manager(InstanceMetadata::default().with_process(ProcessMeta::new("report")));
        let err = m.setup_scheduled_job(&report_job("C")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownScheduler { ref name } if name == "C"));
    }

    #[tokio::test]
    async fn runnable_carries_record_parameters() {
        let m = manager(InstanceMetadata::default().with_process(ProcessMeta::new("report")));
        let registration = m
            .plan_scheduled_job(&report_job("A").with_parameter("recordId", "9"))
            .unwrap();
        assert_eq!(registration.key, JobKey::for_scheduled_job(3));
        assert_eq!(registration.runnable.kind, RunnableKind::Process);
        assert_eq!(
            registration.runnable.parameters.get("recordId").map(String::as_str),
            Some("9")
        );
    }

    #[tokio::test]
    async fn unschedule_unknown_record_is_tolerated() {
        let m = manager(InstanceMetadata::default());
        m.unschedule_job(&report_job("A")).await.unwrap();
        m.unschedule_job(&ScheduledJobRecord::new()).await.unwrap();
    }
}
