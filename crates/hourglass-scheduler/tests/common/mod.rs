// Shared fixtures for the scheduler integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use hourglass_core::JobKey;
use hourglass_records::{params, ScheduledJobRecord, ScheduledJobStore, ScheduledJobType, SqliteScheduledJobStore};
use hourglass_scheduler::backend::ScheduledJobInfo;
use hourglass_scheduler::dispatch::{FireTask, JobDispatcher, JobRunner, Session, SystemSessionSupplier};
use hourglass_scheduler::metadata::{
    AutomationAction, AutomationDetails, InstanceMetadata, ProcessMeta, QueueMeta, TableMeta,
    TriggerEvent,
};
use hourglass_scheduler::{
    ManagerParts, ScheduleDefinition, ScheduleManager, SchedulerBackend, SchedulerError,
    SchedulerRegistry, Trigger,
};

pub const SCHEDULER: &str = "RECORDING";

/// Backend that only remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingBackend {
    name: String,
    jobs: Mutex<HashMap<JobKey, Trigger>>,
    pub ops: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.jobs.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SchedulerBackend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    async fn schedule(
        &self,
        key: &JobKey,
        trigger: &Trigger,
        _task: FireTask,
    ) -> Result<(), SchedulerError> {
        self.jobs.lock().unwrap().insert(key.clone(), trigger.clone());
        self.ops.lock().unwrap().push(format!("schedule {key}"));
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<(), SchedulerError> {
        if self.jobs.lock().unwrap().remove(key).is_some() {
            self.ops.lock().unwrap().push(format!("unschedule {key}"));
        }
        Ok(())
    }

    async fn query_scheduled(&self) -> Result<Vec<ScheduledJobInfo>, SchedulerError> {
        let mut jobs: Vec<ScheduledJobInfo> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(key, trigger)| ScheduledJobInfo {
                key: key.clone(),
                scheduler_name: self.name.clone(),
                trigger: trigger.clone(),
                engine_identity: None,
            })
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(jobs)
    }

    async fn un_init(&self) -> Result<(), SchedulerError> {
        self.jobs.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingRunner {
    pub fires: AtomicUsize,
}

#[async_trait]
impl JobRunner for CountingRunner {
    async fn run_process(
        &self,
        _: &Session,
        _: &str,
        _: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.fires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn process_queue(
        &self,
        _: &Session,
        _: &str,
        _: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.fires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_table_automations(
        &self,
        _: &Session,
        _: &str,
        _: &str,
        _: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.fires.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Processes `adHoc` (no schedule) and `nightly` (static schedule), queues
/// `inbound` / `polled`, tables `order` (insert + update automations),
/// `audit` (no automations) and `ledger` (statically scheduled automations).
pub fn metadata() -> InstanceMetadata {
    let static_schedule = ScheduleDefinition::default()
        .with_scheduler_name(SCHEDULER)
        .with_cron_expression("0 0 2 * * ?");
    let actions = vec![
        AutomationAction {
            name: "notifyWarehouse".to_string(),
            trigger_event: TriggerEvent::PostInsert,
        },
        AutomationAction {
            name: "recalculateTotals".to_string(),
            trigger_event: TriggerEvent::PostUpdate,
        },
    ];

    InstanceMetadata::default()
        .with_process(ProcessMeta::new("adHoc"))
        .with_process(ProcessMeta::new("nightly").with_schedule(static_schedule.clone()))
        .with_queue(QueueMeta::new("inbound"))
        .with_queue(QueueMeta::new("polled").with_schedule(static_schedule.clone()))
        .with_table(TableMeta::new("order").with_automation_details(AutomationDetails {
            schedule: None,
            actions: actions.clone(),
        }))
        .with_table(TableMeta::new("audit"))
        .with_table(TableMeta::new("ledger").with_automation_details(AutomationDetails {
            schedule: Some(static_schedule),
            actions,
        }))
}

pub struct Harness {
    pub manager: Arc<ScheduleManager>,
    pub store: Arc<dyn ScheduledJobStore>,
    pub backend: Arc<RecordingBackend>,
}

pub fn harness_with(metadata: InstanceMetadata) -> Harness {
    let store: Arc<dyn ScheduledJobStore> =
        Arc::new(SqliteScheduledJobStore::open_in_memory().unwrap());
    let backend = Arc::new(RecordingBackend::new(SCHEDULER));
    let manager = Arc::new(ScheduleManager::new(ManagerParts {
        metadata: Arc::new(metadata),
        store: store.clone(),
        registry: SchedulerRegistry::new().with_backend(backend.clone()),
        dispatcher: Arc::new(JobDispatcher::new(
            Arc::new(SystemSessionSupplier::new("test")),
            Arc::new(CountingRunner::default()),
        )),
        environment: None,
    }));
    Harness {
        manager,
        store,
        backend,
    }
}

pub fn harness() -> Harness {
    harness_with(metadata())
}

/// A complete, valid PROCESS job for `adHoc`.
pub fn process_job(repeat_seconds: u64) -> ScheduledJobRecord {
    ScheduledJobRecord::new()
        .with_label("ad hoc")
        .with_type(ScheduledJobType::Process)
        .with_scheduler_name(SCHEDULER)
        .with_repeat_seconds(repeat_seconds)
        .with_parameter(params::PROCESS_NAME, "adHoc")
}
