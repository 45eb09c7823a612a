//! Keeps scheduled jobs in step with rows of some other table.
//!
//! Each source record owns the scheduled jobs whose foreign key points back
//! at it. Inserting or updating the record creates or refreshes them; deleting
//! it deletes them.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use hourglass_core::config::DEFAULT_SCHEDULER_NAME;
use hourglass_records::{params, ScheduledJobRecord, ScheduledJobType};

use crate::error::{Result, SchedulerError};
use crate::service::{SavedScheduledJob, ScheduledJobService};

/// Per-table hooks for syncing records to scheduled jobs.
pub trait ScheduledJobSyncBridge: Send + Sync {
    /// Table the source records come from.
    fn source_table_name(&self) -> &str;

    /// Stored in `foreign_key_type` of every job this bridge owns.
    fn scheduled_job_foreign_key_type(&self) -> &str;

    /// Field of the source record holding its key.
    fn record_foreign_key_field_name(&self) -> &str {
        "id"
    }

    /// Process the created jobs run.
    fn process_name_parameter(&self) -> &str;

    /// Backend new jobs are placed on.
    fn scheduler_name(&self) -> &str {
        DEFAULT_SCHEDULER_NAME
    }

    /// Last word on a job before it is saved. Called for new jobs (no id yet)
    /// and for existing ones. When several jobs already point at one source
    /// record, each of them is passed through here and saved.
    fn customize_scheduled_job(
        &self,
        job: ScheduledJobRecord,
        source: &Value,
    ) -> Result<ScheduledJobRecord>;
}

pub struct RecordSyncer {
    bridge: Arc<dyn ScheduledJobSyncBridge>,
    service: Arc<ScheduledJobService>,
}

impl RecordSyncer {
    pub fn new(bridge: Arc<dyn ScheduledJobSyncBridge>, service: Arc<ScheduledJobService>) -> Self {
        Self { bridge, service }
    }

    /// Create or refresh the jobs for freshly written source records.
    pub async fn on_insert_or_update(&self, records: &[Value]) -> Result<Vec<SavedScheduledJob>> {
        let key_type = self.bridge.scheduled_job_foreign_key_type();
        let mut saved = Vec::new();

        for source in records {
            let key_value = self.foreign_key_value(source)?;
            let existing = self.service.find_by_foreign_key(key_type, &key_value)?;

            if existing.is_empty() {
                let job = self
                    .bridge
                    .customize_scheduled_job(self.new_job(&key_value), source)?;
                let inserted = self.service.insert(&job).await?;
                info!(
                    table = %self.bridge.source_table_name(),
                    record = %key_value,
                    job = %inserted.record.describe(),
                    "scheduled job created for record"
                );
                saved.push(inserted);
                continue;
            }

            for job in existing {
                let job = self.bridge.customize_scheduled_job(job, source)?;
                let updated = self.service.update(&job).await?;
                debug!(
                    table = %self.bridge.source_table_name(),
                    record = %key_value,
                    job = %updated.record.describe(),
                    "scheduled job refreshed for record"
                );
                saved.push(updated);
            }
        }
        Ok(saved)
    }

    /// Delete the jobs belonging to removed source records. Returns how many.
    pub async fn on_delete(&self, records: &[Value]) -> Result<usize> {
        let key_type = self.bridge.scheduled_job_foreign_key_type();
        let mut deleted = 0;
        for source in records {
            let key_value = self.foreign_key_value(source)?;
            for job in self.service.find_by_foreign_key(key_type, &key_value)? {
                if let Some(id) = job.id {
                    self.service.delete(id).await?;
                    deleted += 1;
                }
            }
        }
        if deleted > 0 {
            info!(table = %self.bridge.source_table_name(), deleted, "scheduled jobs deleted with their records");
        }
        Ok(deleted)
    }

    fn new_job(&self, key_value: &str) -> ScheduledJobRecord {
        let key_type = self.bridge.scheduled_job_foreign_key_type();
        ScheduledJobRecord::new()
            .with_label(format!("{} {}", self.bridge.source_table_name(), key_value))
            .with_type(ScheduledJobType::Process)
            .with_active(true)
            .with_scheduler_name(self.bridge.scheduler_name())
            .with_foreign_key(key_type, key_value)
            .with_parameter(params::PROCESS_NAME, self.bridge.process_name_parameter())
            .with_parameter(params::IS_SCHEDULED_JOB, "true")
            .with_parameter(format!("{key_type}Id"), key_value)
            .with_parameter(params::RECORD_ID, key_value)
    }

    fn foreign_key_value(&self, source: &Value) -> Result<String> {
        let field = self.bridge.record_foreign_key_field_name();
        match source.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(SchedulerError::validation(format!(
                "Record from table [{}] is missing field [{field}]",
                self.bridge.source_table_name()
            ))),
        }
    }
}
