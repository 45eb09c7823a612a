use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use hourglass_records::{ScheduledJobRecord, ScheduledJobStore, StoreError};

use crate::error::Result;
use crate::manager::ScheduleManager;

/// A persisted record plus anything that went wrong scheduling it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedScheduledJob {
    pub record: ScheduledJobRecord,
    /// Setup failures; the save itself stands.
    pub warnings: Vec<String>,
}

/// Entry point for changing scheduled job records. Every write keeps the
/// Schedule Manager in step with the table.
pub struct ScheduledJobService {
    store: Arc<dyn ScheduledJobStore>,
    manager: Arc<ScheduleManager>,
}

impl ScheduledJobService {
    pub fn new(store: Arc<dyn ScheduledJobStore>, manager: Arc<ScheduleManager>) -> Self {
        Self { store, manager }
    }

    pub async fn insert(&self, record: &ScheduledJobRecord) -> Result<SavedScheduledJob> {
        let saved = self.store.insert(record)?;
        info!(job = %saved.describe(), "scheduled job inserted");
        Ok(self.sync(saved).await)
    }

    pub async fn update(&self, record: &ScheduledJobRecord) -> Result<SavedScheduledJob> {
        let saved = self.store.update(record)?;
        info!(job = %saved.describe(), "scheduled job updated");
        Ok(self.sync(saved).await)
    }

    /// Unschedule, then delete. Fails with `NotFound` for unknown ids.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let record = self.store.get(id)?.ok_or(StoreError::NotFound { id })?;
        self.manager.unschedule_job(&record).await?;
        self.store.delete(id)?;
        info!(job = %record.describe(), "scheduled job deleted");
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<ScheduledJobRecord>> {
        Ok(self.store.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<ScheduledJobRecord>> {
        Ok(self.store.list()?)
    }

    pub fn find_by_foreign_key(
        &self,
        key_type: &str,
        key_value: &str,
    ) -> Result<Vec<ScheduledJobRecord>> {
        Ok(self.store.find_by_foreign_key(key_type, key_value)?)
    }

    async fn sync(&self, record: ScheduledJobRecord) -> SavedScheduledJob {
        let mut warnings = Vec::new();
        if let Err(e) = self.manager.setup_scheduled_job(&record).await {
            warn!(job = %record.describe(), error = %e, "saved scheduled job could not be scheduled");
            warnings.push(e.to_string());
        }
        SavedScheduledJob { record, warnings }
    }
}
