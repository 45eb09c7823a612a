use std::sync::Arc;

use tracing::info;

use hourglass_core::config::HourglassConfig;
use hourglass_records::{ScheduledJobStore, SqliteScheduledJobStore};
use hourglass_scheduler::dispatch::{JobDispatcher, SystemSessionSupplier};
use hourglass_scheduler::metadata::InstanceMetadata;
use hourglass_scheduler::{ManagerParts, SchedulerRegistry};

use crate::runner::LoggingJobRunner;

/// User every fired job runs as.
const SYSTEM_USER: &str = "system";

/// Shared state for every command, opened once from config.
pub struct App {
    pub config: HourglassConfig,
    pub store: Arc<dyn ScheduledJobStore>,
    pub metadata: Arc<InstanceMetadata>,
}

impl App {
    pub fn open(config: HourglassConfig) -> anyhow::Result<Self> {
        let db_path = &config.database.path;
        ensure_parent_dir(db_path);
        info!(path = %db_path, "opening SQLite database");

        let db = rusqlite::Connection::open(db_path)?;
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store: Arc<dyn ScheduledJobStore> = Arc::new(SqliteScheduledJobStore::new(db)?);
        info!("database migrations complete");

        let metadata = InstanceMetadata::load(&config.metadata.path)?;
        info!(
            path = %config.metadata.path,
            processes = metadata.processes.len(),
            queues = metadata.queues.len(),
            tables = metadata.tables.len(),
            "instance metadata loaded"
        );

        Ok(Self {
            config,
            store,
            metadata: Arc::new(metadata),
        })
    }

    /// Build the collaborators of a fresh Schedule Manager. Backends are
    /// created here but not started.
    pub async fn manager_parts(&self) -> anyhow::Result<ManagerParts> {
        let registry = SchedulerRegistry::from_config(&self.config.scheduler).await?;
        let dispatcher = JobDispatcher::new(
            Arc::new(SystemSessionSupplier::new(SYSTEM_USER)),
            Arc::new(LoggingJobRunner),
        );
        Ok(ManagerParts {
            metadata: self.metadata.clone(),
            store: self.store.clone(),
            registry,
            dispatcher: Arc::new(dispatcher),
            environment: self.config.scheduler.environment.clone(),
        })
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
