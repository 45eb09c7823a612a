use std::sync::{Arc, RwLock};

use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::manager::{ManagerParts, ScheduleManager};

const COMPONENT: &str = "schedule manager";

/// Owns the one Schedule Manager of a process and its lifecycle:
/// `init_instance` → `start` → … → `stop` → `un_init`.
#[derive(Default)]
pub struct SchedulerContext {
    manager: RwLock<Option<Arc<ScheduleManager>>>,
}

impl SchedulerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_instance(&self, parts: ManagerParts) -> Result<Arc<ScheduleManager>> {
        let mut slot = self.manager.write().expect("scheduler context poisoned");
        if slot.is_some() {
            return Err(SchedulerError::AlreadyInitialized {
                component: COMPONENT.to_string(),
            });
        }
        let manager = Arc::new(ScheduleManager::new(parts));
        *slot = Some(manager.clone());
        info!(schedulers = ?manager.registry().names(), "schedule manager initialized");
        Ok(manager)
    }

    pub fn instance(&self) -> Result<Arc<ScheduleManager>> {
        self.manager
            .read()
            .expect("scheduler context poisoned")
            .clone()
            .ok_or_else(|| SchedulerError::not_initialized(COMPONENT))
    }

    pub async fn start(&self) -> Result<()> {
        self.instance()?.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.instance()?.stop().await
    }

    /// Tear the manager down. A later `init_instance` starts fresh.
    pub async fn un_init(&self) -> Result<()> {
        let manager = self
            .manager
            .write()
            .expect("scheduler context poisoned")
            .take()
            .ok_or_else(|| SchedulerError::not_initialized(COMPONENT))?;
        manager.un_init().await?;
        info!("schedule manager torn down");
        Ok(())
    }
}
