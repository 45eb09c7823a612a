//! Scheduler backends: the engines that actually hold live triggers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use hourglass_core::config::{BackendKind, SchedulerConfig};
use hourglass_core::JobKey;

use crate::dispatch::FireTask;
use crate::error::{Result, SchedulerError};
use crate::schedule::Trigger;

pub mod enterprise;
pub mod simple;

pub use enterprise::EnterpriseScheduler;
pub use simple::SimpleScheduler;

/// One live job as a backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledJobInfo {
    pub key: JobKey,
    pub scheduler_name: String,
    pub trigger: Trigger,
    /// Engine-side identifier, when the engine has its own.
    pub engine_identity: Option<String>,
}

/// A named scheduling engine.
///
/// After `un_init` every operation fails with `NotInitialized`.
#[async_trait]
pub trait SchedulerBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Begin firing. Fails with `AlreadyRunning` if started twice.
    async fn start(&self) -> Result<()>;

    /// Stop firing but keep registrations. No-op if never started.
    async fn stop(&self) -> Result<()>;

    /// Register `key`, atomically replacing any existing trigger for it.
    async fn schedule(&self, key: &JobKey, trigger: &Trigger, task: FireTask) -> Result<()>;

    /// Remove `key`. Unknown keys are ignored.
    async fn unschedule(&self, key: &JobKey) -> Result<()>;

    async fn query_scheduled(&self) -> Result<Vec<ScheduledJobInfo>>;

    /// Tear down for good.
    async fn un_init(&self) -> Result<()>;
}

/// Where a backend is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Idle,
    Running,
    Torn,
}

impl Lifecycle {
    pub(crate) fn ensure_live(self, name: &str) -> Result<()> {
        if self == Lifecycle::Torn {
            return Err(SchedulerError::not_initialized(format!("scheduler {name}")));
        }
        Ok(())
    }
}

/// Backends by scheduler name.
#[derive(Clone, Default)]
pub struct SchedulerRegistry {
    backends: BTreeMap<String, Arc<dyn SchedulerBackend>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one backend per configured entry.
    pub async fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let mut registry = Self::new();
        for backend in &config.backends {
            let built: Arc<dyn SchedulerBackend> = match backend.kind {
                BackendKind::Simple => Arc::new(SimpleScheduler::new(&backend.name)),
                BackendKind::Enterprise => Arc::new(EnterpriseScheduler::new(&backend.name).await?),
            };
            registry.register(built);
        }
        Ok(registry)
    }

    /// Add a backend; replaces one already registered under the same name.
    pub fn register(&mut self, backend: Arc<dyn SchedulerBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn with_backend(mut self, backend: Arc<dyn SchedulerBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SchedulerBackend>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownScheduler {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn SchedulerBackend>> {
        self.backends.values()
    }
}
