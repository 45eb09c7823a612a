use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

use hourglass_core::JobKey;

use super::{Lifecycle, ScheduledJobInfo, SchedulerBackend};
use crate::dispatch::FireTask;
use crate::error::{Result, SchedulerError};
use crate::schedule::Trigger;

/// Engine job ids behind one key. Shared with the chaining one-shot job so a
/// repeat added after `unschedule` can be taken back out.
#[derive(Default)]
struct EngineJobs {
    ids: std::sync::Mutex<Vec<Uuid>>,
    cancelled: AtomicBool,
}

impl EngineJobs {
    fn push(&self, id: Uuid) {
        self.ids.lock().expect("engine job ids poisoned").push(id);
    }

    fn take(&self) -> Vec<Uuid> {
        std::mem::take(&mut *self.ids.lock().expect("engine job ids poisoned"))
    }
}

struct Entry {
    trigger: Trigger,
    task: FireTask,
    engine_jobs: Arc<EngineJobs>,
}

struct Inner {
    lifecycle: Lifecycle,
    /// `None` between `stop` and the next `start`.
    engine: Option<JobScheduler>,
    jobs: HashMap<JobKey, Entry>,
}

/// Backend that delegates to a `tokio-cron-scheduler` engine.
pub struct EnterpriseScheduler {
    name: String,
    inner: Mutex<Inner>,
}

impl EnterpriseScheduler {
    pub async fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let engine = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::backend(&name, e))?;
        Ok(Self {
            name,
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Idle,
                engine: Some(engine),
                jobs: HashMap::new(),
            }),
        })
    }

    /// `GROUP.key`, the name the engine job is filed under.
    fn engine_identity(key: &JobKey, task: &FireTask) -> String {
        format!("{}.{}", task.runnable().kind.group_name(), key)
    }

    async fn add_to_engine(
        &self,
        engine: &JobScheduler,
        key: &JobKey,
        trigger: &Trigger,
        task: &FireTask,
        engine_jobs: &Arc<EngineJobs>,
    ) -> Result<()> {
        let job = match trigger {
            Trigger::Cron { expression } => {
                let task = task.clone();
                Job::new_async(expression.as_str(), move |_id, _engine| {
                    let task = task.clone();
                    Box::pin(async move { task.fire().await })
                })
            }
            Trigger::Repeat {
                every_millis,
                initial_delay_millis,
            } => chained_repeat(
                self.name.clone(),
                key.clone(),
                Duration::from_millis(*initial_delay_millis),
                Duration::from_millis(*every_millis),
                task.clone(),
                engine_jobs.clone(),
            ),
        }
        .map_err(|e| SchedulerError::backend(&self.name, e))?;

        let id = engine
            .add(job)
            .await
            .map_err(|e| SchedulerError::backend(&self.name, e))?;
        engine_jobs.push(id);
        debug!(
            scheduler = %self.name,
            identity = %Self::engine_identity(key, task),
            engine_id = %id,
            "engine job added"
        );
        Ok(())
    }

    async fn remove_from_engine(&self, engine: Option<&JobScheduler>, entry: &Entry) {
        entry.engine_jobs.cancelled.store(true, Ordering::SeqCst);
        let ids = entry.engine_jobs.take();
        let Some(engine) = engine else { return };
        for id in ids {
            if let Err(e) = engine.remove(&id).await {
                warn!(scheduler = %self.name, engine_id = %id, error = %e, "engine job removal failed");
            }
        }
    }
}

/// A one-shot job at `delay` that fires once and then adds the repeating job.
fn chained_repeat(
    scheduler: String,
    key: JobKey,
    delay: Duration,
    every: Duration,
    task: FireTask,
    engine_jobs: Arc<EngineJobs>,
) -> std::result::Result<Job, tokio_cron_scheduler::JobSchedulerError> {
    Job::new_one_shot_async(delay, move |_id, engine| {
        let scheduler = scheduler.clone();
        let key = key.clone();
        let task = task.clone();
        let engine_jobs = engine_jobs.clone();
        Box::pin(async move {
            task.fire().await;
            if engine_jobs.cancelled.load(Ordering::SeqCst) {
                return;
            }
            let repeat_task = task.clone();
            let repeat = Job::new_repeated_async(every, move |_id, _engine| {
                let task = repeat_task.clone();
                Box::pin(async move { task.fire().await })
            });
            let added = match repeat {
                Ok(job) => engine.add(job).await,
                Err(e) => Err(e),
            };
            match added {
                Ok(id) => {
                    engine_jobs.push(id);
                    // Unscheduled while we were adding.
                    if engine_jobs.cancelled.load(Ordering::SeqCst) {
                        for id in engine_jobs.take() {
                            let _ = engine.remove(&id).await;
                        }
                    }
                }
                Err(e) => {
                    warn!(%scheduler, job_key = %key, error = %e, "repeating engine job not added")
                }
            }
        })
    })
}

#[async_trait]
impl SchedulerBackend for EnterpriseScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.ensure_live(&self.name)?;
        if inner.lifecycle == Lifecycle::Running {
            return Err(SchedulerError::already_running(format!("scheduler {}", self.name)));
        }

        if inner.engine.is_none() {
            let engine = JobScheduler::new()
                .await
                .map_err(|e| SchedulerError::backend(&self.name, e))?;
            for (key, entry) in &inner.jobs {
                entry.engine_jobs.cancelled.store(false, Ordering::SeqCst);
                self.add_to_engine(&engine, key, &entry.trigger, &entry.task, &entry.engine_jobs)
                    .await?;
            }
            inner.engine = Some(engine);
        }

        if let Some(engine) = inner.engine.as_ref() {
            engine
                .start()
                .await
                .map_err(|e| SchedulerError::backend(&self.name, e))?;
        }
        inner.lifecycle = Lifecycle::Running;
        info!(scheduler = %self.name, jobs = inner.jobs.len(), "scheduler started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.ensure_live(&self.name)?;
        if inner.lifecycle != Lifecycle::Running {
            return Ok(());
        }
        for entry in inner.jobs.values() {
            entry.engine_jobs.cancelled.store(true, Ordering::SeqCst);
            entry.engine_jobs.take();
        }
        if let Some(mut engine) = inner.engine.take() {
            engine
                .shutdown()
                .await
                .map_err(|e| SchedulerError::backend(&self.name, e))?;
        }
        inner.lifecycle = Lifecycle::Idle;
        info!(scheduler = %self.name, "scheduler stopped");
        Ok(())
    }

    async fn schedule(&self, key: &JobKey, trigger: &Trigger, task: FireTask) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.ensure_live(&self.name)?;

        if let Some(previous) = inner.jobs.remove(key) {
            self.remove_from_engine(inner.engine.as_ref(), &previous).await;
        }

        let engine_jobs = Arc::new(EngineJobs::default());
        if let Some(engine) = inner.engine.as_ref() {
            self.add_to_engine(engine, key, trigger, &task, &engine_jobs)
                .await?;
        }
        info!(
            scheduler = %self.name,
            identity = %Self::engine_identity(key, &task),
            %trigger,
            "job scheduled"
        );
        inner.jobs.insert(
            key.clone(),
            Entry {
                trigger: trigger.clone(),
                task,
                engine_jobs,
            },
        );
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.ensure_live(&self.name)?;
        if let Some(entry) = inner.jobs.remove(key) {
            self.remove_from_engine(inner.engine.as_ref(), &entry).await;
            info!(scheduler = %self.name, job_key = %key, "job unscheduled");
        }
        Ok(())
    }

    async fn query_scheduled(&self) -> Result<Vec<ScheduledJobInfo>> {
        let inner = self.inner.lock().await;
        inner.lifecycle.ensure_live(&self.name)?;
        let mut jobs: Vec<ScheduledJobInfo> = inner
            .jobs
            .iter()
            .map(|(key, entry)| ScheduledJobInfo {
                key: key.clone(),
                scheduler_name: self.name.clone(),
                trigger: entry.trigger.clone(),
                engine_identity: Some(Self::engine_identity(key, &entry.task)),
            })
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(jobs)
    }

    async fn un_init(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.ensure_live(&self.name)?;
        for entry in inner.jobs.values() {
            entry.engine_jobs.cancelled.store(true, Ordering::SeqCst);
        }
        inner.jobs.clear();
        if let Some(mut engine) = inner.engine.take() {
            if let Err(e) = engine.shutdown().await {
                warn!(scheduler = %self.name, error = %e, "engine shutdown failed");
            }
        }
        inner.lifecycle = Lifecycle::Torn;
        info!(scheduler = %self.name, "scheduler torn down");
        Ok(())
    }
}
