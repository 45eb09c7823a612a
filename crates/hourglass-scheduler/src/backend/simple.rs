use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use hourglass_core::JobKey;

use super::{Lifecycle, ScheduledJobInfo, SchedulerBackend};
use crate::dispatch::FireTask;
use crate::error::{Result, SchedulerError};
use crate::schedule::Trigger;

struct Entry {
    trigger: Trigger,
    task: FireTask,
    /// Present only while the backend is running.
    handle: Option<JoinHandle<()>>,
}

struct State {
    lifecycle: Lifecycle,
    jobs: HashMap<JobKey, Entry>,
}

/// In-process backend: one tokio task per job.
pub struct SimpleScheduler {
    name: String,
    state: Mutex<State>,
}

impl SimpleScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Idle,
                jobs: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl SchedulerBackend for SimpleScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().expect("simple scheduler state poisoned");
        state.lifecycle.ensure_live(&self.name)?;
        if state.lifecycle == Lifecycle::Running {
            return Err(SchedulerError::already_running(format!("scheduler {}", self.name)));
        }
        state.lifecycle = Lifecycle::Running;
        for (key, entry) in state.jobs.iter_mut() {
            entry.handle = Some(spawn_timer(key.clone(), entry.trigger.clone(), entry.task.clone()));
        }
        info!(scheduler = %self.name, jobs = state.jobs.len(), "scheduler started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().expect("simple scheduler state poisoned");
        state.lifecycle.ensure_live(&self.name)?;
        if state.lifecycle != Lifecycle::Running {
            return Ok(());
        }
        for entry in state.jobs.values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
        }
        state.lifecycle = Lifecycle::Idle;
        info!(scheduler = %self.name, "scheduler stopped");
        Ok(())
    }

    async fn schedule(&self, key: &JobKey, trigger: &Trigger, task: FireTask) -> Result<()> {
        let mut state = self.state.lock().expect("simple scheduler state poisoned");
        state.lifecycle.ensure_live(&self.name)?;
        let handle = (state.lifecycle == Lifecycle::Running)
            .then(|| spawn_timer(key.clone(), trigger.clone(), task.clone()));
        let previous = state.jobs.insert(
            key.clone(),
            Entry {
                trigger: trigger.clone(),
                task,
                handle,
            },
        );
        if let Some(old) = previous.and_then(|e| e.handle) {
            old.abort();
        }
        info!(scheduler = %self.name, job_key = %key, %trigger, "job scheduled");
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<()> {
        let mut state = self.state.lock().expect("simple scheduler state poisoned");
        state.lifecycle.ensure_live(&self.name)?;
        if let Some(entry) = state.jobs.remove(key) {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
            info!(scheduler = %self.name, job_key = %key, "job unscheduled");
        }
        Ok(())
    }

    async fn query_scheduled(&self) -> Result<Vec<ScheduledJobInfo>> {
        let state = self.state.lock().expect("simple scheduler state poisoned");
        state.lifecycle.ensure_live(&self.name)?;
        let mut jobs: Vec<ScheduledJobInfo> = state
            .jobs
            .iter()
            .map(|(key, entry)| ScheduledJobInfo {
                key: key.clone(),
                scheduler_name: self.name.clone(),
                trigger: entry.trigger.clone(),
                engine_identity: None,
            })
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(jobs)
    }

    async fn un_init(&self) -> Result<()> {
        let mut state = self.state.lock().expect("simple scheduler state poisoned");
        state.lifecycle.ensure_live(&self.name)?;
        for (_, entry) in state.jobs.drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
        state.lifecycle = Lifecycle::Torn;
        info!(scheduler = %self.name, "scheduler torn down");
        Ok(())
    }
}

fn spawn_timer(key: JobKey, trigger: Trigger, task: FireTask) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Trigger::Repeat {
            every_millis,
            initial_delay_millis,
        } = trigger
        {
            tokio::time::sleep(Duration::from_millis(initial_delay_millis)).await;
            let mut ticker = tokio::time::interval(Duration::from_millis(every_millis));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                fire_detached(&key, &task).await;
            }
        }

        let mut last_fire = None;
        loop {
            // Never fire the same instant twice if the sleep woke early.
            let from = match last_fire {
                Some(last) => std::cmp::max(last, Utc::now()),
                None => Utc::now(),
            };
            let Some(next) = trigger.next_fire_after(from) else {
                warn!(job_key = %key, %trigger, "cron schedule has no further fire times");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            last_fire = Some(next);
            fire_detached(&key, &task).await;
        }
    })
}

/// Run one fire on its own task and wait for it. Aborting the timer stops
/// further fires; a fire already running finishes.
async fn fire_detached(key: &JobKey, task: &FireTask) {
    let task = task.clone();
    if let Err(e) = tokio::spawn(async move { task.fire().await }).await {
        error!(job_key = %key, error = %e, "fired job panicked");
    }
}
