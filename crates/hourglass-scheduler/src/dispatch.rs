//! What happens when a trigger fires.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use hourglass_core::JobKey;
use hourglass_records::params;

/// Identity a fired job runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user: String,
}

impl Session {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user: user.into(),
        }
    }
}

/// Opens one session per fire.
pub trait SessionSupplier: Send + Sync {
    fn open_session(&self) -> Session;
}

/// Every fire runs as the same named system user.
pub struct SystemSessionSupplier {
    user: String,
}

impl SystemSessionSupplier {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

impl SessionSupplier for SystemSessionSupplier {
    fn open_session(&self) -> Session {
        Session::new(self.user.clone())
    }
}

/// Executes the work a runnable names.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_process(
        &self,
        session: &Session,
        process_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;

    async fn process_queue(
        &self,
        session: &Session,
        queue_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;

    async fn run_table_automations(
        &self,
        session: &Session,
        table_name: &str,
        automation_status: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnableKind {
    Process,
    QueueProcessor,
    TableAutomations,
}

impl RunnableKind {
    /// Job group the enterprise backend files the job under.
    pub fn group_name(&self) -> &'static str {
        match self {
            RunnableKind::Process => "PROCESS",
            RunnableKind::QueueProcessor => "QUEUE_PROCESSOR",
            RunnableKind::TableAutomations => "TABLE_AUTOMATIONS",
        }
    }
}

impl std::fmt::Display for RunnableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.group_name())
    }
}

impl From<hourglass_records::ScheduledJobType> for RunnableKind {
    fn from(t: hourglass_records::ScheduledJobType) -> Self {
        use hourglass_records::ScheduledJobType;
        match t {
            ScheduledJobType::Process => RunnableKind::Process,
            ScheduledJobType::QueueProcessor => RunnableKind::QueueProcessor,
            ScheduledJobType::TableAutomations => RunnableKind::TableAutomations,
        }
    }
}

/// Everything needed to run a job at fire time. Plain data; the dispatcher
/// decides what to call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulableRunnable {
    pub key: JobKey,
    pub kind: RunnableKind,
    pub parameters: BTreeMap<String, String>,
}

impl SchedulableRunnable {
    pub fn process(key: JobKey, process_name: &str) -> Self {
        Self::new(key, RunnableKind::Process).with_parameter(params::PROCESS_NAME, process_name)
    }

    pub fn queue(key: JobKey, queue_name: &str) -> Self {
        Self::new(key, RunnableKind::QueueProcessor).with_parameter(params::QUEUE_NAME, queue_name)
    }

    pub fn table_automations(key: JobKey, table_name: &str, automation_status: &str) -> Self {
        Self::new(key, RunnableKind::TableAutomations)
            .with_parameter(params::TABLE_NAME, table_name)
            .with_parameter(params::AUTOMATION_STATUS, automation_status)
    }

    pub fn new(key: JobKey, kind: RunnableKind) -> Self {
        Self {
            key,
            kind,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    fn required(&self, key: &str) -> anyhow::Result<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("runnable {} has no {key} parameter", self.key))
    }
}

/// Maps a runnable onto the runner. The only place that branches on kind.
pub struct JobDispatcher {
    sessions: Arc<dyn SessionSupplier>,
    runner: Arc<dyn JobRunner>,
}

impl JobDispatcher {
    pub fn new(sessions: Arc<dyn SessionSupplier>, runner: Arc<dyn JobRunner>) -> Self {
        Self { sessions, runner }
    }

    /// Run one fire. Errors are logged, never returned to the timer.
    pub async fn dispatch(&self, runnable: &SchedulableRunnable) {
        let session = self.sessions.open_session();
        debug!(job_key = %runnable.key, kind = %runnable.kind, session = %session.id, "job firing");
        if let Err(e) = self.run(&session, runnable).await {
            error!(job_key = %runnable.key, kind = %runnable.kind, error = %e, "scheduled job failed");
        }
    }

    async fn run(&self, session: &Session, runnable: &SchedulableRunnable) -> anyhow::Result<()> {
        let p = &runnable.parameters;
        match runnable.kind {
            RunnableKind::Process => {
                let name = runnable.required(params::PROCESS_NAME)?;
                self.runner.run_process(session, name, p).await
            }
            RunnableKind::QueueProcessor => {
                let name = runnable.required(params::QUEUE_NAME)?;
                self.runner.process_queue(session, name, p).await
            }
            RunnableKind::TableAutomations => {
                let table = runnable.required(params::TABLE_NAME)?;
                let status = runnable.required(params::AUTOMATION_STATUS)?;
                self.runner.run_table_automations(session, table, status, p).await
            }
        }
    }
}

/// The callback a backend holds for one job.
#[derive(Clone)]
pub struct FireTask {
    runnable: Arc<SchedulableRunnable>,
    dispatcher: Arc<JobDispatcher>,
}

impl FireTask {
    pub fn new(runnable: SchedulableRunnable, dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            runnable: Arc::new(runnable),
            dispatcher,
        }
    }

    pub fn runnable(&self) -> &SchedulableRunnable {
        &self.runnable
    }

    pub async fn fire(&self) {
        self.dispatcher.dispatch(&self.runnable).await;
    }
}

impl std::fmt::Debug for FireTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireTask")
            .field("runnable", &self.runnable)
            .finish_non_exhaustive()
    }
}

/// A runner that only counts fires, for tests across the crate.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub(crate) struct CountingRunner {
        pub processes: AtomicUsize,
        pub queues: AtomicUsize,
        pub tables: AtomicUsize,
    }

    impl CountingRunner {
        pub(crate) fn total(&self) -> usize {
            self.processes.load(Ordering::SeqCst)
                + self.queues.load(Ordering::SeqCst)
                + self.tables.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run_process(
            &self,
            _: &Session,
            _: &str,
            _: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            self.processes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn process_queue(
            &self,
            _: &Session,
            _: &str,
            _: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            self.queues.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_table_automations(
            &self,
            _: &Session,
            _: &str,
            _: &str,
            _: &BTreeMap<String, String>,
        ) -> anyhow::Result<()> {
            self.tables.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn dispatcher(runner: Arc<CountingRunner>) -> Arc<JobDispatcher> {
        Arc::new(JobDispatcher::new(
            Arc::new(SystemSessionSupplier::new("test")),
            runner,
        ))
    }
}
