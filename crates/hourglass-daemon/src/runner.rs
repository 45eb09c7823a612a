use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use hourglass_scheduler::dispatch::{JobRunner, Session};

/// Runner used when no process framework is attached: every fire is logged
/// with its parameters and reported as successful.
pub struct LoggingJobRunner;

#[async_trait]
impl JobRunner for LoggingJobRunner {
    async fn run_process(
        &self,
        session: &Session,
        process_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        info!(session = %session.id, user = %session.user, process = %process_name, ?parameters, "running process");
        Ok(())
    }

    async fn process_queue(
        &self,
        session: &Session,
        queue_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        info!(session = %session.id, user = %session.user, queue = %queue_name, ?parameters, "polling queue");
        Ok(())
    }

    async fn run_table_automations(
        &self,
        session: &Session,
        table_name: &str,
        automation_status: &str,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        info!(
            session = %session.id,
            user = %session.user,
            table = %table_name,
            status = %automation_status,
            ?parameters,
            "running table automations"
        );
        Ok(())
    }
}
