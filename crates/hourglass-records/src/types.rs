use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Parameter keys the scheduler understands.
pub mod params {
    pub const PROCESS_NAME: &str = "processName";
    pub const QUEUE_NAME: &str = "queueName";
    pub const TABLE_NAME: &str = "tableName";
    pub const AUTOMATION_STATUS: &str = "automationStatus";
    pub const IS_SCHEDULED_JOB: &str = "isScheduledJob";
    pub const RECORD_ID: &str = "recordId";
}

/// What a scheduled job runs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledJobType {
    Process,
    QueueProcessor,
    TableAutomations,
}

impl ScheduledJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledJobType::Process => "PROCESS",
            ScheduledJobType::QueueProcessor => "QUEUE_PROCESSOR",
            ScheduledJobType::TableAutomations => "TABLE_AUTOMATIONS",
        }
    }
}

impl std::fmt::Display for ScheduledJobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduledJobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PROCESS" => Ok(ScheduledJobType::Process),
            "QUEUE_PROCESSOR" => Ok(ScheduledJobType::QueueProcessor),
            "TABLE_AUTOMATIONS" => Ok(ScheduledJobType::TableAutomations),
            other => Err(format!("unknown scheduled job type: {other}")),
        }
    }
}

/// One key/value pair passed to the job at fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJobParameter {
    pub key: String,
    pub value: String,
}

impl ScheduledJobParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A persisted, admin-editable description of one dynamically scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobRecord {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    pub label: Option<String>,
    pub description: Option<String>,
    /// Inactive jobs stay in the table but have no live trigger.
    pub is_active: bool,
    /// Which scheduler backend owns the trigger.
    pub scheduler_name: Option<String>,
    /// Raw type column; parsed with [`ScheduledJobRecord::parsed_type`].
    pub job_type: Option<String>,
    pub repeat_seconds: Option<u64>,
    pub cron_expression: Option<String>,
    /// Set by record-sync bridges, e.g. `("campaign", "17")`.
    pub foreign_key_type: Option<String>,
    pub foreign_key_value: Option<String>,
    /// Ordered; keys unique within the job.
    pub job_parameters: Vec<ScheduledJobParameter>,
    /// RFC3339, set by the store.
    pub create_date: Option<String>,
    /// RFC3339, set by the store.
    pub modify_date: Option<String>,
}

impl Default for ScheduledJobRecord {
    fn default() -> Self {
        Self {
            id: None,
            label: None,
            description: None,
            is_active: true,
            scheduler_name: None,
            job_type: None,
            repeat_seconds: None,
            cron_expression: None,
            foreign_key_type: None,
            foreign_key_value: None,
            job_parameters: Vec::new(),
            create_date: None,
            modify_date: None,
        }
    }
}

impl ScheduledJobRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn with_scheduler_name(mut self, name: impl Into<String>) -> Self {
        self.scheduler_name = Some(name.into());
        self
    }

    pub fn with_type(mut self, job_type: ScheduledJobType) -> Self {
        self.job_type = Some(job_type.as_str().to_string());
        self
    }

    /// Set the raw type string, recognized or not.
    pub fn with_raw_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_repeat_seconds(mut self, seconds: u64) -> Self {
        self.repeat_seconds = Some(seconds);
        self
    }

    pub fn with_cron_expression(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn with_foreign_key(mut self, key_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.foreign_key_type = Some(key_type.into());
        self.foreign_key_value = Some(value.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(key, value);
        self
    }

    /// `None` when the column is empty, `Some(Err)` when it holds an unknown value.
    pub fn parsed_type(&self) -> Option<std::result::Result<ScheduledJobType, String>> {
        self.job_type.as_deref().map(str::parse)
    }

    pub fn has_schedule(&self) -> bool {
        self.repeat_seconds.is_some() || self.cron_expression.is_some()
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.job_parameters
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Replace the value for `key` in place, or append a new parameter.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.job_parameters.iter_mut().find(|p| p.key == key) {
            Some(existing) => existing.value = value,
            None => self.job_parameters.push(ScheduledJobParameter { key, value }),
        }
    }

    pub fn remove_parameter(&mut self, key: &str) -> Option<String> {
        let pos = self.job_parameters.iter().position(|p| p.key == key)?;
        Some(self.job_parameters.remove(pos).value)
    }

    /// Fails on the first key that appears twice.
    pub fn check_parameters(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for p in &self.job_parameters {
            if !seen.insert(p.key.as_str()) {
                return Err(StoreError::DuplicateParameter { key: p.key.clone() });
            }
        }
        Ok(())
    }

    /// Short identity for log lines.
    pub fn describe(&self) -> String {
        match (self.id, &self.label) {
            (Some(id), Some(label)) => format!("scheduledJob {id} ({label})"),
            (Some(id), None) => format!("scheduledJob {id}"),
            (None, Some(label)) => format!("unsaved scheduledJob ({label})"),
            (None, None) => "unsaved scheduledJob".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_strings() {
        for t in [
            ScheduledJobType::Process,
            ScheduledJobType::QueueProcessor,
            ScheduledJobType::TableAutomations,
        ] {
            assert_eq!(t.as_str().parse::<ScheduledJobType>(), Ok(t));
        }
        assert!("BATCH".parse::<ScheduledJobType>().is_err());
    }

    #[test]
    fn parsed_type_distinguishes_missing_from_unknown() {
        assert!(ScheduledJobRecord::new().parsed_type().is_none());
        let unknown = ScheduledJobRecord::new().with_raw_type("BATCH");
        assert!(matches!(unknown.parsed_type(), Some(Err(_))));
        let known = ScheduledJobRecord::new().with_type(ScheduledJobType::Process);
        assert_eq!(known.parsed_type(), Some(Ok(ScheduledJobType::Process)));
    }

    #[test]
    fn set_parameter_replaces_in_place() {
        let mut job = ScheduledJobRecord::new()
            .with_parameter("a", "1")
            .with_parameter("b", "2");
        job.set_parameter("a", "3");
        assert_eq!(job.job_parameters.len(), 2);
        assert_eq!(job.job_parameters[0], ScheduledJobParameter::new("a", "3"));
        assert_eq!(job.parameter("b"), Some("2"));
    }

    #[test]
    fn check_parameters_rejects_duplicates() {
        let mut job = ScheduledJobRecord::new().with_parameter("a", "1");
        job.job_parameters.push(ScheduledJobParameter::new("a", "2"));
        assert!(matches!(
            job.check_parameters(),
            Err(StoreError::DuplicateParameter { ref key }) if key == "a"
        ));
    }

    #[test]
    fn new_records_are_active_without_schedule() {
        let job = ScheduledJobRecord::new();
        assert!(job.is_active);
        assert!(!job.has_schedule());
        assert!(job.with_cron_expression("0 0 * * * ?").has_schedule());
    }
}
