use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HourglassError;

const SCHEDULED_JOB_PREFIX: &str = "scheduledJob:";
const PROCESS_PREFIX: &str = "process:";
const QUEUE_PREFIX: &str = "queue:";
const TABLE_AUTOMATIONS_PREFIX: &str = "tableAutomations:";

/// Stable identifier a trigger is registered under with a scheduler backend.
///
/// Formats:
/// - `scheduledJob:{id}` for jobs declared by a scheduled job record
/// - `process:{name}` / `queue:{name}` for schedules declared in metadata
/// - `tableAutomations:{table}:{status}` for table automation schedules
///
/// Only `scheduledJob:` keys are dynamic; the rest are owned by metadata and
/// must survive reconciliation untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct JobKey(pub String);

impl JobKey {
    pub fn for_scheduled_job(id: i64) -> Self {
        Self(format!("{SCHEDULED_JOB_PREFIX}{id}"))
    }

    pub fn for_process(process_name: &str) -> Self {
        Self(format!("{PROCESS_PREFIX}{process_name}"))
    }

    pub fn for_queue(queue_name: &str) -> Self {
        Self(format!("{QUEUE_PREFIX}{queue_name}"))
    }

    pub fn for_table_automations(table_name: &str, automation_status: &str) -> Self {
        Self(format!(
            "{TABLE_AUTOMATIONS_PREFIX}{table_name}:{automation_status}"
        ))
    }

    /// Validate and wrap a key read back from a backend or a log line.
    pub fn parse(s: &str) -> Result<Self, HourglassError> {
        let known = [
            SCHEDULED_JOB_PREFIX,
            PROCESS_PREFIX,
            QUEUE_PREFIX,
            TABLE_AUTOMATIONS_PREFIX,
        ];
        let rest = known
            .iter()
            .find_map(|prefix| s.strip_prefix(prefix))
            .ok_or_else(|| HourglassError::InvalidJobKey { key: s.to_string() })?;
        if rest.is_empty() {
            return Err(HourglassError::InvalidJobKey { key: s.to_string() });
        }
        if s.starts_with(SCHEDULED_JOB_PREFIX) && rest.parse::<i64>().is_err() {
            return Err(HourglassError::InvalidJobKey { key: s.to_string() });
        }
        Ok(Self(s.to_string()))
    }

    /// True for keys that belong to a scheduled job record.
    pub fn is_dynamic(&self) -> bool {
        self.0.starts_with(SCHEDULED_JOB_PREFIX)
    }

    /// The record id behind a dynamic key.
    pub fn scheduled_job_id(&self) -> Option<i64> {
        self.0
            .strip_prefix(SCHEDULED_JOB_PREFIX)
            .and_then(|id| id.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobKey {
    type Error = HourglassError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_job_key_is_dynamic() {
        let key = JobKey::for_scheduled_job(42);
        assert_eq!(key.as_str(), "scheduledJob:42");
        assert!(key.is_dynamic());
        assert_eq!(key.scheduled_job_id(), Some(42));
    }

    #[test]
    fn static_keys_are_not_dynamic() {
        for key in [
            JobKey::for_process("nightlyCleanup"),
            JobKey::for_queue("orders"),
            JobKey::for_table_automations("person", "PENDING_INSERT_AUTOMATIONS"),
        ] {
            assert!(!key.is_dynamic(), "{key} should be static");
            assert!(key.scheduled_job_id().is_none());
        }
    }

    #[test]
    fn table_automation_key_format() {
        let key = JobKey::for_table_automations("person", "PENDING_UPDATE_AUTOMATIONS");
        assert_eq!(key.as_str(), "tableAutomations:person:PENDING_UPDATE_AUTOMATIONS");
    }

    #[test]
    fn parse_accepts_known_prefixes() {
        assert!(JobKey::parse("scheduledJob:7").is_ok());
        assert!(JobKey::parse("process:foo").is_ok());
        assert!(JobKey::parse("queue:bar").is_ok());
        assert!(JobKey::parse("tableAutomations:t:PENDING_INSERT_AUTOMATIONS").is_ok());
    }

    #[test]
    fn deserializing_validates_the_key() {
        let key: JobKey = serde_json::from_str("\"queue:orders\"").unwrap();
        assert_eq!(key, JobKey::for_queue("orders"));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"queue:orders\"");
        assert!(serde_json::from_str::<JobKey>("\"orders\"").is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(JobKey::parse("nope:1").is_err());
        assert!(JobKey::parse("process:").is_err());
        assert!(JobKey::parse("scheduledJob:abc").is_err());
    }
}
