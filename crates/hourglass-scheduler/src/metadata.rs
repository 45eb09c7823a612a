//! The process / queue / table metadata the scheduler reads.
//!
//! The manager only sees [`MetadataSource`]. [`InstanceMetadata`] is the
//! bundled implementation, loaded from a TOML file.

use std::collections::BTreeSet;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use hourglass_core::HourglassError;

use crate::schedule::ScheduleDefinition;

/// Read-only view of the entities that can be scheduled.
pub trait MetadataSource: Send + Sync {
    fn process(&self, name: &str) -> Option<&ProcessMeta>;
    fn queue(&self, name: &str) -> Option<&QueueMeta>;
    fn table(&self, name: &str) -> Option<&TableMeta>;

    fn processes(&self) -> Vec<&ProcessMeta>;
    fn queues(&self) -> Vec<&QueueMeta>;
    fn tables(&self) -> Vec<&TableMeta>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMeta {
    pub name: String,
    /// Static schedule; a process with one may not also be scheduled dynamically.
    #[serde(default)]
    pub schedule: Option<ScheduleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMeta {
    pub name: String,
    #[serde(default)]
    pub schedule: Option<ScheduleDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    #[serde(default)]
    pub automation_details: Option<AutomationDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationDetails {
    /// Polling schedule for the table's pending automations.
    #[serde(default)]
    pub schedule: Option<ScheduleDefinition>,
    #[serde(default)]
    pub actions: Vec<AutomationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationAction {
    pub name: String,
    pub trigger_event: TriggerEvent,
}

/// When a table automation action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerEvent {
    PreInsert,
    PostInsert,
    PreUpdate,
    PostUpdate,
}

/// Status a record carries while automations of that kind are outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationStatus {
    PendingInsertAutomations,
    PendingUpdateAutomations,
}

impl AutomationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationStatus::PendingInsertAutomations => "PENDING_INSERT_AUTOMATIONS",
            AutomationStatus::PendingUpdateAutomations => "PENDING_UPDATE_AUTOMATIONS",
        }
    }
}

impl std::fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutomationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING_INSERT_AUTOMATIONS" => Ok(AutomationStatus::PendingInsertAutomations),
            "PENDING_UPDATE_AUTOMATIONS" => Ok(AutomationStatus::PendingUpdateAutomations),
            other => Err(format!("unknown automation status: {other}")),
        }
    }
}

impl TriggerEvent {
    pub fn pending_status(&self) -> AutomationStatus {
        match self {
            TriggerEvent::PreInsert | TriggerEvent::PostInsert => {
                AutomationStatus::PendingInsertAutomations
            }
            TriggerEvent::PreUpdate | TriggerEvent::PostUpdate => {
                AutomationStatus::PendingUpdateAutomations
            }
        }
    }
}

impl AutomationDetails {
    /// Distinct pending statuses the actions produce, in sorted order.
    pub fn pending_statuses(&self) -> BTreeSet<AutomationStatus> {
        self.actions
            .iter()
            .map(|a| a.trigger_event.pending_status())
            .collect()
    }
}

impl ProcessMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: None,
        }
    }

    pub fn with_schedule(mut self, schedule: ScheduleDefinition) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

impl QueueMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: None,
        }
    }

    pub fn with_schedule(mut self, schedule: ScheduleDefinition) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

impl TableMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            automation_details: None,
        }
    }

    pub fn with_automation_details(mut self, details: AutomationDetails) -> Self {
        self.automation_details = Some(details);
        self
    }
}

/// All scheduling-relevant metadata of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default)]
    pub processes: Vec<ProcessMeta>,
    #[serde(default)]
    pub queues: Vec<QueueMeta>,
    #[serde(default)]
    pub tables: Vec<TableMeta>,
}

impl InstanceMetadata {
    /// Load from a TOML file. A missing file yields empty metadata.
    pub fn load(path: &str) -> hourglass_core::Result<Self> {
        let metadata: InstanceMetadata = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| HourglassError::Metadata(e.to_string()))?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Names must be unique per entity kind.
    pub fn validate(&self) -> hourglass_core::Result<()> {
        check_unique("process", self.processes.iter().map(|p| p.name.as_str()))?;
        check_unique("queue", self.queues.iter().map(|q| q.name.as_str()))?;
        check_unique("table", self.tables.iter().map(|t| t.name.as_str()))?;
        Ok(())
    }

    pub fn with_process(mut self, process: ProcessMeta) -> Self {
        self.processes.push(process);
        self
    }

    pub fn with_queue(mut self, queue: QueueMeta) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn with_table(mut self, table: TableMeta) -> Self {
        self.tables.push(table);
        self
    }
}

fn check_unique<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
) -> hourglass_core::Result<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(HourglassError::Metadata(format!("duplicate {kind} name: {name}")));
        }
    }
    Ok(())
}

impl MetadataSource for InstanceMetadata {
    fn process(&self, name: &str) -> Option<&ProcessMeta> {
        self.processes.iter().find(|p| p.name == name)
    }

    fn queue(&self, name: &str) -> Option<&QueueMeta> {
        self.queues.iter().find(|q| q.name == name)
    }

    fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn processes(&self) -> Vec<&ProcessMeta> {
        self.processes.iter().collect()
    }

    fn queues(&self) -> Vec<&QueueMeta> {
        self.queues.iter().collect()
    }

    fn tables(&self) -> Vec<&TableMeta> {
        self.tables.iter().collect()
    }
}
