use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hourglass_records::ScheduledJobRecord;

use crate::error::{Result, SchedulerError};

/// A declarative schedule, either from metadata or derived from a scheduled
/// job record. Turned into a [`Trigger`] before it reaches a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleDefinition {
    pub scheduler_name: Option<String>,
    pub repeat_millis: Option<u64>,
    pub repeat_seconds: Option<u64>,
    pub initial_delay_millis: Option<u64>,
    pub initial_delay_seconds: Option<u64>,
    pub cron_expression: Option<String>,
    /// Empty means the schedule applies in every environment.
    pub variant_filters: BTreeSet<String>,
}

/// The immutable firing rule a backend runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Repeat {
        every_millis: u64,
        initial_delay_millis: u64,
    },
    Cron {
        expression: String,
    },
}

impl ScheduleDefinition {
    /// The schedule a scheduled job record asks for.
    pub fn from_record(record: &ScheduledJobRecord) -> Self {
        Self {
            scheduler_name: record.scheduler_name.clone(),
            repeat_seconds: record.repeat_seconds,
            cron_expression: record.cron_expression.clone(),
            ..Self::default()
        }
    }

    pub fn with_scheduler_name(mut self, name: impl Into<String>) -> Self {
        self.scheduler_name = Some(name.into());
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

    pub fn with_variant_filter(mut self, variant: impl Into<String>) -> Self {
        self.variant_filters.insert(variant.into());
        self
    }

    /// Whether this schedule should be set up in `environment`.
    pub fn applies_to(&self, environment: Option<&str>) -> bool {
        if self.variant_filters.is_empty() {
            return true;
        }
        environment.is_some_and(|env| self.variant_filters.contains(env))
    }

    /// Validate the definition and produce the trigger a backend receives.
    pub fn resolve_trigger(&self) -> Result<Trigger> {
        let repeat_millis = match (self.repeat_millis, self.repeat_seconds) {
            (Some(_), Some(_)) => {
                return Err(SchedulerError::InvalidSchedule(
                    "only one of repeatMillis and repeatSeconds may be given".to_string(),
                ))
            }
            (Some(ms), None) => Some(ms),
            (None, Some(s)) => Some(s.saturating_mul(1000)),
            (None, None) => None,
        };

        match (repeat_millis, self.cron_expression.as_deref()) {
            (Some(_), Some(_)) => Err(SchedulerError::InvalidSchedule(
                "a schedule may not have both a repeat interval and a cron expression".to_string(),
            )),
            (Some(0), None) => Err(SchedulerError::InvalidSchedule(
                "repeat interval must be at least 1".to_string(),
            )),
            (Some(every_millis), None) => Ok(Trigger::Repeat {
                every_millis,
                initial_delay_millis: self.initial_delay_millis()?,
            }),
            (None, Some(expression)) => {
                parse_cron(expression)?;
                Ok(Trigger::Cron {
                    expression: expression.to_string(),
                })
            }
            (None, None) => Err(SchedulerError::InvalidSchedule(
                "no repeat interval or cron expression".to_string(),
            )),
        }
    }

    fn initial_delay_millis(&self) -> Result<u64> {
        match (self.initial_delay_millis, self.initial_delay_seconds) {
            (Some(_), Some(_)) => Err(SchedulerError::InvalidSchedule(
                "only one of initialDelayMillis and initialDelaySeconds may be given".to_string(),
            )),
            (Some(ms), None) => Ok(ms),
            (None, Some(s)) => Ok(s.saturating_mul(1000)),
            (None, None) => Ok(0),
        }
    }
}

impl Trigger {
    /// Next fire time strictly after `after`; `None` for an exhausted cron.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Repeat { every_millis, .. } => {
                Some(after + chrono::Duration::milliseconds(*every_millis as i64))
            }
            Trigger::Cron { expression } => parse_cron(expression)
                .ok()?
                .after(&after)
                .next(),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Repeat {
                every_millis,
                initial_delay_millis: 0,
            } => write!(f, "every {every_millis}ms"),
            Trigger::Repeat {
                every_millis,
                initial_delay_millis,
            } => write!(f, "every {every_millis}ms after {initial_delay_millis}ms"),
            Trigger::Cron { expression } => write!(f, "cron '{expression}'"),
        }
    }
}

pub(crate) fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expression)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("cron '{expression}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn repeat_seconds_become_millis() {
        let def = ScheduleDefinition::default().with_repeat_seconds(5);
        assert_eq!(
            def.resolve_trigger().unwrap(),
            Trigger::Repeat {
                every_millis: 5000,
                initial_delay_millis: 0
            }
        );
    }

    #[test]
    fn initial_delay_is_carried() {
        let def = ScheduleDefinition {
            repeat_millis: Some(250),
            initial_delay_seconds: Some(2),
            ..Default::default()
        };
        assert_eq!(
            def.resolve_trigger().unwrap(),
            Trigger::Repeat {
                every_millis: 250,
                initial_delay_millis: 2000
            }
        );
    }

    #[test]
    fn cron_and_repeat_are_exclusive() {
        let def = ScheduleDefinition::default()
            .with_repeat_seconds(5)
            .with_cron_expression("0 0 * * * ?");
        assert!(matches!(
            def.resolve_trigger(),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn both_repeat_units_rejected() {
        let def = ScheduleDefinition {
            repeat_millis: Some(100),
            repeat_seconds: Some(1),
            ..Default::default()
        };
        assert!(def.resolve_trigger().is_err());
    }

    #[test]
    fn zero_repeat_rejected() {
        let def = ScheduleDefinition::default().with_repeat_seconds(0);
        assert!(def.resolve_trigger().is_err());
    }

    #[test]
    fn empty_definition_rejected() {
        assert!(ScheduleDefinition::default().resolve_trigger().is_err());
    }

    #[test]
    fn bad_cron_rejected() {
        let def = ScheduleDefinition::default().with_cron_expression("every tuesday");
        assert!(matches!(
            def.resolve_trigger(),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn valid_cron_accepted() {
        let def = ScheduleDefinition::default().with_cron_expression("0 0 0 10,20 * ?");
        assert_eq!(
            def.resolve_trigger().unwrap(),
            Trigger::Cron {
                expression: "0 0 0 10,20 * ?".to_string()
            }
        );
    }

    #[test]
    fn variant_filters() {
        let everywhere = ScheduleDefinition::default();
        assert!(everywhere.applies_to(None));
        assert!(everywhere.applies_to(Some("prod")));

        let prod_only = ScheduleDefinition::default().with_variant_filter("prod");
        assert!(prod_only.applies_to(Some("prod")));
        assert!(!prod_only.applies_to(Some("dev")));
        assert!(!prod_only.applies_to(None));
    }

    #[test]
    fn from_record_copies_schedule_fields() {
        let record = ScheduledJobRecord::new()
            .with_scheduler_name("SIMPLE")
            .with_repeat_seconds(60);
        let def = ScheduleDefinition::from_record(&record);
        assert_eq!(def.scheduler_name.as_deref(), Some("SIMPLE"));
        assert_eq!(def.repeat_seconds, Some(60));
        assert!(def.cron_expression.is_none());
    }

    #[test]
    fn cron_next_fire() {
        let trigger = Trigger::Cron {
            expression: "0 30 * * * ?".to_string(),
        };
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(
            trigger.next_fire_after(from),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn trigger_display() {
        let t = Trigger::Repeat {
            every_millis: 1000,
            initial_delay_millis: 0,
        };
        assert_eq!(t.to_string(), "every 1000ms");
    }
}
