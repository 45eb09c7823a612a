//! `hourglass-scheduler`: turns scheduled job records and static metadata
//! schedules into live triggers, and keeps the two in line.
//!
//! # Overview
//!
//! A [`ScheduleManager`] validates each schedulable entity, resolves its
//! [`schedule::ScheduleDefinition`] into a [`Trigger`], and hands it to the
//! named [`backend::SchedulerBackend`]. When a trigger fires, the backend
//! calls back into [`dispatch::JobDispatcher`], which runs the job through a
//! [`dispatch::JobRunner`].
//!
//! # Backends
//!
//! | Kind         | Engine                                             |
//! |--------------|----------------------------------------------------|
//! | `simple`     | One tokio task per job                             |
//! | `enterprise` | `tokio-cron-scheduler` `JobScheduler`              |
//!
//! # Job keys
//!
//! Records schedule under `scheduledJob:<id>`; metadata schedules under
//! `process:<name>`, `queue:<name>` and `tableAutomations:<table>:<status>`.
//! Reconciliation only ever touches the first kind.

pub mod backend;
pub mod bridge;
pub mod context;
pub mod cron_describe;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod reconcile;
pub mod schedule;
pub mod service;

pub use backend::{SchedulerBackend, SchedulerRegistry};
pub use context::SchedulerContext;
pub use error::{Result, SchedulerError};
pub use manager::{ManagerParts, ScheduleManager, SetupSummary};
pub use reconcile::{ReconcileReport, ReconciliationProcess};
pub use schedule::{ScheduleDefinition, Trigger};
pub use service::{SavedScheduledJob, ScheduledJobService};
