//! `hourglass-records`: the scheduled job record and its SQLite store.
//!
//! Records are the dynamic half of the scheduling model: each row describes
//! one job (process, queue processor, or table automations) together with its
//! schedule and an ordered list of key/value parameters. The store is plain
//! CRUD; keeping live triggers in sync is the scheduler crate's job.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{ScheduledJobStore, SqliteScheduledJobStore};
pub use types::{params, ScheduledJobParameter, ScheduledJobRecord, ScheduledJobType};
