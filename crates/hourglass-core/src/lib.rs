//! `hourglass-core`: configuration, error type, and identifiers shared by
//! every hourglass crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{HourglassError, Result};
pub use types::JobKey;
