use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A scheduled job or static schedule failed validation. The message is
    /// a complete sentence naming the field at fault and is shown verbatim.
    #[error("{0}")]
    Validation(String),

    /// The schedule is present but cannot be turned into a trigger.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No backend is registered under this scheduler name.
    #[error("Unknown scheduler: {name}")]
    UnknownScheduler { name: String },

    /// Used before `init_instance`, or after `un_init`.
    #[error("{component} is not initialized")]
    NotInitialized { component: String },

    /// `init_instance` called twice without `un_init` in between.
    #[error("{component} is already initialized")]
    AlreadyInitialized { component: String },

    /// `start` called on something that is already running.
    #[error("{component} is already running")]
    AlreadyRunning { component: String },

    /// The underlying scheduling engine rejected an operation.
    #[error("Scheduler backend error ({scheduler}): {reason}")]
    Backend { scheduler: String, reason: String },

    /// The scheduled job store failed.
    #[error("Scheduled job store error: {0}")]
    Store(#[from] hourglass_records::StoreError),
}

impl SchedulerError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        SchedulerError::Validation(msg.into())
    }

    pub(crate) fn not_initialized(component: impl Into<String>) -> Self {
        SchedulerError::NotInitialized {
            component: component.into(),
        }
    }

    pub(crate) fn already_running(component: impl Into<String>) -> Self {
        SchedulerError::AlreadyRunning {
            component: component.into(),
        }
    }

    pub(crate) fn backend(scheduler: &str, reason: impl std::fmt::Display) -> Self {
        SchedulerError::Backend {
            scheduler: scheduler.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
