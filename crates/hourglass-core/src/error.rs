use thiserror::Error;

#[derive(Debug, Error)]
pub enum HourglassError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Invalid job key: {key}")]
    InvalidJobKey { key: String },
}

pub type Result<T> = std::result::Result<T, HourglassError>;
