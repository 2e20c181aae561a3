use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::range::RangeError;
use crate::workers::WorkerError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, ChannelStoreError>;

#[derive(Error, Debug)]
pub enum ChannelStoreError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Logging setup error: {0}")]
    LoggingSetup(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("channel not configured")]
    ChannelNotConfigured,

    #[error("invalid channel type")]
    InvalidChannelType,

    #[error("unexpected response type: {0}")]
    UnexpectedResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(#[from] RangeError),

    #[error("Backend returned no data at offset {offset}")]
    EmptyChunk { offset: i64 },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// How a failure should surface to a client of the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    RangeNotSatisfiable,
    /// Backend outage or a transient fault; worth retrying later
    Unavailable,
    /// Deployment problem (channel or credentials); retrying will not help
    Misconfigured,
    Internal,
}

impl ErrorClass {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::NotFound => 404,
            ErrorClass::RangeNotSatisfiable => 416,
            ErrorClass::Unavailable => 503,
            ErrorClass::Misconfigured | ErrorClass::Internal => 500,
        }
    }
}

impl ChannelStoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChannelStoreError::NotFound(_) => ErrorClass::NotFound,
            ChannelStoreError::RangeNotSatisfiable(_) => ErrorClass::RangeNotSatisfiable,
            ChannelStoreError::Backend(_)
            | ChannelStoreError::EmptyChunk { .. }
            | ChannelStoreError::UnexpectedResponse(_) => ErrorClass::Unavailable,
            ChannelStoreError::Worker(err) => err.class(),
            ChannelStoreError::Configuration(_)
            | ChannelStoreError::ChannelNotConfigured
            | ChannelStoreError::InvalidChannelType => ErrorClass::Misconfigured,
            ChannelStoreError::Filesystem(_)
            | ChannelStoreError::LoggingSetup(_)
            | ChannelStoreError::Cache(_)
            | ChannelStoreError::Other(_) => ErrorClass::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ChannelStoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ChannelStoreError::Other(anyhow::anyhow!(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            ChannelStoreError::NotFound("post 1".to_string()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            ChannelStoreError::RangeNotSatisfiable(RangeError::Unsatisfiable {
                start: 10,
                end: 5
            })
            .class(),
            ErrorClass::RangeNotSatisfiable
        );
        assert_eq!(
            ChannelStoreError::Backend(BackendError::Transport("reset".to_string())).class(),
            ErrorClass::Unavailable
        );
        assert_eq!(
            ChannelStoreError::ChannelNotConfigured.class(),
            ErrorClass::Misconfigured
        );
        assert_eq!(
            ChannelStoreError::Worker(WorkerError::NoWorkers).class(),
            ErrorClass::Unavailable
        );
    }

    #[test]
    fn test_not_found_is_distinct_from_unavailable() {
        let missing = ChannelStoreError::NotFound("file 3".to_string());
        let outage = ChannelStoreError::Backend(BackendError::Transport("down".to_string()));

        assert!(missing.is_not_found());
        assert!(!outage.is_not_found());
        assert_ne!(missing.class().status_code(), outage.class().status_code());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorClass::NotFound.status_code(), 404);
        assert_eq!(ErrorClass::RangeNotSatisfiable.status_code(), 416);
        assert_eq!(ErrorClass::Unavailable.status_code(), 503);
        assert_eq!(ErrorClass::Misconfigured.status_code(), 500);
    }

    #[test]
    fn test_named_error_messages() {
        assert_eq!(
            ChannelStoreError::ChannelNotConfigured.to_string(),
            "channel not configured"
        );
        assert_eq!(
            ChannelStoreError::InvalidChannelType.to_string(),
            "invalid channel type"
        );
        assert_eq!(
            ChannelStoreError::UnexpectedResponse("cdn redirect".to_string()).to_string(),
            "unexpected response type: cdn redirect"
        );
    }
}
