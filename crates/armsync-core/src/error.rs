//! Error types for Armsync

use crate::domain::locking::LockError;
use crate::domain::resources::ResourceError;
use crate::domain::tasks::TaskError;
use crate::domain::threads::ThreadError;
use thiserror::Error;

/// Result type alias using Armsync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Armsync error types
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Task errors (E400-E499)
    #[error(transparent)]
    Task(#[from] TaskError),

    // Resource errors (E500-E599)
    #[error(transparent)]
    Resource(#[from] ResourceError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}. Run `armsync config show` to inspect the effective configuration.")]
    Config(String),

    // Thread errors (E700-E799)
    #[error(transparent)]
    Thread(#[from] ThreadError),

    // Generic errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::Task(e) => e.code(),
            Self::Resource(e) => e.code(),
            Self::Config(_) => "E600",
            Self::Thread(e) => e.code(),
            Self::Io(_) => "E9999",
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock(e) => e.is_retryable(),
            Self::Resource(e) => e.is_retryable(),
            Self::Task(TaskError::ResultTimeout { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_codes_come_from_domain_errors() {
        let err: Error = LockError::Timeout {
            lock_id: "robot".into(),
            timeout: Duration::from_millis(10),
        }
        .into();
        assert_eq!(err.code(), "E301");
        assert!(err.is_retryable());

        let err: Error = ResourceError::NotRegistered("camera".into()).into();
        assert_eq!(err.code(), "E500");
        assert!(!err.is_retryable());

        let err: Error = ThreadError::AlreadyExists("io".into()).into();
        assert_eq!(err.code(), "E700");
    }

    #[test]
    fn test_config_error_message() {
        let err = Error::Config("workers.count must be at least 1".into());
        assert_eq!(err.code(), "E600");
        assert!(err.to_string().contains("armsync config show"));
    }

    #[test]
    fn test_io_error() {
        let err: Error = std::io::Error::other("spawn failed").into();
        assert_eq!(err.code(), "E9999");
    }
}
