//! Error types for the scheduler.

use thiserror::Error;

use crate::tier::Tier;

/// Error returned by a task action.
///
/// Actions report failure through this boxed error; the scheduler logs it with
/// the task identity and keeps going.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by task actions.
pub type TaskResult = Result<(), TaskError>;

/// Errors that can occur while managing schedulers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The dispatch thread for a tier could not be spawned.
    #[error("Failed to spawn {tier} scheduler thread: {source}")]
    ThreadSpawn {
        tier: Tier,
        #[source]
        source: std::io::Error,
    },

    /// The scheduler has been stopped and no longer accepts tasks.
    #[error("{0} scheduler is stopped")]
    Stopped(Tier),

    /// IO error while persisting scheduler-owned state.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// An expiry record line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordParseError {
    /// Fewer than the four mandatory fields were present.
    #[error("expected at least 4 fields, found {found}")]
    MissingFields { found: usize },

    /// A timestamp field was not an integer unix time.
    #[error("invalid {field} timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_spawn_error_mentions_tier() {
        let err = SchedulerError::ThreadSpawn {
            tier: Tier::Critical,
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads"),
        };
        let msg = err.to_string();
        assert!(msg.contains("critical"));
        assert!(msg.contains("no threads"));
    }

    #[test]
    fn test_stopped_error() {
        let err = SchedulerError::Stopped(Tier::Background);
        assert_eq!(err.to_string(), "background scheduler is stopped");
    }

    #[test]
    fn test_record_parse_error_display() {
        let err = RecordParseError::MissingFields { found: 2 };
        assert!(err.to_string().contains("found 2"));

        let err = RecordParseError::InvalidTimestamp {
            field: "expiry",
            value: "soon".to_string(),
        };
        assert!(err.to_string().contains("expiry"));
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "list missing");
        let err: SchedulerError = io_err.into();
        assert!(err.to_string().contains("list missing"));
    }
}
