//! Loop error types.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Why a submitted task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The loop had stopped accepting tasks when the task was submitted.
    #[error("loop `{loop_id}` is closed")]
    Closed { loop_id: String },

    /// The task was accepted but dropped before it ran (non-draining shutdown).
    #[error("task was abandoned before it ran")]
    Abandoned,

    /// The task body panicked on the loop thread.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The waiter gave up. The task itself keeps running.
    #[error("timed out after {0:?} waiting for task")]
    Timeout(Duration),
}

/// Result of a submitted task.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors raised while building loops and loop groups.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The OS refused to start the worker thread.
    #[error("failed to spawn worker thread for loop `{loop_id}`")]
    Spawn {
        loop_id: String,
        #[source]
        source: std::io::Error,
    },

    /// A loop group must own at least one loop.
    #[error("loop group `{0}` must contain at least one loop")]
    EmptyGroup(String),
}

/// Errors raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value could not be parsed for the given key.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Extract a printable message from a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static message");

        let value = 7;
        let payload = std::panic::catch_unwind(|| panic!("formatted {value}")).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 7");

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u32)).unwrap_err();
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn test_error_display() {
        let err = TaskError::Closed {
            loop_id: "world-0".to_string(),
        };
        assert_eq!(err.to_string(), "loop `world-0` is closed");
        assert_eq!(
            TaskError::Timeout(Duration::from_millis(5)).to_string(),
            "timed out after 5ms waiting for task"
        );
    }
}
