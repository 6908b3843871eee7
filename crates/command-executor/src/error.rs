//! Error types for command execution

use std::time::Duration;
use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// The process did not finish within its timeout policy
    #[error("process timed out after {}s", .after.as_secs())]
    TimedOut {
        /// How long the process was allowed to run
        after: Duration,
    },

    /// A command could not be turned into a shell string
    #[error("invalid command: {reason}")]
    InvalidCommand {
        /// Why the command was rejected
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Prefix a spawn failure with the layer it happened in
    pub fn with_layer_context(self, layer: impl Into<String>) -> Self {
        match self {
            Error::SpawnFailed { reason } => Error::SpawnFailed {
                reason: format!("in {} layer: {}", layer.into(), reason),
            },
            other => other,
        }
    }

    /// Returns true if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_context_only_wraps_spawn_failures() {
        let err = Error::spawn_failed("no such file").with_layer_context("kubectl");
        assert_eq!(
            err.to_string(),
            "failed to spawn process: in kubectl layer: no such file"
        );

        let err = Error::TimedOut {
            after: Duration::from_secs(5),
        }
        .with_layer_context("kubectl");
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "process timed out after 5s");
    }
}
