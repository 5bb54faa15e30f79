//! Error types for command execution

use std::io;
use thiserror::Error;

/// Unified error type for command execution
///
/// Errors are `Clone` so a [`TaskResult`](crate::TaskResult) snapshot can carry
/// the exception captured while running the invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The program could not be found
    #[error("command not found: {command}")]
    CommandNotFound {
        /// The command that was not found
        command: String,
    },

    /// The program exists but may not be executed
    #[error("permission denied: {command}")]
    PermissionDenied {
        /// The command that could not be executed
        command: String,
    },

    /// Failed to spawn a process for any other reason
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Waiting for the spawned process failed
    #[error("failed to wait for process: {reason}")]
    WaitFailed {
        /// The reason the wait failed
        reason: String,
    },

    /// The execution unit panicked before it could record a status
    #[error("execution unit panicked: {reason}")]
    ExecutionPanicked {
        /// The panic payload, when it was a string
        reason: String,
    },

    /// A handle was invoked again while its previous invocation was in flight
    #[error("process is already running: {invocation}")]
    AlreadyRunning {
        /// The invocation that is still running
        invocation: String,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// The operation needs a running process
    #[error("process is not running")]
    NotRunning,
}

impl Error {
    /// Classify an I/O error returned while spawning `command`
    pub fn from_spawn(command: impl Into<String>, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::CommandNotFound {
                command: command.into(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                command: command.into(),
            },
            _ => Self::spawn_failed(format!("{}: {}", command.into(), err)),
        }
    }

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

    /// Returns true if the error means the program does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CommandNotFound { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
