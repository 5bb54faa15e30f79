//! Terminal status and execution state types

use serde::{Deserialize, Serialize};

/// Process exit status as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    pub signal: Option<i32>,
    /// Signal that stopped the process (Unix job control)
    pub stopped_signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        self.signal.is_some()
    }

    /// Returns true if the process is stopped rather than terminated
    pub fn stopped(&self) -> bool {
        self.stopped_signal.is_some()
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self {
                code: status.code(),
                signal: status.signal(),
                stopped_signal: status.stopped_signal(),
            }
        }

        #[cfg(not(unix))]
        {
            Self {
                code: status.code(),
                signal: None,
                stopped_signal: None,
            }
        }
    }
}

/// Execution state of a [`ProcessHandle`](crate::ProcessHandle)
///
/// `NotStarted` is the initial state. `Aborted`, `Completed` and
/// `FailedToStart` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// No invocation has been made yet
    NotStarted,
    /// The invocation is in flight, output capture included
    Running,
    /// The process was terminated by an uncaught signal
    Aborted,
    /// The process exited normally, with any exit code
    Completed,
    /// The process never ran; the result carries the exception
    FailedToStart,
}

impl ExecutionState {
    /// Returns true for the states an invocation cannot leave on its own
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::Completed | Self::FailedToStart
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
            Self::FailedToStart => "failed to start",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionState::NotStarted.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(ExecutionState::Aborted.is_terminal());
        assert!(ExecutionState::Completed.is_terminal());
        assert!(ExecutionState::FailedToStart.is_terminal());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_std_status() {
        use std::os::unix::process::ExitStatusExt;

        let exited = ExitStatus::from(std::process::ExitStatus::from_raw(3 << 8));
        assert_eq!(exited.code, Some(3));
        assert!(!exited.success());
        assert!(!exited.terminated_by_signal());

        let killed = ExitStatus::from(std::process::ExitStatus::from_raw(9));
        assert_eq!(killed.code, None);
        assert_eq!(killed.signal, Some(9));
        assert!(!killed.stopped());
    }
}
