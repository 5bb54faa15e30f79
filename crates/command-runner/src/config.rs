//! Serializable handle configuration

use serde::{Deserialize, Serialize};

use crate::command::{Environment, ShellMode};

/// The serializable part of a [`ProcessHandle`](crate::ProcessHandle)'s setup
///
/// Callbacks and loggers are code, so they are added on the builder returned
/// by [`ProcessHandle::from_config`](crate::ProcessHandle::from_config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandleConfig {
    /// Native or shell-wrapped invocation
    pub shell_mode: ShellMode,
    /// Shell program for shell-wrapped mode; `sh` when unset
    pub shell: Option<String>,
    /// Environment overlay; `null` unsets a variable
    pub env: Environment,
}
