//! Invocation building: shell mode, spawn options and the final argument vector

use async_process::Command as AsyncCommand;
use std::process::Command as StdCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::logger::Logger;

/// Environment overlay applied to a child process
///
/// A `None` value removes the variable from the child's environment.
pub type Environment = BTreeMap<String, Option<String>>;

/// The shell used by [`ShellMode::ShellWrapped`] unless a handle overrides it
pub const DEFAULT_SHELL: &str = "sh";

/// How a command and its arguments reach the OS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellMode {
    /// Program and arguments are passed to the spawn primitive unchanged
    #[default]
    Native,
    /// Program and escaped arguments are joined into one `shell -c` script
    ///
    /// Only the arguments are escaped. The command is inserted verbatim so
    /// it may carry shell syntax of its own, such as pipes or redirections.
    ShellWrapped,
}

/// Options applied to the spawned process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpawnOptions {
    /// Working directory for the child
    pub current_dir: Option<PathBuf>,
    /// File creation mask for the child (Unix only)
    pub umask: Option<u32>,
    /// Start from an empty environment; only the overlay is passed
    pub clear_env: bool,
}

impl SpawnOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Set the file creation mask
    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = Some(mask);
        self
    }

    /// Unset every inherited environment variable
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }
}

/// A fully resolved argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    /// Resolve `command` and `args` into the argument vector for `mode`
    ///
    /// In shell-wrapped mode the command is kept verbatim so it may use shell
    /// syntax itself, while every argument is escaped.
    pub fn resolve(mode: ShellMode, shell: &str, command: &str, args: Vec<String>) -> Self {
        match mode {
            ShellMode::Native => Self {
                program: command.to_string(),
                args,
            },
            ShellMode::ShellWrapped => {
                let mut script = command.to_string();
                for arg in &args {
                    script.push(' ');
                    script.push_str(&shell_escape(arg));
                }
                Self {
                    program: shell.to_string(),
                    args: vec!["-c".to_string(), script],
                }
            }
        }
    }

    /// The program handed to the OS
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The arguments handed to the OS
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The invocation as one copy-pastable command line
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_escape(arg));
        }
        line
    }

    /// Build an `async_process::Command` with the environment overlay and
    /// spawn options applied
    ///
    /// The options are set on a `std::process::Command` first, since the
    /// async wrapper has no pre-exec hook for the file creation mask.
    pub(crate) fn prepare(
        &self,
        env: &Environment,
        options: &SpawnOptions,
        logger: &dyn Logger,
    ) -> AsyncCommand {
        let mut cmd = StdCommand::new(&self.program);
        cmd.args(&self.args);

        if options.clear_env {
            logger.debug("clearing inherited environment");
            cmd.env_clear();
        }
        for (key, value) in env {
            match value {
                Some(value) => {
                    cmd.env(key, value);
                }
                None => {
                    logger.debug(&format!("unsetting environment variable {}", key));
                    cmd.env_remove(key);
                }
            }
        }

        if let Some(dir) = &options.current_dir {
            logger.debug(&format!("using working directory {}", dir.display()));
            cmd.current_dir(dir);
        }

        if let Some(mask) = options.umask {
            logger.debug(&format!("using file creation mask {:o}", mask));
            apply_umask(&mut cmd, mask, logger);
        }

        AsyncCommand::from(cmd)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn apply_umask(cmd: &mut StdCommand, mask: u32, _logger: &dyn Logger) {
    use std::os::unix::process::CommandExt;
    use nix::sys::stat::{umask, Mode};

    let mode = Mode::from_bits_truncate(mask as nix::libc::mode_t);
    // SAFETY: umask(2) is async-signal-safe and touches no shared state.
    unsafe {
        cmd.pre_exec(move || {
            let _ = umask(mode);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_umask(_cmd: &mut StdCommand, _mask: u32, logger: &dyn Logger) {
    logger.warn("file creation mask is not supported on this platform; ignoring");
}

/// Escape a string for safe inclusion in a shell command
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~".contains(c)) {
        // Use single quotes and escape any single quotes in the string
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}
