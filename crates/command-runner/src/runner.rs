//! One spawn, drain, wait and record sequence

use async_process::Stdio;
use futures::FutureExt;
use futures_lite::future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::command::{Environment, Invocation, ShellMode, SpawnOptions, DEFAULT_SHELL};
use crate::drain::{LineCallback, StreamDrainer};
use crate::error::{Error, Result};
use crate::lock;
use crate::logger::{self, LogSource, SharedLogger};
use crate::status::ExitStatus;

/// Outcome of one invocation
///
/// Snapshots are taken under a lock, so a snapshot of a finished invocation
/// never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskResult {
    /// The fully resolved command line, shell wrapper included
    pub invocation: String,
    /// Why the invocation itself failed, if it did
    pub exception: Option<Error>,
    /// Monotonic time from just before spawn until exit and drain
    pub wall_time: Duration,
    /// OS-reported outcome; absent until the process terminated
    pub status: Option<ExitStatus>,
    /// OS process id; absent until the process was spawned
    pub pid: Option<u32>,
    /// Everything read from stdout
    pub stdout: String,
    /// Everything read from stderr
    pub stderr: String,
}

impl TaskResult {
    /// The exit code, when the process exited normally
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code)
    }

    /// Wall time in fractional seconds
    pub fn wall_time_secs(&self) -> f64 {
        self.wall_time.as_secs_f64()
    }
}

/// Result storage shared between a runner and the handle observing it
///
/// Output buffers live outside the record so the drainers never contend with
/// status queries.
#[derive(Debug, Default)]
pub(crate) struct SharedResult {
    record: Mutex<TaskResult>,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl SharedResult {
    pub(crate) fn snapshot(&self) -> TaskResult {
        let mut result = lock(&self.record).clone();
        result.stdout = lock(&self.stdout).clone();
        result.stderr = lock(&self.stderr).clone();
        result
    }

    pub(crate) fn status(&self) -> Option<ExitStatus> {
        lock(&self.record).status
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        lock(&self.record).pid
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut TaskResult)) {
        f(&mut lock(&self.record));
    }
}

/// Settings a handle hands to every runner it creates
#[derive(Clone)]
pub(crate) struct RunnerSettings {
    pub(crate) shell_mode: ShellMode,
    pub(crate) shell: String,
    pub(crate) environment: Environment,
    pub(crate) on_stdout: Option<LineCallback>,
    pub(crate) on_stderr: Option<LineCallback>,
    pub(crate) logger: SharedLogger,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            shell_mode: ShellMode::Native,
            shell: DEFAULT_SHELL.to_string(),
            environment: Environment::new(),
            on_stdout: None,
            on_stderr: None,
            logger: logger::no_op(),
        }
    }
}

/// Runs exactly one invocation
///
/// [`execute`](Self::execute) consumes the runner, so an instance can never
/// be reused for a second invocation.
pub(crate) struct TaskRunner {
    settings: RunnerSettings,
    shared: Arc<SharedResult>,
}

impl TaskRunner {
    pub(crate) fn new(settings: RunnerSettings) -> Self {
        Self {
            settings,
            shared: Arc::new(SharedResult::default()),
        }
    }

    pub(crate) fn shared(&self) -> Arc<SharedResult> {
        self.shared.clone()
    }

    /// Spawn `command`, capture its output and record the outcome
    ///
    /// Blocks until the process has exited and both output streams are
    /// drained. Failures are recorded in the result, never returned.
    pub fn execute(self, command: &str, args: Vec<String>, options: &SpawnOptions) {
        let logger = self.settings.logger.clone();
        let invocation = Invocation::resolve(
            self.settings.shell_mode,
            &self.settings.shell,
            command,
            args,
        );
        let command_line = invocation.command_line();
        self.shared
            .update(|r| r.invocation = command_line.clone());
        logger.info(&format!("starting {}", command_line));

        let started = Instant::now();
        let outcome = future::block_on(self.spawn_and_wait(&invocation, options));
        let wall_time = started.elapsed();

        match outcome {
            Ok(status) => {
                logger.info(&format!(
                    "{} finished in {:.3}s (code: {:?}, signal: {:?})",
                    command_line,
                    wall_time.as_secs_f64(),
                    status.code,
                    status.signal
                ));
                self.shared.update(|r| {
                    r.wall_time = wall_time;
                    r.status = Some(status);
                });
            }
            Err(e) => {
                logger.error(&format!("{} failed: {}", command_line, e));
                self.shared.update(|r| {
                    r.wall_time = wall_time;
                    r.exception = Some(e);
                });
            }
        }
    }

    async fn spawn_and_wait(
        &self,
        invocation: &Invocation,
        options: &SpawnOptions,
    ) -> Result<ExitStatus> {
        let logger = &*self.settings.logger;

        let mut cmd = invocation.prepare(&self.settings.environment, options, logger);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::from_spawn(invocation.program(), &e))?;

        let pid = child.id();
        self.shared.update(|r| r.pid = Some(pid));
        logger.debug(&format!("spawned {} with pid {}", invocation.program(), pid));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let drain_stdout = async {
            match stdout {
                Some(pipe) => {
                    StreamDrainer::new(LogSource::Stdout, logger)
                        .with_callback(self.settings.on_stdout.as_ref())
                        .with_buffer(&self.shared.stdout)
                        .drain(pipe)
                        .await
                }
                None => 0,
            }
        };
        let drain_stderr = async {
            match stderr {
                Some(pipe) => {
                    StreamDrainer::new(LogSource::Stderr, logger)
                        .with_callback(self.settings.on_stderr.as_ref())
                        .with_buffer(&self.shared.stderr)
                        .drain(pipe)
                        .await
                }
                None => 0,
            }
        };

        // The child is reaped only after both drainers have finished, so its
        // pid cannot be reused while the handle still reports it as running.
        let drained = AssertUnwindSafe(async { futures::join!(drain_stdout, drain_stderr) })
            .catch_unwind()
            .await;
        if let Err(payload) = drained {
            logger.warn(&format!("output callback panicked; killing pid {}", pid));
            let _ = child.kill();
            let _ = child.status().await;
            panic::resume_unwind(payload);
        }

        let status = child.status().await.map_err(|e| Error::WaitFailed {
            reason: e.to_string(),
        })?;

        Ok(ExitStatus::from(status))
    }
}
