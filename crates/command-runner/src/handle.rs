//! Caller-facing process handle and its execution state machine

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::command::{ShellMode, SpawnOptions};
use crate::config::HandleConfig;
use crate::drain::LineCallback;
use crate::error::{Error, Result};
use crate::logger::{Logger, SharedLogger};
use crate::runner::{RunnerSettings, SharedResult, TaskResult, TaskRunner};
use crate::status::ExecutionState;

/// A handle on one subprocess invocation at a time
///
/// Each `exec_sync`/`exec_async` call creates a fresh runner and a dedicated
/// thread (the execution unit) that spawns the process, drains its output and
/// records the outcome. The handle counts as running for as long as that
/// thread is alive, which includes output capture after the OS process has
/// exited. The process is not reaped until capture ends, so its pid stays
/// reserved for the whole running phase.
///
/// ```no_run
/// use command_runner::{ExecutionState, ProcessHandle, SpawnOptions};
///
/// let mut handle = ProcessHandle::new();
/// handle.exec_sync("echo", ["hejsan"], SpawnOptions::default())?;
/// assert_eq!(handle.state(), ExecutionState::Completed);
/// assert!(handle.exit_zero());
/// # Ok::<(), command_runner::Error>(())
/// ```
pub struct ProcessHandle {
    settings: RunnerSettings,
    unit: Option<ExecutionUnit>,
}

/// The thread running the current invocation
struct ExecutionUnit {
    shared: Arc<SharedResult>,
    thread: Option<JoinHandle<()>>,
    done: async_channel::Receiver<()>,
}

impl ExecutionUnit {
    /// The unit holds the sending half of `done` until its last statement,
    /// so a closed channel means the outcome is fully recorded.
    fn is_alive(&self) -> bool {
        !self.done.is_closed()
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            // Panics are caught inside the unit, so join only fails if
            // recording the panic itself panicked.
            if let Err(payload) = thread.join() {
                record_panic(&self.shared, payload);
            }
        }
    }
}

/// Resolves once an execution unit has finished
///
/// Obtained from [`ProcessHandle::completion`]; lets async code wait for an
/// invocation without parking a thread.
#[derive(Debug, Clone)]
pub struct Completion {
    done: async_channel::Receiver<()>,
}

impl Completion {
    /// Wait until the execution unit has finished
    pub async fn wait(self) {
        // Nothing is ever sent; the sender is dropped when the unit ends.
        let _ = self.done.recv().await;
    }

    /// Returns true once the execution unit has finished
    pub fn is_done(&self) -> bool {
        self.done.is_closed()
    }
}

impl ProcessHandle {
    /// Create a native-mode handle with no callbacks and logging disabled
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a handle
    pub fn builder() -> ProcessHandleBuilder {
        ProcessHandleBuilder {
            settings: RunnerSettings::default(),
        }
    }

    /// Start building a handle from deserialized configuration
    pub fn from_config(config: &HandleConfig) -> ProcessHandleBuilder {
        let mut builder = Self::builder().shell_mode(config.shell_mode);
        if let Some(shell) = &config.shell {
            builder = builder.shell(shell);
        }
        builder.settings.environment = config.env.clone();
        builder
    }

    /// Run `command` and block until it has finished
    ///
    /// Returns an error only when the previous invocation is still running.
    /// Spawn failures and abnormal exits are reported through
    /// [`state`](Self::state) and [`result`](Self::result).
    pub fn exec_sync<I>(
        &mut self,
        command: &str,
        args: I,
        options: SpawnOptions,
    ) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.exec_async(command, args, options)?;
        self.wait_on_completion();
        Ok(self)
    }

    /// Start `command` on a new execution unit and return immediately
    ///
    /// Returns [`Error::AlreadyRunning`] without spawning anything if the
    /// previous invocation is still in flight.
    pub fn exec_async<I>(
        &mut self,
        command: &str,
        args: I,
        options: SpawnOptions,
    ) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        if let Some(unit) = &self.unit {
            if unit.is_alive() {
                return Err(Error::AlreadyRunning {
                    invocation: unit.shared.snapshot().invocation,
                });
            }
        }

        let args: Vec<String> = args.into_iter().map(|a| a.to_string()).collect();
        let runner = TaskRunner::new(self.settings.clone());
        let shared = runner.shared();
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);

        let command = command.to_string();
        let unit_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name("command-runner".to_string())
            .spawn(move || {
                let _done = done_tx;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    runner.execute(&command, args, &options)
                }));
                if let Err(payload) = outcome {
                    record_panic(&unit_shared, payload);
                }
            });

        let thread = match spawned {
            Ok(thread) => Some(thread),
            Err(e) => {
                let err = Error::spawn_failed(format!("failed to start execution unit: {}", e));
                self.settings.logger.error(&err.to_string());
                shared.update(|r| r.exception = Some(err));
                None
            }
        };

        self.unit = Some(ExecutionUnit {
            shared,
            thread,
            done: done_rx,
        });
        Ok(self)
    }

    /// The current execution state, derived from what is observable now
    ///
    /// # Panics
    ///
    /// Panics if the OS reported the process as stopped. Job control is not
    /// supported, and the standard wait primitive never reports it.
    pub fn state(&self) -> ExecutionState {
        let Some(unit) = &self.unit else {
            return ExecutionState::NotStarted;
        };
        if unit.is_alive() {
            return ExecutionState::Running;
        }
        match unit.shared.status() {
            None => ExecutionState::FailedToStart,
            Some(status) if status.terminated_by_signal() => ExecutionState::Aborted,
            Some(status) if status.code.is_some() => ExecutionState::Completed,
            Some(status) => panic!(
                "unsupported terminal status for {}: {:?}",
                unit.shared.snapshot().invocation,
                status
            ),
        }
    }

    /// Returns true iff the invocation completed with exit code zero
    ///
    /// Never blocks; false while running and for every non-completed state.
    pub fn exit_zero(&self) -> bool {
        self.state() == ExecutionState::Completed
            && self
                .unit
                .as_ref()
                .and_then(|u| u.shared.status())
                .is_some_and(|s| s.success())
    }

    /// Block until the current invocation has finished and return its result
    ///
    /// Returns `None` immediately if nothing was ever started.
    pub fn wait_on_completion(&mut self) -> Option<TaskResult> {
        let unit = self.unit.as_mut()?;
        unit.join();
        Some(unit.shared.snapshot())
    }

    /// A snapshot of the current invocation's result, without blocking
    pub fn result(&self) -> Option<TaskResult> {
        self.unit.as_ref().map(|u| u.shared.snapshot())
    }

    /// The OS process id of the current invocation, once spawned
    pub fn pid(&self) -> Option<u32> {
        self.unit.as_ref().and_then(|u| u.shared.pid())
    }

    /// A notification that resolves when the current invocation finishes
    pub fn completion(&self) -> Option<Completion> {
        self.unit.as_ref().map(|u| Completion {
            done: u.done.clone(),
        })
    }

    /// Send SIGTERM (or equivalent) to the running process
    ///
    /// Returns [`Error::NotRunning`] once the exit status is recorded. While
    /// output is still being captured from an exited process (for example
    /// when a background grandchild holds a pipe open), the signal reaches
    /// the unreaped child and has no effect.
    pub fn terminate(&self) -> Result<()> {
        self.signal(Signal::Terminate)
    }

    /// Send SIGKILL (or equivalent) to forcefully stop the running process
    ///
    /// Same preconditions as [`terminate`](Self::terminate).
    pub fn kill(&self) -> Result<()> {
        self.signal(Signal::Kill)
    }

    /// Send SIGINT to interrupt the running process
    pub fn interrupt(&self) -> Result<()> {
        self.signal(Signal::Interrupt)
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        let Some(unit) = self.unit.as_ref().filter(|u| u.is_alive()) else {
            return Err(Error::NotRunning);
        };
        if unit.shared.status().is_some() {
            return Err(Error::NotRunning);
        }
        let pid = unit.shared.pid().ok_or(Error::NotRunning)?;
        self.settings
            .logger
            .debug(&format!("sending {:?} to pid {}", signal, pid));
        signal.send(pid)
    }
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("shell_mode", &self.settings.shell_mode)
            .field("invocation", &self.result().map(|r| r.invocation))
            .field("alive", &self.unit.as_ref().is_some_and(|u| u.is_alive()))
            .finish()
    }
}

fn record_panic(shared: &SharedResult, payload: Box<dyn Any + Send>) {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    shared.update(|r| {
        if r.status.is_none() && r.exception.is_none() {
            r.exception = Some(Error::ExecutionPanicked { reason });
        }
    });
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
    Interrupt,
}

impl Signal {
    #[cfg(unix)]
    fn send(self, pid: u32) -> Result<()> {
        use nix::sys::signal::{self, Signal as NixSignal};
        use nix::unistd::Pid;

        let sig = match self {
            Self::Terminate => NixSignal::SIGTERM,
            Self::Kill => NixSignal::SIGKILL,
            Self::Interrupt => NixSignal::SIGINT,
        };
        signal::kill(Pid::from_raw(pid as i32), sig)
            .map_err(|e| Error::signal_failed(sig as i32, e.to_string()))
    }

    #[cfg(not(unix))]
    fn send(self, _pid: u32) -> Result<()> {
        Err(Error::signal_failed(-1, "signals are not supported on this platform"))
    }
}

/// Builder for [`ProcessHandle`]
pub struct ProcessHandleBuilder {
    settings: RunnerSettings,
}

impl ProcessHandleBuilder {
    /// Choose native or shell-wrapped invocation
    pub fn shell_mode(mut self, mode: ShellMode) -> Self {
        self.settings.shell_mode = mode;
        self
    }

    /// Shell program used in shell-wrapped mode
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.settings.shell = shell.into();
        self
    }

    /// Call `callback` with every raw stdout line
    pub fn on_stdout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.settings.on_stdout = Some(Arc::new(callback) as LineCallback);
        self
    }

    /// Call `callback` with every raw stderr line
    pub fn on_stderr<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.settings.on_stderr = Some(Arc::new(callback) as LineCallback);
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings
            .environment
            .insert(key.into(), Some(value.into()));
        self
    }

    /// Unset an inherited environment variable for the child
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.settings.environment.insert(key.into(), None);
        self
    }

    /// Send the engine's diagnostics to `logger`
    pub fn logger<L: Logger + 'static>(self, logger: L) -> Self {
        self.shared_logger(Arc::new(logger))
    }

    /// Share an existing logger with this handle
    pub fn shared_logger(mut self, logger: SharedLogger) -> Self {
        self.settings.logger = logger;
        self
    }

    /// Build the handle
    pub fn build(self) -> ProcessHandle {
        ProcessHandle {
            settings: self.settings,
            unit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::RecordingLogger;
    use std::time::Duration;

    #[test]
    fn test_not_started() {
        let mut handle = ProcessHandle::new();
        assert_eq!(handle.state(), ExecutionState::NotStarted);
        assert!(!handle.exit_zero());
        assert!(handle.result().is_none());
        assert!(handle.pid().is_none());
        assert!(handle.completion().is_none());
        assert!(handle.wait_on_completion().is_none());
        assert_eq!(handle.kill(), Err(Error::NotRunning));
    }

    #[test]
    fn test_reinvoke_after_completion_rearms() {
        let mut handle = ProcessHandle::new();
        handle.exec_sync("echo", ["first"], SpawnOptions::default()).unwrap();
        let first = handle.result().unwrap();

        handle.exec_sync("echo", ["second"], SpawnOptions::default()).unwrap();
        let second = handle.result().unwrap();

        assert_eq!(first.stdout, "first\n");
        assert_eq!(second.stdout, "second\n");
        assert_eq!(second.invocation, "echo second");
    }

    #[test]
    fn test_callback_panic_is_captured() {
        let mut handle = ProcessHandle::builder()
            .on_stdout(|_line| panic!("callback exploded"))
            .build();
        handle.exec_sync("echo", ["boom"], SpawnOptions::default()).unwrap();

        assert_eq!(handle.state(), ExecutionState::FailedToStart);
        let result = handle.result().unwrap();
        assert_eq!(
            result.exception,
            Some(Error::ExecutionPanicked {
                reason: "callback exploded".to_string()
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_callback_panic_kills_and_reaps_child() {
        use nix::sys::signal;
        use nix::unistd::Pid;

        let marker = tempfile::tempdir().unwrap();
        let mut handle = ProcessHandle::builder()
            .shell_mode(ShellMode::ShellWrapped)
            .on_stdout(|_line| panic!("callback exploded"))
            .build();

        let started = std::time::Instant::now();
        handle
            .exec_sync(
                "echo first; trap '' PIPE; sleep 2; echo done > marker",
                Vec::<String>::new(),
                SpawnOptions::default().current_dir(marker.path()),
            )
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(handle.state(), ExecutionState::FailedToStart);
        let pid = handle.pid().unwrap();
        assert!(signal::kill(Pid::from_raw(pid as i32), None).is_err());
        assert_eq!(handle.terminate(), Err(Error::NotRunning));

        std::thread::sleep(Duration::from_millis(2500));
        assert!(!marker.path().join("marker").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_while_draining_does_not_reach_reaped_pid() {
        let mut handle = ProcessHandle::builder()
            .shell_mode(ShellMode::ShellWrapped)
            .build();
        // The background sleep keeps stdout open after the shell exits.
        handle
            .exec_async("sleep 0.5 & exit 3", Vec::<String>::new(), SpawnOptions::default())
            .unwrap();
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(handle.state(), ExecutionState::Running);
        assert!(handle.terminate().is_ok());

        let result = handle.wait_on_completion().unwrap();
        assert_eq!(result.exit_code(), Some(3));
        assert_eq!(handle.state(), ExecutionState::Completed);
        assert_eq!(handle.terminate(), Err(Error::NotRunning));
    }

    #[test]
    fn test_completion_resolves() {
        let mut handle = ProcessHandle::new();
        handle.exec_async("sleep", ["0.1"], SpawnOptions::default()).unwrap();
        let completion = handle.completion().unwrap();
        futures::executor::block_on(completion.clone().wait());
        assert!(completion.is_done());
        assert_eq!(handle.state(), ExecutionState::Completed);
        assert!(handle.exit_zero());
    }

    #[test]
    fn test_logger_sees_lifecycle_and_options() {
        let logger = Arc::new(RecordingLogger::default());
        let dir = std::env::temp_dir();
        let mut handle = ProcessHandle::builder()
            .shared_logger(logger.clone())
            .build();
        handle
            .exec_sync("true", Vec::<String>::new(), SpawnOptions::new().current_dir(&dir))
            .unwrap();

        assert!(logger.contains("info", "starting true"));
        assert!(logger.contains("debug", "using working directory"));
        assert!(logger.contains("info", "finished in"));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_aborts() {
        let mut handle = ProcessHandle::new();
        handle.exec_async("sleep", ["10"], SpawnOptions::default()).unwrap();

        // Wait until the child is spawned so there is a pid to signal.
        for _ in 0..100 {
            if handle.pid().is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.terminate().unwrap();

        let result = handle.wait_on_completion().unwrap();
        assert_eq!(handle.state(), ExecutionState::Aborted);
        assert!(!handle.exit_zero());
        assert_eq!(result.status.unwrap().signal, Some(15));
        assert_eq!(handle.terminate(), Err(Error::NotRunning));
    }
}
