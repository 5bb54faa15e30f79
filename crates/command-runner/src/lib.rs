//! Subprocess execution engine
//!
//! Runs external commands synchronously or asynchronously, captures stdout
//! and stderr while they run, and exposes a small execution state machine per
//! process. Batch helpers wait on whole pools of handles, optionally starting
//! replacements as handles finish.
//!
//! ```no_run
//! use command_runner::{batch, ProcessHandle, SpawnOptions};
//! use std::time::Duration;
//!
//! let handles = batch::run_bounded(1..=8, 3, Duration::from_millis(50), |n| {
//!     let mut handle = ProcessHandle::new();
//!     handle
//!         .exec_async("sleep", [format!("0.{}", n)], SpawnOptions::default())
//!         .expect("fresh handle");
//!     handle
//! });
//! assert!(handles.iter().all(|h| h.exit_zero()));
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod command;
pub mod config;
pub mod drain;
pub mod error;
pub mod handle;
pub mod logger;
mod runner;
pub mod status;

pub use command::{Environment, Invocation, ShellMode, SpawnOptions};
pub use config::HandleConfig;
pub use drain::{LineCallback, StreamDrainer};
pub use error::{Error, Result};
pub use handle::{Completion, ProcessHandle, ProcessHandleBuilder};
pub use logger::{LogSource, Logger, NoOpLogger, SharedLogger, TracingLogger};
pub use runner::TaskResult;
pub use status::{ExecutionState, ExitStatus};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, ignoring poisoning
///
/// A panicking line callback may poison an output buffer; what was written
/// before the panic is still the best record available.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
