use anyhow::{bail, Result};
use command_runner::{ExecutionState, ProcessHandle, TracingLogger};

/// A handle that runs cargo, echoing its output as it arrives when `echo`
/// is set
pub fn cargo_handle(echo: bool, verbose: bool) -> ProcessHandle {
    let mut builder = ProcessHandle::builder();
    if echo {
        builder = builder
            .on_stdout(|line| print!("{}", line))
            .on_stderr(|line| eprint!("{}", line));
    }
    if verbose {
        builder = builder.logger(TracingLogger);
    }
    builder.build()
}

/// One-line human readable outcome of a finished handle
pub fn describe(name: &str, handle: &ProcessHandle) -> String {
    let Some(result) = handle.result() else {
        return format!("{}: not started", name);
    };
    let elapsed = result.wall_time_secs();
    match handle.state() {
        ExecutionState::Completed if handle.exit_zero() => {
            format!("{}: passed in {:.1}s", name, elapsed)
        }
        ExecutionState::Completed => format!(
            "{}: failed with exit code {} after {:.1}s",
            name,
            result.exit_code().unwrap_or(-1),
            elapsed
        ),
        ExecutionState::Aborted => format!(
            "{}: killed by signal {} after {:.1}s",
            name,
            result.status.and_then(|s| s.signal).unwrap_or(-1),
            elapsed
        ),
        ExecutionState::FailedToStart => format!(
            "{}: could not start `{}`: {}",
            name,
            result.invocation,
            result
                .exception
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        ),
        state => format!("{}: {}", name, state),
    }
}

/// Print the outcome and turn anything but a zero exit into an error
pub fn ensure_success(name: &str, handle: &ProcessHandle) -> Result<()> {
    let summary = describe(name, handle);
    if handle.exit_zero() {
        println!("{}", summary);
        Ok(())
    } else {
        eprintln!("{}", summary);
        bail!("{} failed", name);
    }
}
