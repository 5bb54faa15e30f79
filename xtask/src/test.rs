use anyhow::{bail, Result};
use clap::Args;
use command_runner::{ProcessHandle, SpawnOptions, TracingLogger};
use std::sync::{Arc, Mutex, PoisonError};

use crate::report::describe;

#[derive(Args)]
pub struct TestArgs {
    /// Package to test
    #[arg(short, long)]
    package: Option<String>,

    /// Features to enable
    #[arg(short, long)]
    features: Option<String>,

    /// Run all features
    #[arg(long)]
    all_features: bool,

    /// Test name filter
    filter: Option<String>,
}

pub fn run(args: TestArgs, verbose: bool) -> Result<()> {
    println!("Running tests\n");

    let mut cmd_args = vec!["test"];

    // Add package if specified
    if let Some(package) = &args.package {
        cmd_args.push("-p");
        cmd_args.push(package);
    } else {
        cmd_args.push("--workspace");
    }

    // Add features
    if args.all_features {
        cmd_args.push("--all-features");
    } else if let Some(features) = &args.features {
        cmd_args.push("--features");
        cmd_args.push(features);
    }

    cmd_args.push("--");
    if let Some(filter) = &args.filter {
        cmd_args.push(filter);
    }
    cmd_args.push("--nocapture");

    println!("Command: cargo {}", cmd_args.join(" "));
    println!();

    let summary = Arc::new(Mutex::new(TestSummary::default()));
    let mut builder = {
        let out = summary.clone();
        let err = summary.clone();
        ProcessHandle::builder()
            .on_stdout(move |line| {
                print!("{}", line);
                out.lock().unwrap_or_else(PoisonError::into_inner).parse_line(line);
            })
            .on_stderr(move |line| {
                eprint!("{}", line);
                err.lock().unwrap_or_else(PoisonError::into_inner).parse_line(line);
            })
    };
    if verbose {
        builder = builder.logger(TracingLogger);
    }

    let mut handle = builder.build();
    handle.exec_sync("cargo", cmd_args, SpawnOptions::default())?;

    let summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
    println!("\n{}", summary);
    println!("{}", describe("cargo test", &handle));

    if !handle.exit_zero() || summary.failed > 0 {
        bail!("Tests failed");
    }

    Ok(())
}

#[derive(Default)]
struct TestSummary {
    total: usize,
    passed: usize,
    failed: usize,
    ignored: usize,
}

impl TestSummary {
    fn parse_line(&mut self, line: &str) {
        if line.starts_with("test ") && line.contains(" ... ") {
            self.total += 1;
            if line.contains(" ... ok") {
                self.passed += 1;
            } else if line.contains(" ... FAILED") {
                self.failed += 1;
            } else if line.contains(" ... ignored") {
                self.ignored += 1;
            }
        }
    }
}

impl std::fmt::Display for TestSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.total > 0 {
            write!(
                f,
                "Test Summary: {} total, {} passed, {} failed, {} ignored",
                self.total, self.passed, self.failed, self.ignored
            )
        } else {
            write!(f, "No test results captured")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_results() {
        let mut summary = TestSummary::default();
        for line in [
            "running 3 tests\n",
            "test batch::tests::test_a ... ok\n",
            "test handle::tests::test_b ... FAILED\n",
            "test handle::tests::test_c ... ignored\n",
            "test result: FAILED. 1 passed; 1 failed; 1 ignored\n",
        ] {
            summary.parse_line(line);
        }
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ignored, 1);
    }
}
