use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use command_runner::batch::wait_for_all;
use command_runner::{ProcessHandle, SpawnOptions};
use std::time::Duration;

use crate::report::{cargo_handle, describe, ensure_success};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct CiArgs {
    #[command(subcommand)]
    cmd: CiCommand,
}

#[derive(Subcommand)]
pub enum CiCommand {
    /// Run all CI checks
    All,
    /// Format check (read-only)
    #[command(name = "fmt-check")]
    FmtCheck,
    /// Clippy lints
    Clippy,
    /// Cargo deny check
    Deny,
    /// Run unit tests only
    UnitTests,
    /// Run all tests
    IntegrationTests,
}

pub fn run(args: CiArgs, verbose: bool) -> Result<()> {
    match args.cmd {
        CiCommand::All => run_all(verbose),
        CiCommand::FmtCheck => run_check("fmt", &FMT, verbose),
        CiCommand::Clippy => run_check("clippy", &CLIPPY, verbose),
        CiCommand::Deny => run_check("deny", &DENY, verbose),
        CiCommand::UnitTests => run_check("unit tests", &UNIT_TESTS, verbose),
        CiCommand::IntegrationTests => {
            run_check("integration tests", &INTEGRATION_TESTS, verbose)
        }
    }
}

const FMT: [&str; 4] = ["fmt", "--all", "--", "--check"];
const CLIPPY: [&str; 7] = [
    "clippy",
    "--workspace",
    "--all-targets",
    "--all-features",
    "--",
    "-D",
    "warnings",
];
const DENY: [&str; 2] = ["deny", "check"];
const UNIT_TESTS: [&str; 4] = ["test", "--workspace", "--lib", "--bins"];
const INTEGRATION_TESTS: [&str; 3] = ["test", "--workspace", "--all-features"];

fn run_check(name: &str, args: &[&str], verbose: bool) -> Result<()> {
    let mut handle = cargo_handle(true, verbose);
    handle.exec_sync("cargo", args.iter().copied(), SpawnOptions::default())?;
    ensure_success(name, &handle)
}

fn run_all(verbose: bool) -> Result<()> {
    println!("Running all CI checks\n");

    // The read-only checks don't share build output, so they run side by
    // side with their output captured rather than interleaved.
    let mut checks: Vec<(&str, &[&str])> = vec![("fmt", &FMT[..]), ("clippy", &CLIPPY[..])];
    if cargo_deny_available() {
        checks.push(("deny", &DENY[..]));
    }

    let mut handles = Vec::with_capacity(checks.len());
    for (_, args) in &checks {
        let mut handle = cargo_handle(false, verbose);
        handle.exec_async("cargo", args.iter().copied(), SpawnOptions::default())?;
        handles.push(handle);
    }

    let mut report = |handle: &ProcessHandle| {
        let name = handles
            .iter()
            .position(|h| std::ptr::eq(h, handle))
            .map_or("check", |i| checks[i].0);
        println!("{}", describe(name, handle));
    };
    wait_for_all(&handles, POLL_INTERVAL, Some(&mut report));

    let failed: Vec<&str> = checks
        .iter()
        .zip(&handles)
        .filter(|(_, handle)| !handle.exit_zero())
        .map(|((name, _), handle)| {
            if let Some(result) = handle.result() {
                eprint!("{}", result.stdout);
                eprint!("{}", result.stderr);
            }
            *name
        })
        .collect();
    if !failed.is_empty() {
        bail!("CI checks failed: {}", failed.join(", "));
    }

    run_check("unit tests", &UNIT_TESTS, verbose)?;
    run_check("integration tests", &INTEGRATION_TESTS, verbose)?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn cargo_deny_available() -> bool {
    let mut handle = ProcessHandle::new();
    handle
        .exec_sync("cargo", ["deny", "--version"], SpawnOptions::default())
        .is_ok_and(|h| h.exit_zero())
}
