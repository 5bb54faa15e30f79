mod ci;
mod report;
mod test;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development task runner for command-runner")]
struct Args {
    /// Print the engine's own diagnostics (honours RUST_LOG)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run CI checks
    Ci(ci::CiArgs),
    /// Run tests
    Test(test::TestArgs),
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "command_runner=debug".into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    match args.cmd {
        Command::Ci(ci_args) => ci::run(ci_args, args.verbose),
        Command::Test(test_args) => test::run(test_args, args.verbose),
    }
}
